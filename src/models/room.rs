//! Room model and lifecycle state machine helpers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::agent::AgentHandle;
use super::participant::Participant;

/// Lifecycle state for a coaching room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoomState {
    /// Room exists but has no live agent (freshly created or spawn failed).
    Empty,
    /// Agent process spawned; waiting for its own join event to confirm.
    Starting,
    /// Agent confirmed present, session running.
    Active,
    /// All humans left; agent kept alive pending reconnection.
    GracePeriod,
    /// Kill issued; the room is on its way out and never reopens.
    Closing,
}

impl RoomState {
    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Empty, Self::Starting)
                | (Self::Starting, Self::Active | Self::Empty | Self::Closing)
                | (Self::Active, Self::GracePeriod | Self::Starting | Self::Closing)
                | (Self::GracePeriod, Self::Active | Self::Starting | Self::Closing)
        )
    }
}

/// One coaching session's occupancy and agent state, keyed by room name.
#[derive(Debug, Clone)]
pub struct Room {
    /// Unique session key from the media transport.
    pub name: String,
    /// Current lifecycle state; mutated only by the coordinator.
    pub state: RoomState,
    /// Membership records keyed by transport identity.
    pub participants: HashMap<String, Participant>,
    /// Live agent process binding, at most one.
    pub agent: Option<AgentHandle>,
    /// When the room was created.
    pub created_at: DateTime<Utc>,
    /// Updated on every participant or agent event.
    pub last_activity_at: DateTime<Utc>,
    /// Set only while `state == GracePeriod`.
    pub grace_deadline: Option<DateTime<Utc>>,
    /// Consecutive spawn failures recorded while the room sat in EMPTY.
    pub spawn_failures: u32,
}

impl Room {
    /// Construct a fresh room in the EMPTY state.
    #[must_use]
    pub fn new(name: String) -> Self {
        let now = Utc::now();
        Self {
            name,
            state: RoomState::Empty,
            participants: HashMap::new(),
            agent: None,
            created_at: now,
            last_activity_at: now,
            grace_deadline: None,
            spawn_failures: 0,
        }
    }

    /// Count of non-agent participants currently recorded.
    #[must_use]
    pub fn human_count(&self) -> usize {
        self.participants
            .values()
            .filter(|p| p.role.is_human())
            .count()
    }

    /// Human participants currently recorded, cloned out of the room.
    #[must_use]
    pub fn humans(&self) -> Vec<Participant> {
        self.participants
            .values()
            .filter(|p| p.role.is_human())
            .cloned()
            .collect()
    }

    /// Mark activity now; called on every participant or agent event.
    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    /// Apply a lifecycle transition, refusing combinations the table forbids.
    ///
    /// Same-state writes are accepted as no-ops. An illegal transition leaves
    /// the state untouched and logs a warning — it indicates a coordinator
    /// bug, not an expected runtime condition.
    pub fn transition_to(&mut self, next: RoomState) {
        if self.state == next {
            return;
        }
        if self.state.can_transition_to(next) {
            self.state = next;
        } else {
            warn!(
                room = %self.name,
                from = ?self.state,
                to = ?next,
                "illegal state transition refused"
            );
        }
    }

    /// Enter the grace period with the given deadline.
    ///
    /// Only reachable from ACTIVE; anywhere else the room is left untouched
    /// and no deadline is recorded.
    pub fn enter_grace(&mut self, deadline: DateTime<Utc>) {
        self.transition_to(RoomState::GracePeriod);
        if self.state == RoomState::GracePeriod {
            self.grace_deadline = Some(deadline);
        }
    }

    /// Leave the grace period back to ACTIVE, clearing the deadline.
    pub fn cancel_grace(&mut self) {
        self.transition_to(RoomState::Active);
        if self.state == RoomState::Active {
            self.grace_deadline = None;
        }
    }

    /// Whether the grace deadline has passed at `now`.
    ///
    /// Always `false` outside the grace period.
    #[must_use]
    pub fn grace_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == RoomState::GracePeriod
            && self.grace_deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Seconds until the grace deadline, if the room is in its grace period.
    #[must_use]
    pub fn grace_remaining_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        self.grace_deadline
            .map(|deadline| (deadline - now).num_seconds().max(0))
    }
}
