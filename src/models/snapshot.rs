//! Read-only projections served by the query API.
//!
//! Consumers of these types see state (counts, restart counters), never
//! propagated errors — failures stay inside the coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::room::{Room, RoomState};

/// Agent process summary inside a [`RoomSnapshot`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentSnapshot {
    /// OS process ID.
    pub pid: u32,
    /// Transport identity of the agent.
    pub identity: String,
    /// Crash respawn counter for this room.
    pub restart_count: u32,
}

/// Point-in-time view of one room for operators and monitoring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RoomSnapshot {
    /// Room name.
    pub name: String,
    /// Current lifecycle state.
    pub state: RoomState,
    /// Non-agent participants currently recorded.
    pub human_count: usize,
    /// Agent process, if one is bound.
    pub agent: Option<AgentSnapshot>,
    /// Seconds left in the reconnection window, if in grace period.
    pub grace_remaining_seconds: Option<i64>,
    /// Consecutive spawn failures while the room sat in EMPTY.
    pub spawn_failures: u32,
}

impl RoomSnapshot {
    /// Project a snapshot from a room at time `now`.
    #[must_use]
    pub fn of(room: &Room, now: DateTime<Utc>) -> Self {
        Self {
            name: room.name.clone(),
            state: room.state,
            human_count: room.human_count(),
            agent: room.agent.as_ref().map(|a| AgentSnapshot {
                pid: a.pid,
                identity: a.identity.clone(),
                restart_count: a.restart_count,
            }),
            grace_remaining_seconds: room.grace_remaining_seconds(now),
            spawn_failures: room.spawn_failures,
        }
    }
}

/// Aggregate counters across all rooms.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LifecycleStats {
    /// All rooms currently in the registry.
    pub total_rooms: usize,
    /// Rooms in ACTIVE.
    pub active_rooms: usize,
    /// Rooms in STARTING.
    pub starting_rooms: usize,
    /// Rooms in GRACE_PERIOD.
    pub grace_rooms: usize,
    /// Rooms in CLOSING.
    pub closing_rooms: usize,
    /// Live agent processes across all rooms.
    pub total_agents: usize,
}

/// Result of one garbage-collection sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GcReport {
    /// Grace-period rooms whose deadline expired and were driven to CLOSING.
    pub expired: usize,
    /// Stale EMPTY rooms removed outright.
    pub stale_removed: usize,
    /// Inconsistent rooms (agent alive, no humans, not in grace) corrected.
    pub corrected: usize,
    /// Live processes unreferenced by any room that were reaped.
    pub orphans_reaped: usize,
}

impl GcReport {
    /// Whether the sweep changed anything at all.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.expired == 0
            && self.stale_removed == 0
            && self.corrected == 0
            && self.orphans_reaped == 0
    }
}
