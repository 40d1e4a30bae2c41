//! Participant membership records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role a participant plays inside a coaching room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    /// The human being coached.
    Client,
    /// An optional human coach observing or co-driving the session.
    Coach,
    /// The AI voice agent process bound to the room.
    Agent,
}

impl ParticipantRole {
    /// Whether this role counts toward a room's human occupancy.
    #[must_use]
    pub fn is_human(self) -> bool {
        !matches!(self, Self::Agent)
    }
}

/// Ephemeral membership record for one identity inside one room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Participant {
    /// Transport-level identity, unique within the room.
    pub identity: String,
    /// Display name shown to other participants.
    pub display_name: String,
    /// Role within the session.
    pub role: ParticipantRole,
    /// When the join event was recorded.
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    /// Construct a participant joined now.
    #[must_use]
    pub fn new(identity: String, display_name: String, role: ParticipantRole) -> Self {
        Self {
            identity,
            display_name,
            role,
            joined_at: Utc::now(),
        }
    }
}
