//! Agent process binding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Binding between a room and its live agent OS process.
///
/// Created by the supervisor on a successful spawn and dropped from the room
/// once the process is confirmed reaped — never left behind after exit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentHandle {
    /// OS process ID.
    pub pid: u32,
    /// Transport identity the process joins the room with (`ai-<uuid>`).
    pub identity: String,
    /// When the process was spawned.
    pub started_at: DateTime<Utc>,
    /// Most recent advisory heartbeat, if the agent sends them.
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// How many times this room's agent has been respawned after a crash.
    pub restart_count: u32,
}

impl AgentHandle {
    /// Construct a handle for a freshly spawned process.
    #[must_use]
    pub fn new(pid: u32, identity: String, restart_count: u32) -> Self {
        Self {
            pid,
            identity,
            started_at: Utc::now(),
            last_heartbeat_at: None,
            restart_count,
        }
    }
}
