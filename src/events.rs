//! The single event vocabulary consumed by the coordinator.
//!
//! Every producer — HTTP ingress, GC ticker, health ticker, supervisor exit
//! poll, control API — enqueues one of these onto the coordinator's queue.
//! Nothing mutates room state from its own execution context, so two events
//! for the same room can never interleave into an inconsistent state.

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::models::participant::ParticipantRole;
use crate::models::snapshot::{GcReport, LifecycleStats, RoomSnapshot};

/// Work item for the coordinator task.
#[derive(Debug)]
pub enum LifecycleEvent {
    /// A participant joined a room on the media transport.
    ParticipantJoined {
        /// Room name.
        room: String,
        /// Transport identity of the participant.
        identity: String,
        /// Display name shown to other participants.
        display_name: String,
        /// Role within the session.
        role: ParticipantRole,
    },
    /// A participant left a room on the media transport.
    ParticipantLeft {
        /// Room name.
        room: String,
        /// Transport identity of the participant.
        identity: String,
    },
    /// The transport closed the room server-side; treated as a force-close.
    RoomFinished {
        /// Room name.
        room: String,
    },
    /// Advisory liveness ping from an agent process; never authoritative.
    Heartbeat {
        /// Room name.
        room: String,
        /// Agent identity claimed by the sender.
        identity: String,
        /// Timestamp supplied by the agent, defaulting to receipt time.
        timestamp: Option<DateTime<Utc>>,
    },
    /// A tracked agent process exited; emitted by the supervisor's exit poll
    /// after the pid has already been removed from the live set.
    AgentExited {
        /// Room the process was bound to.
        room: String,
        /// OS process ID.
        pid: u32,
        /// Exit code, absent when the process died to a signal.
        exit_code: Option<i32>,
        /// Whether the exit status was clean (code 0).
        clean: bool,
    },
    /// A requested kill has completed (graceful or escalated).
    AgentKillConfirmed {
        /// Room the kill was issued for.
        room: String,
        /// OS process ID that was reaped.
        pid: u32,
    },
    /// Delayed respawn after a crash, scheduled with backoff.
    RestartAgent {
        /// Room to respawn the agent for.
        room: String,
        /// 1-based restart attempt number.
        attempt: u32,
    },
    /// Run one garbage-collection sweep; reply carries the sweep report.
    GcSweep {
        /// Present when the sweep was triggered manually via the control API.
        reply: Option<oneshot::Sender<GcReport>>,
    },
    /// Run one agent liveness check.
    HealthSweep,
    /// Query: snapshot every room.
    ListRooms {
        /// Reply channel.
        reply: oneshot::Sender<Vec<RoomSnapshot>>,
    },
    /// Query: aggregate counters.
    Stats {
        /// Reply channel.
        reply: oneshot::Sender<LifecycleStats>,
    },
    /// Operator command: drive a named room to CLOSING regardless of state.
    ForceClose {
        /// Room name.
        room: String,
        /// Reply is `false` when the room does not exist.
        reply: oneshot::Sender<bool>,
    },
}
