//! Agent process supervisor.
//!
//! Owns the OS process table: spawning, killing, and reaping agent processes.
//! Each spawned child gets `kill_on_drop(true)` for safety and the
//! `ROOM_NAME` / `AGENT_IDENTITY` environment variables so it can join its
//! room on the media transport. No other component issues OS process calls.
//!
//! Exit notifications are produced by a poll task (`try_wait` on every
//! tracked child) and delivered through the coordinator's event queue, never
//! from an arbitrary callback context. The live set is always updated before
//! the notification is sent, so an exit is processed exactly once.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::events::LifecycleEvent;
use crate::models::agent::AgentHandle;

/// Interval between polls for child process exits.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Spawn rejection reasons. Non-fatal and never auto-retried here — the
/// coordinator decides retry policy.
#[derive(Debug)]
pub enum SpawnError {
    /// The global concurrent-agent ceiling has been reached.
    LimitReached {
        /// Live agent processes at the time of the request.
        live: usize,
        /// Configured ceiling.
        ceiling: u32,
    },
    /// The room already holds a live agent process.
    RoomAlreadyHasAgent {
        /// Room name.
        room: String,
    },
    /// OS-level spawn failure (missing binary, permissions). Indicates
    /// misconfiguration rather than load.
    Process(String),
}

impl Display for SpawnError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LimitReached { live, ceiling } => {
                write!(f, "agent ceiling reached ({live}/{ceiling})")
            }
            Self::RoomAlreadyHasAgent { room } => {
                write!(f, "room '{room}' already has a live agent")
            }
            Self::Process(msg) => write!(f, "process spawn failed: {msg}"),
        }
    }
}

impl std::error::Error for SpawnError {}

/// A tracked child process and the room it belongs to.
#[derive(Debug)]
struct TrackedChild {
    room: String,
    child: Child,
}

/// Thread-safe live-process table keyed by pid.
type LiveSet = Arc<Mutex<HashMap<u32, TrackedChild>>>;

/// Spawns, kills, and reaps agent OS processes.
#[derive(Clone)]
pub struct ProcessSupervisor {
    config: Arc<GlobalConfig>,
    events: mpsc::Sender<LifecycleEvent>,
    live: LiveSet,
}

impl ProcessSupervisor {
    /// Construct a supervisor reporting exits onto the given event queue.
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>, events: mpsc::Sender<LifecycleEvent>) -> Self {
        Self {
            config,
            events,
            live: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Spawn the agent process for `room` with the given transport identity.
    ///
    /// The ceiling and per-room checks happen under the live-set lock so
    /// concurrent requests cannot overshoot the configured maximum.
    ///
    /// # Errors
    ///
    /// Returns [`SpawnError::LimitReached`] at the global ceiling,
    /// [`SpawnError::RoomAlreadyHasAgent`] for a duplicate room request, or
    /// [`SpawnError::Process`] on OS-level failure.
    pub async fn spawn(
        &self,
        room: &str,
        identity: &str,
        restart_count: u32,
    ) -> std::result::Result<AgentHandle, SpawnError> {
        let span = info_span!("spawn_agent", room, identity);
        async {
            let mut live = self.live.lock().await;

            if live.len() >= self.config.agent.max_agents as usize {
                return Err(SpawnError::LimitReached {
                    live: live.len(),
                    ceiling: self.config.agent.max_agents,
                });
            }

            if live.values().any(|tracked| tracked.room == room) {
                return Err(SpawnError::RoomAlreadyHasAgent {
                    room: room.to_owned(),
                });
            }

            let mut cmd = Command::new(&self.config.agent.binary);
            cmd.args(&self.config.agent.args)
                .env("ROOM_NAME", room)
                .env("AGENT_IDENTITY", identity)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            let mut child = cmd
                .spawn()
                .map_err(|err| SpawnError::Process(err.to_string()))?;

            let Some(pid) = child.id() else {
                // Exited before we could observe a pid; the poll loop would
                // have nothing to track, so reap it inline.
                let _ = child.wait().await;
                return Err(SpawnError::Process("child exited during spawn".into()));
            };

            forward_output(&mut child, room, pid);

            info!(
                room,
                pid,
                binary = %self.config.agent.binary,
                restart_count,
                "agent process spawned"
            );

            live.insert(
                pid,
                TrackedChild {
                    room: room.to_owned(),
                    child,
                },
            );

            Ok(AgentHandle::new(pid, identity.to_owned(), restart_count))
        }
        .instrument(span)
        .await
    }

    /// Request a graceful kill of a tracked process.
    ///
    /// The pid is removed from the live set immediately; a background task
    /// sends SIGTERM, waits out the kill-grace window, escalates to SIGKILL
    /// if needed, and reports [`LifecycleEvent::AgentKillConfirmed`].
    /// Unknown pids are a no-op.
    pub async fn kill(&self, pid: u32) {
        let Some(tracked) = self.live.lock().await.remove(&pid) else {
            warn!(pid, "kill requested for untracked pid");
            return;
        };

        let grace = self.config.kill_grace();
        let events = self.events.clone();
        tokio::spawn(async move {
            let room = tracked.room.clone();
            terminate(tracked, grace).await;
            let _ = events
                .send(LifecycleEvent::AgentKillConfirmed { room, pid })
                .await;
        });
    }

    /// Force-kill a process the GC found unreferenced by any room.
    ///
    /// Same escalation path as [`kill`](Self::kill) but no confirmation event
    /// is emitted — no room is waiting on it. Returns `false` for unknown pids.
    pub async fn reap_orphan(&self, pid: u32) -> bool {
        let Some(tracked) = self.live.lock().await.remove(&pid) else {
            return false;
        };

        warn!(pid, room = %tracked.room, "reaping orphaned agent process");
        let grace = self.config.kill_grace();
        tokio::spawn(async move {
            terminate(tracked, grace).await;
        });
        true
    }

    /// Drop a pid from the live set without killing it.
    ///
    /// Used by the health sweep when the OS reports the process dead but no
    /// exit notification has been delivered yet. Returns the room the pid was
    /// bound to. Reaps the zombie entry best-effort.
    pub async fn forget(&self, pid: u32) -> Option<String> {
        let mut tracked = self.live.lock().await.remove(&pid)?;
        let _ = tracked.child.try_wait();
        Some(tracked.room)
    }

    /// OS-level liveness probe for a pid, independent of heartbeats.
    #[must_use]
    pub fn is_alive(&self, pid: u32) -> bool {
        #[cfg(unix)]
        {
            // Signal 0 probes for existence without delivering anything.
            nix::sys::signal::kill(unix_pid(pid), None).is_ok()
        }
        #[cfg(not(unix))]
        {
            let _ = pid;
            true
        }
    }

    /// Pids of all currently tracked processes.
    pub async fn live_pids(&self) -> Vec<u32> {
        self.live.lock().await.keys().copied().collect()
    }

    /// Number of currently tracked processes.
    pub async fn live_count(&self) -> usize {
        self.live.lock().await.len()
    }

    /// Kill every tracked process and wait for all of them to be reaped.
    ///
    /// Teardown path used on shutdown; no confirmation events are emitted.
    pub async fn kill_all(&self) {
        let drained: Vec<(u32, TrackedChild)> = self.live.lock().await.drain().collect();
        if drained.is_empty() {
            return;
        }

        info!(count = drained.len(), "killing all tracked agent processes");
        let grace = self.config.kill_grace();
        let mut handles = Vec::with_capacity(drained.len());
        for (_, tracked) in drained {
            handles.push(tokio::spawn(terminate(tracked, grace)));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Spawn the background task that polls tracked children for exits.
    ///
    /// Exited pids are removed from the live set first, then reported as
    /// [`LifecycleEvent::AgentExited`] so a pid can never be processed twice.
    #[must_use]
    pub fn spawn_exit_poller(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let live = Arc::clone(&self.live);
        let events = self.events.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("exit poller shutting down");
                        break;
                    }
                    () = tokio::time::sleep(EXIT_POLL_INTERVAL) => {}
                }

                poll_exits(&live, &events).await;
            }
        })
    }
}

/// Check all tracked children for exits and report them.
async fn poll_exits(live: &LiveSet, events: &mpsc::Sender<LifecycleEvent>) {
    let mut guard = live.lock().await;
    let mut exited: Vec<(u32, String, Option<std::process::ExitStatus>)> = Vec::new();

    for (pid, tracked) in guard.iter_mut() {
        match tracked.child.try_wait() {
            Ok(Some(status)) => exited.push((*pid, tracked.room.clone(), Some(status))),
            Ok(None) => {}
            Err(err) => {
                warn!(pid, room = %tracked.room, %err, "failed to poll child status");
                // Treat as exited to clean up the dead entry.
                exited.push((*pid, tracked.room.clone(), None));
            }
        }
    }

    // Accounting first: remove from the live set before notifying.
    for (pid, _, _) in &exited {
        guard.remove(pid);
    }
    drop(guard);

    for (pid, room, status) in exited {
        let exit_code = status.and_then(|s| s.code());
        let clean = status.is_some_and(|s| s.success());
        info!(room = %room, pid, ?exit_code, clean, "agent process exited");
        let _ = events
            .send(LifecycleEvent::AgentExited {
                room,
                pid,
                exit_code,
                clean,
            })
            .await;
    }
}

/// Graceful termination with escalation: SIGTERM, wait out the grace window,
/// then SIGKILL. The escalation window is a supervisor property, independent
/// of the room grace period.
async fn terminate(mut tracked: TrackedChild, grace: Duration) {
    let room = tracked.room;
    let pid = tracked.child.id();

    #[cfg(unix)]
    if let Some(pid) = pid {
        let _ = nix::sys::signal::kill(unix_pid(pid), nix::sys::signal::Signal::SIGTERM);
    }

    match tokio::time::timeout(grace, tracked.child.wait()).await {
        Ok(Ok(status)) => {
            info!(room = %room, ?pid, ?status, "agent exited after graceful signal");
        }
        Ok(Err(err)) => {
            warn!(room = %room, ?pid, %err, "error waiting for agent process");
        }
        Err(_) => {
            warn!(room = %room, ?pid, "agent ignored graceful signal, escalating to kill");
            if let Err(err) = tracked.child.kill().await {
                warn!(room = %room, ?pid, %err, "failed to force-kill agent process");
            }
            let _ = tracked.child.wait().await;
        }
    }
}

/// Convert an OS pid into the signed form `nix` expects.
#[cfg(unix)]
fn unix_pid(pid: u32) -> nix::unistd::Pid {
    #[allow(clippy::cast_possible_wrap)] // Real pids fit comfortably in i32.
    nix::unistd::Pid::from_raw(pid as i32)
}

/// Forward child stdout/stderr lines as structured log events tagged with the
/// room name. Observational only — output is never parsed for control.
fn forward_output(child: &mut Child, room: &str, pid: u32) {
    if let Some(stdout) = child.stdout.take() {
        let room = room.to_owned();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(room = %room, pid, line = %line, "agent stdout");
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        let room = room.to_owned();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(room = %room, pid, line = %line, "agent stderr");
            }
        });
    }
}
