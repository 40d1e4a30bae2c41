//! Lifecycle coordinator — the room state machine.
//!
//! One actor task owns the [`RoomRegistry`] and performs every `Room`
//! mutation. Occupancy events, sweep ticks, exit notifications, and operator
//! commands all arrive through the same `mpsc` queue and are processed in
//! arrival order per room, so "human leaves" and "agent crashes" landing in
//! quick succession cannot race into an inconsistent state.
//!
//! Grace-period cancellation is a state write: the GC re-reads deadlines on
//! every sweep, so rejoining a room is just clearing a field — there is no
//! per-room timer to find and cancel.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::GlobalConfig;
use crate::events::LifecycleEvent;
use crate::models::participant::{Participant, ParticipantRole};
use crate::models::room::RoomState;
use crate::models::snapshot::{GcReport, LifecycleStats, RoomSnapshot};
use crate::registry::RoomRegistry;
use crate::supervisor::{ProcessSupervisor, SpawnError};
use crate::{AppError, Result};

/// Bound on queued events before producers back-pressure.
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Cloneable producer handle onto the coordinator's event queue.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<LifecycleEvent>,
}

impl CoordinatorHandle {
    /// Wrap an event sender.
    #[must_use]
    pub fn new(tx: mpsc::Sender<LifecycleEvent>) -> Self {
        Self { tx }
    }

    /// Enqueue an event, best-effort.
    ///
    /// Ingress must never fail because of downstream state; a closed queue
    /// (coordinator shut down) is logged and swallowed.
    pub async fn dispatch(&self, event: LifecycleEvent) {
        if self.tx.send(event).await.is_err() {
            warn!("lifecycle coordinator is gone; event dropped");
        }
    }

    /// Snapshot every room.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Http` if the coordinator has shut down.
    pub async fn list_rooms(&self) -> Result<Vec<RoomSnapshot>> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(LifecycleEvent::ListRooms { reply }).await;
        rx.await
            .map_err(|_| AppError::Http("lifecycle coordinator unavailable".into()))
    }

    /// Aggregate counters across all rooms.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Http` if the coordinator has shut down.
    pub async fn stats(&self) -> Result<LifecycleStats> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(LifecycleEvent::Stats { reply }).await;
        rx.await
            .map_err(|_| AppError::Http("lifecycle coordinator unavailable".into()))
    }

    /// Force-close a named room.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown room, or `AppError::Http`
    /// if the coordinator has shut down.
    pub async fn force_close(&self, room: &str) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(LifecycleEvent::ForceClose {
            room: room.to_owned(),
            reply,
        })
        .await;
        let known = rx
            .await
            .map_err(|_| AppError::Http("lifecycle coordinator unavailable".into()))?;
        if known {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("room '{room}'")))
        }
    }

    /// Run one garbage-collection sweep and return its report.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Http` if the coordinator has shut down.
    pub async fn trigger_gc(&self) -> Result<GcReport> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(LifecycleEvent::GcSweep { reply: Some(reply) })
            .await;
        rx.await
            .map_err(|_| AppError::Http("lifecycle coordinator unavailable".into()))
    }
}

/// The serialized room state machine.
pub struct LifecycleCoordinator {
    config: Arc<GlobalConfig>,
    registry: RoomRegistry,
    supervisor: ProcessSupervisor,
    rx: mpsc::Receiver<LifecycleEvent>,
    /// Loopback sender for delayed events (crash-restart backoff).
    self_tx: mpsc::Sender<LifecycleEvent>,
    cancel: CancellationToken,
}

impl LifecycleCoordinator {
    /// Construct the coordinator over an event queue.
    ///
    /// `self_tx` must be a sender for the same queue `rx` drains.
    #[must_use]
    pub fn new(
        config: Arc<GlobalConfig>,
        supervisor: ProcessSupervisor,
        rx: mpsc::Receiver<LifecycleEvent>,
        self_tx: mpsc::Sender<LifecycleEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            registry: RoomRegistry::new(),
            supervisor,
            rx,
            self_tx,
            cancel,
        }
    }

    /// Run the coordinator until cancelled, then tear down every agent.
    ///
    /// Teardown is explicit: on shutdown all tracked agent processes are
    /// killed before the task exits.
    #[must_use]
    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = self.cancel.cancelled() => {
                        info!("lifecycle coordinator shutting down");
                        break;
                    }
                    event = self.rx.recv() => {
                        match event {
                            Some(event) => self.handle_event(event).await,
                            None => break,
                        }
                    }
                }
            }

            self.supervisor.kill_all().await;
        })
    }

    /// Single dispatch point for every state transition.
    async fn handle_event(&mut self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::ParticipantJoined {
                room,
                identity,
                display_name,
                role,
            } => {
                self.on_participant_joined(&room, identity, display_name, role)
                    .await;
            }
            LifecycleEvent::ParticipantLeft { room, identity } => {
                self.on_participant_left(&room, &identity);
            }
            LifecycleEvent::RoomFinished { room } => {
                info!(room = %room, "transport finished room, force-closing");
                self.begin_close(&room).await;
            }
            LifecycleEvent::Heartbeat {
                room,
                identity,
                timestamp,
            } => {
                self.on_heartbeat(&room, &identity, timestamp);
            }
            LifecycleEvent::AgentExited {
                room,
                pid,
                exit_code,
                clean,
            } => {
                self.on_agent_exited(&room, pid, exit_code, clean).await;
            }
            LifecycleEvent::AgentKillConfirmed { room, pid } => {
                self.on_kill_confirmed(&room, pid).await;
            }
            LifecycleEvent::RestartAgent { room, attempt } => {
                self.on_restart_agent(&room, attempt).await;
            }
            LifecycleEvent::GcSweep { reply } => {
                let report = self.gc_sweep().instrument(info_span!("gc_sweep")).await;
                if let Some(reply) = reply {
                    let _ = reply.send(report);
                }
            }
            LifecycleEvent::HealthSweep => {
                self.health_sweep().await;
            }
            LifecycleEvent::ListRooms { reply } => {
                let now = Utc::now();
                let mut snapshots: Vec<RoomSnapshot> = self
                    .registry
                    .all()
                    .map(|room| RoomSnapshot::of(room, now))
                    .collect();
                snapshots.sort_by(|a, b| a.name.cmp(&b.name));
                let _ = reply.send(snapshots);
            }
            LifecycleEvent::Stats { reply } => {
                let stats = self.stats().await;
                let _ = reply.send(stats);
            }
            LifecycleEvent::ForceClose { room, reply } => {
                let known = self.registry.get(&room).is_some();
                if known {
                    info!(room = %room, "operator force-close");
                    self.begin_close(&room).await;
                }
                let _ = reply.send(known);
            }
        }
    }

    // ── Occupancy transitions ───────────────────────────────────────────

    async fn on_participant_joined(
        &mut self,
        room_name: &str,
        identity: String,
        display_name: String,
        role: ParticipantRole,
    ) {
        let is_new = self.registry.get(room_name).is_none();
        let room = self.registry.get_or_create(room_name);
        room.touch();

        if room.participants.contains_key(&identity) {
            // Duplicate delivery; occupancy is already recorded.
            debug!(room = %room_name, identity = %identity, "duplicate join ignored");
            return;
        }

        room.participants.insert(
            identity.clone(),
            Participant::new(identity.clone(), display_name, role),
        );

        if role == ParticipantRole::Agent {
            self.on_agent_joined(room_name, &identity);
            return;
        }

        let state = self.registry.get(room_name).map(|r| r.state);
        match state {
            Some(RoomState::Empty) => {
                if is_new {
                    info!(room = %room_name, identity = %identity, "first participant, creating room");
                }
                self.try_spawn(room_name, 0).await;
            }
            Some(RoomState::GracePeriod) => {
                if let Some(room) = self.registry.get_mut(room_name) {
                    room.cancel_grace();
                    info!(room = %room_name, identity = %identity, "human rejoined, grace cancelled");
                }
            }
            Some(RoomState::Closing) => {
                // A closing room never reopens; the join is recorded and the
                // room is recreated once the kill confirms.
                info!(
                    room = %room_name,
                    identity = %identity,
                    "join while closing recorded, room will be recreated"
                );
            }
            _ => {}
        }
    }

    /// The agent's own join event, which confirms STARTING → ACTIVE.
    fn on_agent_joined(&mut self, room_name: &str, identity: &str) {
        let Some(room) = self.registry.get_mut(room_name) else {
            return;
        };

        let expected = room.agent.as_ref().map(|a| a.identity.clone());
        if expected.as_deref() != Some(identity) {
            warn!(
                room = %room_name,
                identity = %identity,
                ?expected,
                "join from unexpected agent identity"
            );
            return;
        }

        if room.state == RoomState::Starting {
            room.transition_to(RoomState::Active);
            info!(room = %room_name, identity = %identity, "agent joined, room active");

            // Humans may have left while the agent was still starting; start
            // the reconnection window instead of idling in ACTIVE.
            if room.human_count() == 0 {
                let deadline = grace_deadline(&self.config, Utc::now());
                room.enter_grace(deadline);
                info!(room = %room_name, "no humans present, entering grace period");
            }
        }
    }

    fn on_participant_left(&mut self, room_name: &str, identity: &str) {
        let Some(room) = self.registry.get_mut(room_name) else {
            debug!(room = %room_name, "leave for unknown room ignored");
            return;
        };
        room.touch();

        let Some(removed) = room.participants.remove(identity) else {
            // Never recorded as joined; a no-op, not an error.
            debug!(room = %room_name, identity = %identity, "leave for unknown identity ignored");
            return;
        };

        if removed.role.is_human()
            && room.human_count() == 0
            && room.state == RoomState::Active
        {
            let deadline = grace_deadline(&self.config, Utc::now());
            room.enter_grace(deadline);
            info!(
                room = %room_name,
                grace_seconds = self.config.lifecycle.grace_period_seconds,
                "last human left, grace period started"
            );
        }
    }

    fn on_heartbeat(
        &mut self,
        room_name: &str,
        identity: &str,
        timestamp: Option<chrono::DateTime<Utc>>,
    ) {
        let Some(room) = self.registry.get_mut(room_name) else {
            debug!(room = %room_name, "heartbeat for unknown room ignored");
            return;
        };

        match room.agent.as_mut() {
            Some(agent) if agent.identity == identity => {
                agent.last_heartbeat_at = Some(timestamp.unwrap_or_else(Utc::now));
                room.touch();
            }
            _ => {
                debug!(room = %room_name, identity = %identity, "heartbeat from unknown agent ignored");
            }
        }
    }

    // ── Process-exit transitions ────────────────────────────────────────

    async fn on_agent_exited(
        &mut self,
        room_name: &str,
        pid: u32,
        exit_code: Option<i32>,
        clean: bool,
    ) {
        let Some(room) = self.registry.get_mut(room_name) else {
            debug!(room = %room_name, pid, "exit for unknown room ignored");
            return;
        };

        let Some(agent) = room.agent.take() else {
            debug!(room = %room_name, pid, "exit with no agent bound ignored");
            return;
        };

        if agent.pid != pid {
            // Stale notification for a previous incarnation; rebind and skip.
            debug!(room = %room_name, pid, current = agent.pid, "stale exit ignored");
            room.agent = Some(agent);
            return;
        }

        room.participants.remove(&agent.identity);
        room.touch();

        if room.state == RoomState::Closing {
            // The exit raced an in-flight kill and claimed the pid first, so
            // no kill confirmation will arrive. The exit doubles as that
            // confirmation; a closing room never re-enters the restart path.
            info!(room = %room_name, pid, ?exit_code, "agent exited while closing, completing close");
            self.finish_close(room_name).await;
            return;
        }

        let humans = room.human_count();

        if humans == 0 {
            info!(room = %room_name, pid, ?exit_code, "agent exited with no humans present, closing");
            room.transition_to(RoomState::Closing);
            room.grace_deadline = None;
            self.remove_room(room_name).await;
            return;
        }

        if clean {
            // The agent ended the session deliberately; no restart.
            info!(room = %room_name, pid, "agent exited cleanly with humans present, closing");
            room.transition_to(RoomState::Closing);
            room.grace_deadline = None;
            self.remove_room(room_name).await;
            return;
        }

        let attempt = agent.restart_count + 1;
        if attempt > self.config.agent.max_restarts {
            warn!(
                room = %room_name,
                pid,
                ?exit_code,
                max_restarts = self.config.agent.max_restarts,
                "restart budget exhausted, closing room"
            );
            room.transition_to(RoomState::Closing);
            room.grace_deadline = None;
            self.remove_room(room_name).await;
            return;
        }

        warn!(
            room = %room_name,
            pid,
            ?exit_code,
            attempt,
            "agent crashed with humans present, scheduling respawn"
        );
        room.transition_to(RoomState::Starting);
        room.grace_deadline = None;

        let backoff = self.config.restart_backoff(attempt);
        let tx = self.self_tx.clone();
        let room_name = room_name.to_owned();
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            let _ = tx
                .send(LifecycleEvent::RestartAgent {
                    room: room_name,
                    attempt,
                })
                .await;
        });
    }

    async fn on_restart_agent(&mut self, room_name: &str, attempt: u32) {
        let Some(room) = self.registry.get(room_name) else {
            debug!(room = %room_name, "restart for removed room skipped");
            return;
        };

        if room.agent.is_some() || room.state != RoomState::Starting {
            debug!(room = %room_name, state = ?room.state, "restart no longer applicable");
            return;
        }

        if room.human_count() == 0 {
            info!(room = %room_name, "humans left during restart backoff, closing");
            self.remove_room(room_name).await;
            return;
        }

        self.try_spawn(room_name, attempt).await;
    }

    async fn on_kill_confirmed(&mut self, room_name: &str, pid: u32) {
        if self.registry.get(room_name).is_none() {
            debug!(room = %room_name, pid, "kill confirmed for unknown room");
            return;
        }

        info!(room = %room_name, pid, "kill confirmed");
        self.finish_close(room_name).await;
    }

    /// Complete a close: drop the room from the registry and replay any
    /// humans still present on the transport through the normal join path so
    /// a fresh room and agent are created.
    async fn finish_close(&mut self, room_name: &str) {
        let Some(room) = self.registry.remove(room_name) else {
            return;
        };

        info!(room = %room_name, state = ?room.state, "room removed from registry");

        let rejoined = room.humans();
        if rejoined.is_empty() {
            return;
        }

        info!(
            room = %room_name,
            count = rejoined.len(),
            "participants present after close, recreating room"
        );
        for participant in rejoined {
            self.on_participant_joined(
                room_name,
                participant.identity,
                participant.display_name,
                participant.role,
            )
            .await;
        }
    }

    // ── Spawn path ──────────────────────────────────────────────────────

    /// Request an agent process for a room sitting in EMPTY (or re-entering
    /// STARTING on restart). Success moves the room to STARTING; failure
    /// returns it to EMPTY without an immediate retry — the next occupancy
    /// event may try again.
    async fn try_spawn(&mut self, room_name: &str, restart_count: u32) {
        let identity = format!("ai-{}", Uuid::new_v4());

        match self
            .supervisor
            .spawn(room_name, &identity, restart_count)
            .await
        {
            Ok(handle) => {
                if let Some(room) = self.registry.get_mut(room_name) {
                    room.transition_to(RoomState::Starting);
                    room.agent = Some(handle);
                    room.spawn_failures = 0;
                }
            }
            Err(err @ SpawnError::LimitReached { .. }) => {
                warn!(room = %room_name, %err, "spawn rejected by agent ceiling");
                if let Some(room) = self.registry.get_mut(room_name) {
                    room.transition_to(RoomState::Empty);
                    room.spawn_failures += 1;
                }
            }
            Err(err @ SpawnError::RoomAlreadyHasAgent { .. }) => {
                warn!(room = %room_name, %err, "spawn rejected, agent already live");
            }
            Err(err @ SpawnError::Process(_)) => {
                // Misconfiguration rather than load; log loud, stay EMPTY.
                tracing::error!(room = %room_name, %err, "agent spawn failed");
                if let Some(room) = self.registry.get_mut(room_name) {
                    room.transition_to(RoomState::Empty);
                    room.spawn_failures += 1;
                }
            }
        }
    }

    // ── Close path ──────────────────────────────────────────────────────

    /// Drive a room toward removal: kill its agent if one is live, otherwise
    /// remove it outright. Idempotent for rooms already in CLOSING.
    async fn begin_close(&mut self, room_name: &str) {
        let Some(room) = self.registry.get_mut(room_name) else {
            return;
        };

        if room.state == RoomState::Closing {
            return;
        }

        room.grace_deadline = None;

        if let Some(agent) = room.agent.as_ref() {
            let pid = agent.pid;
            room.transition_to(RoomState::Closing);
            self.supervisor.kill(pid).await;
        } else {
            self.remove_room(room_name).await;
        }
    }

    /// Terminal transition: drop the room from the registry.
    async fn remove_room(&mut self, room_name: &str) {
        if self.registry.remove(room_name).is_some() {
            info!(room = %room_name, "room removed from registry");
        }
    }

    // ── Sweeps ──────────────────────────────────────────────────────────

    /// One garbage-collection pass. Running it twice in a row with no
    /// intervening events produces no additional state changes.
    async fn gc_sweep(&mut self) -> GcReport {
        let now = Utc::now();
        let stale_cutoff =
            now - chrono::Duration::seconds(
                i64::try_from(self.config.lifecycle.stale_room_seconds).unwrap_or(300),
            );
        let mut report = GcReport::default();

        for name in self.registry.names() {
            let Some(room) = self.registry.get(&name) else {
                continue;
            };

            if room.grace_expired(now) {
                info!(room = %name, "grace period expired, closing");
                self.begin_close(&name).await;
                report.expired += 1;
                continue;
            }

            if room.state == RoomState::Empty
                && room.agent.is_none()
                && room.last_activity_at < stale_cutoff
            {
                info!(room = %name, "stale empty room removed");
                self.remove_room(&name).await;
                report.stale_removed += 1;
                continue;
            }

            // Missed-event correction: a live agent with zero humans outside
            // the grace period should not exist.
            if room.agent.is_some()
                && room.human_count() == 0
                && matches!(room.state, RoomState::Active | RoomState::Starting)
            {
                warn!(room = %name, state = ?room.state, "agent alive with no humans, closing");
                self.begin_close(&name).await;
                report.corrected += 1;
            }
        }

        // Reconcile the supervisor's process table against room references.
        let referenced: Vec<u32> = self
            .registry
            .all()
            .filter_map(|room| room.agent.as_ref().map(|a| a.pid))
            .collect();
        for pid in self.supervisor.live_pids().await {
            if !referenced.contains(&pid) && self.supervisor.reap_orphan(pid).await {
                report.orphans_reaped += 1;
            }
        }

        if report.is_noop() {
            debug!("gc sweep made no changes");
        } else {
            info!(
                expired = report.expired,
                stale_removed = report.stale_removed,
                corrected = report.corrected,
                orphans_reaped = report.orphans_reaped,
                "gc sweep completed"
            );
        }

        report
    }

    /// One liveness pass over every tracked agent process.
    ///
    /// Trusts the OS, not heartbeats: a stale heartbeat on a live process is
    /// logged only, while a dead-but-unreported process is folded into the
    /// normal unexpected-exit path.
    async fn health_sweep(&mut self) {
        let now = Utc::now();
        let stale_cutoff =
            now - chrono::Duration::seconds(
                i64::try_from(self.config.lifecycle.heartbeat_stale_seconds).unwrap_or(45),
            );

        let tracked: Vec<(String, u32, Option<chrono::DateTime<Utc>>)> = self
            .registry
            .all()
            .filter_map(|room| {
                room.agent
                    .as_ref()
                    .map(|a| (room.name.clone(), a.pid, a.last_heartbeat_at))
            })
            .collect();

        for (room_name, pid, last_heartbeat) in tracked {
            if self.supervisor.is_alive(pid) {
                if let Some(heartbeat) = last_heartbeat {
                    if heartbeat < stale_cutoff {
                        // A merely-slow agent is not killed over heartbeats.
                        warn!(
                            room = %room_name,
                            pid,
                            last_heartbeat = %heartbeat,
                            "agent heartbeat stale but process alive"
                        );
                    }
                }
                continue;
            }

            // Dead at the OS level but no exit notification yet. `forget`
            // returns None when the exit poll already claimed the pid, which
            // keeps the exit processed exactly once.
            if self.supervisor.forget(pid).await.is_some() {
                warn!(room = %room_name, pid, "agent dead but unreported, treating as crash");
                self.on_agent_exited(&room_name, pid, None, false).await;
            }
        }
    }

    async fn stats(&self) -> LifecycleStats {
        let mut stats = LifecycleStats {
            total_rooms: self.registry.len(),
            total_agents: self.supervisor.live_count().await,
            ..LifecycleStats::default()
        };

        for room in self.registry.all() {
            match room.state {
                RoomState::Active => stats.active_rooms += 1,
                RoomState::Starting => stats.starting_rooms += 1,
                RoomState::GracePeriod => stats.grace_rooms += 1,
                RoomState::Closing => stats.closing_rooms += 1,
                RoomState::Empty => {}
            }
        }

        stats
    }
}

/// Grace deadline for a room whose last human just left, relative to `now`.
fn grace_deadline(config: &GlobalConfig, now: DateTime<Utc>) -> DateTime<Utc> {
    now + chrono::Duration::from_std(config.grace_period())
        .unwrap_or_else(|_| chrono::Duration::seconds(60))
}
