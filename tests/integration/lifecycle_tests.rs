//! Occupancy-driven lifecycle scenarios: create, activate, grace, rejoin,
//! close, and the agent ceiling.

use std::time::Duration;

use serial_test::serial;

use room_warden::events::LifecycleEvent;
use room_warden::models::participant::ParticipantRole;
use room_warden::models::room::RoomState;
use room_warden::AppError;

use super::test_helpers::{config_from, sleeper_config, warden_toml, Warden};

#[tokio::test]
#[serial]
async fn full_session_lifecycle() {
    let warden = Warden::start(sleeper_config());

    // First human creates the room and requests an agent.
    warden.join("r1", "client-1", ParticipantRole::Client).await;
    let snapshot = warden.wait_for_state("r1", RoomState::Starting).await;
    assert!(snapshot.agent.is_some(), "agent must be bound while starting");
    assert_eq!(snapshot.human_count, 1);

    // The agent's own join confirms activation.
    warden.confirm_agent("r1").await;
    warden.wait_for_state("r1", RoomState::Active).await;

    // Last human out starts the reconnection window.
    warden.leave("r1", "client-1").await;
    let snapshot = warden.wait_for_state("r1", RoomState::GracePeriod).await;
    assert!(snapshot.grace_remaining_seconds.is_some());

    // Rejoining cancels it.
    warden.join("r1", "client-1", ParticipantRole::Client).await;
    let snapshot = warden.wait_for_state("r1", RoomState::Active).await;
    assert!(snapshot.grace_remaining_seconds.is_none());

    // Leaving again and letting the window lapse tears the room down.
    warden.leave("r1", "client-1").await;
    warden.wait_for_state("r1", RoomState::GracePeriod).await;
    tokio::time::sleep(Duration::from_millis(1200)).await;

    let report = warden.handle.trigger_gc().await.expect("gc runs");
    assert_eq!(report.expired, 1);
    warden.wait_for_removal("r1").await;

    // The agent process is torn down with the room.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while warden.supervisor.live_count().await > 0 {
        assert!(tokio::time::Instant::now() < deadline, "agent never reaped");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    warden.shutdown().await;
}

#[tokio::test]
#[serial]
async fn duplicate_join_is_idempotent() {
    let warden = Warden::start(sleeper_config());

    warden.join("r1", "client-1", ParticipantRole::Client).await;
    warden.join("r1", "client-1", ParticipantRole::Client).await;

    let snapshot = warden.wait_for_state("r1", RoomState::Starting).await;
    assert_eq!(snapshot.human_count, 1);

    warden.shutdown().await;
}

#[tokio::test]
#[serial]
async fn leave_for_unknown_room_is_noop() {
    let warden = Warden::start(sleeper_config());

    warden.leave("ghost", "client-1").await;

    // The stats query is serialized behind the leave, so by the time it
    // answers the leave has been processed.
    let stats = warden.handle.stats().await.expect("stats");
    assert_eq!(stats.total_rooms, 0);

    warden.shutdown().await;
}

#[tokio::test]
#[serial]
async fn room_finished_force_closes() {
    let warden = Warden::start(sleeper_config());

    warden.join("r1", "client-1", ParticipantRole::Client).await;
    warden.confirm_agent("r1").await;
    warden.wait_for_state("r1", RoomState::Active).await;

    warden
        .handle
        .dispatch(LifecycleEvent::RoomFinished { room: "r1".into() })
        .await;
    warden.wait_for_removal("r1").await;

    warden.shutdown().await;
}

#[tokio::test]
#[serial]
async fn force_close_unknown_room_is_not_found() {
    let warden = Warden::start(sleeper_config());

    let err = warden
        .handle
        .force_close("ghost")
        .await
        .expect_err("unknown room");
    assert!(matches!(err, AppError::NotFound(_)), "got {err}");

    warden.shutdown().await;
}

#[tokio::test]
#[serial]
async fn agent_ceiling_leaves_excess_rooms_unserved() {
    let warden = Warden::start(config_from(&warden_toml("/bin/sleep", &["30"], 2, 3)));

    warden.join("r1", "client-1", ParticipantRole::Client).await;
    warden.join("r2", "client-2", ParticipantRole::Client).await;
    warden.join("r3", "client-3", ParticipantRole::Client).await;

    warden.wait_for_state("r1", RoomState::Starting).await;
    warden.wait_for_state("r2", RoomState::Starting).await;

    // The third room exists but was refused an agent.
    let snapshot = warden.wait_for_state("r3", RoomState::Empty).await;
    assert!(snapshot.agent.is_none());

    let stats = warden.handle.stats().await.expect("stats");
    assert_eq!(stats.total_rooms, 3);
    assert_eq!(stats.total_agents, 2);

    warden.shutdown().await;
}

#[tokio::test]
#[serial]
async fn join_during_closing_recreates_the_room() {
    // A SIGTERM-ignoring agent keeps the room in CLOSING for the full
    // kill-grace window, so the second join reliably lands mid-close.
    let warden = Warden::start(config_from(&warden_toml(
        "/bin/sh",
        &["-c", "trap '' TERM; sleep 30"],
        8,
        3,
    )));

    warden.join("r1", "client-1", ParticipantRole::Client).await;
    let old_agent = warden.confirm_agent("r1").await;
    warden.wait_for_state("r1", RoomState::Active).await;

    warden.handle.force_close("r1").await.expect("close accepted");
    warden.join("r1", "client-2", ParticipantRole::Client).await;
    warden.wait_for_state("r1", RoomState::Closing).await;

    // After the escalated kill confirms, the room is recreated from the
    // humans still present and a fresh agent is requested.
    let snapshot = warden.wait_for_state("r1", RoomState::Starting).await;
    assert_eq!(snapshot.human_count, 2);
    let new_agent = snapshot.agent.expect("fresh agent requested");
    assert_ne!(new_agent.identity, old_agent);

    warden.shutdown().await;
}

#[tokio::test]
#[serial]
async fn crash_racing_a_close_does_not_reopen_the_room() {
    let warden = Warden::start(sleeper_config());

    warden.join("r1", "client-1", ParticipantRole::Client).await;
    warden.confirm_agent("r1").await;
    let snapshot = warden.wait_for_state("r1", RoomState::Active).await;
    let old_pid = snapshot.agent.expect("agent bound").pid;

    // The exit poller claims the pid just before a close lands: the close
    // finds nothing to kill, so no kill confirmation will ever arrive, and
    // the crash notification is still queued behind the close.
    warden.supervisor.forget(old_pid).await;
    warden.handle.force_close("r1").await.expect("close accepted");
    warden
        .handle
        .dispatch(LifecycleEvent::AgentExited {
            room: "r1".into(),
            pid: old_pid,
            exit_code: Some(1),
            clean: false,
        })
        .await;

    // The exit completes the close. The human is replayed into a fresh room
    // with a fresh agent; the closed room must not re-enter STARTING via the
    // restart path.
    let snapshot = warden.wait_for_state("r1", RoomState::Starting).await;
    assert_eq!(snapshot.human_count, 1);
    let agent = snapshot.agent.expect("fresh agent requested");
    assert_ne!(agent.pid, old_pid);
    assert_eq!(agent.restart_count, 0);

    warden.shutdown().await;
}
