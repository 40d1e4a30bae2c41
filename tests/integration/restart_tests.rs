//! Crash-restart scenarios: backoff respawn, budget exhaustion, and crashes
//! in unoccupied rooms.

use std::time::Duration;

use serial_test::serial;

use room_warden::models::participant::ParticipantRole;
use room_warden::models::room::RoomState;

use super::test_helpers::{config_from, sleeper_config, warden_toml, Warden};

fn sigkill(pid: u32) {
    let pid = nix::unistd::Pid::from_raw(i32::try_from(pid).expect("pid fits"));
    nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGKILL).expect("kill");
}

#[tokio::test]
#[serial]
async fn crash_with_humans_present_respawns_with_backoff() {
    let warden = Warden::start(sleeper_config());

    warden.join("r1", "client-1", ParticipantRole::Client).await;
    warden.confirm_agent("r1").await;
    let snapshot = warden.wait_for_state("r1", RoomState::Active).await;
    let old_pid = snapshot.agent.expect("agent bound").pid;

    sigkill(old_pid);

    // Exit poll notices within 500ms, the respawn lands after ~1s backoff.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let replacement = loop {
        if let Some(snapshot) = warden.snapshot("r1").await {
            if let Some(agent) = snapshot.agent {
                if agent.pid != old_pid {
                    break agent;
                }
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "agent was never respawned"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    };

    assert_eq!(replacement.restart_count, 1);
    warden.wait_for_state("r1", RoomState::Starting).await;

    // The replacement activates the room the same way the first agent did.
    warden.confirm_agent("r1").await;
    warden.wait_for_state("r1", RoomState::Active).await;

    warden.shutdown().await;
}

#[tokio::test]
#[serial]
async fn crash_with_no_humans_closes_the_room() {
    let warden = Warden::start(sleeper_config());

    warden.join("r1", "client-1", ParticipantRole::Client).await;
    warden.confirm_agent("r1").await;
    let snapshot = warden.wait_for_state("r1", RoomState::Active).await;
    let pid = snapshot.agent.expect("agent bound").pid;

    warden.leave("r1", "client-1").await;
    warden.wait_for_state("r1", RoomState::GracePeriod).await;

    // No one is left to serve, so the crash ends the room instead of
    // triggering a respawn.
    sigkill(pid);
    warden.wait_for_removal("r1").await;
    assert_eq!(warden.supervisor.live_count().await, 0);

    warden.shutdown().await;
}

#[tokio::test]
#[serial]
async fn restart_budget_exhaustion_closes_the_room() {
    let warden = Warden::start(config_from(&warden_toml("/bin/sleep", &["30"], 8, 0)));

    warden.join("r1", "client-1", ParticipantRole::Client).await;
    warden.confirm_agent("r1").await;
    let snapshot = warden.wait_for_state("r1", RoomState::Active).await;
    let pid = snapshot.agent.expect("agent bound").pid;

    sigkill(pid);
    warden.wait_for_removal("r1").await;
    assert_eq!(warden.supervisor.live_count().await, 0);

    warden.shutdown().await;
}
