//! Unit tests for error display formats.

use room_warden::supervisor::SpawnError;
use room_warden::AppError;

#[test]
fn app_error_display_prefixes() {
    assert_eq!(AppError::Config("bad".into()).to_string(), "config: bad");
    assert_eq!(AppError::Http("bad".into()).to_string(), "http: bad");
    assert_eq!(
        AppError::NotFound("room r1".into()).to_string(),
        "not found: room r1"
    );
}

#[test]
fn spawn_error_limit_reached_mentions_counts() {
    let err = SpawnError::LimitReached { live: 8, ceiling: 8 };
    assert_eq!(err.to_string(), "agent ceiling reached (8/8)");
}

#[test]
fn spawn_error_duplicate_room_mentions_room() {
    let err = SpawnError::RoomAlreadyHasAgent { room: "r1".into() };
    assert!(err.to_string().contains("r1"), "got {err}");
}
