//! Unit tests for the room state machine model.

use chrono::{Duration, Utc};
use room_warden::models::participant::{Participant, ParticipantRole};
use room_warden::models::room::{Room, RoomState};

fn room_with_human(name: &str) -> Room {
    let mut room = Room::new(name.to_owned());
    room.participants.insert(
        "client-1".into(),
        Participant::new("client-1".into(), "Avery".into(), ParticipantRole::Client),
    );
    room
}

#[test]
fn new_room_starts_empty() {
    let room = Room::new("r1".into());
    assert_eq!(room.state, RoomState::Empty);
    assert!(room.participants.is_empty());
    assert!(room.agent.is_none());
    assert!(room.grace_deadline.is_none());
    assert_eq!(room.spawn_failures, 0);
}

#[test]
fn human_count_excludes_agents() {
    let mut room = room_with_human("r1");
    room.participants.insert(
        "ai-1".into(),
        Participant::new("ai-1".into(), "Coach AI".into(), ParticipantRole::Agent),
    );
    room.participants.insert(
        "coach-1".into(),
        Participant::new("coach-1".into(), "Sam".into(), ParticipantRole::Coach),
    );

    assert_eq!(room.human_count(), 2);
    assert_eq!(room.participants.len(), 3);
}

#[test]
fn humans_returns_only_non_agents() {
    let mut room = room_with_human("r1");
    room.participants.insert(
        "ai-1".into(),
        Participant::new("ai-1".into(), "Coach AI".into(), ParticipantRole::Agent),
    );

    let humans = room.humans();
    assert_eq!(humans.len(), 1);
    assert_eq!(humans[0].identity, "client-1");
}

#[test]
fn grace_round_trip_maintains_deadline_invariant() {
    let mut room = room_with_human("r1");
    room.state = RoomState::Active;

    let deadline = Utc::now() + Duration::seconds(60);
    room.enter_grace(deadline);
    assert_eq!(room.state, RoomState::GracePeriod);
    assert_eq!(room.grace_deadline, Some(deadline));

    room.cancel_grace();
    assert_eq!(room.state, RoomState::Active);
    assert!(room.grace_deadline.is_none());
}

#[test]
fn grace_expiry_is_deadline_sensitive() {
    let mut room = room_with_human("r1");
    room.state = RoomState::Active;
    let now = Utc::now();
    room.enter_grace(now + Duration::seconds(60));

    // One millisecond before the deadline: still inside the window.
    assert!(!room.grace_expired(now + Duration::seconds(60) - Duration::milliseconds(1)));
    // At and past the deadline: expired.
    assert!(room.grace_expired(now + Duration::seconds(60)));
    assert!(room.grace_expired(now + Duration::seconds(60) + Duration::milliseconds(1)));
}

#[test]
fn grace_expired_is_false_outside_grace_state() {
    let mut room = room_with_human("r1");
    room.state = RoomState::Active;
    assert!(!room.grace_expired(Utc::now() + Duration::days(1)));
}

#[test]
fn grace_remaining_clamps_to_zero() {
    let mut room = room_with_human("r1");
    room.state = RoomState::Active;
    let now = Utc::now();
    room.enter_grace(now - Duration::seconds(5));
    assert_eq!(room.grace_remaining_seconds(now), Some(0));
}

#[test]
fn transition_to_applies_legal_moves() {
    let mut room = room_with_human("r1");
    room.transition_to(RoomState::Starting);
    assert_eq!(room.state, RoomState::Starting);
    room.transition_to(RoomState::Active);
    assert_eq!(room.state, RoomState::Active);
    room.transition_to(RoomState::Closing);
    assert_eq!(room.state, RoomState::Closing);
}

#[test]
fn transition_to_refuses_illegal_moves() {
    let mut room = room_with_human("r1");
    room.state = RoomState::Closing;

    // A closed room stays closed no matter what is attempted.
    for next in [RoomState::Empty, RoomState::Starting, RoomState::Active] {
        room.transition_to(next);
        assert_eq!(room.state, RoomState::Closing, "reopened into {next:?}");
    }

    let mut room = room_with_human("r2");
    room.transition_to(RoomState::Active);
    assert_eq!(room.state, RoomState::Empty);
}

#[test]
fn transition_to_same_state_is_a_noop() {
    let mut room = room_with_human("r1");
    room.state = RoomState::Starting;
    room.transition_to(RoomState::Starting);
    assert_eq!(room.state, RoomState::Starting);
}

#[test]
fn enter_grace_requires_active() {
    let mut room = room_with_human("r1");
    room.enter_grace(Utc::now() + Duration::seconds(60));

    // Not reachable from EMPTY: no state change, no dangling deadline.
    assert_eq!(room.state, RoomState::Empty);
    assert!(room.grace_deadline.is_none());
}

#[test]
fn transition_table_permits_spec_paths() {
    use RoomState::{Active, Closing, Empty, GracePeriod, Starting};

    assert!(Empty.can_transition_to(Starting));
    assert!(Starting.can_transition_to(Active));
    assert!(Starting.can_transition_to(Empty)); // spawn failed
    assert!(Starting.can_transition_to(Closing));
    assert!(Active.can_transition_to(GracePeriod));
    assert!(Active.can_transition_to(Starting)); // crash restart
    assert!(Active.can_transition_to(Closing));
    assert!(GracePeriod.can_transition_to(Active)); // rejoin
    assert!(GracePeriod.can_transition_to(Starting)); // crash restart
    assert!(GracePeriod.can_transition_to(Closing));
}

#[test]
fn closing_is_terminal() {
    use RoomState::{Active, Closing, Empty, GracePeriod, Starting};

    for next in [Empty, Starting, Active, GracePeriod] {
        assert!(
            !Closing.can_transition_to(next),
            "closing must never reopen into {next:?}"
        );
    }
}

#[test]
fn no_shortcut_from_empty_to_active() {
    assert!(!RoomState::Empty.can_transition_to(RoomState::Active));
    assert!(!RoomState::Empty.can_transition_to(RoomState::GracePeriod));
}

#[test]
fn role_serde_uses_snake_case() {
    let json = serde_json::to_string(&ParticipantRole::Client).expect("serialize");
    assert_eq!(json, "\"client\"");
    let role: ParticipantRole = serde_json::from_str("\"agent\"").expect("deserialize");
    assert_eq!(role, ParticipantRole::Agent);
}

#[test]
fn agent_role_is_not_human() {
    assert!(ParticipantRole::Client.is_human());
    assert!(ParticipantRole::Coach.is_human());
    assert!(!ParticipantRole::Agent.is_human());
}

#[test]
fn room_state_serde_uses_snake_case() {
    let json = serde_json::to_string(&RoomState::GracePeriod).expect("serialize");
    assert_eq!(json, "\"grace_period\"");
    let state: RoomState = serde_json::from_str("\"closing\"").expect("deserialize");
    assert_eq!(state, RoomState::Closing);
}
