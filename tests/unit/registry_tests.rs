//! Unit tests for the room registry.

use room_warden::models::room::RoomState;
use room_warden::registry::RoomRegistry;

#[test]
fn get_or_create_is_stable_per_name() {
    let mut registry = RoomRegistry::new();
    registry.get_or_create("r1").spawn_failures = 7;

    // Same name must yield the same room for the lifetime of the registration.
    assert_eq!(registry.get_or_create("r1").spawn_failures, 7);
    assert_eq!(registry.len(), 1);
}

#[test]
fn get_returns_none_for_unknown() {
    let registry = RoomRegistry::new();
    assert!(registry.get("missing").is_none());
}

#[test]
fn remove_unregisters_the_name() {
    let mut registry = RoomRegistry::new();
    registry.get_or_create("r1");

    let removed = registry.remove("r1").expect("room was registered");
    assert_eq!(removed.name, "r1");
    assert!(registry.get("r1").is_none());
    assert!(registry.is_empty());

    // A later get_or_create starts over with a fresh room.
    assert_eq!(registry.get_or_create("r1").state, RoomState::Empty);
}

#[test]
fn remove_unknown_is_none() {
    let mut registry = RoomRegistry::new();
    assert!(registry.remove("missing").is_none());
}

#[test]
fn all_and_names_cover_every_room() {
    let mut registry = RoomRegistry::new();
    registry.get_or_create("r1");
    registry.get_or_create("r2");
    registry.get_or_create("r3");

    assert_eq!(registry.all().count(), 3);
    let mut names = registry.names();
    names.sort();
    assert_eq!(names, vec!["r1", "r2", "r3"]);
}
