//! Domain entities: rooms, participants, agent process handles.

pub mod agent;
pub mod participant;
pub mod room;
pub mod snapshot;
