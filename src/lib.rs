#![forbid(unsafe_code)]

//! Agent lifecycle manager for real-time voice coaching rooms.
//!
//! Decides when an AI agent process is spawned for a room, tracks occupancy,
//! runs a reconnection grace period when all humans leave, garbage-collects
//! stale rooms and orphaned processes, and restarts agents that crash while
//! humans are still present.

pub mod config;
pub mod coordinator;
pub mod errors;
pub mod events;
pub mod gc;
pub mod health;
pub mod http;
pub mod models;
pub mod registry;
pub mod supervisor;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
