//! Garbage-collection ticker.
//!
//! The sweep logic itself lives in the coordinator so that GC-driven
//! transitions share the single dispatch point with occupancy and exit
//! events; this task only produces ticks.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::coordinator::CoordinatorHandle;
use crate::events::LifecycleEvent;

/// Spawn the background task that requests a GC sweep on a fixed interval.
#[must_use]
pub fn spawn_gc_task(
    handle: CoordinatorHandle,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The immediate first tick would sweep an empty registry.
        ticker.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("gc ticker shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    handle.dispatch(LifecycleEvent::GcSweep { reply: None }).await;
                }
            }
        }
    })
}
