//! Agent liveness ticker.
//!
//! Runs on a shorter interval than the GC. Like the GC, it only produces
//! ticks; the OS-level liveness probing happens inside the coordinator so
//! that a detected death takes the same code path as a reported exit.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::coordinator::CoordinatorHandle;
use crate::events::LifecycleEvent;

/// Spawn the background task that requests a health sweep on a fixed interval.
#[must_use]
pub fn spawn_health_task(
    handle: CoordinatorHandle,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("health ticker shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    handle.dispatch(LifecycleEvent::HealthSweep).await;
                }
            }
        }
    })
}
