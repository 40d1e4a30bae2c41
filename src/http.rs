//! HTTP ingress and operator control API.
//!
//! One axum router carries both surfaces:
//!
//! - `POST /webhook` — occupancy events pushed by the media transport.
//!   Always answers `202 Accepted` once the event is enqueued; a downstream
//!   spawn failure never fails the delivery.
//! - `POST /heartbeat` — advisory agent liveness pings.
//! - `GET /rooms`, `GET /stats` — read-only snapshots for operators.
//! - `POST /rooms/{name}/close`, `POST /gc` — operator commands.
//! - `GET /health` — liveness probe for the warden itself.

use std::net::SocketAddr;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::coordinator::CoordinatorHandle;
use crate::events::LifecycleEvent;
use crate::models::participant::ParticipantRole;
use crate::models::snapshot::{GcReport, LifecycleStats, RoomSnapshot};
use crate::{AppError, Result};

/// Occupancy event as delivered by the media-transport webhook.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OccupancyEvent {
    /// A participant connected to a room.
    ParticipantJoined {
        /// Room name.
        room: String,
        /// Transport identity.
        identity: String,
        /// Display name; defaults to the identity when absent.
        display_name: Option<String>,
        /// Session role.
        role: ParticipantRole,
    },
    /// A participant disconnected from a room.
    ParticipantLeft {
        /// Room name.
        room: String,
        /// Transport identity.
        identity: String,
    },
    /// The transport closed the room server-side.
    RoomFinished {
        /// Room name.
        room: String,
    },
}

impl From<OccupancyEvent> for LifecycleEvent {
    fn from(event: OccupancyEvent) -> Self {
        match event {
            OccupancyEvent::ParticipantJoined {
                room,
                identity,
                display_name,
                role,
            } => Self::ParticipantJoined {
                room,
                display_name: display_name.unwrap_or_else(|| identity.clone()),
                identity,
                role,
            },
            OccupancyEvent::ParticipantLeft { room, identity } => {
                Self::ParticipantLeft { room, identity }
            }
            OccupancyEvent::RoomFinished { room } => Self::RoomFinished { room },
        }
    }
}

/// Advisory heartbeat payload sent by agent processes.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HeartbeatPing {
    /// Room the agent is bound to.
    pub room: String,
    /// Agent transport identity.
    pub agent_identity: String,
    /// Timestamp claimed by the agent; receipt time when absent.
    pub timestamp: Option<DateTime<Utc>>,
}

/// Build the ingress + control router over a coordinator handle.
#[must_use]
pub fn router(handle: CoordinatorHandle) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook", post(webhook))
        .route("/heartbeat", post(heartbeat))
        .route("/rooms", get(rooms))
        .route("/stats", get(stats))
        .route("/rooms/{name}/close", post(close_room))
        .route("/gc", post(trigger_gc))
        .with_state(handle)
}

/// Bind and serve the HTTP API until the token is cancelled.
///
/// # Errors
///
/// Returns `AppError::Http` if the listener cannot be bound or the server
/// fails while running.
pub async fn serve(handle: CoordinatorHandle, port: u16, cancel: CancellationToken) -> Result<()> {
    let bind = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Http(format!("failed to bind {bind}: {err}")))?;
    serve_on(listener, handle, cancel).await
}

/// Serve the HTTP API on an already-bound listener.
///
/// # Errors
///
/// Returns `AppError::Http` if the server fails while running.
pub async fn serve_on(
    listener: TcpListener,
    handle: CoordinatorHandle,
    cancel: CancellationToken,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "http api listening");
    }

    axum::serve(listener, router(handle))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|err| AppError::Http(format!("http server error: {err}")))?;

    info!("http api shut down");
    Ok(())
}

/// Handler for `GET /health` — returns 200 OK with a plain-text body.
async fn health() -> &'static str {
    "ok"
}

async fn webhook(
    State(handle): State<CoordinatorHandle>,
    Json(event): Json<OccupancyEvent>,
) -> StatusCode {
    handle.dispatch(event.into()).await;
    StatusCode::ACCEPTED
}

async fn heartbeat(
    State(handle): State<CoordinatorHandle>,
    Json(ping): Json<HeartbeatPing>,
) -> StatusCode {
    handle
        .dispatch(LifecycleEvent::Heartbeat {
            room: ping.room,
            identity: ping.agent_identity,
            timestamp: ping.timestamp,
        })
        .await;
    StatusCode::ACCEPTED
}

async fn rooms(
    State(handle): State<CoordinatorHandle>,
) -> std::result::Result<Json<Vec<RoomSnapshot>>, StatusCode> {
    handle
        .list_rooms()
        .await
        .map(Json)
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}

async fn stats(
    State(handle): State<CoordinatorHandle>,
) -> std::result::Result<Json<LifecycleStats>, StatusCode> {
    handle
        .stats()
        .await
        .map(Json)
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}

async fn close_room(
    State(handle): State<CoordinatorHandle>,
    Path(name): Path<String>,
) -> StatusCode {
    match handle.force_close(&name).await {
        Ok(()) => StatusCode::OK,
        Err(AppError::NotFound(_)) => StatusCode::NOT_FOUND,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn trigger_gc(
    State(handle): State<CoordinatorHandle>,
) -> std::result::Result<Json<GcReport>, StatusCode> {
    handle
        .trigger_gc()
        .await
        .map(Json)
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}
