//! Local HTTP surface for the collection status widget.
//!
//! `/events` is a WebSocket that pushes every [`SyncMessage`] so an open
//! widget refreshes after a deferred collection without polling.

use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use stationlog_core::{CollectionStatusView, IngestSummary};
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::client::IngestionClient;
use crate::scheduler::{CollectError, CollectionScheduler};
use crate::sync::SyncMessage;

pub struct StatusState<C> {
    scheduler: CollectionScheduler<C>,
    events: broadcast::Sender<SyncMessage>,
}

impl<C> Clone for StatusState<C> {
    fn clone(&self) -> Self {
        Self {
            scheduler: self.scheduler.clone(),
            events: self.events.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

#[derive(Debug, Serialize)]
struct SummaryResponse {
    summary: IngestSummary,
}

impl IntoResponse for CollectError {
    fn into_response(self) -> Response {
        let status = match &self {
            CollectError::TooSoon { .. } => StatusCode::TOO_MANY_REQUESTS,
            CollectError::AlreadyRunning => StatusCode::CONFLICT,
            CollectError::Ingest(_) => StatusCode::BAD_GATEWAY,
        };

        let body = ErrorResponse {
            success: false,
            error: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

pub fn router<C: IngestionClient>(
    scheduler: CollectionScheduler<C>,
    events: broadcast::Sender<SyncMessage>,
) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status::<C>))
        .route("/collect-now", post(collect_now::<C>))
        .route("/events", get(events_ws::<C>))
        .layer(TraceLayer::new_for_http())
        .with_state(StatusState { scheduler, events })
}

async fn health() -> &'static str {
    "OK"
}

async fn status<C: IngestionClient>(
    State(state): State<StatusState<C>>,
) -> Json<CollectionStatusView> {
    Json(state.scheduler.status().await.view())
}

async fn collect_now<C: IngestionClient>(
    State(state): State<StatusState<C>>,
) -> Result<Json<SummaryResponse>, CollectError> {
    let summary = state.scheduler.collect_now().await?;
    Ok(Json(SummaryResponse { summary }))
}

async fn events_ws<C: IngestionClient>(
    State(state): State<StatusState<C>>,
    ws: WebSocketUpgrade,
) -> Response {
    let rx = state.events.subscribe();
    ws.on_upgrade(move |socket| forward_events(socket, rx))
}

async fn forward_events(mut socket: WebSocket, mut rx: broadcast::Receiver<SyncMessage>) {
    info!("Event subscriber connected");

    loop {
        tokio::select! {
            event = next_event(&mut rx) => {
                let Some(text) = event else { break };
                if let Err(e) = socket.send(Message::Text(text.into())).await {
                    debug!(error = %e, "Event subscriber went away");
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Clients only listen.
                Some(Ok(_)) => {}
            },
        }
    }

    info!("Event subscriber disconnected");
}

/// Next message as JSON text. Lagged receivers skip what they missed;
/// `None` once the channel closes.
async fn next_event(rx: &mut broadcast::Receiver<SyncMessage>) -> Option<String> {
    loop {
        match rx.recv().await {
            Ok(message) => match serde_json::to_string(&message) {
                Ok(text) => return Some(text),
                Err(e) => error!(error = %e, "Failed to serialize sync event"),
            },
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "Event subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
