//! Live Log Stream
//!
//! `GET /ws/pipelines/{id}/logs` upgrades to a WebSocket that first replays
//! buffered events, then forwards live ones as JSON text frames. The server
//! closes the socket a grace period after the run's terminal event.

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use forge_core::domain::log::LogEvent;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::service::event_bus::Subscription;
use crate::service::log_service;

/// GET /ws/pipelines/{id}/logs
/// Stream a run's log events
pub async fn stream_logs(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let run = state
        .store
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Pipeline {} not found", id)))?;

    let mut subscription = state.bus.subscribe(id);
    if subscription.history.is_empty() && run.status.is_terminal() {
        subscription.history = log_service::synthesize(&run);
    }

    tracing::debug!(
        pipeline_id = %id,
        replay = subscription.history.len(),
        "Log stream opened"
    );

    Ok(ws.on_upgrade(move |socket| forward(socket, id, subscription, state)))
}

/// Outcome of a stream that did not end with a client disconnect
enum StreamEnd {
    Terminal,
    BusClosed,
}

async fn forward(mut socket: WebSocket, id: Uuid, subscription: Subscription, state: AppState) {
    let Subscription {
        history,
        mut receiver,
    } = subscription;

    let end = match relay(&mut socket, id, history, &mut receiver).await {
        Some(end) => end,
        None => {
            tracing::debug!(pipeline_id = %id, "Log stream client disconnected");
            return;
        }
    };

    if matches!(end, StreamEnd::Terminal) {
        tokio::time::sleep(state.stream_grace).await;
    }

    if let Err(e) = socket.send(Message::Close(None)).await {
        tracing::debug!(pipeline_id = %id, "Failed to close log stream: {}", e);
    }
    tracing::debug!(pipeline_id = %id, "Log stream closed");
}

/// Replay history then forward live events until the run ends
///
/// Returns `None` when the client goes away first.
async fn relay(
    socket: &mut WebSocket,
    id: Uuid,
    history: Vec<LogEvent>,
    receiver: &mut tokio::sync::broadcast::Receiver<LogEvent>,
) -> Option<StreamEnd> {
    for event in history {
        let terminal = event.is_terminal();
        send_event(socket, &event).await?;
        if terminal {
            return Some(StreamEnd::Terminal);
        }
    }

    loop {
        tokio::select! {
            received = receiver.recv() => match received {
                Ok(event) => {
                    let terminal = event.is_terminal();
                    send_event(socket, &event).await?;
                    if terminal {
                        return Some(StreamEnd::Terminal);
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(pipeline_id = %id, missed, "Log stream lagged, events dropped");
                }
                Err(RecvError::Closed) => return Some(StreamEnd::BusClosed),
            },
            incoming = socket.recv() => match incoming {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return None,
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn send_event(socket: &mut WebSocket, event: &LogEvent) -> Option<()> {
    let payload = match serde_json::to_string(event) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!("Failed to serialize log event: {}", e);
            return Some(());
        }
    };
    socket.send(Message::Text(payload.into())).await.ok()
}
