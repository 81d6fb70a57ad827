//! WebSocket stream of job progress events.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use skyingest_core::{JobProgress, JobStatus};

use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_LAG_EVENTS};
use crate::state::AppState;

/// WebSocket message sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressMessage {
    /// A job changed status.
    JobProgress {
        job_id: String,
        status: JobStatus,
        percent: u8,
    },
}

impl From<JobProgress> for ProgressMessage {
    fn from(progress: JobProgress) -> Self {
        Self::JobProgress {
            job_id: progress.job_id,
            status: progress.status,
            percent: progress.percent,
        }
    }
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle a single WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.worker().subscribe();

    WS_CONNECTIONS_ACTIVE.inc();
    info!("WebSocket client connected");

    // Forward progress events to this client
    let send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(progress) => {
                    let message = ProgressMessage::from(progress);
                    match serde_json::to_string(&message) {
                        Ok(json) => {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                debug!("WebSocket send failed, client disconnected");
                                break;
                            }
                        }
                        Err(e) => error!("Failed to serialize progress message: {}", e),
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("WebSocket client lagged, skipped {} messages", n);
                    WS_LAG_EVENTS.inc();
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Progress channel closed");
                    break;
                }
            }
        }
    });

    // Clients only send close frames and pings
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Close(_)) => {
                debug!("WebSocket client requested close");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
        }
    }

    send_task.abort();
    WS_CONNECTIONS_ACTIVE.dec();
    info!("WebSocket client disconnected");
}
