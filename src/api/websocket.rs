//! Log-streaming WebSocket: ticks a fixed interval, sending the latest pane
//! capture as a JSON frame until the client disconnects or the daemon shuts
//! down.

use super::error::ApiResult;
use super::state::AppState;
use crate::error::Error;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const STREAM_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_LINES: u32 = 200;
const MAX_LINES: u32 = 10_000;

#[derive(Deserialize)]
pub struct LogsQuery {
    lines: Option<u32>,
    ansi: Option<u8>,
}

pub async fn logs_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Response> {
    // Unknown services are rejected before the upgrade.
    let (_, merged) = state.snapshot()?;
    if merged.get(&name).is_none() {
        return Err(Error::ServiceNotFound(name).into());
    }

    let lines = query.lines.unwrap_or(DEFAULT_LINES).clamp(1, MAX_LINES);
    let ansi = query.ansi.unwrap_or(0) != 0;

    Ok(ws.on_upgrade(move |socket| stream_logs(socket, state, name, lines, ansi)))
}

async fn stream_logs(mut socket: WebSocket, state: Arc<AppState>, name: String, lines: u32, ansi: bool) {
    tracing::debug!(service = %name, lines, ansi, "Log stream opened");
    let cancel = state.cancel.clone();
    let mut interval = tokio::time::interval(STREAM_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            message = socket.recv() => {
                match message {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
            _ = interval.tick() => {
                let payload = state
                    .orchestrator
                    .supervisor()
                    .capture_pane(&name, lines, ansi)
                    .await
                    .unwrap_or_default();
                let frame = json!({ "type": "logs", "payload": payload });
                if socket.send(Message::Text(frame.to_string())).await.is_err() {
                    break;
                }
            }
        }
    }

    tracing::debug!(service = %name, "Log stream closed");
}
