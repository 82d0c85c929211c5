//! WebSocket connection handling: one reader and one writer loop per socket.
//!
//! The loops share nothing but the bounded send buffer and the dispatcher's
//! disconnect path. The reader owns inbound decoding and the liveness
//! deadline; the writer owns the socket sink and the periodic probe.

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::hub::{Hub, SEND_BUFFER_SIZE};
use super::types::{ClientFrame, WsEvent};
use crate::api::{ApiError, AppState};
use crate::geo::Coordinates;

/// Interval between liveness probes sent by the writer loop.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// A connection that stays silent this long is considered dead. Refreshed on
/// every inbound frame, including probe acknowledgments.
const READ_DEADLINE: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Scene id to group this connection under, for targeted sends.
    pub scene_id: Option<String>,
    /// Access token; browsers cannot set headers on a WebSocket upgrade.
    pub token: Option<String>,
}

/// WebSocket upgrade handler.
///
/// GET /ws
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = params
        .token
        .ok_or_else(|| ApiError::unauthorized("Missing token"))?;
    let claims = state.auth.verify_token(&token)?;

    let conn_id = Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, user_id = %claims.sub, "WebSocket upgrade");

    let hub = state.hub.clone();
    let scene_id = params.scene_id;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, hub, conn_id, scene_id)))
}

async fn handle_socket(socket: WebSocket, hub: Hub, conn_id: String, scene_id: Option<String>) {
    let (sink, stream) = socket.split();

    let (tx, rx) = mpsc::channel(SEND_BUFFER_SIZE);
    hub.connect(conn_id.clone(), scene_id, tx.clone()).await;

    let write_task = tokio::spawn(write_pump(sink, rx));

    read_pump(stream, &hub, &conn_id, tx).await;

    // The reader decides when the connection is gone, for any reason; tear
    // down the registry entry and the writer with it.
    hub.disconnect(conn_id.clone()).await;
    write_task.abort();
    info!(conn_id = %conn_id, "connection closed");
}

/// Drains the send buffer to the socket and emits periodic liveness probes.
/// A write failure ends the loop and with it the connection.
async fn write_pump(mut sink: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<WsEvent>) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick fires immediately; skip it so probes start one period in.
    ping_interval.tick().await;

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else {
                    // Buffer closed by the dispatcher; say goodbye.
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(err) => {
                        warn!("failed to serialize event: {err}");
                        continue;
                    }
                };
                if sink.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            _ = ping_interval.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Decodes inbound frames until the socket errors, closes, or stays silent
/// past the read deadline.
async fn read_pump(
    mut stream: SplitStream<WebSocket>,
    hub: &Hub,
    conn_id: &str,
    tx: mpsc::Sender<WsEvent>,
) {
    loop {
        let frame = match tokio::time::timeout(READ_DEADLINE, stream.next()).await {
            Err(_) => {
                info!(conn_id = %conn_id, "read deadline expired");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                debug!(conn_id = %conn_id, "socket error: {err}");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => match serde_json::from_str::<ClientFrame>(text.as_str()) {
                Ok(ClientFrame::HeartbeatPing) => {
                    // Answered immediately; a full buffer loses the pong and
                    // the client retries on its next probe.
                    let _ = tx.try_send(WsEvent::HeartbeatPong);
                }
                Ok(ClientFrame::LocationUpdate {
                    latitude,
                    longitude,
                }) => {
                    hub.update_location(
                        conn_id.to_string(),
                        Coordinates::new(latitude, longitude),
                    )
                    .await;
                }
                Err(err) => {
                    warn!(conn_id = %conn_id, "unparseable frame, closing: {err}");
                    break;
                }
            },
            Message::Binary(_) => {
                debug!(conn_id = %conn_id, "ignoring binary frame");
            }
            // Transport ping/pong frames refresh the deadline by arriving;
            // axum answers pings on its own.
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => break,
        }
    }
}
