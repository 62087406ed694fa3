//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::RoomHandle;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{ClientMsg, JoinOptions, ServerMsg};

const DEFAULT_ROOM: &str = "lobby";

/// Query parameters for WebSocket connection
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// Room to join; every client naming the same room shares one world
    pub room: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let room_id = query
        .room
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ROOM.to_string());
    ws.on_upgrade(move |socket| handle_socket(socket, room_id, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, room_id: String, state: AppState) {
    let session_id = Uuid::new_v4().to_string();
    info!(session_id = %session_id, room_id = %room_id, "New WebSocket connection");

    let (mut ws_sink, mut ws_stream) = socket.split();

    let options = match timeout(state.config.join_timeout, wait_for_join(&mut ws_stream)).await {
        Ok(Some(options)) => options,
        Ok(None) => {
            debug!(session_id = %session_id, "Connection closed before join");
            return;
        }
        Err(_) => {
            warn!(session_id = %session_id, "Join timed out");
            let _ = send_msg(
                &mut ws_sink,
                &ServerMsg::error("join_timeout", "No join request received"),
            )
            .await;
            return;
        }
    };

    let room = state.rooms.get_or_create(&room_id, &options);
    let join = match room.join(&session_id).await {
        Ok(join) => join,
        Err(e) => {
            warn!(session_id = %session_id, room_id = %room_id, error = %e, "Join rejected");
            let _ = send_msg(&mut ws_sink, &ServerMsg::error(e.code(), e.to_string())).await;
            return;
        }
    };

    if let Err(e) = send_msg(&mut ws_sink, &ServerMsg::Welcome(join.welcome)).await {
        error!(session_id = %session_id, error = %e, "Failed to send welcome");
        room.leave(&session_id).await;
        return;
    }

    let limiter = ConnectionRateLimiter::new(state.config.input_rate_limit);
    run_session(&session_id, &room, limiter, ws_sink, ws_stream, join.outbound).await;

    room.leave(&session_id).await;
    info!(session_id = %session_id, room_id = %room_id, "WebSocket connection closed");
}

/// Read frames until the client's join request. Anything else first is
/// ignored. Returns `None` when the socket closes.
async fn wait_for_join(ws_stream: &mut SplitStream<WebSocket>) -> Option<JoinOptions> {
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMsg>(&text) {
                Ok(ClientMsg::Join { options }) => return Some(options),
                Ok(other) => debug!(?other, "Message before join ignored"),
                Err(e) => warn!(error = %e, "Failed to parse client message"),
            },
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
    None
}

/// Run the WebSocket session with read/write split
async fn run_session(
    session_id: &str,
    room: &RoomHandle,
    limiter: ConnectionRateLimiter,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    mut outbound: mpsc::Receiver<ServerMsg>,
) {
    // Writer task: room -> WebSocket
    let writer_session = session_id.to_string();
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(session_id = %writer_session, error = %e, "WebSocket send failed");
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    // Reader loop: WebSocket -> room
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !limiter.check() {
                    warn!(session_id = %session_id, "Rate limited client message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(ClientMsg::Leave) => break,
                    Ok(msg) => {
                        if room.send(session_id, msg).await.is_err() {
                            debug!(session_id = %session_id, "Room closed");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(session_id = %session_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(session_id = %session_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}
