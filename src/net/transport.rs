//! Session transports for the client
//!
//! A [`Transport`] performs the join handshake and hands back a pair of
//! channels. [`LocalTransport`] talks to an in-process [`RoomRegistry`];
//! [`WsTransport`] speaks the JSON protocol over a WebSocket.

use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::game::{RoomError, RoomRegistry};
use crate::ws::protocol::{ClientMsg, JoinOptions, ServerMsg, Welcome};

/// Client connection failures
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Handshake timed out")]
    HandshakeTimeout,

    #[error("Join rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Room is full")]
    RoomFull,

    #[error("Connection closed")]
    Closed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not connected")]
    NotConnected,
}

impl From<RoomError> for NetError {
    fn from(e: RoomError) -> Self {
        match e {
            RoomError::Full => NetError::RoomFull,
            RoomError::Closed => NetError::Closed,
        }
    }
}

/// An open session: the handshake plus both message directions
#[derive(Debug)]
pub struct TransportSession {
    pub welcome: Welcome,
    pub outbound: mpsc::UnboundedSender<ClientMsg>,
    pub inbound: mpsc::UnboundedReceiver<ServerMsg>,
}

pub trait Transport {
    /// Join the room named by `endpoint`. Resolves once the welcome arrives.
    fn open(
        &self,
        endpoint: &str,
        options: &JoinOptions,
    ) -> impl Future<Output = Result<TransportSession, NetError>> + Send;
}

/// In-process transport; `endpoint` is the room id
#[derive(Clone)]
pub struct LocalTransport {
    rooms: Arc<RoomRegistry>,
}

impl LocalTransport {
    pub fn new(rooms: Arc<RoomRegistry>) -> Self {
        Self { rooms }
    }
}

impl Transport for LocalTransport {
    fn open(
        &self,
        endpoint: &str,
        options: &JoinOptions,
    ) -> impl Future<Output = Result<TransportSession, NetError>> + Send {
        open_local(self.rooms.clone(), endpoint.to_string(), options.clone())
    }
}

async fn open_local(
    rooms: Arc<RoomRegistry>,
    room_id: String,
    options: JoinOptions,
) -> Result<TransportSession, NetError> {
    let session_id = Uuid::new_v4().to_string();
    let room = rooms.get_or_create(&room_id, &options);
    let join = room.join(&session_id).await?;

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientMsg>();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

    let mut room_outbound = join.outbound;
    tokio::spawn(async move {
        while let Some(msg) = room_outbound.recv().await {
            if inbound_tx.send(msg).is_err() {
                break;
            }
        }
    });

    let sender_session = session_id.clone();
    tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if matches!(msg, ClientMsg::Leave) {
                break;
            }
            if room.send(&sender_session, msg).await.is_err() {
                debug!(session_id = %sender_session, "Room closed under local session");
                return;
            }
        }
        room.leave(&sender_session).await;
    });

    Ok(TransportSession {
        welcome: join.welcome,
        outbound: outbound_tx,
        inbound: inbound_rx,
    })
}

/// WebSocket transport; `endpoint` is a full `ws://` URL including the room
/// query parameter
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

impl Transport for WsTransport {
    fn open(
        &self,
        endpoint: &str,
        options: &JoinOptions,
    ) -> impl Future<Output = Result<TransportSession, NetError>> + Send {
        open_ws(endpoint.to_string(), options.clone())
    }
}

async fn open_ws(url: String, options: JoinOptions) -> Result<TransportSession, NetError> {
    let (stream, _) = connect_async(url.as_str())
        .await
        .map_err(|e| NetError::Connect(e.to_string()))?;
    let (mut sink, mut stream) = stream.split();

    let join = serde_json::to_string(&ClientMsg::Join { options })?;
    sink.send(Message::Text(join))
        .await
        .map_err(|e| NetError::Handshake(e.to_string()))?;

    let welcome = loop {
        let frame = stream
            .next()
            .await
            .ok_or(NetError::Closed)?
            .map_err(|e| NetError::Handshake(e.to_string()))?;
        let Message::Text(text) = frame else {
            continue;
        };
        match serde_json::from_str::<ServerMsg>(&text)? {
            ServerMsg::Welcome(welcome) => break welcome,
            ServerMsg::Error { code, .. } if code == RoomError::Full.code() => {
                return Err(NetError::RoomFull)
            }
            ServerMsg::Error { code, message } => {
                return Err(NetError::Rejected { code, message })
            }
            other => debug!(?other, "Message before welcome ignored"),
        }
    };

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientMsg>();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let leaving = matches!(msg, ClientMsg::Leave);
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to encode client message");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() || leaving {
                break;
            }
        }
        let _ = sink.close().await;
    });

    tokio::spawn(async move {
        while let Some(Ok(frame)) = stream.next().await {
            let Message::Text(text) = frame else {
                continue;
            };
            match serde_json::from_str::<ServerMsg>(&text) {
                Ok(msg) => {
                    if inbound_tx.send(msg).is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "Failed to parse server message"),
            }
        }
    });

    Ok(TransportSession {
        welcome,
        outbound: outbound_tx,
        inbound: inbound_rx,
    })
}
