use std::time::Duration;

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_core::esm::wire::{
    DEFAULT_NAMESPACE, ENGINE_IO_VERSION, EVENT_PRIVATE_MESSAGE, EVENT_TIME, EnginePacket,
    InboundPrivateMessage, OpenHandshake, OutboundPrivateMessage, SocketPacket,
};
use parley_core::is_blank;

use super::{GatewayState, now_time_message};

const MAX_PAYLOAD: u64 = 1_000_000;

/// Query string of the websocket upgrade request.
#[derive(Debug, Deserialize)]
pub struct HandshakeQuery {
    #[serde(rename = "EIO")]
    pub eio: Option<String>,
    pub transport: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

pub async fn socket_handler(
    State(state): State<GatewayState>,
    Query(query): Query<HandshakeQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if query.eio.as_deref().and_then(|v| v.parse::<u8>().ok()) != Some(ENGINE_IO_VERSION) {
        return (StatusCode::BAD_REQUEST, "Unsupported protocol version").into_response();
    }
    if query.transport.as_deref() != Some("websocket") {
        return (StatusCode::BAD_REQUEST, "Transport unknown").into_response();
    }
    let Some(user_id) = query.user_id.filter(|id| !is_blank(id)) else {
        return (StatusCode::BAD_REQUEST, "Missing userId").into_response();
    };

    ws.on_upgrade(move |socket| handle_socket(socket, user_id, state))
}

pub(crate) fn event_frame(name: &str, payload: &impl serde::Serialize) -> parley_core::Result<String> {
    EnginePacket::Message(SocketPacket::event(name, payload)?).encode()
}

pub(crate) fn time_frame() -> parley_core::Result<String> {
    event_frame(EVENT_TIME, &now_time_message())
}

async fn handle_socket(socket: WebSocket, user_id: String, state: GatewayState) {
    let connection_id = Uuid::new_v4();
    let ping_interval = state.config.ping_interval;
    let ping_timeout = state.config.ping_timeout;
    info!(user_id = %user_id, %connection_id, "gateway connection opened");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Writer task: every outbound frame goes through the channel so the
    // registry can deliver from other connections' tasks.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let mut conn = GatewayConnection {
        user_id,
        connection_id,
        frames: tx,
        state,
        registered: false,
    };

    conn.send(&EnginePacket::Open(OpenHandshake {
        sid: connection_id.to_string(),
        upgrades: Vec::new(),
        ping_interval: millis(ping_interval),
        ping_timeout: millis(ping_timeout),
        max_payload: MAX_PAYLOAD,
    }));

    let mut last_seen = Instant::now();
    let mut ping = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);

    loop {
        tokio::select! {
            msg = ws_receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    last_seen = Instant::now();
                    if !conn.handle_frame(text.as_str()).await {
                        break;
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    debug!(user_id = %conn.user_id, "ignoring binary frame");
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(user_id = %conn.user_id, "websocket error: {}", e);
                    break;
                }
            },
            _ = ping.tick() => {
                if last_seen.elapsed() > ping_interval + ping_timeout {
                    info!(user_id = %conn.user_id, "heartbeat timeout, closing");
                    break;
                }
                conn.send(&EnginePacket::Ping);
            }
        }
    }

    conn.unregister().await;
    info!(user_id = %conn.user_id, %connection_id, "gateway connection closed");
    // Dropping the last sender lets the writer flush and close.
    drop(conn);
    let _ = writer.await;
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

struct GatewayConnection {
    user_id: String,
    connection_id: Uuid,
    frames: mpsc::UnboundedSender<String>,
    state: GatewayState,
    registered: bool,
}

impl GatewayConnection {
    fn send(&self, packet: &EnginePacket) {
        match packet.encode() {
            Ok(frame) => {
                let _ = self.frames.send(frame);
            }
            Err(e) => warn!("Failed to encode packet: {}", e),
        }
    }

    /// Returns false when the connection should close.
    async fn handle_frame(&mut self, frame: &str) -> bool {
        let packet = match EnginePacket::decode(frame) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(user_id = %self.user_id, "undecodable frame: {}", e);
                return true;
            }
        };

        match packet {
            EnginePacket::Ping => {
                self.send(&EnginePacket::Pong);
                true
            }
            EnginePacket::Pong | EnginePacket::Noop => true,
            EnginePacket::Close => false,
            EnginePacket::Message(packet) => self.handle_packet(packet).await,
            EnginePacket::Open(_) | EnginePacket::Upgrade => {
                debug!(user_id = %self.user_id, "unexpected client packet");
                true
            }
        }
    }

    async fn handle_packet(&mut self, packet: SocketPacket) -> bool {
        match packet {
            SocketPacket::Connect { namespace, .. } if namespace == DEFAULT_NAMESPACE => {
                self.register().await;
                self.send(&EnginePacket::Message(SocketPacket::Connect {
                    namespace,
                    data: Some(json!({ "sid": self.connection_id })),
                }));
                match time_frame() {
                    Ok(frame) => {
                        let _ = self.frames.send(frame);
                    }
                    Err(e) => warn!("Failed to encode {}: {}", EVENT_TIME, e),
                }
                true
            }
            SocketPacket::Connect { namespace, .. } => {
                debug!(user_id = %self.user_id, %namespace, "rejecting unknown namespace");
                self.send(&EnginePacket::Message(SocketPacket::ConnectError {
                    namespace,
                    data: json!({ "message": "Invalid namespace" }),
                }));
                true
            }
            SocketPacket::Disconnect { .. } => false,
            SocketPacket::Event { name, args, .. } => {
                if !self.registered {
                    debug!(user_id = %self.user_id, event = %name, "event before namespace connect");
                    return true;
                }
                self.handle_event(&name, &args).await;
                true
            }
            SocketPacket::Ack { .. } | SocketPacket::ConnectError { .. } => true,
        }
    }

    async fn handle_event(&self, name: &str, args: &[Value]) {
        if name != EVENT_PRIVATE_MESSAGE {
            debug!(user_id = %self.user_id, event = %name, "ignoring event");
            return;
        }
        let outbound: OutboundPrivateMessage = match args
            .first()
            .cloned()
            .map(serde_json::from_value)
        {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                debug!(user_id = %self.user_id, "malformed private-message: {}", e);
                return;
            }
            None => {
                debug!(user_id = %self.user_id, "private-message without payload");
                return;
            }
        };

        let inbound = InboundPrivateMessage {
            from: self.user_id.clone(),
            message: outbound.message,
            cid: outbound.cid,
        };
        let frame = match event_frame(EVENT_PRIVATE_MESSAGE, &inbound) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode private-message: {}", e);
                return;
            }
        };
        if self.state.registry.deliver(&outbound.to, frame).await {
            debug!(from = %self.user_id, to = %outbound.to, "private message relayed");
        } else {
            debug!(from = %self.user_id, to = %outbound.to, "recipient not connected, dropping");
        }
    }

    async fn register(&mut self) {
        if self.registered {
            return;
        }
        self.state
            .registry
            .register(&self.user_id, self.connection_id, self.frames.clone())
            .await;
        self.registered = true;
        let peers = self.state.registry.len().await;
        debug!(
            user_id = %self.user_id,
            peers = peers,
            "registered"
        );
    }

    async fn unregister(&mut self) {
        if self.registered {
            self.state
                .registry
                .unregister(&self.user_id, self.connection_id)
                .await;
            self.registered = false;
        }
    }
}
