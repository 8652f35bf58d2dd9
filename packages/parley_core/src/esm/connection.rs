//! Gateway connection manager.
//!
//! [`Connection::connect`] spawns a driver task that owns the websocket. The
//! handle talks to it over channels only:
//!
//! - outbound emissions go through an unbounded command queue, so emitting
//!   never blocks the caller and anything queued while (re)connecting is
//!   flushed once the namespace connect completes;
//! - inbound gateway events and state transitions arrive on the
//!   [`TransportEvent`] receiver returned alongside the handle;
//! - the current [`ConnectionState`] can be read at any time with
//!   [`Connection::state`].
//!
//! Teardown is [`Connection::disconnect`] or dropping the handle. Either one
//! cancels the driver; once cancelled no further events are delivered.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::wire::{
    EVENT_PRIVATE_MESSAGE, EnginePacket, GatewayEvent, InboundPrivateMessage,
    OutboundPrivateMessage, SocketPacket, socket_url,
};
use crate::error::{ChatError, Result};
use crate::identity::SessionId;
use crate::view::ConnectionState;

/// How long to wait for the open packet before the server has told us its
/// heartbeat settings.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(20);

/// Connection settings for the realtime gateway.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub endpoint: String,
    /// Reconnect after an unexpected drop.
    pub reconnect: bool,
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    /// Capacity of the inbound event channel.
    pub event_capacity: usize,
}

impl GatewayOptions {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            reconnect: true,
            reconnect_delay: Duration::from_millis(1000),
            max_reconnect_delay: Duration::from_millis(5000),
            event_capacity: 256,
        }
    }

    /// Delay before reconnect attempt number `failures` (0-based).
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.min(16));
        self.reconnect_delay
            .saturating_mul(factor)
            .min(self.max_reconnect_delay)
    }
}

/// Something the driver observed on the gateway connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    StateChanged(ConnectionState),
    Time { epoch_ms: i64 },
    PrivateMessage(InboundPrivateMessage),
}

/// The outbound half of an ESM transport, as the session controller sees it.
pub trait Transport {
    fn state(&self) -> ConnectionState;

    /// Queue one `private-message` emission. Fire-and-forget: success means
    /// the transport accepted it, not that anyone received it.
    fn emit_private(&self, message: OutboundPrivateMessage) -> Result<()>;
}

enum Command {
    Emit(SocketPacket),
}

/// Handle to a live gateway connection.
pub struct Connection {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Connection {
    /// Open a connection tagged with `session_id`. Must be called from within
    /// a tokio runtime.
    pub fn connect(
        options: &GatewayOptions,
        session_id: &SessionId,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let url = socket_url(&options.endpoint, session_id)?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(options.event_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let cancel = CancellationToken::new();

        let driver = Driver {
            url,
            options: options.clone(),
            commands: command_rx,
            events: event_tx,
            state: state_tx,
            cancel: cancel.clone(),
        };

        info!(session_id = %session_id, endpoint = %options.endpoint, "opening gateway connection");
        let task = tokio::spawn(driver.run());

        Ok((
            Self {
                commands: command_tx,
                state: state_rx,
                cancel,
                task: Some(task),
            },
            event_rx,
        ))
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Queue an event with a single payload argument.
    pub fn emit(&self, name: &str, payload: &impl Serialize) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ChatError::Closed);
        }
        let packet = SocketPacket::event(name, payload)?;
        self.commands
            .send(Command::Emit(packet))
            .map_err(|_| ChatError::Closed)
    }

    /// Close the connection and wait for the driver to finish. Safe to call
    /// any number of times.
    pub async fn disconnect(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    warn!("gateway driver panicked: {}", e);
                }
            }
        }
    }
}

impl Transport for Connection {
    fn state(&self) -> ConnectionState {
        Connection::state(self)
    }

    fn emit_private(&self, message: OutboundPrivateMessage) -> Result<()> {
        self.emit(EVENT_PRIVATE_MESSAGE, &message)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // The driver observes the token and closes the socket on its own.
        self.cancel.cancel();
    }
}

/// Why a single websocket session ended.
enum SessionEnd {
    Cancelled,
    /// The server sent a namespace disconnect; not retried.
    ServerDisconnect,
    /// Nobody is listening for events any more.
    ReceiverGone,
    Dropped(ChatError),
}

struct Driver {
    url: Url,
    options: GatewayOptions,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::Sender<TransportEvent>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

impl Driver {
    async fn run(mut self) {
        let mut failures: u32 = 0;
        loop {
            self.set_state(ConnectionState::Connecting).await;
            let end = self.session(&mut failures).await;
            self.set_state(ConnectionState::Disconnected).await;

            match end {
                SessionEnd::Cancelled => {
                    debug!("gateway connection closed by client");
                    break;
                }
                SessionEnd::ServerDisconnect => {
                    info!("gateway closed the session");
                    break;
                }
                SessionEnd::ReceiverGone => {
                    debug!("event receiver dropped, stopping gateway driver");
                    break;
                }
                SessionEnd::Dropped(err) => {
                    if !self.options.reconnect {
                        warn!(error = %err, "gateway connection lost");
                        break;
                    }
                    let delay = self.options.backoff(failures);
                    failures = failures.saturating_add(1);
                    warn!(
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "gateway connection lost, reconnecting"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn session(&mut self, failures: &mut u32) -> SessionEnd {
        debug!(url = %self.url, "connecting to gateway");
        let ws = tokio::select! {
            _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
            res = tokio_tungstenite::connect_async(self.url.as_str()) => match res {
                Ok((ws, _)) => ws,
                Err(e) => return SessionEnd::Dropped(ChatError::from_tungstenite(e)),
            },
        };
        let (mut write, mut read) = ws.split();

        let mut heartbeat = HANDSHAKE_TIMEOUT;
        let deadline = tokio::time::sleep(heartbeat);
        tokio::pin!(deadline);
        let mut connected = false;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    if connected {
                        if let Ok(frame) = EnginePacket::Message(SocketPacket::disconnect()).encode() {
                            let _ = write.send(WsMessage::Text(frame.into())).await;
                        }
                    }
                    let _ = write.send(WsMessage::Close(None)).await;
                    return SessionEnd::Cancelled;
                }

                () = &mut deadline => {
                    return SessionEnd::Dropped(ChatError::Protocol("heartbeat timed out".into()));
                }

                cmd = self.commands.recv(), if connected => {
                    let Some(Command::Emit(packet)) = cmd else {
                        return SessionEnd::Cancelled;
                    };
                    let frame = match EnginePacket::Message(packet).encode() {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!("failed to encode outbound packet: {}", e);
                            continue;
                        }
                    };
                    debug!(frame = %frame, "emit");
                    if let Err(e) = write.send(WsMessage::Text(frame.into())).await {
                        return SessionEnd::Dropped(ChatError::from_tungstenite(e));
                    }
                }

                frame = read.next() => {
                    let text = match frame {
                        None => return SessionEnd::Dropped(ChatError::Closed),
                        Some(Err(e)) => return SessionEnd::Dropped(ChatError::from_tungstenite(e)),
                        Some(Ok(WsMessage::Text(text))) => text,
                        Some(Ok(WsMessage::Close(_))) => return SessionEnd::Dropped(ChatError::Closed),
                        Some(Ok(_)) => continue,
                    };
                    deadline
                        .as_mut()
                        .reset(tokio::time::Instant::now() + heartbeat);

                    let packet = match EnginePacket::decode(text.as_str()) {
                        Ok(packet) => packet,
                        Err(e) => {
                            warn!(frame = %text.as_str(), "ignoring malformed frame: {}", e);
                            continue;
                        }
                    };

                    let reply = match packet {
                        EnginePacket::Open(handshake) => {
                            heartbeat = Duration::from_millis(
                                handshake.ping_interval + handshake.ping_timeout,
                            );
                            deadline
                                .as_mut()
                                .reset(tokio::time::Instant::now() + heartbeat);
                            debug!(sid = %handshake.sid, "engine.io open");
                            Some(EnginePacket::Message(SocketPacket::connect()))
                        }
                        EnginePacket::Ping => Some(EnginePacket::Pong),
                        EnginePacket::Close => return SessionEnd::Dropped(ChatError::Closed),
                        EnginePacket::Message(SocketPacket::Connect { .. }) => {
                            connected = true;
                            *failures = 0;
                            info!("connected to gateway");
                            self.set_state(ConnectionState::Connected).await;
                            None
                        }
                        EnginePacket::Message(SocketPacket::ConnectError { data, .. }) => {
                            return SessionEnd::Dropped(ChatError::Protocol(format!(
                                "namespace connect refused: {data}"
                            )));
                        }
                        EnginePacket::Message(SocketPacket::Disconnect { .. }) => {
                            return SessionEnd::ServerDisconnect;
                        }
                        EnginePacket::Message(SocketPacket::Event { name, args, .. }) => {
                            if !self.dispatch(&name, &args).await {
                                return SessionEnd::ReceiverGone;
                            }
                            None
                        }
                        _ => None,
                    };

                    if let Some(reply) = reply {
                        let frame = match reply.encode() {
                            Ok(frame) => frame,
                            Err(e) => return SessionEnd::Dropped(e),
                        };
                        if let Err(e) = write.send(WsMessage::Text(frame.into())).await {
                            return SessionEnd::Dropped(ChatError::from_tungstenite(e));
                        }
                    }
                }
            }
        }
    }

    /// Forward a gateway event. Returns false once the receiver is gone.
    async fn dispatch(&self, name: &str, args: &[Value]) -> bool {
        let event = match GatewayEvent::from_event(name, args) {
            Ok(GatewayEvent::Time(t)) => TransportEvent::Time { epoch_ms: t.time },
            Ok(GatewayEvent::PrivateMessage(m)) => TransportEvent::PrivateMessage(m),
            Ok(GatewayEvent::Other { name }) => {
                debug!(event = %name, "ignoring unhandled gateway event");
                return true;
            }
            Err(e) => {
                warn!(event = %name, "ignoring malformed gateway event: {}", e);
                return true;
            }
        };
        // a full channel must not hold up teardown
        tokio::select! {
            _ = self.cancel.cancelled() => true,
            sent = self.events.send(event) => sent.is_ok(),
        }
    }

    async fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed && !self.cancel.is_cancelled() {
            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = self.events.send(TransportEvent::StateChanged(next)) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    /// A port nothing listens on.
    async fn refused_endpoint() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{port}")
    }

    async fn next_event(events: &mut mpsc::Receiver<TransportEvent>) -> Option<TransportEvent> {
        timeout(TEST_TIMEOUT, events.recv())
            .await
            .expect("timed out waiting for transport event")
    }

    const DEFAULT_OPEN: &str = r#"0{"sid":"s1","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;

    type ServerSocket = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

    /// Accept one websocket and run the server half of the handshake.
    async fn accept_handshake(listener: &TcpListener) -> ServerSocket {
        accept_with_open(listener, DEFAULT_OPEN).await.0
    }

    /// Like `accept_handshake`, with a custom open packet. Also returns the
    /// request URI of the upgrade.
    async fn accept_with_open(listener: &TcpListener, open: &str) -> (ServerSocket, String) {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut uri = String::new();
        let mut ws = tokio_tungstenite::accept_hdr_async(
            tcp,
            |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
                uri = req.uri().to_string();
                Ok(resp)
            },
        )
        .await
        .unwrap();
        ws.send(WsMessage::Text(open.into())).await.unwrap();
        let connect = ws.next().await.unwrap().unwrap();
        assert_eq!(connect.to_text().unwrap(), "40");
        ws.send(WsMessage::Text(r#"40{"sid":"n1"}"#.into()))
            .await
            .unwrap();
        (ws, uri)
    }

    #[test]
    fn backoff_grows_and_caps() {
        let options = GatewayOptions::new("http://x");
        assert_eq!(options.backoff(0), Duration::from_millis(1000));
        assert_eq!(options.backoff(1), Duration::from_millis(2000));
        assert_eq!(options.backoff(2), Duration::from_millis(4000));
        assert_eq!(options.backoff(3), Duration::from_millis(5000));
        assert_eq!(options.backoff(u32::MAX), Duration::from_millis(5000));
    }

    #[tokio::test]
    async fn invalid_endpoint_fails_fast() {
        let options = GatewayOptions::new("not a url");
        assert!(Connection::connect(&options, &SessionId::new("1")).is_err());
    }

    #[tokio::test]
    async fn refused_connection_without_reconnect_ends_disconnected() {
        let mut options = GatewayOptions::new(refused_endpoint().await);
        options.reconnect = false;
        let (connection, mut events) =
            Connection::connect(&options, &SessionId::new("123456")).unwrap();

        assert_eq!(
            next_event(&mut events).await,
            Some(TransportEvent::StateChanged(ConnectionState::Connecting))
        );
        assert_eq!(
            next_event(&mut events).await,
            Some(TransportEvent::StateChanged(ConnectionState::Disconnected))
        );
        // driver exits, so the channel closes
        assert_eq!(next_event(&mut events).await, None);
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_silences_events() {
        let mut options = GatewayOptions::new(refused_endpoint().await);
        options.reconnect_delay = Duration::from_millis(10);
        options.max_reconnect_delay = Duration::from_millis(10);
        let (mut connection, mut events) =
            Connection::connect(&options, &SessionId::new("123456")).unwrap();

        connection.disconnect().await;
        connection.disconnect().await;
        assert!(connection.is_closed());

        // Whatever was buffered before teardown drains, then the channel ends.
        let drained = timeout(TEST_TIMEOUT, async {
            while events.recv().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok());
        assert!(matches!(
            connection.emit_private(OutboundPrivateMessage {
                to: "x".into(),
                message: "y".into(),
                cid: None,
            }),
            Err(ChatError::Closed)
        ));
    }

    #[tokio::test]
    async fn handshake_events_and_emit_against_scripted_gateway() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        let (connection, mut events) =
            Connection::connect(&GatewayOptions::new(endpoint), &SessionId::new("123456"))
                .unwrap();

        let server = tokio::spawn(async move {
            let mut ws = accept_handshake(&listener).await;
            ws.send(WsMessage::Text(r#"42["time-msg",{"time":1700000000000}]"#.into()))
                .await
                .unwrap();
            ws.send(WsMessage::Text("2".into())).await.unwrap();
            ws.send(WsMessage::Text(
                r#"42["private-message",{"from":"654321","message":"oi"}]"#.into(),
            ))
            .await
            .unwrap();

            let mut frames = Vec::new();
            while frames.len() < 2 {
                match ws.next().await {
                    Some(Ok(WsMessage::Text(t))) => frames.push(t.as_str().to_string()),
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
            frames
        });

        assert_eq!(
            next_event(&mut events).await,
            Some(TransportEvent::StateChanged(ConnectionState::Connecting))
        );
        assert_eq!(
            next_event(&mut events).await,
            Some(TransportEvent::StateChanged(ConnectionState::Connected))
        );
        assert_eq!(connection.state(), ConnectionState::Connected);
        assert_eq!(
            next_event(&mut events).await,
            Some(TransportEvent::Time {
                epoch_ms: 1_700_000_000_000
            })
        );
        assert_eq!(
            next_event(&mut events).await,
            Some(TransportEvent::PrivateMessage(InboundPrivateMessage {
                from: "654321".into(),
                message: "oi".into(),
                cid: None,
            }))
        );

        connection
            .emit_private(OutboundPrivateMessage {
                to: "654321".into(),
                message: "hi".into(),
                cid: None,
            })
            .unwrap();

        let frames = timeout(TEST_TIMEOUT, server).await.unwrap().unwrap();
        assert_eq!(frames[0], "3");
        assert_eq!(
            frames[1],
            r#"42["private-message",{"to":"654321","message":"hi"}]"#
        );
    }

    #[tokio::test]
    async fn server_disconnect_is_not_retried() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        let (_connection, mut events) =
            Connection::connect(&GatewayOptions::new(endpoint), &SessionId::new("1")).unwrap();

        let server = tokio::spawn(async move {
            let mut ws = accept_handshake(&listener).await;
            ws.send(WsMessage::Text("41".into())).await.unwrap();
            // keep the socket open until the client goes away
            while let Some(Ok(_)) = ws.next().await {}
        });

        let mut seen = Vec::new();
        while let Some(event) = next_event(&mut events).await {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                TransportEvent::StateChanged(ConnectionState::Connecting),
                TransportEvent::StateChanged(ConnectionState::Connected),
                TransportEvent::StateChanged(ConnectionState::Disconnected),
            ]
        );
        server.abort();
    }

    #[tokio::test]
    async fn emits_queued_while_connecting_are_flushed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        let (connection, _events) =
            Connection::connect(&GatewayOptions::new(endpoint), &SessionId::new("1")).unwrap();

        connection
            .emit_private(OutboundPrivateMessage {
                to: "2".into(),
                message: "early".into(),
                cid: None,
            })
            .unwrap();

        let mut ws = timeout(TEST_TIMEOUT, accept_handshake(&listener))
            .await
            .unwrap();
        let frame = timeout(TEST_TIMEOUT, ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(
            frame.to_text().unwrap(),
            r#"42["private-message",{"to":"2","message":"early"}]"#
        );
    }

    #[tokio::test]
    async fn disconnect_completes_while_event_channel_is_full() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut options =
            GatewayOptions::new(format!("http://{}", listener.local_addr().unwrap()));
        options.reconnect = false;
        options.event_capacity = 4;
        let (mut connection, _events) =
            Connection::connect(&options, &SessionId::new("1")).unwrap();

        let server = tokio::spawn(async move {
            let mut ws = accept_handshake(&listener).await;
            for tick in 0..20i64 {
                let frame = format!(r#"42["time-msg",{{"time":{}}}]"#, 1_700_000_000_000 + tick);
                if ws.send(WsMessage::Text(frame.into())).await.is_err() {
                    return;
                }
            }
            while let Some(Ok(_)) = ws.next().await {}
        });

        // nobody drains events, so the driver ends up parked on a full channel
        timeout(TEST_TIMEOUT, async {
            while connection.state() != ConnectionState::Connected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(
            timeout(TEST_TIMEOUT, connection.disconnect()).await.is_ok(),
            "disconnect did not complete"
        );
        assert!(connection.is_closed());
        server.abort();
    }

    #[tokio::test]
    async fn dropped_socket_reconnects_with_same_session_id() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut options =
            GatewayOptions::new(format!("http://{}", listener.local_addr().unwrap()));
        options.reconnect_delay = Duration::from_millis(10);
        options.max_reconnect_delay = Duration::from_millis(10);
        let (mut connection, mut events) =
            Connection::connect(&options, &SessionId::new("123456")).unwrap();

        let server = tokio::spawn(async move {
            let (mut first, first_uri) = accept_with_open(&listener, DEFAULT_OPEN).await;
            first.close(None).await.unwrap();
            drop(first);
            let (second, second_uri) = accept_with_open(&listener, DEFAULT_OPEN).await;
            (first_uri, second_uri, second)
        });

        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(next_event(&mut events).await.unwrap());
        }
        assert_eq!(
            seen,
            vec![
                TransportEvent::StateChanged(ConnectionState::Connecting),
                TransportEvent::StateChanged(ConnectionState::Connected),
                TransportEvent::StateChanged(ConnectionState::Disconnected),
                TransportEvent::StateChanged(ConnectionState::Connecting),
                TransportEvent::StateChanged(ConnectionState::Connected),
            ]
        );

        let (first_uri, second_uri, _second) =
            timeout(TEST_TIMEOUT, server).await.unwrap().unwrap();
        assert!(first_uri.contains("userId=123456"), "{first_uri}");
        assert!(second_uri.contains("userId=123456"), "{second_uri}");
        assert!(second_uri.contains("EIO=4"), "{second_uri}");
        assert_eq!(connection.state(), ConnectionState::Connected);

        connection.disconnect().await;
    }

    #[tokio::test]
    async fn silent_server_trips_heartbeat_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut options =
            GatewayOptions::new(format!("http://{}", listener.local_addr().unwrap()));
        options.reconnect = false;
        let (_connection, mut events) =
            Connection::connect(&options, &SessionId::new("1")).unwrap();

        let server = tokio::spawn(async move {
            let (mut ws, _) = accept_with_open(
                &listener,
                r#"0{"sid":"s1","upgrades":[],"pingInterval":50,"pingTimeout":50,"maxPayload":1000000}"#,
            )
            .await;
            // never ping, never close
            while let Some(Ok(_)) = ws.next().await {}
        });

        assert_eq!(
            next_event(&mut events).await,
            Some(TransportEvent::StateChanged(ConnectionState::Connecting))
        );
        assert_eq!(
            next_event(&mut events).await,
            Some(TransportEvent::StateChanged(ConnectionState::Connected))
        );
        assert_eq!(
            next_event(&mut events).await,
            Some(TransportEvent::StateChanged(ConnectionState::Disconnected))
        );
        assert_eq!(next_event(&mut events).await, None);
        server.abort();
    }
}
