//! Engine.IO v4 / Socket.IO v5 text framing, websocket transport only.
//!
//! Every websocket text frame is one Engine.IO packet: a single type digit
//! followed by its payload. Type `4` wraps a Socket.IO packet, which carries
//! its own type digit, an optional `/namespace,` prefix, an optional ack id,
//! and a JSON body:
//!
//! ```text
//! 0{"sid":"x","upgrades":[],"pingInterval":25000,"pingTimeout":20000}   open
//! 2 / 3                                                                  ping / pong
//! 40 / 40{"sid":"y"}                                                     namespace connect
//! 41                                                                     namespace disconnect
//! 42["private-message",{"to":"654321","message":"hi"}]                   event
//! ```
//!
//! Binary packets are not supported.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;
use uuid::Uuid;

use crate::error::{ChatError, Result};
use crate::identity::SessionId;

pub const ENGINE_IO_VERSION: u8 = 4;
pub const DEFAULT_NAMESPACE: &str = "/";
pub const SOCKET_IO_PATH: &str = "/socket.io/";

pub const EVENT_PRIVATE_MESSAGE: &str = "private-message";
pub const EVENT_TIME: &str = "time-msg";

/// Payload of the Engine.IO open packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default = "default_max_payload")]
    pub max_payload: u64,
}

fn default_max_payload() -> u64 {
    1_000_000
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenHandshake),
    Close,
    Ping,
    Pong,
    Message(SocketPacket),
    Upgrade,
    Noop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        ack: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        namespace: String,
        ack: u64,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        data: Value,
    },
}

impl EnginePacket {
    pub fn encode(&self) -> Result<String> {
        Ok(match self {
            Self::Open(handshake) => format!("0{}", serde_json::to_string(handshake)?),
            Self::Close => "1".to_string(),
            Self::Ping => "2".to_string(),
            Self::Pong => "3".to_string(),
            Self::Message(packet) => format!("4{}", packet.encode()?),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        })
    }

    pub fn decode(frame: &str) -> Result<Self> {
        let mut chars = frame.chars();
        let kind = chars
            .next()
            .ok_or_else(|| ChatError::Protocol("empty engine.io frame".into()))?;
        let body = chars.as_str();
        match kind {
            '0' => Ok(Self::Open(serde_json::from_str(body)?)),
            '1' => Ok(Self::Close),
            // ping/pong may carry a probe payload, which we do not use
            '2' => Ok(Self::Ping),
            '3' => Ok(Self::Pong),
            '4' => Ok(Self::Message(SocketPacket::decode(body)?)),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            other => Err(ChatError::Protocol(format!(
                "unknown engine.io packet type {other:?}"
            ))),
        }
    }
}

impl SocketPacket {
    pub fn connect() -> Self {
        Self::Connect {
            namespace: DEFAULT_NAMESPACE.to_string(),
            data: None,
        }
    }

    pub fn disconnect() -> Self {
        Self::Disconnect {
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    /// An event on the default namespace with a single payload argument.
    pub fn event(name: &str, payload: &impl Serialize) -> Result<Self> {
        Ok(Self::Event {
            namespace: DEFAULT_NAMESPACE.to_string(),
            ack: None,
            name: name.to_string(),
            args: vec![serde_json::to_value(payload)?],
        })
    }

    pub fn namespace(&self) -> &str {
        match self {
            Self::Connect { namespace, .. }
            | Self::Disconnect { namespace }
            | Self::Event { namespace, .. }
            | Self::Ack { namespace, .. }
            | Self::ConnectError { namespace, .. } => namespace,
        }
    }

    pub fn encode(&self) -> Result<String> {
        let (kind, ack, body) = match self {
            Self::Connect { data, .. } => (
                '0',
                None,
                data.as_ref().map(serde_json::to_string).transpose()?,
            ),
            Self::Disconnect { .. } => ('1', None, None),
            Self::Event { ack, name, args, .. } => {
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(Value::String(name.clone()));
                items.extend(args.iter().cloned());
                ('2', *ack, Some(serde_json::to_string(&items)?))
            }
            Self::Ack { ack, args, .. } => ('3', Some(*ack), Some(serde_json::to_string(args)?)),
            Self::ConnectError { data, .. } => ('4', None, Some(serde_json::to_string(data)?)),
        };

        let mut out = String::new();
        out.push(kind);
        let namespace = self.namespace();
        if namespace != DEFAULT_NAMESPACE {
            out.push_str(namespace);
            out.push(',');
        }
        if let Some(id) = ack {
            out.push_str(&id.to_string());
        }
        if let Some(body) = body {
            out.push_str(&body);
        }
        Ok(out)
    }

    pub fn decode(body: &str) -> Result<Self> {
        let mut chars = body.chars();
        let kind = chars
            .next()
            .ok_or_else(|| ChatError::Protocol("empty socket.io packet".into()))?;
        let mut rest = chars.as_str();

        let namespace = if rest.starts_with('/') {
            let end = rest.find(',').unwrap_or(rest.len());
            let ns = rest[..end].to_string();
            rest = rest.get(end + 1..).unwrap_or("");
            ns
        } else {
            DEFAULT_NAMESPACE.to_string()
        };

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let ack = if digits > 0 {
            let id = rest[..digits]
                .parse::<u64>()
                .map_err(|e| ChatError::Protocol(format!("bad ack id: {e}")))?;
            rest = &rest[digits..];
            Some(id)
        } else {
            None
        };

        let json = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str::<Value>(rest)?)
        };

        match kind {
            '0' => Ok(Self::Connect {
                namespace,
                data: json,
            }),
            '1' => Ok(Self::Disconnect { namespace }),
            '2' => {
                let mut items = match json {
                    Some(Value::Array(items)) => items,
                    _ => return Err(ChatError::Protocol("event body must be an array".into())),
                };
                if items.is_empty() {
                    return Err(ChatError::Protocol("event without a name".into()));
                }
                let name = match items.remove(0) {
                    Value::String(name) => name,
                    other => {
                        return Err(ChatError::Protocol(format!(
                            "event name must be a string, got {other}"
                        )));
                    }
                };
                Ok(Self::Event {
                    namespace,
                    ack,
                    name,
                    args: items,
                })
            }
            '3' => {
                let ack = ack.ok_or_else(|| ChatError::Protocol("ack without id".into()))?;
                let args = match json {
                    Some(Value::Array(items)) => items,
                    None => Vec::new(),
                    Some(other) => vec![other],
                };
                Ok(Self::Ack {
                    namespace,
                    ack,
                    args,
                })
            }
            '4' => Ok(Self::ConnectError {
                namespace,
                data: json.unwrap_or(Value::Null),
            }),
            '5' | '6' => Err(ChatError::Protocol(
                "binary socket.io packets are not supported".into(),
            )),
            other => Err(ChatError::Protocol(format!(
                "unknown socket.io packet type {other:?}"
            ))),
        }
    }
}

/// `private-message` as emitted by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundPrivateMessage {
    pub to: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<Uuid>,
}

/// `private-message` as delivered by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundPrivateMessage {
    pub from: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeMessage {
    /// Epoch milliseconds.
    pub time: i64,
}

/// A gateway event the client understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    Time(TimeMessage),
    PrivateMessage(InboundPrivateMessage),
    Other { name: String },
}

impl GatewayEvent {
    pub fn from_event(name: &str, args: &[Value]) -> Result<Self> {
        let first = || {
            args.first()
                .cloned()
                .ok_or_else(|| ChatError::Protocol(format!("{name} without payload")))
        };
        match name {
            EVENT_TIME => Ok(Self::Time(serde_json::from_value(first()?)?)),
            EVENT_PRIVATE_MESSAGE => Ok(Self::PrivateMessage(serde_json::from_value(first()?)?)),
            other => Ok(Self::Other {
                name: other.to_string(),
            }),
        }
    }
}

/// Build the websocket URL for `endpoint`, tagging the connection with the
/// session id as the `userId` query parameter.
///
/// `http`/`https` endpoints are mapped to `ws`/`wss`.
pub fn socket_url(endpoint: &str, session_id: &SessionId) -> Result<Url> {
    let invalid = |reason: &str| ChatError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    };
    let mut url = Url::parse(endpoint).map_err(|e| invalid(&e.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return Err(invalid("scheme must be http, https, ws or wss")),
    };
    url.set_scheme(scheme)
        .map_err(|_| invalid("cannot switch to websocket scheme"))?;

    let base = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{base}{SOCKET_IO_PATH}"));
    url.set_query(None);
    url.query_pairs_mut()
        .append_pair("EIO", &ENGINE_IO_VERSION.to_string())
        .append_pair("transport", "websocket")
        .append_pair("userId", session_id.as_str());
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_open_packet() {
        let frame = r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
        match EnginePacket::decode(frame).unwrap() {
            EnginePacket::Open(h) => {
                assert_eq!(h.sid, "abc");
                assert_eq!(h.ping_interval, 25000);
                assert_eq!(h.ping_timeout, 20000);
            }
            other => panic!("Expected Open, got {other:?}"),
        }
    }

    #[test]
    fn ping_pong_frames() {
        assert_eq!(EnginePacket::decode("2").unwrap(), EnginePacket::Ping);
        assert_eq!(EnginePacket::decode("2probe").unwrap(), EnginePacket::Ping);
        assert_eq!(EnginePacket::Pong.encode().unwrap(), "3");
    }

    #[test]
    fn namespace_connect_frames() {
        let connect = EnginePacket::Message(SocketPacket::connect());
        assert_eq!(connect.encode().unwrap(), "40");

        match EnginePacket::decode(r#"40{"sid":"xyz"}"#).unwrap() {
            EnginePacket::Message(SocketPacket::Connect { namespace, data }) => {
                assert_eq!(namespace, "/");
                assert_eq!(data.unwrap()["sid"], "xyz");
            }
            other => panic!("Expected Connect, got {other:?}"),
        }
    }

    #[test]
    fn encode_private_message_event() {
        let payload = OutboundPrivateMessage {
            to: "654321".into(),
            message: "hi".into(),
            cid: None,
        };
        let packet = SocketPacket::event(EVENT_PRIVATE_MESSAGE, &payload).unwrap();
        let frame = EnginePacket::Message(packet).encode().unwrap();
        assert_eq!(
            frame,
            r#"42["private-message",{"to":"654321","message":"hi"}]"#
        );
    }

    #[test]
    fn decode_inbound_private_message() {
        let frame = r#"42["private-message",{"from":"123456","message":"oi"}]"#;
        let EnginePacket::Message(SocketPacket::Event { name, args, ack, .. }) =
            EnginePacket::decode(frame).unwrap()
        else {
            panic!("Expected event");
        };
        assert!(ack.is_none());
        let event = GatewayEvent::from_event(&name, &args).unwrap();
        assert_eq!(
            event,
            GatewayEvent::PrivateMessage(InboundPrivateMessage {
                from: "123456".into(),
                message: "oi".into(),
                cid: None,
            })
        );
    }

    #[test]
    fn decode_time_event() {
        let frame = r#"42["time-msg",{"time":1700000000000}]"#;
        let EnginePacket::Message(SocketPacket::Event { name, args, .. }) =
            EnginePacket::decode(frame).unwrap()
        else {
            panic!("Expected event");
        };
        assert_eq!(
            GatewayEvent::from_event(&name, &args).unwrap(),
            GatewayEvent::Time(TimeMessage {
                time: 1_700_000_000_000
            })
        );
    }

    #[test]
    fn namespace_and_ack_id_are_parsed() {
        let packet = SocketPacket::decode(r#"2/chat,17["ping",{"n":1}]"#).unwrap();
        match packet {
            SocketPacket::Event {
                namespace,
                ack,
                name,
                args,
            } => {
                assert_eq!(namespace, "/chat");
                assert_eq!(ack, Some(17));
                assert_eq!(name, "ping");
                assert_eq!(args, vec![json!({"n": 1})]);
            }
            other => panic!("Expected Event, got {other:?}"),
        }
    }

    #[test]
    fn namespaced_event_encodes_prefix() {
        let packet = SocketPacket::Event {
            namespace: "/chat".into(),
            ack: Some(3),
            name: "x".into(),
            args: vec![],
        };
        assert_eq!(packet.encode().unwrap(), r#"2/chat,3["x"]"#);
    }

    #[test]
    fn unknown_events_are_passed_through() {
        let event = GatewayEvent::from_event("typing", &[]).unwrap();
        assert_eq!(
            event,
            GatewayEvent::Other {
                name: "typing".into()
            }
        );
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert!(EnginePacket::decode("").is_err());
        assert!(EnginePacket::decode("9").is_err());
        assert!(EnginePacket::decode("42{\"not\":\"array\"}").is_err());
        assert!(EnginePacket::decode("42[]").is_err());
        assert!(EnginePacket::decode("42[1,2]").is_err());
        assert!(EnginePacket::decode("45[\"bin\"]").is_err());
        assert!(GatewayEvent::from_event(EVENT_TIME, &[]).is_err());
    }

    #[test]
    fn socket_url_from_http_endpoint() {
        let url = socket_url("http://localhost:3000", &SessionId::new("123456")).unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:3000/socket.io/?EIO=4&transport=websocket&userId=123456"
        );
    }

    #[test]
    fn socket_url_keeps_base_path_and_secure_scheme() {
        let url = socket_url("https://chat.example.com/app/", &SessionId::new("a b")).unwrap();
        assert_eq!(
            url.as_str(),
            "wss://chat.example.com/app/socket.io/?EIO=4&transport=websocket&userId=a+b"
        );
    }

    #[test]
    fn socket_url_rejects_other_schemes() {
        let err = socket_url("ftp://x", &SessionId::new("1")).unwrap_err();
        assert!(matches!(err, ChatError::InvalidEndpoint { .. }));
        assert!(socket_url("not a url", &SessionId::new("1")).is_err());
    }
}
