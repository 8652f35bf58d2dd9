//! Ephemeral Session Messaging.
//!
//! Submodules:
//! - `wire` - Engine.IO / Socket.IO text framing and event payloads
//! - `connection` - websocket driver task, reconnection, state surfacing
//! - `session` - the screen controller that owns the optimistic log

pub mod connection;
pub mod session;
pub mod wire;

pub use connection::{Connection, GatewayOptions, Transport, TransportEvent};
pub use session::EsmSession;
pub use wire::{InboundPrivateMessage, OutboundPrivateMessage};
