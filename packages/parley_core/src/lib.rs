//! # Parley core
//!
//! Message synchronization and delivery for a two-party chat client that can
//! run over two different realtime transports:
//!
//! - **Ephemeral Session Messaging** ([`esm`]): a websocket connection to a
//!   realtime gateway, registered under a session id. Messages are routed
//!   point-to-point by recipient session id and never persisted. The local log
//!   is appended to optimistically on send and incrementally on receipt.
//! - **Persistent Conversation Sync** ([`pcs`]): a durable, server-ordered
//!   message store with live subscriptions. Every change pushes the full
//!   ordered result set, which replaces the local log wholesale.
//!
//! Both feed a [`MessageLog`], whose [`SyncStrategy`] names which of the two
//! consistency models it follows, and both surface their state to a UI
//! collaborator through a [`ChatView`].
//!
//! ## Quick start (ESM)
//!
//! ```rust,no_run
//! use parley_core::esm::{Connection, EsmSession, GatewayOptions};
//! use parley_core::SessionId;
//!
//! # async fn run() -> parley_core::Result<()> {
//! let session_id = SessionId::generate();
//! let options = GatewayOptions::new("ws://127.0.0.1:3000");
//! let (connection, mut events) = Connection::connect(&options, &session_id)?;
//!
//! let mut session = EsmSession::new(session_id, connection);
//! while let Some(event) = events.recv().await {
//!     session.handle_event(event);
//!     if session.is_connected() {
//!         session.send_message("654321", "hi");
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Quick start (PCS)
//!
//! ```rust,no_run
//! use parley_core::pcs::{ConversationId, ConversationStore, PcsConversation, StoreOptions};
//!
//! # async fn run() -> parley_core::Result<()> {
//! let store = ConversationStore::open("sqlite://parley.db?mode=rwc", StoreOptions::default()).await?;
//! let mut convo = PcsConversation::new(store, "alice@example.com");
//! convo.open(ConversationId::parse("abc")?);
//! convo.send_message("hello").await;
//! while let Some(change) = convo.next_snapshot().await {
//!     println!("{} messages", convo.messages().len());
//!     # let _ = change;
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod esm;
pub mod identity;
pub mod log;
pub mod message;
pub mod pcs;
pub mod view;

pub use error::{ChatError, Result};
pub use identity::{DEFAULT_SELF_LABEL, SessionId};
pub use log::{LogChange, MessageLog, SyncStrategy};
pub use message::{Direction, Message, Rejection, SendOutcome, is_blank};
pub use view::{ChatView, Composer, ConnectionState, Intent};
