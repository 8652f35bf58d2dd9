//! Persistent Conversation Sync.
//!
//! Submodules:
//! - `store` - SQLite-backed ordered message collections
//! - `subscription` - live query handles pushing full snapshots
//! - `conversation` - the screen controller that owns the snapshot log

pub mod conversation;
pub mod store;
pub mod subscription;

pub use conversation::PcsConversation;
pub use store::{
    ConversationId, ConversationStore, ConversationSummary, NewMessage, StoreOptions,
    StoredMessage,
};
pub use subscription::{Snapshot, Subscription, SubscriptionState};
