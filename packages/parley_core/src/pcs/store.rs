//! Durable conversation store on SQLite.
//!
//! Each conversation is the document collection `chats/{chatId}/messages`.
//! The store assigns document ids and millisecond timestamps on insert and
//! orders every read by `timestamp ASC`, insertion sequence breaking ties.
//! Successful writes are announced on an in-process broadcast channel that
//! live subscriptions listen to.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use super::subscription::Subscription;
use crate::error::{ChatError, Result};
use crate::message::{Direction, Message};

/// Current schema version - increment when adding migrations
const SCHEMA_VERSION: i64 = 1;

/// Key of one persistent conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConversationId(String);

impl ConversationId {
    /// Accepts any non-blank id that is usable as a single path segment.
    pub fn parse(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() || id.contains('/') {
            return Err(ChatError::InvalidConversationId(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn collection_path(&self) -> String {
        format!("chats/{}/messages", self.0)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ConversationId {
    type Error = ChatError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<ConversationId> for String {
    fn from(id: ConversationId) -> Self {
        id.0
    }
}

/// A message as submitted by a writer, before the store stamps it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub from: String,
    pub text: String,
    pub correlation_id: Option<Uuid>,
}

/// A message document as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub from: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

impl StoredMessage {
    /// Convert to a log entry, deriving direction from `identity`.
    pub fn to_message(&self, identity: &str) -> Message {
        Message {
            id: Some(self.id.clone()),
            correlation_id: self.correlation_id,
            from: self.from.clone(),
            text: self.text.clone(),
            direction: if self.from == identity {
                Direction::Sent
            } else {
                Direction::Received
            },
            timestamp: Some(self.timestamp),
        }
    }
}

/// Summary of one conversation for listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub message_count: i64,
    pub latest_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Re-query live subscriptions on this interval so writes made by other
    /// processes show up. `None` relies on in-process notifications only.
    pub poll_interval: Option<Duration>,
    /// Capacity of the change-notification broadcast.
    pub notify_capacity: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            poll_interval: Some(Duration::from_millis(1000)),
            notify_capacity: 256,
        }
    }
}

#[derive(Clone)]
pub struct ConversationStore {
    pool: SqlitePool,
    changes: broadcast::Sender<ConversationId>,
    options: StoreOptions,
}

impl ConversationStore {
    /// Connect to the database at `url` (e.g. `sqlite://parley.db?mode=rwc`)
    /// and bring its schema up to date.
    pub async fn open(url: &str, options: StoreOptions) -> Result<Self> {
        info!("Connecting to conversation store: {}", url);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .connect(url)
            .await?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&pool)
            .await?;

        Self::with_pool(pool, options).await
    }

    /// A private in-memory store. Everything is lost when it is dropped.
    pub async fn in_memory(options: StoreOptions) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool, options).await
    }

    pub async fn with_pool(pool: SqlitePool, options: StoreOptions) -> Result<Self> {
        run_migrations(&pool).await?;
        let (changes, _) = broadcast::channel(options.notify_capacity.max(1));
        Ok(Self {
            pool,
            changes,
            options,
        })
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Persist a message with a store-assigned id and timestamp, then notify
    /// subscribers of the conversation.
    pub async fn append(
        &self,
        conversation: &ConversationId,
        message: NewMessage,
    ) -> Result<StoredMessage> {
        let stored = StoredMessage {
            id: Uuid::now_v7().to_string(),
            from: message.from,
            text: message.text,
            timestamp: now_millis(),
            correlation_id: message.correlation_id,
        };

        sqlx::query(
            r#"
            INSERT INTO chat_messages (id, chat_id, sender, body, timestamp, correlation_id)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&stored.id)
        .bind(conversation.as_str())
        .bind(&stored.from)
        .bind(&stored.text)
        .bind(stored.timestamp.timestamp_millis())
        .bind(stored.correlation_id.map(|c| c.to_string()))
        .execute(&self.pool)
        .await?;

        debug!(
            path = %conversation.collection_path(),
            id = %stored.id,
            "message appended"
        );
        // no receivers is fine
        let _ = self.changes.send(conversation.clone());
        Ok(stored)
    }

    /// The full message set of a conversation in server order.
    pub async fn ordered_messages(&self, conversation: &ConversationId) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, sender, body, timestamp, correlation_id
            FROM chat_messages
            WHERE chat_id = ?
            ORDER BY timestamp ASC, seq ASC
            "#,
        )
        .bind(conversation.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(stored_from_row).collect()
    }

    /// Conversations holding at least one message, most recently active first.
    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT chat_id, COUNT(*) AS message_count, MAX(timestamp) AS latest_at
            FROM chat_messages
            GROUP BY chat_id
            ORDER BY latest_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(ConversationSummary {
                    id: ConversationId::parse(r.get::<String, _>("chat_id"))?,
                    message_count: r.get("message_count"),
                    latest_at: millis_to_datetime(r.get("latest_at"))?,
                })
            })
            .collect()
    }

    /// Open a live query on `conversation`. The first snapshot is delivered
    /// immediately, even when empty.
    pub fn subscribe(&self, conversation: ConversationId) -> Subscription {
        Subscription::start(self.clone(), conversation)
    }

    /// Raw change notifications: the id of every conversation written to.
    pub fn changes(&self) -> broadcast::Receiver<ConversationId> {
        self.changes.subscribe()
    }

    /// Close the pool. Later writes fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    #[cfg(test)]
    pub(crate) fn pool_for_tests(&self) -> SqlitePool {
        self.pool.clone()
    }
}

fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::<Utc>::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| ChatError::Protocol(format!("timestamp out of range: {ms}")))
}

fn stored_from_row(r: &SqliteRow) -> Result<StoredMessage> {
    let correlation_id: Option<String> = r.get("correlation_id");
    Ok(StoredMessage {
        id: r.get("id"),
        from: r.get("sender"),
        text: r.get("body"),
        timestamp: millis_to_datetime(r.get("timestamp"))?,
        correlation_id: correlation_id.and_then(|c| Uuid::parse_str(&c).ok()),
    })
}

// Migrations are applied in code so the binary needs no migrations directory.
pub(crate) async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL DEFAULT (unixepoch()),
            description TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    let current_version: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
            .fetch_one(pool)
            .await?;

    if current_version > SCHEMA_VERSION {
        return Err(ChatError::Protocol(format!(
            "store schema version {} is newer than supported version {}",
            current_version, SCHEMA_VERSION
        )));
    }
    if current_version == SCHEMA_VERSION {
        debug!("Store schema is up to date (version {})", SCHEMA_VERSION);
        return Ok(());
    }

    if current_version < 1 {
        info!("Applying store migration 1: chat_messages");
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                chat_id TEXT NOT NULL,
                sender TEXT NOT NULL,
                body TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                correlation_id TEXT
            )
            "#,
        )
        .execute(pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chat_messages_order ON chat_messages(chat_id, timestamp, seq)",
        )
        .execute(pool)
        .await?;
        sqlx::query("INSERT INTO schema_version (version, description) VALUES (1, 'chat_messages')")
            .execute(pool)
            .await?;
    }

    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_helpers::{new_message, test_store};
    use super::*;

    fn abc() -> ConversationId {
        ConversationId::parse("abc").unwrap()
    }

    #[test]
    fn conversation_id_validation() {
        assert!(ConversationId::parse("abc").is_ok());
        assert!(ConversationId::parse("").is_err());
        assert!(ConversationId::parse("   ").is_err());
        assert!(ConversationId::parse("a/b").is_err());
        assert_eq!(abc().collection_path(), "chats/abc/messages");
    }

    #[test]
    fn conversation_id_serde_validates() {
        let id: ConversationId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(id, abc());
        assert!(serde_json::from_str::<ConversationId>("\"a/b\"").is_err());
    }

    #[tokio::test]
    async fn append_assigns_id_and_timestamp() {
        let store = test_store().await;
        let before = Utc::now().timestamp_millis();
        let stored = store
            .append(&abc(), new_message("alice@example.com", "hello"))
            .await
            .unwrap();
        assert!(!stored.id.is_empty());
        assert!(stored.timestamp.timestamp_millis() >= before);
        assert_eq!(stored.from, "alice@example.com");
    }

    #[tokio::test]
    async fn ordered_messages_are_ascending_and_scoped() {
        let store = test_store().await;
        let other = ConversationId::parse("other").unwrap();
        store.append(&abc(), new_message("a", "first")).await.unwrap();
        store.append(&other, new_message("a", "elsewhere")).await.unwrap();
        store.append(&abc(), new_message("b", "second")).await.unwrap();
        store.append(&abc(), new_message("a", "third")).await.unwrap();

        let msgs = store.ordered_messages(&abc()).await.unwrap();
        let texts: Vec<_> = msgs.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["first", "second", "third"]);
        assert!(msgs.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn correlation_id_round_trips_through_store() {
        let store = test_store().await;
        let cid = Uuid::new_v4();
        store
            .append(
                &abc(),
                NewMessage {
                    from: "a".into(),
                    text: "x".into(),
                    correlation_id: Some(cid),
                },
            )
            .await
            .unwrap();
        let msgs = store.ordered_messages(&abc()).await.unwrap();
        assert_eq!(msgs[0].correlation_id, Some(cid));
    }

    #[tokio::test]
    async fn append_notifies_changes() {
        let store = test_store().await;
        let mut changes = store.changes();
        store.append(&abc(), new_message("a", "x")).await.unwrap();
        assert_eq!(changes.recv().await.unwrap(), abc());
    }

    #[tokio::test]
    async fn list_conversations_most_recent_first() {
        let store = test_store().await;
        let one = ConversationId::parse("one").unwrap();
        let two = ConversationId::parse("two").unwrap();
        store.append(&one, new_message("a", "x")).await.unwrap();
        store.append(&one, new_message("a", "y")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.append(&two, new_message("a", "z")).await.unwrap();

        let list = store.list_conversations().await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, two);
        assert_eq!(list[0].message_count, 1);
        assert_eq!(list[1].id, one);
        assert_eq!(list[1].message_count, 2);
    }

    #[tokio::test]
    async fn append_after_close_fails() {
        let store = test_store().await;
        store.close().await;
        let err = store.append(&abc(), new_message("a", "x")).await.unwrap_err();
        assert!(matches!(err, ChatError::Store(_)));
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let store = test_store().await;
        run_migrations(&store.pool).await.unwrap();
        store.append(&abc(), new_message("a", "x")).await.unwrap();
        assert_eq!(store.ordered_messages(&abc()).await.unwrap().len(), 1);
    }

    #[test]
    fn stored_message_direction_follows_identity() {
        let stored = StoredMessage {
            id: "d1".into(),
            from: "alice@example.com".into(),
            text: "hi".into(),
            timestamp: Utc::now(),
            correlation_id: None,
        };
        assert_eq!(
            stored.to_message("alice@example.com").direction,
            Direction::Sent
        );
        let theirs = stored.to_message("bob@example.com");
        assert_eq!(theirs.direction, Direction::Received);
        assert_eq!(theirs.id.as_deref(), Some("d1"));
        assert!(theirs.timestamp.is_some());
    }
}
