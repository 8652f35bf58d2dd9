use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whether a log entry was written by this client or by the peer.
///
/// Derived locally, never transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

/// One entry of the ordered message log, whichever transport produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Store document id. PCS only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Client-generated id shared by every copy of one outbound message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    pub from: String,
    #[serde(rename = "message", alias = "text")]
    pub text: String,
    #[serde(rename = "type")]
    pub direction: Direction,
    /// Server-assigned for PCS; ESM entries are ordered by arrival only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    pub fn sent(from: impl Into<String>, text: impl Into<String>, correlation_id: Uuid) -> Self {
        Self {
            id: None,
            correlation_id: Some(correlation_id),
            from: from.into(),
            text: text.into(),
            direction: Direction::Sent,
            timestamp: None,
        }
    }

    pub fn received(
        from: impl Into<String>,
        text: impl Into<String>,
        correlation_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: None,
            correlation_id,
            from: from.into(),
            text: text.into(),
            direction: Direction::Received,
            timestamp: None,
        }
    }

    pub fn is_sent(&self) -> bool {
        self.direction == Direction::Sent
    }
}

/// True for empty or whitespace-only input, which is never dispatched.
pub fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

/// Why a send was refused before reaching any transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    EmptyRecipient,
    EmptyText,
    NotConnected,
    NoConversation,
}

/// Result of a send attempt, returned instead of silently dropping input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SendOutcome {
    /// Handed to the transport. ESM has already appended the entry locally;
    /// PCS shows it once the next snapshot arrives.
    Dispatched { correlation_id: Uuid },
    /// Nothing was emitted and the log is untouched.
    Rejected { reason: Rejection },
    /// The transport refused the message; the log is untouched.
    Failed { detail: String },
}

impl SendOutcome {
    pub fn rejected(reason: Rejection) -> Self {
        Self::Rejected { reason }
    }

    pub fn is_dispatched(&self) -> bool {
        matches!(self, Self::Dispatched { .. })
    }
}
