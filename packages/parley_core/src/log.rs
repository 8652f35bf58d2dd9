//! The ordered message log shared by both transports.
//!
//! Insertion order is display order. How the log changes depends on its
//! [`SyncStrategy`]:
//!
//! - [`SyncStrategy::OptimisticAppend`]: every sent or received message
//!   appends exactly one entry. Sent entries are written at dispatch time,
//!   before any acknowledgment. An inbound message whose correlation id is
//!   already present is an echo of our own send and is not appended again.
//! - [`SyncStrategy::SnapshotReplace`]: the server's full ordered result set
//!   replaces the log on every snapshot. Local-only entries do not survive a
//!   snapshot that does not contain them.
//!
//! Every mutation is a single append or a single replace, so a reader never
//! observes a half-applied update.

use tracing::debug;

use crate::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    OptimisticAppend,
    SnapshotReplace,
}

/// What a log operation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogChange {
    Appended,
    /// Inbound echo of an entry already in the log.
    Reconciled,
    Replaced { len: usize },
    /// The operation does not apply to this log's strategy.
    Ignored,
}

impl LogChange {
    /// Whether the rendered list needs to be redrawn.
    pub fn is_visible(&self) -> bool {
        matches!(self, Self::Appended | Self::Replaced { .. })
    }
}

#[derive(Debug, Clone)]
pub struct MessageLog {
    strategy: SyncStrategy,
    entries: Vec<Message>,
}

impl MessageLog {
    pub fn new(strategy: SyncStrategy) -> Self {
        Self {
            strategy,
            entries: Vec::new(),
        }
    }

    pub fn optimistic() -> Self {
        Self::new(SyncStrategy::OptimisticAppend)
    }

    pub fn snapshot() -> Self {
        Self::new(SyncStrategy::SnapshotReplace)
    }

    pub fn strategy(&self) -> SyncStrategy {
        self.strategy
    }

    /// Record a locally dispatched message.
    ///
    /// Under `SnapshotReplace` the entry is local-only and lasts until the
    /// next snapshot.
    pub fn push_sent(&mut self, message: Message) -> LogChange {
        self.entries.push(message);
        LogChange::Appended
    }

    /// Merge one inbound message. Only meaningful for `OptimisticAppend`;
    /// snapshot logs learn about remote messages from snapshots alone.
    pub fn push_received(&mut self, message: Message) -> LogChange {
        if self.strategy != SyncStrategy::OptimisticAppend {
            debug!("ignoring incremental receive on snapshot log");
            return LogChange::Ignored;
        }
        if let Some(cid) = message.correlation_id {
            if self.contains_correlation(&cid) {
                debug!(correlation_id = %cid, "inbound echo reconciled");
                return LogChange::Reconciled;
            }
        }
        self.entries.push(message);
        LogChange::Appended
    }

    /// Replace the whole log with a server-ordered snapshot.
    pub fn replace(&mut self, snapshot: Vec<Message>) -> LogChange {
        if self.strategy != SyncStrategy::SnapshotReplace {
            debug!("ignoring snapshot on append log");
            return LogChange::Ignored;
        }
        self.entries = snapshot;
        LogChange::Replaced {
            len: self.entries.len(),
        }
    }

    pub fn contains_correlation(&self, cid: &uuid::Uuid) -> bool {
        self.entries
            .iter()
            .any(|m| m.correlation_id.as_ref() == Some(cid))
    }

    pub fn entries(&self) -> &[Message] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
