//! Live query handles.
//!
//! A [`Subscription`] owns a background task that re-runs the ordered query
//! whenever the watched conversation changes and pushes the full result set.
//! Dropping the handle or calling [`Subscription::unsubscribe`] stops it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::store::{ConversationId, ConversationStore, StoredMessage};

const SNAPSHOT_BUFFER: usize = 16;

/// Poll period used only to build a ticker when polling is disabled.
const IDLE_PERIOD: Duration = Duration::from_secs(3600);

/// The full ordered message set of a conversation at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub conversation: ConversationId,
    pub messages: Vec<StoredMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribed,
}

pub struct Subscription {
    conversation: ConversationId,
    snapshots: mpsc::Receiver<Snapshot>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn start(store: ConversationStore, conversation: ConversationId) -> Self {
        let (tx, snapshots) = mpsc::channel(SNAPSHOT_BUFFER);
        let cancel = CancellationToken::new();
        // Register for changes before the first query so no write slips between them.
        let changes = store.changes();
        let watcher = Watcher {
            store,
            conversation: conversation.clone(),
            tx,
            last: None,
        };
        let task = tokio::spawn(watcher.run(changes, cancel.clone()));
        debug!(conversation = %conversation, "subscribed");
        Self {
            conversation,
            snapshots,
            cancel,
            task: Some(task),
        }
    }

    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }

    pub fn state(&self) -> SubscriptionState {
        if self.task.is_some() {
            SubscriptionState::Subscribed
        } else {
            SubscriptionState::Unsubscribed
        }
    }

    /// Wait for the next snapshot. `None` once unsubscribed.
    pub async fn next(&mut self) -> Option<Snapshot> {
        if self.task.is_none() {
            return None;
        }
        self.snapshots.recv().await
    }

    /// Stop receiving updates. Safe to call more than once.
    pub fn unsubscribe(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        self.cancel.cancel();
        self.snapshots.close();
        // drain anything already queued so it is never delivered
        while self.snapshots.try_recv().is_ok() {}
        task.abort();
        debug!(conversation = %self.conversation, "unsubscribed");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

struct Watcher {
    store: ConversationStore,
    conversation: ConversationId,
    tx: mpsc::Sender<Snapshot>,
    last: Option<Vec<StoredMessage>>,
}

impl Watcher {
    async fn run(mut self, mut changes: broadcast::Receiver<ConversationId>, cancel: CancellationToken) {
        let poll_interval = self.store.options().poll_interval;
        let period = poll_interval.unwrap_or(IDLE_PERIOD);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if !self.deliver(true).await {
            return;
        }

        loop {
            let keep_going = tokio::select! {
                _ = cancel.cancelled() => break,
                changed = changes.recv() => match changed {
                    Ok(id) if id == self.conversation => self.deliver(true).await,
                    Ok(_) => true,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(conversation = %self.conversation, skipped = n, "change feed lagged, re-querying");
                        self.deliver(false).await
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = ticker.tick(), if poll_interval.is_some() => self.deliver(false).await,
            };
            if !keep_going {
                break;
            }
        }
        debug!(conversation = %self.conversation, "watcher stopped");
    }

    /// Query and push a snapshot. Unforced deliveries are skipped when the
    /// result is unchanged. Returns false once the handle is gone.
    async fn deliver(&mut self, force: bool) -> bool {
        let messages = match self.store.ordered_messages(&self.conversation).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(conversation = %self.conversation, "snapshot query failed: {}", e);
                return !self.tx.is_closed();
            }
        };
        if !force && self.last.as_ref() == Some(&messages) {
            return true;
        }
        self.last = Some(messages.clone());
        let snapshot = Snapshot {
            conversation: self.conversation.clone(),
            messages,
        };
        self.tx.send(snapshot).await.is_ok()
    }
}
