//! PCS screen controller: one identity, at most one open conversation.

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::store::{ConversationId, ConversationStore, ConversationSummary, NewMessage, StoredMessage};
use super::subscription::{Snapshot, Subscription, SubscriptionState};
use crate::error::Result;
use crate::log::{LogChange, MessageLog};
use crate::message::{Message, Rejection, SendOutcome, is_blank};
use crate::view::{ChatView, Composer, ConnectionState, Intent};

pub struct PcsConversation {
    store: ConversationStore,
    identity: String,
    subscription: Option<Subscription>,
    log: MessageLog,
    send_error: Option<String>,
    composer: Composer,
}

impl PcsConversation {
    /// `identity` is the authenticated account; it is written into `from`
    /// and decides which snapshot entries render as sent.
    pub fn new(store: ConversationStore, identity: impl Into<String>) -> Self {
        Self {
            store,
            identity: identity.into(),
            subscription: None,
            log: MessageLog::snapshot(),
            send_error: None,
            composer: Composer::new(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn conversation(&self) -> Option<&ConversationId> {
        self.subscription.as_ref().map(Subscription::conversation)
    }

    pub fn state(&self) -> SubscriptionState {
        self.subscription
            .as_ref()
            .map_or(SubscriptionState::Unsubscribed, Subscription::state)
    }

    pub fn messages(&self) -> &[Message] {
        self.log.entries()
    }

    pub fn send_error(&self) -> Option<&str> {
        self.send_error.as_deref()
    }

    pub fn dismiss_send_error(&mut self) {
        self.send_error = None;
    }

    /// Subscribe to `conversation`, releasing any previous subscription.
    /// Reopening the conversation already open keeps the live subscription.
    pub fn open(&mut self, conversation: ConversationId) {
        if self.conversation() == Some(&conversation) {
            return;
        }
        self.close();
        self.log.clear();
        self.send_error = None;
        info!(path = %conversation.collection_path(), "opening conversation");
        self.subscription = Some(self.store.subscribe(conversation));
    }

    /// Release the subscription. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }

    /// Wait for the next snapshot and apply it. `None` when no conversation
    /// is open or the subscription has ended.
    pub async fn next_snapshot(&mut self) -> Option<LogChange> {
        let snapshot = self.subscription.as_mut()?.next().await?;
        Some(self.apply_snapshot(snapshot))
    }

    /// Replace the log with `snapshot`. Snapshots for a conversation other
    /// than the open one are ignored.
    pub fn apply_snapshot(&mut self, snapshot: Snapshot) -> LogChange {
        if self.conversation() != Some(&snapshot.conversation) {
            debug!(conversation = %snapshot.conversation, "ignoring stale snapshot");
            return LogChange::Ignored;
        }
        let entries = snapshot
            .messages
            .iter()
            .map(|m| m.to_message(&self.identity))
            .collect();
        self.log.replace(entries)
    }

    pub fn is_mine(&self, message: &StoredMessage) -> bool {
        message.from == self.identity
    }

    /// Persist `text` (trimmed) to the open conversation.
    ///
    /// Nothing is appended locally; the message appears when the store
    /// pushes the snapshot that contains it. A store failure is reported as
    /// [`SendOutcome::Failed`] and kept as a transient send error.
    pub async fn send_message(&mut self, text: &str) -> SendOutcome {
        if is_blank(text) {
            return SendOutcome::rejected(Rejection::EmptyText);
        }
        let Some(conversation) = self.conversation().cloned() else {
            return SendOutcome::rejected(Rejection::NoConversation);
        };

        let correlation_id = Uuid::new_v4();
        let message = NewMessage {
            from: self.identity.clone(),
            text: text.trim().to_string(),
            correlation_id: Some(correlation_id),
        };
        match self.store.append(&conversation, message).await {
            Ok(stored) => {
                debug!(id = %stored.id, correlation_id = %correlation_id, "message stored");
                self.send_error = None;
                SendOutcome::Dispatched { correlation_id }
            }
            Err(e) => {
                warn!(path = %conversation.collection_path(), "message not stored: {}", e);
                let detail = e.to_string();
                self.send_error = Some(format!("Message not sent: {detail}"));
                SendOutcome::Failed { detail }
            }
        }
    }

    /// Apply a UI intent. The recipient names the conversation to open.
    pub async fn handle_intent(&mut self, intent: Intent) -> Option<SendOutcome> {
        if let Intent::SetRecipient(ref recipient) = intent {
            match ConversationId::parse(recipient.trim()) {
                Ok(conversation) => self.open(conversation),
                Err(e) => warn!("cannot open conversation: {}", e),
            }
        }
        if !self.composer.apply(intent) {
            return None;
        }
        let text = self.composer.draft().to_string();
        let outcome = self.send_message(&text).await;
        if outcome.is_dispatched() {
            self.composer.clear_draft();
        }
        Some(outcome)
    }

    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        self.store.list_conversations().await
    }

    pub fn view(&self) -> ChatView {
        let connection_state = match self.state() {
            SubscriptionState::Subscribed => ConnectionState::Connected,
            SubscriptionState::Unsubscribed => ConnectionState::Disconnected,
        };
        ChatView {
            connection_state,
            server_time: None,
            self_id: self.identity.clone(),
            messages: self.log.entries().to_vec(),
            send_error: self.send_error.clone(),
        }
    }
}
