//! ESM screen controller: one session id, one connection, one append log.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use super::connection::{Transport, TransportEvent};
use super::wire::{InboundPrivateMessage, OutboundPrivateMessage};
use crate::identity::{DEFAULT_SELF_LABEL, SessionId};
use crate::log::{LogChange, MessageLog};
use crate::message::{Message, Rejection, SendOutcome, is_blank};
use crate::view::{ChatView, Composer, ConnectionState, Intent, format_timestamp};

pub struct EsmSession<T> {
    session_id: SessionId,
    self_label: String,
    transport: T,
    state: ConnectionState,
    server_time: Option<DateTime<Utc>>,
    log: MessageLog,
    send_error: Option<String>,
    composer: Composer,
}

impl<T: Transport> EsmSession<T> {
    pub fn new(session_id: SessionId, transport: T) -> Self {
        Self::with_label(session_id, DEFAULT_SELF_LABEL, transport)
    }

    /// `self_label` is written into `from` of every locally sent entry.
    pub fn with_label(session_id: SessionId, self_label: impl Into<String>, transport: T) -> Self {
        let state = transport.state();
        Self {
            session_id,
            self_label: self_label.into(),
            transport,
            state,
            server_time: None,
            log: MessageLog::optimistic(),
            send_error: None,
            composer: Composer::new(),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn server_time(&self) -> Option<DateTime<Utc>> {
        self.server_time
    }

    pub fn messages(&self) -> &[Message] {
        self.log.entries()
    }

    /// Transient error from the last failed dispatch.
    pub fn send_error(&self) -> Option<&str> {
        self.send_error.as_deref()
    }

    pub fn dismiss_send_error(&mut self) {
        self.send_error = None;
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Dispatch `text` to `to`.
    ///
    /// Blank input or a missing connection is a no-op reported as
    /// [`SendOutcome::Rejected`]. On success exactly one `private-message`
    /// is emitted and exactly one `sent` entry is appended, before any
    /// acknowledgment could exist.
    pub fn send_message(&mut self, to: &str, text: &str) -> SendOutcome {
        if is_blank(to) {
            return SendOutcome::rejected(Rejection::EmptyRecipient);
        }
        if is_blank(text) {
            return SendOutcome::rejected(Rejection::EmptyText);
        }
        if !self.is_connected() {
            return SendOutcome::rejected(Rejection::NotConnected);
        }

        let correlation_id = Uuid::new_v4();
        let outbound = OutboundPrivateMessage {
            to: to.trim().to_string(),
            message: text.to_string(),
            cid: Some(correlation_id),
        };
        if let Err(e) = self.transport.emit_private(outbound) {
            warn!("private message not dispatched: {}", e);
            let detail = e.to_string();
            self.send_error = Some(format!("Message not sent: {detail}"));
            return SendOutcome::Failed { detail };
        }

        self.send_error = None;

        debug!(to = %to.trim(), correlation_id = %correlation_id, "private message dispatched");
        self.log
            .push_sent(Message::sent(&self.self_label, text, correlation_id));
        SendOutcome::Dispatched { correlation_id }
    }

    /// Merge one inbound private message. Any sender is accepted.
    pub fn on_receive(&mut self, inbound: InboundPrivateMessage) -> LogChange {
        debug!(from = %inbound.from, "private message received");
        self.log.push_received(Message::received(
            inbound.from,
            inbound.message,
            inbound.cid,
        ))
    }

    /// Apply one transport event. Returns true when the view changed.
    pub fn handle_event(&mut self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::StateChanged(state) => {
                let changed = self.state != state;
                self.state = state;
                changed
            }
            TransportEvent::Time { epoch_ms } => {
                match DateTime::<Utc>::from_timestamp_millis(epoch_ms) {
                    Some(time) => {
                        self.server_time = Some(time);
                        true
                    }
                    None => {
                        warn!(epoch_ms, "ignoring out-of-range server time");
                        false
                    }
                }
            }
            TransportEvent::PrivateMessage(inbound) => self.on_receive(inbound).is_visible(),
        }
    }

    /// Apply a UI intent. Sending uses the composer's recipient and draft and
    /// clears the draft only when the message went out.
    pub fn handle_intent(&mut self, intent: Intent) -> Option<SendOutcome> {
        if !self.composer.apply(intent) {
            return None;
        }
        let to = self.composer.recipient().to_string();
        let text = self.composer.draft().to_string();
        let outcome = self.send_message(&to, &text);
        if outcome.is_dispatched() {
            self.composer.clear_draft();
        }
        Some(outcome)
    }

    pub fn view(&self) -> ChatView {
        ChatView {
            connection_state: self.state,
            server_time: self.server_time.as_ref().map(format_timestamp),
            self_id: self.session_id.to_string(),
            messages: self.log.entries().to_vec(),
            send_error: self.send_error.clone(),
        }
    }
}
