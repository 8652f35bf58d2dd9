//! The contract between the core and whatever renders it.
//!
//! The UI reads a [`ChatView`] and feeds back [`Intent`]s. Drafts and the
//! selected recipient live in a [`Composer`] owned next to the controller.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Everything a screen needs to draw itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatView {
    pub connection_state: ConnectionState,
    pub server_time: Option<String>,
    pub self_id: String,
    pub messages: Vec<Message>,
    /// Transient "message not sent" indicator.
    pub send_error: Option<String>,
}

impl ChatView {
    /// While not connected only a placeholder may be shown; no input.
    pub fn accepts_input(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }
}

/// User intent forwarded from the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    SetRecipient(String),
    SetDraft(String),
    Send,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Composer {
    recipient: String,
    draft: String,
}

impl Composer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_recipient(&mut self, recipient: impl Into<String>) {
        self.recipient = recipient.into();
    }

    pub fn set_draft(&mut self, draft: impl Into<String>) {
        self.draft = draft.into();
    }

    pub fn clear_draft(&mut self) {
        self.draft.clear();
    }

    /// Apply an editing intent. Returns true when the intent asks to send.
    pub fn apply(&mut self, intent: Intent) -> bool {
        match intent {
            Intent::SetRecipient(r) => {
                self.recipient = r;
                false
            }
            Intent::SetDraft(d) => {
                self.draft = d;
                false
            }
            Intent::Send => true,
        }
    }
}

/// Render a gateway `time-msg` timestamp for display.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%a %b %d %Y %H:%M:%S GMT%z").to_string()
}
