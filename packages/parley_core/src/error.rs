use tokio_tungstenite::tungstenite;

/// Errors raised by the transports and the conversation store.
///
/// Invalid user input is not an error: it is reported as a
/// [`SendOutcome::Rejected`](crate::SendOutcome) value instead.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("gateway is unavailable")]
    Unavailable,

    #[error("connection closed")]
    Closed,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("invalid payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid gateway endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("invalid conversation id: {0:?}")]
    InvalidConversationId(String),
}

pub type Result<T, E = ChatError> = std::result::Result<T, E>;

impl ChatError {
    /// Classify a websocket error, collapsing refused/reset connects into
    /// [`ChatError::Unavailable`].
    pub fn from_tungstenite(err: tungstenite::Error) -> Self {
        let is_connect = match &err {
            tungstenite::Error::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        };
        if is_connect {
            Self::Unavailable
        } else {
            Self::WebSocket(err)
        }
    }

    /// Whether the error means the remote end simply went away.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::Unavailable
                | Self::Closed
                | Self::WebSocket(tungstenite::Error::ConnectionClosed)
                | Self::WebSocket(tungstenite::Error::AlreadyClosed)
        )
    }
}
