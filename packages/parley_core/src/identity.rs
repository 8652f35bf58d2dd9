//! Session identity for ephemeral messaging.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Label written into the `from` field of locally sent ESM messages.
pub const DEFAULT_SELF_LABEL: &str = "Você";

/// Routing key the gateway associates with a live connection.
///
/// Not checked for uniqueness: two clients that pick the same id simply
/// replace one another at the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap an existing id, e.g. one supplied on the command line.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Draw a fresh six-digit id in `100000..=999999`.
    pub fn generate() -> Self {
        let code: u32 = rand::rng().random_range(100_000..1_000_000);
        Self(code.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
