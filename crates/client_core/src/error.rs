use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// A required connection setting is missing; no connection was attempted.
    #[error("missing required setting `{field}`; open the workspace settings and fill it in")]
    Configuration { field: &'static str },
    #[error("channel connection failed: {0}")]
    Connection(String),
    #[error("channel connection timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to fetch channel history: {0}")]
    HistoryFetch(String),
    #[error("failed to publish message: {0}")]
    Publish(String),
    #[error("not connected to a channel")]
    NotConnected,
    #[error("no team member matches '{name}'")]
    UnknownRecipient { name: String, known: Vec<String> },
    #[error("workspace store error: {0}")]
    Store(#[source] anyhow::Error),
}

impl SyncError {
    /// Whether this error ended a connection attempt (transport failure or timeout).
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}
