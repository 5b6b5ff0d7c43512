use thiserror::Error;

/// Routing configuration problems. Fatal at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("routing spec is empty: at least one `channel|target` entry is required")]
    MissingRoutes,
    #[error("routing spec contains no valid `channel|target` entries ({dropped} dropped)")]
    NoValidRoutes { dropped: usize },
    #[error("invalid PostgreSQL connection string: {0}")]
    InvalidConnectionString(String),
}

/// Failures of the notification source connection.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("could not connect to notification source: {0}")]
    Connection(String),
    #[error("could not subscribe to channel '{channel}': {reason}")]
    Subscription { channel: String, reason: String },
    #[error("connection to notification source lost: {0}")]
    ConnectionLost(String),
    #[error("gave up reconnecting after {attempts} attempts: {last_error}")]
    ReconnectExhausted { attempts: u32, last_error: String },
    #[error("health probe failed: {0}")]
    Probe(String),
    #[error("listener is not connected")]
    NotConnected,
}

impl ListenerError {
    /// Errors after which the listener can never produce events again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Subscription { .. } | Self::ReconnectExhausted { .. }
        )
    }
}

/// A single failed sink call. Never retried.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("HTTP {status} from {target}")]
    Status { target: String, status: u16 },
    #[error("request to {target} failed: {reason}")]
    Transport { target: String, reason: String },
    #[error("publish to {target} rejected: {reason}")]
    Client { target: String, reason: String },
    #[error("sink is shut down")]
    Closed,
}

impl PublishError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
