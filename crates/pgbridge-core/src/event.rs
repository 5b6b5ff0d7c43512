use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One inbound notification from the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Correlates log lines for one notification; not sent downstream.
    pub id: Uuid,
    pub channel: String,
    pub payload: String,
    pub received_at: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.into(),
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }

    pub fn payload_bytes(&self) -> usize {
        self.payload.len()
    }
}

/// Ephemeral outcome of one sink call, used for logging and counters only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkResult {
    pub ok: bool,
    pub error: Option<String>,
}

impl SinkResult {
    pub fn delivered() -> Self {
        Self { ok: true, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}
