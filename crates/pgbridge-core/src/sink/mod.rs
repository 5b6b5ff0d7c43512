mod stream;
mod topic;
mod webhook;

pub use stream::{KinesisStreamClient, StreamClient, StreamRecord, StreamSink};
pub use topic::{SnsTopicClient, TopicClient, TopicSink};
pub use webhook::WebhookSink;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PublishError;
use crate::routes::DestinationKind;

/// Publishes payloads to one destination family.
///
/// Implementations must be safe to call from many dispatch tasks at once.
/// A returned error is final: callers log it and drop the notification.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Destination family this sink serves.
    fn kind(&self) -> DestinationKind;

    async fn publish(&self, channel: &str, target: &str, payload: &str)
        -> Result<(), PublishError>;
}

/// The sinks active in one deployment, keyed by the family they serve.
#[derive(Clone, Default)]
pub struct SinkSet {
    sinks: HashMap<DestinationKind, Arc<dyn Sink>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a sink under its own kind, replacing any previous one.
    pub fn with(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sinks.insert(sink.kind(), sink);
        self
    }

    pub fn get(&self, kind: DestinationKind) -> Option<&Arc<dyn Sink>> {
        self.sinks.get(&kind)
    }

    pub fn kinds(&self) -> Vec<DestinationKind> {
        self.sinks.keys().copied().collect()
    }
}

impl std::fmt::Debug for SinkSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkSet").field("kinds", &self.kinds()).finish()
    }
}
