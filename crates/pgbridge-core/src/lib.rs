#![forbid(unsafe_code)]

pub mod batch;
pub mod bridge;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod listener;
pub mod routes;
pub mod sink;

pub use batch::BatchQueue;
pub use bridge::Bridge;
pub use config::{BridgeConfig, ReconnectPolicy};
pub use dispatcher::{DispatchOutcome, DispatchSnapshot, DispatchStats, Dispatcher};
pub use error::{ConfigError, ListenerError, PublishError};
pub use event::{NotificationEvent, SinkResult};
pub use listener::{
    ListenerAdapter, ListenerProbe, ListenerState, NotificationSource, PgSource, RawNotification,
    SourceHandle, SourceSession,
};
pub use routes::{DestinationKind, DestinationRef, Route, RouteTable, SinkFamily};
pub use sink::{
    KinesisStreamClient, Sink, SinkSet, SnsTopicClient, StreamClient, StreamRecord, StreamSink,
    TopicClient, TopicSink, WebhookSink,
};
