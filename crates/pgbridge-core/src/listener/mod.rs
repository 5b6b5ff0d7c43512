//! Connection and subscription lifecycle for the notification source.
//!
//! [`ListenerAdapter`] drives a [`NotificationSource`] through
//! `Disconnected → Connected → Subscribed`, reconnects with bounded backoff
//! when the session drops, and ends in `Failed` once the attempts run out.

mod postgres;

pub use postgres::PgSource;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::ReconnectPolicy;
use crate::error::ListenerError;
use crate::event::NotificationEvent;

/// A `(channel, payload)` pair as delivered by the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    pub channel: String,
    pub payload: String,
}

/// Commands that can be issued on a live session while its notifications
/// are being consumed elsewhere.
#[async_trait]
pub trait SourceHandle: Send + Sync {
    async fn listen(&self, channel: &str) -> Result<(), ListenerError>;

    async fn ping(&self) -> Result<(), ListenerError>;
}

/// One live connection. The notification stream ends, or yields an error,
/// when the connection is lost.
pub struct SourceSession {
    pub handle: Arc<dyn SourceHandle>,
    pub notifications: BoxStream<'static, Result<RawNotification, ListenerError>>,
}

/// Something that can open sessions to a notification source.
#[async_trait]
pub trait NotificationSource: Send + Sync {
    /// Display form for logs, without credentials.
    fn describe(&self) -> String;

    async fn connect(&self) -> Result<SourceSession, ListenerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerState {
    Disconnected,
    Connected,
    Subscribed,
    Reconnecting,
    Failed,
    Closed,
}

impl ListenerState {
    pub fn can_transition_to(self, target: ListenerState) -> bool {
        use ListenerState::*;
        matches!(
            (self, target),
            (Disconnected, Connected)
                | (Connected, Subscribed)
                | (Connected, Failed)
                | (Subscribed, Reconnecting)
                | (Reconnecting, Subscribed)
                | (Reconnecting, Failed)
                | (Disconnected | Connected | Subscribed | Reconnecting, Closed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }

    /// States in which the source connection is up.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Subscribed)
    }
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connected => write!(f, "connected"),
            Self::Subscribed => write!(f, "subscribed"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Failed => write!(f, "failed"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

struct Shared {
    state: RwLock<ListenerState>,
    handle: RwLock<Option<Arc<dyn SourceHandle>>>,
    reconnects: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: RwLock::new(ListenerState::Disconnected),
            handle: RwLock::new(None),
            reconnects: AtomicU64::new(0),
        }
    }

    async fn state(&self) -> ListenerState {
        *self.state.read().await
    }

    async fn transition(&self, target: ListenerState) {
        let mut state = self.state.write().await;
        if *state == target {
            return;
        }
        let from = *state;
        if !from.can_transition_to(target) {
            warn!(%from, to = %target, "Unexpected listener state transition");
        }
        debug!(%from, to = %target, "Listener state changed");
        *state = target;
    }

    async fn set_handle(&self, handle: Option<Arc<dyn SourceHandle>>) {
        *self.handle.write().await = handle;
    }

    async fn handle(&self) -> Option<Arc<dyn SourceHandle>> {
        self.handle.read().await.clone()
    }
}

/// Cheap, cloneable view used by health checks. Probing never touches the
/// notification stream.
#[derive(Clone)]
pub struct ListenerProbe {
    shared: Arc<Shared>,
}

impl ListenerProbe {
    pub async fn state(&self) -> ListenerState {
        self.shared.state().await
    }

    pub fn reconnect_count(&self) -> u64 {
        self.shared.reconnects.load(Ordering::Relaxed)
    }

    pub async fn ping(&self) -> Result<(), ListenerError> {
        let state = self.shared.state().await;
        if !state.is_connected() {
            return Err(ListenerError::Probe(format!("listener is {}", state)));
        }
        let handle = self.shared.handle().await.ok_or(ListenerError::NotConnected)?;
        handle.ping().await
    }

    pub async fn is_alive(&self) -> bool {
        self.ping().await.is_ok()
    }
}

pub struct ListenerAdapter {
    source: Arc<dyn NotificationSource>,
    policy: ReconnectPolicy,
    channels: Vec<String>,
    notifications: Option<BoxStream<'static, Result<RawNotification, ListenerError>>>,
    shared: Arc<Shared>,
}

impl ListenerAdapter {
    pub fn new(source: Arc<dyn NotificationSource>, policy: ReconnectPolicy) -> Self {
        Self {
            source,
            policy,
            channels: Vec::new(),
            notifications: None,
            shared: Arc::new(Shared::new()),
        }
    }

    pub fn probe(&self) -> ListenerProbe {
        ListenerProbe {
            shared: Arc::clone(&self.shared),
        }
    }

    pub async fn state(&self) -> ListenerState {
        self.shared.state().await
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Opens the first session. On failure the listener stays `Disconnected`.
    pub async fn connect(&mut self) -> Result<(), ListenerError> {
        let target = self.source.describe();
        info!(source = %target, "Connecting to notification source");

        let session = self.source.connect().await.map_err(|e| match e {
            ListenerError::Connection(_) => e,
            other => ListenerError::Connection(other.to_string()),
        })?;
        self.install(session).await;
        self.shared.transition(ListenerState::Connected).await;

        info!(source = %target, "Connected to notification source");
        Ok(())
    }

    /// Registers interest in every channel. Any failure is terminal.
    pub async fn subscribe(&mut self, channels: &[String]) -> Result<(), ListenerError> {
        let handle = self.shared.handle().await.ok_or(ListenerError::NotConnected)?;

        for channel in channels {
            info!(channel = %channel, "Listening on channel");
            if let Err(e) = handle.listen(channel).await {
                self.shared.transition(ListenerState::Failed).await;
                return Err(match e {
                    ListenerError::Subscription { .. } => e,
                    other => ListenerError::Subscription {
                        channel: channel.clone(),
                        reason: other.to_string(),
                    },
                });
            }
        }

        self.channels = channels.to_vec();
        self.shared.transition(ListenerState::Subscribed).await;
        Ok(())
    }

    /// Waits for the next notification, reconnecting transparently when the
    /// session drops. Returns an error only once the listener cannot go on.
    pub async fn next_event(&mut self) -> Result<NotificationEvent, ListenerError> {
        loop {
            let state = self.shared.state().await;
            if state.is_terminal() {
                return Err(ListenerError::NotConnected);
            }

            let Some(notifications) = self.notifications.as_mut() else {
                return Err(ListenerError::NotConnected);
            };

            let cause = match notifications.next().await {
                Some(Ok(raw)) => return Ok(NotificationEvent::new(raw.channel, raw.payload)),
                Some(Err(e)) => e.to_string(),
                None => "notification stream ended".to_string(),
            };

            warn!(error = %cause, "Lost connection to notification source");
            self.reconnect(cause).await?;
        }
    }

    /// The adapter as a lazy stream. It ends after the first terminal error.
    pub fn events(self) -> impl Stream<Item = Result<NotificationEvent, ListenerError>> + Send {
        futures::stream::unfold(Some(self), |adapter| async move {
            let mut adapter = adapter?;
            match adapter.next_event().await {
                Ok(event) => Some((Ok(event), Some(adapter))),
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    pub async fn close(&mut self) {
        self.notifications = None;
        self.shared.set_handle(None).await;
        if !self.shared.state().await.is_terminal() {
            self.shared.transition(ListenerState::Closed).await;
        }
        info!("Listener closed");
    }

    async fn install(&mut self, session: SourceSession) {
        self.notifications = Some(session.notifications);
        self.shared.set_handle(Some(session.handle)).await;
    }

    async fn reconnect(&mut self, cause: String) -> Result<(), ListenerError> {
        self.notifications = None;
        self.shared.set_handle(None).await;
        self.shared.transition(ListenerState::Reconnecting).await;

        let mut last_error = cause;
        for attempt in 1..=self.policy.max_attempts {
            let backoff = jittered(self.policy.backoff_for(attempt));
            info!(
                attempt,
                max_attempts = self.policy.max_attempts,
                backoff_ms = backoff.as_millis() as u64,
                "Reconnecting to notification source"
            );
            tokio::time::sleep(backoff).await;

            match self.establish().await {
                Ok(session) => {
                    self.install(session).await;
                    self.shared.reconnects.fetch_add(1, Ordering::Relaxed);
                    self.shared.transition(ListenerState::Subscribed).await;
                    info!(attempt, channels = self.channels.len(), "Reconnected to notification source");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Reconnect attempt failed");
                    last_error = e.to_string();
                }
            }
        }

        self.shared.transition(ListenerState::Failed).await;
        Err(ListenerError::ReconnectExhausted {
            attempts: self.policy.max_attempts,
            last_error,
        })
    }

    /// Connect and re-subscribe every known channel.
    async fn establish(&mut self) -> Result<SourceSession, ListenerError> {
        let session = self.source.connect().await?;
        for channel in &self.channels {
            session.handle.listen(channel).await?;
        }
        Ok(session)
    }
}

fn jittered(base: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    let range = base_ms / 10;
    if range == 0 {
        return base;
    }
    let offset = rand::thread_rng().gen_range(0..range * 2) as i64 - range as i64;
    Duration::from_millis((base_ms as i64 + offset).max(1) as u64)
}
