#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc::{self, UnboundedSender};
use futures::StreamExt;
use pgbridge_core::{
    DestinationKind, ListenerError, NotificationSource, PublishError, RawNotification,
    ReconnectPolicy, Sink, SourceHandle, SourceSession, TopicClient,
};

pub type Feed = UnboundedSender<Result<RawNotification, ListenerError>>;

/// Notification source whose sessions are handed out in a scripted order.
/// Once the script runs out every connect attempt is refused.
#[derive(Default)]
pub struct ScriptedSource {
    sessions: Mutex<VecDeque<mpsc::UnboundedReceiver<Result<RawNotification, ListenerError>>>>,
    pub listened: Arc<Mutex<Vec<String>>>,
    pub refuse_listen: Mutex<HashSet<String>>,
    pub alive: Arc<AtomicBool>,
    pub connects: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        let source = Self::default();
        source.alive.store(true, Ordering::SeqCst);
        Arc::new(source)
    }

    /// Queues one more session and returns the sender that feeds it.
    /// Dropping the sender simulates a lost connection.
    pub fn session(&self) -> Feed {
        let (tx, rx) = mpsc::unbounded();
        self.sessions.lock().unwrap().push_back(rx);
        tx
    }

    pub fn refuse(&self, channel: &str) {
        self.refuse_listen.lock().unwrap().insert(channel.to_string());
    }

    pub fn listened(&self) -> Vec<String> {
        self.listened.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSource for ScriptedSource {
    fn describe(&self) -> String {
        "scripted://test".into()
    }

    async fn connect(&self) -> Result<SourceSession, ListenerError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let rx = self
            .sessions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ListenerError::Connection("connection refused".into()))?;

        let handle = ScriptedHandle {
            listened: Arc::clone(&self.listened),
            refuse: self.refuse_listen.lock().unwrap().clone(),
            alive: Arc::clone(&self.alive),
        };
        Ok(SourceSession {
            handle: Arc::new(handle),
            notifications: rx.boxed(),
        })
    }
}

struct ScriptedHandle {
    listened: Arc<Mutex<Vec<String>>>,
    refuse: HashSet<String>,
    alive: Arc<AtomicBool>,
}

#[async_trait]
impl SourceHandle for ScriptedHandle {
    async fn listen(&self, channel: &str) -> Result<(), ListenerError> {
        if self.refuse.contains(channel) {
            return Err(ListenerError::Subscription {
                channel: channel.to_string(),
                reason: "permission denied".into(),
            });
        }
        self.listened.lock().unwrap().push(channel.to_string());
        Ok(())
    }

    async fn ping(&self) -> Result<(), ListenerError> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ListenerError::Probe("server closed the connection".into()))
        }
    }
}

pub fn notify(feed: &Feed, channel: &str, payload: &str) {
    feed.unbounded_send(Ok(RawNotification {
        channel: channel.into(),
        payload: payload.into(),
    }))
    .unwrap();
}

pub fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy::new(Duration::from_millis(1), Duration::from_millis(4), max_attempts)
}

/// Sink that records every call and optionally fails them.
pub struct RecordingSink {
    kind: DestinationKind,
    fail_with: Option<u16>,
    pub calls: Mutex<Vec<(String, String, String)>>,
}

impl RecordingSink {
    pub fn new(kind: DestinationKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            fail_with: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(kind: DestinationKind, status: u16) -> Arc<Self> {
        Arc::new(Self {
            kind,
            fail_with: Some(status),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn payloads(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.2.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn kind(&self) -> DestinationKind {
        self.kind
    }

    async fn publish(&self, channel: &str, target: &str, payload: &str) -> Result<(), PublishError> {
        self.calls
            .lock()
            .unwrap()
            .push((channel.into(), target.into(), payload.into()));
        match self.fail_with {
            Some(status) => Err(PublishError::Status {
                target: target.into(),
                status,
            }),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct RecordingTopics {
    pub published: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl TopicClient for RecordingTopics {
    async fn publish(&self, topic: &str, message: &str) -> Result<(), PublishError> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), message.to_string()));
        Ok(())
    }
}

pub async fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {}", what);
}
