use std::collections::VecDeque;

use tokio::sync::Mutex;

use crate::event::NotificationEvent;

/// Bounded FIFO that releases its contents in one batch when full.
///
/// The append, size check and drain happen under one lock, so no event can
/// slip in between a full queue and its drain.
#[derive(Debug)]
pub struct BatchQueue {
    events: Mutex<VecDeque<NotificationEvent>>,
    capacity: usize,
}

impl BatchQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends an event. When this fills the queue, every queued event is
    /// removed and returned oldest first.
    pub async fn enqueue(&self, event: NotificationEvent) -> Option<Vec<NotificationEvent>> {
        let mut events = self.events.lock().await;
        events.push_back(event);
        if events.len() >= self.capacity {
            Some(events.drain(..).collect())
        } else {
            None
        }
    }

    /// Removes everything currently queued, oldest first.
    pub async fn drain(&self) -> Vec<NotificationEvent> {
        self.events.lock().await.drain(..).collect()
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.lock().await.is_empty()
    }
}
