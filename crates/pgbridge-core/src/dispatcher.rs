//! Route resolution and concurrent fan-out to sinks.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::event::{NotificationEvent, SinkResult};
use crate::routes::{DestinationKind, RouteTable};
use crate::sink::SinkSet;

/// Process-lifetime delivery counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    received: AtomicU64,
    dispatched: AtomicU64,
    unrouted: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DispatchSnapshot {
    pub received: u64,
    pub dispatched: u64,
    pub unrouted: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub failed: u64,
}

impl DispatchStats {
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            received: self.received.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            unrouted: self.unrouted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// What `on_event` did with a notification.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// A sink call was scheduled. Awaiting the handle is optional.
    Dispatched(JoinHandle<SinkResult>),
    /// The channel has no route.
    NoRoute,
    /// The route points at a family with no active sink.
    NoSink(DestinationKind),
    /// The pending bound was reached and the event was dropped.
    Overloaded,
}

impl DispatchOutcome {
    pub fn is_dispatched(&self) -> bool {
        matches!(self, Self::Dispatched(_))
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    routes: Arc<RouteTable>,
    sinks: SinkSet,
    permits: Arc<Semaphore>,
    pending: Arc<AtomicUsize>,
    max_pending: Option<usize>,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    /// `max_concurrent` caps sink calls in flight; extra tasks wait for a
    /// permit instead of holding up the caller.
    ///
    /// Every routed event is spawned straight away and only then waits for a
    /// permit, so a burst larger than sinks can absorb grows memory with the
    /// backlog. Set [`Dispatcher::with_max_pending`] to cap the backlog;
    /// events past the cap are dropped and counted in `dropped`.
    pub fn new(routes: Arc<RouteTable>, sinks: SinkSet, max_concurrent: usize) -> Self {
        Self {
            routes,
            sinks,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            pending: Arc::new(AtomicUsize::new(0)),
            max_pending: None,
            stats: Arc::new(DispatchStats::default()),
        }
    }

    pub fn from_config(routes: Arc<RouteTable>, sinks: SinkSet, config: &BridgeConfig) -> Self {
        Self::new(routes, sinks, config.max_concurrent_dispatches)
            .with_max_pending(config.max_pending_dispatches)
    }

    /// Caps sink calls that are running or waiting for a permit.
    pub fn with_max_pending(mut self, max: Option<usize>) -> Self {
        self.max_pending = max.map(|m| m.max(1));
        self
    }

    /// Sink calls scheduled and not yet finished.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Resolves the event's route and schedules the sink call. Never waits
    /// for the call itself; must be invoked inside a tokio runtime.
    pub fn on_event(&self, event: NotificationEvent) -> DispatchOutcome {
        let Some(destination) = self.routes.lookup(&event.channel) else {
            self.stats.unrouted.fetch_add(1, Ordering::Relaxed);
            debug!(channel = %event.channel, "No route for channel, ignoring");
            return DispatchOutcome::NoRoute;
        };

        let Some(sink) = self.sinks.get(destination.kind).cloned() else {
            self.stats.unrouted.fetch_add(1, Ordering::Relaxed);
            warn!(
                channel = %event.channel,
                kind = %destination.kind,
                target = %destination.target,
                "No sink configured for destination"
            );
            return DispatchOutcome::NoSink(destination.kind);
        };

        let Some(slot) = self.admit() else {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                event_id = %event.id,
                channel = %event.channel,
                kind = %destination.kind,
                target = %destination.target,
                payload_bytes = event.payload_bytes(),
                pending = self.pending(),
                "Dispatch backlog full, dropping notification"
            );
            return DispatchOutcome::Overloaded;
        };

        let destination = destination.clone();
        let permits = Arc::clone(&self.permits);
        let stats = Arc::clone(&self.stats);
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);

        let handle = tokio::spawn(async move {
            let _slot = slot;
            // The semaphore is never closed, so this only waits.
            let _permit = permits.acquire_owned().await.ok();
            let payload_bytes = event.payload_bytes();

            match sink
                .publish(&event.channel, &destination.target, &event.payload)
                .await
            {
                Ok(()) => {
                    stats.delivered.fetch_add(1, Ordering::Relaxed);
                    info!(
                        event_id = %event.id,
                        channel = %event.channel,
                        kind = %destination.kind,
                        target = %destination.target,
                        payload_bytes,
                        "Delivered notification"
                    );
                    SinkResult::delivered()
                }
                Err(e) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        event_id = %event.id,
                        channel = %event.channel,
                        kind = %destination.kind,
                        target = %destination.target,
                        payload_bytes,
                        error = %e,
                        "Unable to deliver notification"
                    );
                    SinkResult::failed(e.to_string())
                }
            }
        });

        DispatchOutcome::Dispatched(handle)
    }

    fn admit(&self) -> Option<PendingSlot> {
        let admitted = match self.max_pending {
            Some(max) => self
                .pending
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    (n < max).then_some(n + 1)
                })
                .is_ok(),
            None => {
                self.pending.fetch_add(1, Ordering::SeqCst);
                true
            }
        };
        admitted.then(|| PendingSlot(Arc::clone(&self.pending)))
    }
}

/// Releases one pending slot when the dispatch task ends, even if aborted.
struct PendingSlot(Arc<AtomicUsize>);

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.routes.len())
            .field("sinks", &self.sinks)
            .field("available_permits", &self.permits.available_permits())
            .field("pending", &self.pending())
            .field("max_pending", &self.max_pending)
            .finish()
    }
}
