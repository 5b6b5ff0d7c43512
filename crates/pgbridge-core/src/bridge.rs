//! The consumer loop tying the listener, the optional batch stage and the
//! dispatcher together.

use std::future::Future;
use std::sync::Arc;

use tracing::{error, info};

use crate::batch::BatchQueue;
use crate::config::BridgeConfig;
use crate::dispatcher::{DispatchStats, Dispatcher};
use crate::error::ListenerError;
use crate::event::NotificationEvent;
use crate::listener::{ListenerAdapter, ListenerProbe, NotificationSource};
use crate::routes::RouteTable;
use crate::sink::SinkSet;

pub struct Bridge {
    listener: ListenerAdapter,
    dispatcher: Dispatcher,
    batch: Option<BatchQueue>,
}

impl Bridge {
    pub fn new(listener: ListenerAdapter, dispatcher: Dispatcher, batch_capacity: Option<usize>) -> Self {
        Self {
            listener,
            dispatcher,
            batch: batch_capacity.map(BatchQueue::new),
        }
    }

    /// Connects to the source and listens on every routed channel.
    ///
    /// Connection and subscription failures are returned as-is; the caller
    /// treats them as fatal.
    pub async fn start(
        source: Arc<dyn NotificationSource>,
        routes: Arc<RouteTable>,
        sinks: SinkSet,
        config: &BridgeConfig,
    ) -> Result<Self, ListenerError> {
        let mut listener = ListenerAdapter::new(source, config.reconnect);
        listener.connect().await?;
        listener.subscribe(&routes.channels()).await?;

        let dispatcher = Dispatcher::from_config(routes, sinks, config);
        Ok(Self::new(listener, dispatcher, config.batch_capacity))
    }

    pub fn probe(&self) -> ListenerProbe {
        self.listener.probe()
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        self.dispatcher.stats()
    }

    /// Reads events until `shutdown` resolves or the listener fails.
    ///
    /// On exit any batched events are dispatched and the listener is closed.
    /// In-flight sink calls are not awaited.
    pub async fn run<F>(mut self, shutdown: F) -> Result<(), ListenerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping listener");
                    break Ok(());
                }
                next = self.listener.next_event() => match next {
                    Ok(event) => accept(&self.dispatcher, self.batch.as_ref(), event).await,
                    Err(e) => {
                        error!(error = %e, "Listener failed");
                        break Err(e);
                    }
                },
            }
        };

        drain_batch(&self.dispatcher, self.batch.as_ref()).await;
        self.listener.close().await;
        result
    }
}

// Free functions so the loop only borrows the listener mutably; a shared
// borrow of the whole bridge would not be `Send`.
async fn accept(dispatcher: &Dispatcher, batch: Option<&BatchQueue>, event: NotificationEvent) {
    dispatcher.stats().record_received();
    info!(
        event_id = %event.id,
        channel = %event.channel,
        payload_bytes = event.payload_bytes(),
        "Notification received"
    );

    match batch {
        Some(queue) => {
            if let Some(events) = queue.enqueue(event).await {
                for event in events {
                    dispatcher.on_event(event);
                }
            }
        }
        None => {
            dispatcher.on_event(event);
        }
    }
}

async fn drain_batch(dispatcher: &Dispatcher, batch: Option<&BatchQueue>) {
    let Some(queue) = batch else {
        return;
    };
    let events = queue.drain().await;
    if events.is_empty() {
        return;
    }
    info!(count = events.len(), "Dispatching batched events before exit");
    for event in events {
        dispatcher.on_event(event);
    }
}
