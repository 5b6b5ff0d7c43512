use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::Sink;
use crate::error::PublishError;
use crate::routes::DestinationKind;

/// Kinesis rejects `PutRecords` calls with more entries than this.
const KINESIS_MAX_RECORDS_PER_CALL: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    pub partition_key: String,
    pub data: Vec<u8>,
}

/// Minimal contract of a stream-ingestion service.
#[async_trait]
pub trait StreamClient: Send + Sync {
    async fn put_records(&self, stream: &str, records: Vec<StreamRecord>) -> Result<(), PublishError>;
}

/// Buffers records and writes them to one stream in batches.
///
/// `publish` only appends to the buffer. A background flusher sends the
/// buffer once it reaches `buffer_size`, and on every `flush_interval` tick.
/// Delivery failures are logged by the flusher since the publisher has
/// already returned.
pub struct StreamSink {
    stream_name: String,
    buffer_size: usize,
    buffer: Arc<Mutex<Vec<StreamRecord>>>,
    flush_tx: mpsc::UnboundedSender<Vec<StreamRecord>>,
    client: Arc<dyn StreamClient>,
}

impl StreamSink {
    /// Creates the sink and starts its flusher. The flusher exits, after a
    /// final flush, once the sink is dropped.
    pub fn spawn(
        client: Arc<dyn StreamClient>,
        stream_name: impl Into<String>,
        buffer_size: usize,
        flush_interval: Duration,
    ) -> (Self, JoinHandle<()>) {
        let stream_name = stream_name.into();
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(run_flusher(
            Arc::clone(&client),
            stream_name.clone(),
            Arc::clone(&buffer),
            flush_rx,
            flush_interval,
        ));

        let sink = Self {
            stream_name,
            buffer_size: buffer_size.max(1),
            buffer,
            flush_tx,
            client,
        };
        (sink, handle)
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    pub async fn buffered(&self) -> usize {
        self.buffer.lock().await.len()
    }

    /// Sends whatever is buffered right now and waits for the result.
    pub async fn flush(&self) -> Result<(), PublishError> {
        let records = std::mem::take(&mut *self.buffer.lock().await);
        if records.is_empty() {
            return Ok(());
        }
        self.client.put_records(&self.stream_name, records).await
    }
}

#[async_trait]
impl Sink for StreamSink {
    fn kind(&self) -> DestinationKind {
        DestinationKind::Stream
    }

    async fn publish(&self, _channel: &str, target: &str, payload: &str) -> Result<(), PublishError> {
        let full = {
            let mut buffer = self.buffer.lock().await;
            buffer.push(StreamRecord {
                partition_key: target.to_string(),
                data: payload.as_bytes().to_vec(),
            });
            if buffer.len() >= self.buffer_size {
                Some(std::mem::take(&mut *buffer))
            } else {
                None
            }
        };

        if let Some(records) = full {
            self.flush_tx.send(records).map_err(|_| PublishError::Closed)?;
        }
        Ok(())
    }
}

async fn run_flusher(
    client: Arc<dyn StreamClient>,
    stream_name: String,
    buffer: Arc<Mutex<Vec<StreamRecord>>>,
    mut flush_rx: mpsc::UnboundedReceiver<Vec<StreamRecord>>,
    flush_interval: Duration,
) {
    let mut ticker =
        tokio::time::interval_at(tokio::time::Instant::now() + flush_interval, flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(stream = %stream_name, "Stream flusher started");

    loop {
        tokio::select! {
            batch = flush_rx.recv() => match batch {
                Some(records) => put_batch(&*client, &stream_name, records).await,
                None => {
                    let records = std::mem::take(&mut *buffer.lock().await);
                    put_batch(&*client, &stream_name, records).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                let records = std::mem::take(&mut *buffer.lock().await);
                put_batch(&*client, &stream_name, records).await;
            }
        }
    }

    debug!(stream = %stream_name, "Stream flusher shutting down");
}

async fn put_batch(client: &dyn StreamClient, stream_name: &str, records: Vec<StreamRecord>) {
    if records.is_empty() {
        return;
    }
    let count = records.len();
    match client.put_records(stream_name, records).await {
        Ok(()) => debug!(stream = %stream_name, records = count, "Flushed stream records"),
        Err(e) => warn!(stream = %stream_name, records = count, error = %e, "Unable to flush stream records"),
    }
}

/// Amazon Kinesis backed [`StreamClient`].
#[derive(Debug, Clone)]
pub struct KinesisStreamClient {
    client: aws_sdk_kinesis::Client,
}

impl KinesisStreamClient {
    pub fn new(client: aws_sdk_kinesis::Client) -> Self {
        Self { client }
    }

    pub async fn from_env() -> Self {
        let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(aws_sdk_kinesis::Client::new(&sdk_config))
    }
}

#[async_trait]
impl StreamClient for KinesisStreamClient {
    async fn put_records(&self, stream: &str, records: Vec<StreamRecord>) -> Result<(), PublishError> {
        use aws_sdk_kinesis::primitives::Blob;
        use aws_sdk_kinesis::types::PutRecordsRequestEntry;

        for chunk in records.chunks(KINESIS_MAX_RECORDS_PER_CALL) {
            let entries = chunk
                .iter()
                .map(|r| {
                    PutRecordsRequestEntry::builder()
                        .partition_key(r.partition_key.clone())
                        .data(Blob::new(r.data.clone()))
                        .build()
                        .map_err(|e| PublishError::Client {
                            target: stream.to_string(),
                            reason: e.to_string(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;

            let output = self
                .client
                .put_records()
                .stream_name(stream)
                .set_records(Some(entries))
                .send()
                .await
                .map_err(|e| PublishError::Client {
                    target: stream.to_string(),
                    reason: aws_sdk_kinesis::error::DisplayErrorContext(&e).to_string(),
                })?;

            let failed = output.failed_record_count().unwrap_or(0);
            if failed > 0 {
                return Err(PublishError::Client {
                    target: stream.to_string(),
                    reason: format!("{} of {} records rejected", failed, chunk.len()),
                });
            }
        }
        Ok(())
    }
}
