//! Size-or-time batching of change events into an analytical sink.
//!
//! ```text
//! subscriber ──push──► BatchIngress ══ bounded mpsc ══► EventBatcher ──insert_batch──► sink
//!                        (try_send, drop when full)       (single consumer)
//! ```
//!
//! The batch buffer is owned by the single consumer; producers only touch the
//! queue. A batch is flushed when it reaches `max_batch_size` or when
//! `max_wait` has elapsed since its first event, whichever comes first. Each
//! flush runs under `flush_timeout`; a failed or timed-out flush is logged and
//! the batch is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::domain::Good;
use crate::infrastructure::{AnalyticsSink, EventPublisher, PublishError};

// =============================================================================
// Configuration
// =============================================================================

/// Batching policy of the audit worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatcherConfig {
    /// Flush as soon as this many events are buffered.
    pub max_batch_size: usize,
    /// Flush at the latest this long after the first buffered event.
    pub max_wait: Duration,
    /// Capacity of the queue between producers and the consumer.
    pub queue_capacity: usize,
    /// Upper bound on a single sink call.
    pub flush_timeout: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            max_wait: Duration::from_secs(1),
            queue_capacity: 1024,
            flush_timeout: Duration::from_secs(1),
        }
    }
}

// =============================================================================
// Ingress
// =============================================================================

/// Producer side of the batcher. Cheap to clone.
///
/// When every ingress has been dropped, the batcher flushes what it holds
/// and stops.
#[derive(Debug, Clone)]
pub struct BatchIngress {
    sender: mpsc::Sender<Good>,
    dropped: Arc<AtomicU64>,
}

impl BatchIngress {
    /// Enqueues an event without waiting.
    ///
    /// # Errors
    ///
    /// Returns `PublishError::Rejected` when the queue is full or the batcher
    /// has stopped. The event is dropped and counted.
    pub fn push(&self, good: Good) -> Result<(), PublishError> {
        match self.sender.try_send(good) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(good)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(good_id = %good.id, dropped, "Audit queue full, event dropped");
                Err(PublishError::Rejected("audit queue full".to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(good)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(good_id = %good.id, "Audit batcher stopped, event dropped");
                Err(PublishError::Rejected("audit batcher stopped".to_string()))
            }
        }
    }

    /// Events rejected by this ingress and its clones so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EventPublisher for BatchIngress {
    async fn send(&self, good: &Good) -> Result<(), PublishError> {
        self.push(good.clone())
    }
}

// =============================================================================
// Batcher
// =============================================================================

/// Totals of a finished batcher run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatcherReport {
    pub batches_flushed: u64,
    pub events_flushed: u64,
    pub batches_dropped: u64,
    pub events_dropped: u64,
}

/// Single consumer draining the audit queue into a sink.
pub struct EventBatcher<K> {
    receiver: mpsc::Receiver<Good>,
    sink: Arc<K>,
    config: BatcherConfig,
    report: BatcherReport,
}

impl<K> std::fmt::Debug for EventBatcher<K> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("EventBatcher")
            .field("config", &self.config)
            .field("report", &self.report)
            .finish_non_exhaustive()
    }
}

impl<K> EventBatcher<K>
where
    K: AnalyticsSink,
{
    /// Creates the batcher and the ingress that feeds it.
    #[must_use]
    pub fn new(sink: Arc<K>, config: BatcherConfig) -> (Self, BatchIngress) {
        let config = BatcherConfig {
            max_batch_size: config.max_batch_size.max(1),
            queue_capacity: config.queue_capacity.max(1),
            ..config
        };
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let batcher = Self {
            receiver,
            sink,
            config,
            report: BatcherReport::default(),
        };
        let ingress = BatchIngress {
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (batcher, ingress)
    }

    /// Runs until every ingress is dropped, then flushes the remainder.
    pub async fn run(mut self) -> BatcherReport {
        tracing::info!(
            max_batch_size = self.config.max_batch_size,
            max_wait_ms = self.config.max_wait.as_millis(),
            "Audit batcher started"
        );

        while let Some(first) = self.receiver.recv().await {
            let (batch, closed) = self.collect(first).await;
            self.flush(batch).await;
            if closed {
                break;
            }
        }

        tracing::info!(
            batches = self.report.batches_flushed,
            events = self.report.events_flushed,
            dropped_batches = self.report.batches_dropped,
            "Audit batcher stopped"
        );
        self.report
    }

    /// Gathers events after `first` until the batch is full, the wait
    /// deadline passes, or the queue closes.
    async fn collect(&mut self, first: Good) -> (Vec<Good>, bool) {
        let deadline = Instant::now() + self.config.max_wait;
        let mut batch = Vec::with_capacity(self.config.max_batch_size);
        batch.push(first);

        while batch.len() < self.config.max_batch_size {
            match tokio::time::timeout_at(deadline, self.receiver.recv()).await {
                Ok(Some(good)) => batch.push(good),
                Ok(None) => return (batch, true),
                Err(_) => break,
            }
        }
        (batch, false)
    }

    async fn flush(&mut self, batch: Vec<Good>) {
        let size = batch.len();
        let events = u64::try_from(size).unwrap_or(u64::MAX);
        let timeout = self.config.flush_timeout;

        match tokio::time::timeout(timeout, self.sink.insert_batch(&batch)).await {
            Ok(Ok(())) => {
                self.report.batches_flushed += 1;
                self.report.events_flushed += events;
                tracing::info!(size, "Flushed audit batch");
            }
            Ok(Err(error)) => {
                self.report.batches_dropped += 1;
                self.report.events_dropped += events;
                tracing::warn!(size, error = %error, "Audit batch dropped after sink failure");
            }
            Err(_) => {
                self.report.batches_dropped += 1;
                self.report.events_dropped += events;
                tracing::warn!(
                    size,
                    timeout_ms = timeout.as_millis(),
                    "Audit batch dropped after sink timeout"
                );
            }
        }
    }
}
