#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! The batching egress producer (C4): accumulates (key, payload) records
//! into size-bounded batches and flushes them to the log broker with
//! per-record delivery callbacks, matching spec.md §4.2.

pub mod kafka;
pub mod stub;

use std::sync::Mutex;

use async_trait::async_trait;
use cdc_metrics::{names, Metrics};

/// A single pending egress record.
#[derive(Debug, Clone)]
pub struct Record {
    /// Partition key (`vuid` if present, else `_id`, stringified).
    pub key: String,
    /// UTF-8 JSON envelope bytes.
    pub payload: Vec<u8>,
}

/// Where a record landed once the broker acknowledged it.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    /// Destination topic.
    pub topic: String,
    /// Destination partition.
    pub partition: i32,
    /// Assigned offset.
    pub offset: i64,
}

/// Errors a [`LogClient`] or [`DocumentSink`] can raise.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The client could not be constructed or reached.
    #[error("log client connection failed: {reason}")]
    Connection {
        /// Description of the underlying failure.
        reason: String,
    },
    /// A record was rejected by the broker.
    #[error("record delivery failed: {reason}")]
    Delivery {
        /// Description of the underlying failure.
        reason: String,
    },
    /// The client failed to close cleanly.
    #[error("log client close failed: {reason}")]
    Close {
        /// Description of the underlying failure.
        reason: String,
    },
}

/// The thin interface the producer drives the log broker through. Collapses
/// the factory-family layering the source system used for its producer
/// backends into one plain trait (spec.md §9), matching the style
/// `SourceClient` uses on the source side.
#[async_trait]
pub trait LogClient: Send + Sync {
    /// Submits a single record, returning once the broker has acknowledged
    /// it (or rejected it).
    async fn send(&self, topic: &str, record: Record) -> Result<DeliveryReport, Error>;

    /// Flushes any client-internal queue and releases the underlying
    /// connection. Called exactly once, from [`DocumentSink::close`].
    async fn close(&self) -> Result<(), Error>;
}

/// The capability C5 and C6 are generic over for emitting envelopes —
/// exclusively implemented by [`BatchingProducer`] (spec.md §9: "a
/// `DocumentSink` consumed by C5 and C6, exclusively implemented by C4").
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Appends `payload` under `key` to the pending batch, flushing
    /// in-line once the batch reaches its configured capacity.
    async fn send(&self, key: String, payload: serde_json::Value) -> Result<(), Error>;

    /// Drains every pending record to the log client in FIFO order and
    /// waits for every in-flight record to be acknowledged.
    async fn flush(&self) -> Result<(), Error>;

    /// Flushes, then closes the underlying client.
    async fn close(&self) -> Result<(), Error>;
}

#[async_trait]
impl<T: DocumentSink + ?Sized> DocumentSink for std::sync::Arc<T> {
    async fn send(&self, key: String, payload: serde_json::Value) -> Result<(), Error> {
        (**self).send(key, payload).await
    }

    async fn flush(&self) -> Result<(), Error> {
        (**self).flush().await
    }

    async fn close(&self) -> Result<(), Error> {
        (**self).close().await
    }
}

/// A [`DocumentSink`] that batches records in memory and flushes them to a
/// [`LogClient`] once the batch reaches `capacity`, or on an explicit
/// `flush`/`close` call.
///
/// The pending batch is owned exclusively by whichever caller currently
/// holds the lock (spec.md §5: "owned by the single caller thread;
/// concurrent `send`s require external serialization") — the `Mutex` here
/// exists only to satisfy `Sync`, not to allow concurrent producers.
pub struct BatchingProducer<L> {
    client: L,
    topic: String,
    capacity: usize,
    pending: Mutex<Vec<Record>>,
    metrics: Metrics,
}

impl<L: LogClient> BatchingProducer<L> {
    /// Creates a producer over `client`, targeting `topic`, flushing once
    /// `capacity` records are pending.
    pub fn new(client: L, topic: impl Into<String>, capacity: usize) -> Self {
        Self {
            client,
            topic: topic.into(),
            capacity: capacity.max(1),
            pending: Mutex::new(Vec::new()),
            metrics: Metrics::new(),
        }
    }

    fn take_batch_if_full(&self, record: Record) -> Option<Vec<Record>> {
        let mut pending = self.pending.lock().expect("batch mutex poisoned");
        pending.push(record);
        if pending.len() >= self.capacity {
            Some(std::mem::take(&mut pending))
        } else {
            None
        }
    }

    fn take_all(&self) -> Vec<Record> {
        let mut pending = self.pending.lock().expect("batch mutex poisoned");
        std::mem::take(&mut pending)
    }

    async fn drain(&self, batch: Vec<Record>) -> Result<(), Error> {
        for record in batch {
            match self.client.send(&self.topic, record).await {
                Ok(report) => {
                    self.metrics.increment(names::EGRESS_SENT_OK);
                    tracing::debug!(
                        topic = %report.topic,
                        partition = report.partition,
                        offset = report.offset,
                        "egress record delivered"
                    );
                }
                Err(err) => {
                    self.metrics.increment(names::EGRESS_SENT_ERR);
                    tracing::warn!(error = %err, "egress record delivery failed");
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<L: LogClient> DocumentSink for BatchingProducer<L> {
    async fn send(&self, key: String, payload: serde_json::Value) -> Result<(), Error> {
        let record = Record {
            key,
            payload: serde_json::to_vec(&payload).expect("envelope is always valid JSON"),
        };

        if let Some(batch) = self.take_batch_if_full(record) {
            self.drain(batch).await?;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        let batch = self.take_all();
        if batch.is_empty() {
            return Ok(());
        }
        self.drain(batch).await
    }

    async fn close(&self) -> Result<(), Error> {
        self.flush().await?;
        self.client.close().await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::stub::StubLogClient;

    #[tokio::test]
    async fn flushes_exactly_at_capacity() {
        let client = StubLogClient::new();
        let sink = BatchingProducer::new(client.clone(), "topic", 2);

        sink.send("1".to_string(), serde_json::json!({"a": 1})).await.unwrap();
        assert_eq!(client.sent().len(), 0, "batch of one must not flush");

        sink.send("2".to_string(), serde_json::json!({"a": 2})).await.unwrap();
        assert_eq!(client.sent().len(), 2, "batch reaching capacity flushes");
    }

    #[tokio::test]
    async fn close_on_empty_batch_does_not_call_client_send() {
        let client = StubLogClient::new();
        let sink = BatchingProducer::new(client.clone(), "topic", 10);

        sink.close().await.unwrap();
        assert_eq!(client.sent().len(), 0);
        assert!(client.closed());
    }

    #[tokio::test]
    async fn flush_drains_remaining_pending_records() {
        let client = StubLogClient::new();
        let sink = BatchingProducer::new(client.clone(), "topic", 10);

        sink.send("1".to_string(), serde_json::json!({"a": 1})).await.unwrap();
        sink.flush().await.unwrap();

        assert_eq!(client.sent().len(), 1);
    }

    #[tokio::test]
    async fn records_preserve_submission_order() {
        let client = StubLogClient::new();
        let sink = BatchingProducer::new(client.clone(), "topic", 3);

        sink.send("1".to_string(), serde_json::json!({})).await.unwrap();
        sink.send("2".to_string(), serde_json::json!({})).await.unwrap();
        sink.send("3".to_string(), serde_json::json!({})).await.unwrap();

        let sent = client.sent();
        assert_eq!(sent[0].key, "1");
        assert_eq!(sent[1].key, "2");
        assert_eq!(sent[2].key, "3");
    }
}
