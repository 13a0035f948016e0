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

//! The change-feed processor (C6): opens and resumes the change feed,
//! classifies events, emits through the egress sink, and persists the
//! resume cursor after every event (spec.md §4.3).

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use cdc_breaker::CircuitBreaker;
use cdc_cursor::CursorStore;
use cdc_egress::DocumentSink;
use cdc_envelope::{build_envelope, derive_key, to_relaxed_json, Source};
use cdc_metrics::{names, Metrics};
use cdc_source::SourceClient;
use futures::StreamExt;

/// The whitelist of sanitized `op_type` values (spec.md §4.3 step 2);
/// anything outside it becomes the literal string `unknown`.
const OP_TYPE_WHITELIST: &[&str] = &[
    "insert",
    "update",
    "replace",
    "delete",
    "drop",
    "rename",
    "dropDatabase",
    "invalidate",
];

/// The legacy marker substring that causes an event to be skipped
/// without emission (spec.md §4.3 step 1).
const INITIAL_LOAD_MARKER: &str = "initial_load_marker";

/// Errors that abort a change-feed run outright. Every other failure is
/// logged, counted, and swallowed at the loop level (spec.md §7).
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Opening the change feed failed.
    #[error("change feed open failed: {0}")]
    Source(#[from] cdc_source::Error),
    /// The source breaker is open; the current run aborts.
    #[error("source breaker is open")]
    BreakerOpen,
}

/// The processor's externally observable lifecycle state (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    /// Constructed, not yet opened the feed.
    Ready,
    /// Reading and acting on events.
    Tailing,
    /// `stop` has been requested; draining the current iteration.
    Stopping,
    /// The loop has exited.
    Stopped,
}

/// Drives the change feed through [`Ready`](ProcessorState::Ready) →
/// [`Tailing`](ProcessorState::Tailing) → [`Stopped`](ProcessorState::Stopped),
/// generic over the same [`SourceClient`]/[`DocumentSink`] traits C5 uses,
/// plus a [`CursorStore`] for resume persistence.
pub struct ChangeFeedProcessor<S, D, C> {
    source: S,
    sink: D,
    cursor_store: C,
    breaker: Arc<CircuitBreaker>,
    metrics: Metrics,
    stop: AtomicBool,
    state: Mutex<ProcessorState>,
}

impl<S: SourceClient, D: DocumentSink, C: CursorStore> ChangeFeedProcessor<S, D, C> {
    /// Builds a processor over `source`, `sink`, and `cursor_store`,
    /// wrapping feed reads in `breaker` (shared with the health surface,
    /// which reports the same breaker's state).
    pub fn new(source: S, sink: D, cursor_store: C, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            source,
            sink,
            cursor_store,
            breaker,
            metrics: Metrics::new(),
            stop: AtomicBool::new(false),
            state: Mutex::new(ProcessorState::Ready),
        }
    }

    /// Returns the processor's current lifecycle state.
    pub fn state(&self) -> ProcessorState {
        *self.state.lock().expect("state mutex poisoned")
    }

    /// Requests the tailing loop to exit at the next iteration boundary
    /// (spec.md §5: the only state the outside world may mutate while
    /// tailing is live).
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Runs the state machine to completion: loads the resume cursor,
    /// opens the feed, and tails it until `request_stop` is called or a
    /// fatal error occurs.
    pub async fn run(&self) -> Result<(), Error> {
        self.set_state(ProcessorState::Ready);

        let resume_token = match self.cursor_store.load().await {
            Ok(token) => token,
            Err(err) => {
                self.metrics.increment(names::CURSOR_STORE_ERRORS);
                tracing::warn!(error = %err, "cursor load failed, starting change feed from now");
                None
            }
        };

        let mut stream = self.source.open_change_feed(resume_token).await?;
        self.set_state(ProcessorState::Tailing);

        loop {
            if self.stop.load(Ordering::SeqCst) {
                self.set_state(ProcessorState::Stopping);
                break;
            }

            let outcome = self.breaker.execute(|| async { stream.next().await.transpose() }).await;

            let event = match outcome {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(cdc_breaker::Error::Open { .. }) => {
                    self.set_state(ProcessorState::Stopped);
                    return Err(Error::BreakerOpen);
                }
                Err(cdc_breaker::Error::Action(source_err)) => {
                    tracing::warn!(error = %source_err, "change feed read failed, continuing");
                    continue;
                }
            };

            self.handle_event(event).await;
        }

        self.set_state(ProcessorState::Stopped);
        Ok(())
    }

    async fn handle_event(&self, event: cdc_source::ChangeEvent) {
        self.metrics.increment(names::CHANGE_STREAM_EVENTS_PROCESSED);

        if is_marker(&event.document_key) {
            self.metrics.increment(names::CHANGE_STREAM_EVENTS_MARKER_SKIPPED);
            self.persist_cursor(&event.cursor_token).await;
            return;
        }

        let op = classify(event.op_type.as_deref());
        if op == "unknown" {
            self.metrics.increment(names::CHANGE_STREAM_EVENTS_UNKNOWN);
        }

        match op {
            "insert" | "update" | "replace" => match &event.full_document {
                Some(doc) => self.emit(doc, op).await,
                None => {
                    self.metrics.increment(names::CHANGE_STREAM_EVENTS_BAD_DATA);
                    tracing::warn!(op_type = op, "null full_document for non-delete event, skipping");
                }
            },
            "delete" => self.emit(&event.document_key, op).await,
            _ => {}
        }

        self.persist_cursor(&event.cursor_token).await;
    }

    async fn emit(&self, doc: &bson::Document, op: &str) {
        let key = derive_key(doc);
        let envelope = build_envelope(doc, op, Source::ChangeStream);
        if let Err(err) = self.sink.send(key, envelope).await {
            tracing::warn!(error = %err, "egress send failed");
        }
    }

    async fn persist_cursor(&self, token: &[u8]) {
        if let Err(err) = self.cursor_store.save(token.to_vec()).await {
            self.metrics.increment(names::CURSOR_STORE_ERRORS);
            tracing::warn!(error = %err, "cursor save failed");
        }
    }

    fn set_state(&self, next: ProcessorState) {
        *self.state.lock().expect("state mutex poisoned") = next;
    }
}

fn is_marker(document_key: &bson::Document) -> bool {
    to_relaxed_json(document_key)
        .get("_id")
        .map(|id| id.to_string().contains(INITIAL_LOAD_MARKER))
        .unwrap_or(false)
}

fn classify(op_type: Option<&str>) -> &'static str {
    match op_type {
        Some(raw) => OP_TYPE_WHITELIST
            .iter()
            .find(|candidate| candidate.eq_ignore_ascii_case(raw))
            .copied()
            .unwrap_or("unknown"),
        None => "unknown",
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use bson::doc;
    use cdc_cursor::local::LocalFileCursorStore;
    use cdc_egress::{stub::StubLogClient, BatchingProducer};
    use cdc_source::{stub::StubSourceClient, ChangeEvent};

    use super::*;

    fn breaker() -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::with_thresholds("source", 3, Duration::from_millis(50), Metrics::new()))
    }

    async fn store(dir: &tempfile::TempDir) -> LocalFileCursorStore {
        LocalFileCursorStore::new(dir.path().join("resume-token.json"))
    }

    #[tokio::test]
    async fn tail_insert_then_delete_emits_both_and_advances_cursor() {
        let events = vec![
            ChangeEvent {
                op_type: Some("insert".to_string()),
                document_key: doc! { "_id": "7" },
                full_document: Some(doc! { "_id": "7", "x": 1 }),
                cursor_token: b"T1".to_vec(),
            },
            ChangeEvent {
                op_type: Some("delete".to_string()),
                document_key: doc! { "_id": "7" },
                full_document: None,
                cursor_token: b"T2".to_vec(),
            },
        ];
        let source = StubSourceClient::new(events, vec![]);
        let log_client = StubLogClient::new();
        let sink = BatchingProducer::new(log_client.clone(), "topic", 1);
        let dir = tempfile::tempdir().unwrap();
        let cursor_store = store(&dir).await;
        let processor = ChangeFeedProcessor::new(source, sink, cursor_store, breaker());

        // The stub's stream is finite, so run() returns once it is drained.
        processor.run().await.unwrap();

        let sent = log_client.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].key, "7");
        assert_eq!(sent[1].key, "7");

        let insert_payload: serde_json::Value = serde_json::from_slice(&sent[0].payload).unwrap();
        assert_eq!(insert_payload["_operation"], "insert");
        assert_eq!(insert_payload["x"], 1);

        let delete_payload: serde_json::Value = serde_json::from_slice(&sent[1].payload).unwrap();
        assert_eq!(delete_payload["_operation"], "delete");
        assert!(delete_payload.get("x").is_none());

        let final_cursor = store(&dir).await.load().await.unwrap();
        assert_eq!(final_cursor, Some(b"T2".to_vec()));
    }

    #[tokio::test]
    async fn marker_events_are_skipped_but_cursor_advances() {
        let events = vec![ChangeEvent {
            op_type: Some("insert".to_string()),
            document_key: doc! { "_id": "abc_initial_load_marker_1" },
            full_document: Some(doc! { "_id": "abc_initial_load_marker_1" }),
            cursor_token: b"T9".to_vec(),
        }];
        let source = StubSourceClient::new(events, vec![]);
        let log_client = StubLogClient::new();
        let sink = BatchingProducer::new(log_client.clone(), "topic", 1);
        let dir = tempfile::tempdir().unwrap();
        let cursor_store = store(&dir).await;
        let processor = ChangeFeedProcessor::new(source, sink, cursor_store, breaker());

        processor.run().await.unwrap();

        assert_eq!(log_client.sent().len(), 0);
        assert_eq!(store(&dir).await.load().await.unwrap(), Some(b"T9".to_vec()));
    }

    #[tokio::test]
    async fn unknown_op_type_is_skipped_and_counted() {
        let events = vec![ChangeEvent {
            op_type: Some("mystery".to_string()),
            document_key: doc! { "_id": "5" },
            full_document: None,
            cursor_token: b"T5".to_vec(),
        }];
        let source = StubSourceClient::new(events, vec![]);
        let log_client = StubLogClient::new();
        let sink = BatchingProducer::new(log_client.clone(), "topic", 1);
        let dir = tempfile::tempdir().unwrap();
        let cursor_store = store(&dir).await;
        let processor = ChangeFeedProcessor::new(source, sink, cursor_store, breaker());

        processor.run().await.unwrap();

        assert_eq!(log_client.sent().len(), 0);
        assert_eq!(store(&dir).await.load().await.unwrap(), Some(b"T5".to_vec()));
    }

    #[tokio::test]
    async fn resume_fidelity_replays_only_events_after_the_saved_cursor() {
        let events = vec![
            ChangeEvent {
                op_type: Some("insert".to_string()),
                document_key: doc! { "_id": "7" },
                full_document: Some(doc! { "_id": "7", "x": 1 }),
                cursor_token: b"T1".to_vec(),
            },
            ChangeEvent {
                op_type: Some("delete".to_string()),
                document_key: doc! { "_id": "7" },
                full_document: None,
                cursor_token: b"T2".to_vec(),
            },
        ];
        let source = StubSourceClient::new(events, vec![]);
        let dir = tempfile::tempdir().unwrap();
        store(&dir).await.save(b"T1".to_vec()).await.unwrap();

        let log_client = StubLogClient::new();
        let sink = BatchingProducer::new(log_client.clone(), "topic", 1);
        let cursor_store = store(&dir).await;
        let processor = ChangeFeedProcessor::new(source, sink, cursor_store, breaker());

        processor.run().await.unwrap();

        let sent = log_client.sent();
        assert_eq!(sent.len(), 1, "only the event after T1 should replay");
        let payload: serde_json::Value = serde_json::from_slice(&sent[0].payload).unwrap();
        assert_eq!(payload["_operation"], "delete");
    }
}
