//! A scripted `SourceClient` used by this crate's and downstream crates'
//! tests: replays a fixed list of events/documents instead of talking to
//! a real deployment.

use std::sync::{Arc, Mutex};

use bson::Document;
use futures::stream;

use crate::{ChangeEvent, ChangeEventStream, CursorToken, DocumentStream, Error, SourceClient};

/// A `SourceClient` that replays fixed data, optionally resuming from a
/// given cursor token (spec's "Resume fidelity" law: only events with
/// feed-order at or after the supplied token are replayed).
#[derive(Clone, Default)]
pub struct StubSourceClient {
    events: Arc<Vec<ChangeEvent>>,
    snapshot_docs: Arc<Vec<Document>>,
    /// When set, `ping` and the next `open_change_feed`/`open_snapshot`
    /// call fail once before succeeding, to exercise transient-error
    /// handling.
    fail_next: Arc<Mutex<bool>>,
}

impl StubSourceClient {
    /// Creates a stub that replays `events` when tailed and `snapshot_docs`
    /// when snapshotted.
    pub fn new(events: Vec<ChangeEvent>, snapshot_docs: Vec<Document>) -> Self {
        Self {
            events: Arc::new(events),
            snapshot_docs: Arc::new(snapshot_docs),
            fail_next: Arc::new(Mutex::new(false)),
        }
    }

    /// Arms a single failure on the next call.
    pub fn fail_next_call(&self) {
        *self.fail_next.lock().expect("stub mutex poisoned") = true;
    }

    fn take_armed_failure(&self) -> bool {
        let mut guard = self.fail_next.lock().expect("stub mutex poisoned");
        std::mem::replace(&mut *guard, false)
    }
}

#[async_trait::async_trait]
impl SourceClient for StubSourceClient {
    async fn open_change_feed(&self, resume_token: Option<CursorToken>) -> Result<ChangeEventStream, Error> {
        if self.take_armed_failure() {
            return Err(Error::Connection {
                reason: "stubbed failure".to_string(),
            });
        }

        let start = match resume_token {
            Some(token) => self
                .events
                .iter()
                .position(|event| event.cursor_token == token)
                .map(|index| index + 1)
                .unwrap_or(0),
            None => 0,
        };

        let remaining: Vec<Result<ChangeEvent, Error>> =
            self.events[start..].iter().cloned().map(Ok).collect();

        Ok(Box::pin(stream::iter(remaining)))
    }

    async fn open_snapshot(&self, _batch_size: u32) -> Result<DocumentStream, Error> {
        if self.take_armed_failure() {
            return Err(Error::Connection {
                reason: "stubbed failure".to_string(),
            });
        }

        let docs: Vec<Result<Document, Error>> = self.snapshot_docs.iter().cloned().map(Ok).collect();
        Ok(Box::pin(stream::iter(docs)))
    }

    async fn ping(&self) -> Result<(), Error> {
        if self.take_armed_failure() {
            return Err(Error::Connection {
                reason: "stubbed failure".to_string(),
            });
        }
        Ok(())
    }
}
