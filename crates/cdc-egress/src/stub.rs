//! An in-memory [`LogClient`] used by this crate's and downstream crates'
//! tests: records every delivered record instead of talking to a broker.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;

use crate::{DeliveryReport, Error, LogClient, Record};

/// A [`LogClient`] that accepts every record and remembers it for
/// assertions. Cheap to clone: all state is shared.
#[derive(Clone, Default)]
pub struct StubLogClient {
    sent: Arc<Mutex<Vec<Record>>>,
    closed: Arc<AtomicBool>,
    fail_next: Arc<Mutex<bool>>,
}

impl StubLogClient {
    /// Creates an empty stub client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every record accepted so far, in submission order.
    pub fn sent(&self) -> Vec<Record> {
        self.sent.lock().expect("stub mutex poisoned").clone()
    }

    /// Whether `close` has been called.
    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Arms a single delivery failure on the next `send` call.
    pub fn fail_next_send(&self) {
        *self.fail_next.lock().expect("stub mutex poisoned") = true;
    }
}

#[async_trait]
impl LogClient for StubLogClient {
    async fn send(&self, topic: &str, record: Record) -> Result<DeliveryReport, Error> {
        let should_fail = {
            let mut guard = self.fail_next.lock().expect("stub mutex poisoned");
            std::mem::replace(&mut *guard, false)
        };
        if should_fail {
            return Err(Error::Delivery {
                reason: "stubbed failure".to_string(),
            });
        }

        let offset = {
            let mut sent = self.sent.lock().expect("stub mutex poisoned");
            let offset = sent.len() as i64;
            sent.push(record);
            offset
        };

        Ok(DeliveryReport {
            topic: topic.to_string(),
            partition: 0,
            offset,
        })
    }

    async fn close(&self) -> Result<(), Error> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
