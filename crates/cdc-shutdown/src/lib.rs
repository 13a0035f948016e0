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

//! The graceful shutdown coordinator (C7): runs a registry of named
//! fallible actions concurrently under a deadline, then explicitly
//! flushes and closes the egress sink (spec.md §4.6).

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    time::Duration,
};

use cdc_egress::DocumentSink;
use futures::future::join_all;

/// A boxed error from a registered shutdown action, opaque because
/// actions are drawn from every other crate in the pipeline and none of
/// their error types need to be named here.
#[derive(thiserror::Error, Debug)]
#[error("{0}")]
pub struct Error(String);

impl Error {
    /// Wraps any displayable error as an opaque shutdown error.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

type ActionFuture = Pin<Box<dyn Future<Output = Result<(), Error>> + Send>>;
type Action = Box<dyn FnOnce() -> ActionFuture + Send>;

/// The outcome of a [`ShutdownCoordinator::shutdown`] call.
#[derive(Debug, Clone, Copy)]
pub struct ShutdownReport {
    /// Whether every registered action completed before the deadline.
    pub all_completed: bool,
    /// Whether this call collapsed into an already-in-progress shutdown
    /// (spec.md §4.6's idempotency requirement).
    pub already_requested: bool,
}

/// A registry of shutdown actions plus the egress sink they drain before
/// (spec.md §4.6: "explicitly flush and close the log client" is always
/// the coordinator's last step, not one of the registered actions).
pub struct ShutdownCoordinator<D> {
    sink: D,
    actions: Mutex<Vec<(String, Action)>>,
    done: AtomicBool,
}

impl<D: DocumentSink> ShutdownCoordinator<D> {
    /// Builds a coordinator that closes `sink` as its final shutdown step.
    pub fn new(sink: D) -> Self {
        Self {
            sink,
            actions: Mutex::new(Vec::new()),
            done: AtomicBool::new(false),
        }
    }

    /// Registers a named fallible action to run when `shutdown` is called.
    pub fn register<F, Fut>(&self, name: impl Into<String>, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let boxed: Action = Box::new(move || Box::pin(action()));
        self.actions.lock().expect("actions mutex poisoned").push((name.into(), boxed));
    }

    /// Marks the processor stopped, runs every registered action
    /// concurrently under `deadline`, then flushes and closes the egress
    /// sink. Re-entrant calls collapse into the first one and return
    /// immediately.
    pub async fn shutdown(&self, deadline: Duration) -> ShutdownReport {
        if self.done.swap(true, Ordering::SeqCst) {
            return ShutdownReport {
                all_completed: true,
                already_requested: true,
            };
        }

        let actions = std::mem::take(&mut *self.actions.lock().expect("actions mutex poisoned"));

        let named_futures = actions.into_iter().map(|(name, action)| async move {
            let result = action().await;
            if let Err(err) = &result {
                tracing::warn!(action = %name, error = %err, "shutdown action failed");
            }
            result
        });

        let all_completed = match tokio::time::timeout(deadline, join_all(named_futures)).await {
            Ok(results) => results.iter().all(Result::is_ok),
            Err(_) => {
                tracing::warn!("shutdown deadline elapsed before every action completed");
                false
            }
        };

        if let Err(err) = self.sink.close().await {
            tracing::warn!(error = %err, "egress sink close failed during shutdown");
        }

        ShutdownReport {
            all_completed,
            already_requested: false,
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use cdc_egress::{stub::StubLogClient, BatchingProducer};

    use super::*;

    #[tokio::test]
    async fn shutdown_runs_actions_and_closes_sink() {
        let client = StubLogClient::new();
        let sink = BatchingProducer::new(client.clone(), "topic", 10);
        let coordinator = ShutdownCoordinator::new(sink);

        coordinator.register("stop-processor", || async { Ok(()) });

        let report = coordinator.shutdown(Duration::from_secs(1)).await;

        assert!(report.all_completed);
        assert!(!report.already_requested);
        assert!(client.closed());
    }

    #[tokio::test]
    async fn repeated_shutdown_calls_collapse_into_one() {
        let client = StubLogClient::new();
        let sink = BatchingProducer::new(client.clone(), "topic", 10);
        let coordinator = ShutdownCoordinator::new(sink);

        let first = coordinator.shutdown(Duration::from_secs(1)).await;
        let second = coordinator.shutdown(Duration::from_secs(1)).await;

        assert!(!first.already_requested);
        assert!(second.already_requested);
    }

    #[tokio::test]
    async fn an_action_exceeding_the_deadline_is_reported_incomplete() {
        let client = StubLogClient::new();
        let sink = BatchingProducer::new(client.clone(), "topic", 10);
        let coordinator = ShutdownCoordinator::new(sink);

        coordinator.register("slow", || async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        });

        let report = coordinator.shutdown(Duration::from_millis(20)).await;

        assert!(!report.all_completed);
        assert!(client.closed(), "sink must still be closed even on timeout");
    }
}
