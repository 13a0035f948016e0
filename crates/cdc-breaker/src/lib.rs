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

//! A circuit breaker wrapping a single dependency-bound action. Fails
//! fast while the dependency is known to be unhealthy and probes for
//! recovery after a reset timeout.
//!
//! State is held behind a single [`std::sync::Mutex`] so that readers
//! never observe a torn `(state, failure_count, last_failure)` tuple,
//! per the concurrency guarantee this breaker is required to uphold.

use std::{
    future::Future,
    sync::Mutex,
    time::{Duration, Instant},
};

use cdc_metrics::{names, Metrics};

const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(30);

/// The breaker's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Actions are invoked normally.
    Closed,
    /// Actions are rejected without being invoked.
    Open,
    /// A single probing action is allowed through.
    HalfOpen,
}

struct Inner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

/// Errors returned by [`CircuitBreaker::execute`].
#[derive(thiserror::Error, Debug)]
pub enum Error<E> {
    /// The breaker is open and the reset window has not elapsed; `action`
    /// was not invoked.
    #[error("circuit breaker '{name}' is open")]
    Open {
        /// The name of the breaker, for diagnostics.
        name: String,
    },
    /// `action` ran and returned an error.
    #[error(transparent)]
    Action(#[from] E),
}

/// A circuit breaker protecting one external dependency.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<Inner>,
    metrics: Metrics,
}

impl CircuitBreaker {
    /// Creates a breaker with the default threshold (3 consecutive
    /// failures) and reset timeout (30s).
    pub fn new(name: impl Into<String>, metrics: Metrics) -> Self {
        Self::with_thresholds(name, DEFAULT_FAILURE_THRESHOLD, DEFAULT_RESET_TIMEOUT, metrics)
    }

    /// Creates a breaker with explicit threshold and reset timeout.
    pub fn with_thresholds(
        name: impl Into<String>,
        failure_threshold: u32,
        reset_timeout: Duration,
        metrics: Metrics,
    ) -> Self {
        Self {
            name: name.into(),
            failure_threshold,
            reset_timeout,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
            }),
            metrics,
        }
    }

    /// Returns the current state, for diagnostics.
    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker mutex poisoned").state
    }

    /// Runs `action` unless the breaker is open and the reset window has
    /// not elapsed, in which case `action` is not invoked and
    /// [`Error::Open`] is returned. A breaker-open error is never itself
    /// counted as a failure.
    pub async fn execute<F, Fut, T, E>(&self, action: F) -> Result<T, Error<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.admit() {
            return Err(Error::Open { name: self.name.clone() });
        }

        match action().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(Error::Action(err))
            }
        }
    }

    /// Decides whether a call is admitted, transitioning OPEN -> HALF_OPEN
    /// when the reset timeout has elapsed since the last failure.
    fn admit(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => match inner.last_failure {
                Some(last) if last.elapsed() >= self.reset_timeout => {
                    inner.state = BreakerState::HalfOpen;
                    tracing::info!(breaker = %self.name, "breaker probing for recovery (half-open)");
                    self.metrics.increment(names::BREAKER_TRANSITIONS);
                    true
                }
                _ => false,
            },
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Closed;
                inner.failure_count = 0;
                tracing::info!(breaker = %self.name, "breaker closed after successful probe");
                self.metrics.increment(names::BREAKER_TRANSITIONS);
            }
            BreakerState::Closed => {
                inner.failure_count = 0;
            }
            BreakerState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        inner.last_failure = Some(Instant::now());
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                tracing::warn!(breaker = %self.name, "breaker reopened after probe failure");
                self.metrics.increment(names::BREAKER_TRANSITIONS);
            }
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    tracing::warn!(breaker = %self.name, failures = inner.failure_count, "breaker tripped open");
                    self.metrics.increment(names::BREAKER_TRANSITIONS);
                }
            }
            BreakerState::Open => {}
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn trips_open_after_threshold_failures() {
        let breaker = CircuitBreaker::with_thresholds("source", 3, Duration::from_millis(50), Metrics::new());

        for _ in 0..3 {
            let result: Result<(), Error<&str>> = breaker.execute(|| async { Err("boom") }).await;
            assert!(matches!(result, Err(Error::Action(_))));
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        let calls = AtomicU32::new(0);
        let result: Result<(), Error<&str>> = breaker
            .execute(|| {
                let _ = calls.fetch_add(1, Ordering::SeqCst);
                async { Err("boom") }
            })
            .await;
        assert!(matches!(result, Err(Error::Open { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0, "action must not run while open");
    }

    #[tokio::test]
    async fn success_in_closed_resets_counter() {
        let breaker = CircuitBreaker::with_thresholds("source", 3, Duration::from_millis(50), Metrics::new());

        let _: Result<(), Error<&str>> = breaker.execute(|| async { Err("boom") }).await;
        let _: Result<(), Error<&str>> = breaker.execute(|| async { Err("boom") }).await;
        let _: Result<(), Error<&str>> = breaker.execute(|| async { Ok(()) }).await;
        assert_eq!(breaker.state(), BreakerState::Closed);

        // a third failure should not trip the breaker since the counter reset.
        let _: Result<(), Error<&str>> = breaker.execute(|| async { Err("boom") }).await;
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn probes_once_after_reset_timeout_then_closes_on_success() {
        let breaker = CircuitBreaker::with_thresholds("source", 1, Duration::from_millis(50), Metrics::new());

        let _: Result<(), Error<&str>> = breaker.execute(|| async { Err("boom") }).await;
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(60)).await;

        let result: Result<(), Error<&str>> = breaker.execute(|| async { Ok(()) }).await;
        assert!(result.is_ok());
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn probe_failure_reopens_immediately() {
        let breaker = CircuitBreaker::with_thresholds("source", 1, Duration::from_millis(50), Metrics::new());

        let _: Result<(), Error<&str>> = breaker.execute(|| async { Err("boom") }).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        let _: Result<(), Error<&str>> = breaker.execute(|| async { Err("boom") }).await;

        assert_eq!(breaker.state(), BreakerState::Open);
    }
}
