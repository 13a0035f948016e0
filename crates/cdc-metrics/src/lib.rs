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

//! A thin counter/timer registry (C2) consumed by every other pipeline
//! component. This crate owns no reporting backend: it records against
//! the process-wide [`metrics`] facade, and it is the assembly layer's
//! job (outside this crate, per spec's Non-goals) to install a recorder
//! that actually ships the numbers somewhere.

use std::time::Duration;

/// Well-known metric names emitted by the pipeline's components.
pub mod names {
    /// Incremented for every successfully acknowledged egress record.
    pub const EGRESS_SENT_OK: &str = "egress.sent.ok";
    /// Incremented for every egress record whose delivery callback
    /// reported an error.
    pub const EGRESS_SENT_ERR: &str = "egress.sent.err";
    /// Incremented for every change-stream event the processor consumed,
    /// regardless of outcome.
    pub const CHANGE_STREAM_EVENTS_PROCESSED: &str = "change_stream.events.processed";
    /// Incremented for every change-stream event whose `op_type` was
    /// outside the whitelist.
    pub const CHANGE_STREAM_EVENTS_UNKNOWN: &str = "change_stream.events.unknown";
    /// Incremented for every change-stream event skipped because it
    /// carried the legacy `initial_load_marker` substring.
    pub const CHANGE_STREAM_EVENTS_MARKER_SKIPPED: &str = "change_stream.events.marker_skipped";
    /// Incremented for every change-stream event skipped for carrying
    /// malformed data (e.g. a null `full_document` on an insert).
    pub const CHANGE_STREAM_EVENTS_BAD_DATA: &str = "change_stream.events.bad_data";
    /// Incremented whenever the cursor store fails a `save` or `load`.
    pub const CURSOR_STORE_ERRORS: &str = "cursor_store.errors";
    /// Records the wall-clock duration of a full bulk-snapshot run.
    pub const INITIAL_LOAD_DURATION: &str = "initial_load.duration";
    /// Incremented every time the breaker transitions state.
    pub const BREAKER_TRANSITIONS: &str = "breaker.transitions";
}

/// A handle to the process-wide metrics registry. Cheap to clone; every
/// component that needs to record something is handed one of these at
/// construction rather than reaching for the facade macros directly, so
/// tests can exercise components without needing a global recorder
/// installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct Metrics;

impl Metrics {
    /// Creates a new metrics handle.
    pub fn new() -> Self {
        Self
    }

    /// Increments a named counter by one.
    pub fn increment(&self, name: &'static str) {
        metrics::counter!(name).increment(1);
    }

    /// Increments a named counter by an arbitrary amount.
    pub fn increment_by(&self, name: &'static str, amount: u64) {
        metrics::counter!(name).increment(amount);
    }

    /// Records a duration against a named timer.
    pub fn record_duration(&self, name: &'static str, duration: Duration) {
        metrics::histogram!(name).record(duration.as_secs_f64());
    }
}

#[cfg(test)]
mod test {
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    use super::*;

    #[test]
    fn increment_is_observable_through_a_recorder() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        metrics::with_local_recorder(&recorder, || {
            let metrics = Metrics::new();
            metrics.increment(names::EGRESS_SENT_OK);
            metrics.increment(names::EGRESS_SENT_OK);
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let found = snapshot.iter().find(|(key, _, _, _)| key.key().name() == names::EGRESS_SENT_OK);
        let (_, _, _, value) = found.expect("counter should be recorded");
        assert_eq!(*value, DebugValue::Counter(2));
    }
}
