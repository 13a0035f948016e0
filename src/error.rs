//! Top-level pipeline error, wrapping every crate's own `thiserror` enum
//! with `#[from]` conversions, plus the five-kind classification from
//! spec.md §7 (kept as a function rather than a parallel enum so the
//! per-crate errors don't need duplicate variants).

/// Any error that can surface while assembling or running the pipeline.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum PipelineError {
    /// Configuration failed to load or validate.
    #[error("configuration error: {0}")]
    Config(#[from] cdc_config::Error),
    /// The source client failed outside the change-feed loop (e.g. at
    /// startup, opening the snapshot cursor).
    #[error("source error: {0}")]
    Source(#[from] cdc_source::Error),
    /// The egress sink failed to flush or close.
    #[error("egress error: {0}")]
    Egress(#[from] cdc_egress::Error),
    /// The cursor store failed outside the change-feed loop's own
    /// logged-and-swallowed handling.
    #[error("cursor store error: {0}")]
    Cursor(#[from] cdc_cursor::Error),
    /// The bulk snapshot run failed.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] cdc_snapshot::Error),
    /// The change-feed run failed.
    #[error("change feed error: {0}")]
    ChangeFeed(#[from] cdc_changefeed::Error),
    /// A startup I/O operation failed (e.g. binding the health listener).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The five error kinds from spec.md §7, classified from whichever
/// concrete error actually occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Dependency breaker open at the call site; the change-feed run
    /// aborts.
    BreakerOpen,
    /// A retryable network/broker error.
    TransientIO,
    /// Malformed event data (null `op_type`, non-whitelisted operation,
    /// null `full_document` for a non-delete event).
    BadData,
    /// The cursor store's `save` or `load` faulted.
    CursorStoreError,
    /// Invalid configuration or a broker permanently unreachable at
    /// startup; the process exits non-zero.
    Fatal,
}

impl PipelineError {
    /// Classifies this error into one of spec.md §7's five kinds.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Config(_) => ErrorKind::Fatal,
            PipelineError::ChangeFeed(cdc_changefeed::Error::BreakerOpen) => ErrorKind::BreakerOpen,
            PipelineError::ChangeFeed(cdc_changefeed::Error::Source(_)) => ErrorKind::TransientIO,
            PipelineError::Source(_) => ErrorKind::TransientIO,
            PipelineError::Egress(_) => ErrorKind::TransientIO,
            PipelineError::Cursor(_) => ErrorKind::CursorStoreError,
            PipelineError::Snapshot(_) => ErrorKind::TransientIO,
            PipelineError::Io(_) => ErrorKind::Fatal,
        }
    }
}
