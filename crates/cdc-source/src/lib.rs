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

//! Source-side data model and the thin `SourceClient` interface the
//! change-feed processor (C6) and bulk snapshot loader (C5) are generic
//! over. The real dependency (a MongoDB deployment) is assumed present
//! and obeying its documented contract, per spec §1 — this crate exposes
//! just enough surface for the core to drive it.

pub mod mongo;
pub mod stub;

use std::pin::Pin;

use bson::Document;
use futures::Stream;

/// The opaque, source-defined resume position. Stored verbatim as the
/// BSON encoding of the resume-token document (spec §6).
pub type CursorToken = Vec<u8>;

/// A single change-stream event (spec §3).
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// The raw operation type as reported by the source, e.g. `"insert"`.
    /// `None` represents a null/missing `op_type`.
    pub op_type: Option<String>,
    /// The sub-map identifying the affected document (always carries
    /// `_id`).
    pub document_key: Document,
    /// The post-image, present for insert/update/replace (update requires
    /// full-document-lookup mode).
    pub full_document: Option<Document>,
    /// Resume position immediately after this event.
    pub cursor_token: CursorToken,
}

/// Errors a `SourceClient` implementation can raise. These map onto the
/// `TransientIO` / `Fatal` kinds in spec §7 depending on where they
/// surface.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The client could not reach the deployment at all.
    #[error("source connection failed: {reason}")]
    Connection {
        /// Description of the underlying failure.
        reason: String,
    },
    /// An already-open cursor (snapshot or change feed) failed mid-stream.
    #[error("source cursor error: {reason}")]
    Cursor {
        /// Description of the underlying failure.
        reason: String,
    },
    /// An operation exceeded its configured timeout.
    #[error("source operation '{operation}' timed out")]
    Timeout {
        /// Name of the operation that timed out.
        operation: String,
    },
}

/// A stream of change-feed events, boxed so both the production and stub
/// clients can return the same concrete type.
pub type ChangeEventStream = Pin<Box<dyn Stream<Item = Result<ChangeEvent, Error>> + Send>>;

/// A stream of snapshot documents.
pub type DocumentStream = Pin<Box<dyn Stream<Item = Result<Document, Error>> + Send>>;

/// The server-side filter installed on every change feed this pipeline
/// opens: exclude the internal `system.indexes` namespace and
/// `invalidate` events (spec §4.3's "Feed filter", reused verbatim by the
/// snapshot loader's own watch calls when it needs liveness checks, per
/// spec §9(b)).
pub fn change_feed_pipeline() -> Vec<Document> {
    vec![bson::doc! {
        "$match": {
            "$and": [
                { "ns.coll": { "$ne": "system.indexes" } },
                { "operationType": { "$ne": "invalidate" } },
            ]
        }
    }]
}

/// The thin interface the core drives the source deployment through.
/// Collapses the strategy/factory layering of systems this was modeled
/// on into one plain trait (spec §9).
#[async_trait::async_trait]
pub trait SourceClient: Send + Sync {
    /// Opens the change feed, resuming after `resume_token` when given,
    /// else starting from *now*.
    async fn open_change_feed(&self, resume_token: Option<CursorToken>) -> Result<ChangeEventStream, Error>;

    /// Opens a cursor over the full collection with the given server-side
    /// batch size.
    async fn open_snapshot(&self, batch_size: u32) -> Result<DocumentStream, Error>;

    /// Checks connectivity without consuming a cursor.
    async fn ping(&self) -> Result<(), Error>;
}

#[async_trait::async_trait]
impl<T: SourceClient + ?Sized> SourceClient for std::sync::Arc<T> {
    async fn open_change_feed(&self, resume_token: Option<CursorToken>) -> Result<ChangeEventStream, Error> {
        (**self).open_change_feed(resume_token).await
    }

    async fn open_snapshot(&self, batch_size: u32) -> Result<DocumentStream, Error> {
        (**self).open_snapshot(batch_size).await
    }

    async fn ping(&self) -> Result<(), Error> {
        (**self).ping().await
    }
}
