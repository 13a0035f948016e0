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

//! The resume-cursor store (C3): load/save an opaque cursor token to one
//! of two interchangeable backings, selected once at assembly (spec.md
//! §4.5).

pub mod local;
pub mod remote;

use async_trait::async_trait;

/// Errors a [`CursorStore`] implementation can raise. A `load` failure
/// other than "absent" and any `save` failure are logged and counted by
/// the caller, never fatal (spec.md §4.5, §7's `CursorStoreError` kind).
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The backing could not be reached (file I/O error, S3 request
    /// failure other than not-found).
    #[error("cursor store unavailable: {reason}")]
    Unavailable {
        /// Description of the underlying failure.
        reason: String,
    },
}

/// Loads and saves the opaque cursor blob. Two implementations exist,
/// [`local::LocalFileCursorStore`] and [`remote::RemoteCursorStore`];
/// assembly picks one based on whether AWS credentials are present
/// (spec.md §6).
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Returns the stored token, or `None` if no token has ever been
    /// saved.
    async fn load(&self) -> Result<Option<Vec<u8>>, Error>;

    /// Persists `token`, replacing whatever was stored previously.
    /// Implementations must be resilient to partial writes: either the
    /// new token becomes fully visible, or the previous token remains
    /// readable.
    async fn save(&self, token: Vec<u8>) -> Result<(), Error>;
}

#[async_trait]
impl CursorStore for Box<dyn CursorStore> {
    async fn load(&self) -> Result<Option<Vec<u8>>, Error> {
        (**self).load().await
    }

    async fn save(&self, token: Vec<u8>) -> Result<(), Error> {
        (**self).save(token).await
    }
}

#[async_trait]
impl<T: CursorStore + ?Sized> CursorStore for std::sync::Arc<T> {
    async fn load(&self) -> Result<Option<Vec<u8>>, Error> {
        (**self).load().await
    }

    async fn save(&self, token: Vec<u8>) -> Result<(), Error> {
        (**self).save(token).await
    }
}
