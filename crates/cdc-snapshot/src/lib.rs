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

//! The bulk snapshot loader (C5): streams the full collection once and
//! emits each document through the egress sink, with no completion
//! marker kept between runs (spec.md §4.4).

use std::time::Instant;

use cdc_egress::DocumentSink;
use cdc_envelope::{build_envelope, derive_key, Source};
use cdc_metrics::{names, Metrics};
use cdc_source::SourceClient;
use futures::StreamExt;

/// Errors the snapshot loader can surface. Both variants are logged and
/// counted by the caller; neither aborts the pipeline process (spec.md
/// §7's `TransientIO`/`CursorStoreError` kinds don't apply to C5, which
/// has no cursor of its own).
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The source client failed to open or read the snapshot cursor.
    #[error("snapshot source error: {0}")]
    Source(#[from] cdc_source::Error),
    /// The sink failed to accept or flush an envelope.
    #[error("snapshot sink error: {0}")]
    Sink(#[from] cdc_egress::Error),
}

/// Runs the one-shot full-collection read described in spec.md §4.4,
/// generic over the same [`SourceClient`]/[`DocumentSink`] traits C6 uses.
pub struct BulkSnapshotLoader<S, D> {
    source: S,
    sink: D,
    metrics: Metrics,
}

impl<S: SourceClient, D: DocumentSink> BulkSnapshotLoader<S, D> {
    /// Builds a loader over `source` and `sink`.
    pub fn new(source: S, sink: D) -> Self {
        Self {
            source,
            sink,
            metrics: Metrics::new(),
        }
    }

    /// Streams the collection and emits each document as a `read`/
    /// `initial_load` envelope. Returns immediately, doing nothing, when
    /// `enabled` is false (spec.md §4.4's entry gate). Returns the number
    /// of documents processed.
    pub async fn run(&self, enabled: bool, batch_size: u32) -> Result<u64, Error> {
        if !enabled {
            return Ok(0);
        }

        let start = Instant::now();
        let mut stream = self.source.open_snapshot(batch_size).await?;
        let mut processed = 0u64;

        while let Some(item) = stream.next().await {
            let doc = item?;
            let key = derive_key(&doc);
            let envelope = build_envelope(&doc, "read", Source::InitialLoad);
            self.sink.send(key, envelope).await?;
            processed += 1;
        }

        self.sink.flush().await?;
        self.metrics.record_duration(names::INITIAL_LOAD_DURATION, start.elapsed());

        Ok(processed)
    }
}

#[cfg(test)]
mod test {
    use bson::doc;
    use cdc_egress::{stub::StubLogClient, BatchingProducer};
    use cdc_source::stub::StubSourceClient;

    use super::*;

    #[tokio::test]
    async fn snapshot_disabled_is_a_no_op() {
        let source = StubSourceClient::new(vec![], vec![doc! { "_id": "1" }]);
        let client = StubLogClient::new();
        let sink = BatchingProducer::new(client.clone(), "topic", 2);
        let loader = BulkSnapshotLoader::new(source, sink);

        let processed = loader.run(false, 1000).await.unwrap();

        assert_eq!(processed, 0);
        assert_eq!(client.sent().len(), 0);
    }

    #[tokio::test]
    async fn snapshot_emits_every_document_with_derived_keys() {
        let docs = vec![
            doc! { "_id": "1", "name": "a" },
            doc! { "_id": "2", "name": "b", "vuid": "V2" },
            doc! { "_id": "3" },
        ];
        let source = StubSourceClient::new(vec![], docs);
        let client = StubLogClient::new();
        let sink = BatchingProducer::new(client.clone(), "topic", 2);
        let loader = BulkSnapshotLoader::new(source, sink);

        let processed = loader.run(true, 1000).await.unwrap();

        assert_eq!(processed, 3);
        let sent = client.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].key, "1");
        assert_eq!(sent[1].key, "V2");
        assert_eq!(sent[2].key, "3");

        for record in &sent {
            let payload: serde_json::Value = serde_json::from_slice(&record.payload).unwrap();
            assert_eq!(payload["_source"], "initial_load");
            assert_eq!(payload["_operation"], "read");
        }
    }
}
