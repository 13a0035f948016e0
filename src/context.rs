//! Assembly (C9): wires every component from a validated [`Config`],
//! choosing the cursor-store backing and translating configuration
//! enums into the concrete client types (spec.md §9's "global singleton
//! client holder becomes an owned resource in the assembly context").

use std::{sync::Arc, time::Duration};

use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    Client as S3Client,
};
use cdc_breaker::CircuitBreaker;
use cdc_config::Config;
use cdc_cursor::{local::LocalFileCursorStore, remote::RemoteCursorStore, CursorStore};
use cdc_egress::{
    kafka::{Acks, Compression, RdKafkaLogClient},
    BatchingProducer,
};
use cdc_metrics::Metrics;
use cdc_source::mongo::MongoSourceClient;

use crate::error::PipelineError;

/// The production source client, shared between the snapshot loader and
/// the change-feed processor.
pub type Source = Arc<MongoSourceClient>;
/// The production egress sink, shared between the snapshot loader and
/// the change-feed processor.
pub type Sink = Arc<BatchingProducer<RdKafkaLogClient>>;
/// The selected cursor-store backing, erased to a trait object since
/// either implementation may be chosen at assembly time.
pub type Cursor = Arc<dyn CursorStore>;

/// Every owned resource the pipeline needs for one run, released by the
/// shutdown coordinator (C7) rather than any process-wide static.
pub struct Context {
    /// The validated configuration this context was built from.
    pub config: Config,
    /// The shared metrics registry.
    pub metrics: Metrics,
    /// The breaker protecting the source client during tailing.
    pub breaker: Arc<CircuitBreaker>,
    /// The MongoDB source client.
    pub source: Source,
    /// The Kafka egress sink.
    pub sink: Sink,
    /// The selected resume-cursor store.
    pub cursor_store: Cursor,
}

impl Context {
    /// Connects every external client and selects the cursor-store
    /// backing described by `config`.
    pub async fn assemble(config: Config) -> Result<Self, PipelineError> {
        let metrics = Metrics::new();

        let source = MongoSourceClient::connect(
            &config.source.uri,
            &config.source.database,
            &config.source.collection,
            config.source.pool_min,
            config.source.pool_max,
            config.source.connect_timeout(),
        )
        .await?;
        let source = Arc::new(source);

        let log_client = RdKafkaLogClient::connect(
            &config.log.bootstrap,
            &config.log.client_id,
            map_acks(config.log.acks),
            config.log.max_request_bytes,
            config.log.linger_ms as u32,
            map_compression(config.log.compression),
            config.source.read_timeout(),
        )?;
        let sink = Arc::new(BatchingProducer::new(
            log_client,
            config.log.topic.clone(),
            config.log.egress_batch_count,
        ));

        let cursor_store: Arc<dyn CursorStore> = if config.cursor.use_remote_backing() {
            Arc::new(build_remote_cursor_store(&config).await)
        } else {
            Arc::new(LocalFileCursorStore::new(config.cursor.local_path.clone()))
        };

        // The breaker's failure_threshold/reset_timeout are the only
        // configured durations besides the source timeouts (spec.md §5);
        // retry_max_attempts/retry_backoff_ms are the config fields that
        // drive them.
        let breaker = Arc::new(CircuitBreaker::with_thresholds(
            "source",
            config.pipeline.retry_max_attempts,
            Duration::from_millis(config.pipeline.retry_backoff_ms),
            metrics,
        ));

        Ok(Self {
            config,
            metrics,
            breaker,
            source,
            sink,
            cursor_store,
        })
    }
}

async fn build_remote_cursor_store(config: &Config) -> RemoteCursorStore {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = &config.cursor.region {
        loader = loader.region(Region::new(region.clone()));
    }
    if let (Some(key), Some(secret)) = (&config.cursor.aws_access_key_id, &config.cursor.aws_secret_access_key) {
        loader = loader.credentials_provider(Credentials::new(key.clone(), secret.clone(), None, None, "cdc-pipeline"));
    }
    let sdk_config = loader.load().await;
    let client = S3Client::new(&sdk_config);
    RemoteCursorStore::new(client, config.cursor.remote_bucket.clone(), config.cursor.remote_key.clone())
}

fn map_acks(acks: cdc_config::Acks) -> Acks {
    match acks {
        cdc_config::Acks::All => Acks::All,
        cdc_config::Acks::One => Acks::Leader,
        cdc_config::Acks::None => Acks::None,
    }
}

fn map_compression(compression: cdc_config::Compression) -> Compression {
    match compression {
        cdc_config::Compression::Snappy => Compression::Snappy,
        cdc_config::Compression::None => Compression::None,
    }
}
