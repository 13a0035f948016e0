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

//! Configuration for the CDC pipeline: an optional YAML file merged with
//! environment variables (environment wins), then validated once at
//! construction. Nothing in this crate mutates a `Config` after
//! [`Config::load`] returns it.

use std::{collections::HashMap, env, fs::File, io::BufReader, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Errors that can occur while loading or validating the configuration.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The configuration file could not be read or parsed.
    #[error("invalid configuration file `{file}` - {message}")]
    InvalidFile {
        /// The path to the config file.
        file: String,
        /// The underlying parse error.
        message: String,
    },

    /// A required field was missing from both the file and the environment.
    #[error("missing required configuration value `{field}`")]
    MissingField {
        /// The dotted field path, e.g. `source.uri`.
        field: String,
    },

    /// A value failed its validation constraints.
    #[error("invalid configuration (reason: {message})")]
    Invalid {
        /// A human-readable description of every failed constraint.
        message: String,
    },

    /// An environment variable could not be parsed as the expected type.
    #[error("environment variable `{var}` has an invalid value: {message}")]
    InvalidEnvVar {
        /// The environment variable name.
        var: String,
        /// The parse error message.
        message: String,
    },
}

/// MongoDB source connection settings.
#[derive(Serialize, Deserialize, Validate, Debug, Clone, PartialEq)]
pub struct SourceConfig {
    /// Connection URI of the source deployment.
    pub uri: String,
    /// Database holding the watched collection.
    pub database: String,
    /// Name of the watched collection.
    pub collection: String,
    /// Server-side batch size used for both the snapshot cursor and the
    /// change-stream cursor.
    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1))]
    pub batch_size: u32,
    /// Minimum size of the connection pool.
    #[serde(default = "default_pool_min")]
    pub pool_min: u32,
    /// Maximum size of the connection pool.
    #[serde(default = "default_pool_max")]
    #[validate(range(min = 1))]
    pub pool_max: u32,
    /// Connection timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Socket read timeout in milliseconds.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_batch_size() -> u32 {
    1000
}
fn default_pool_min() -> u32 {
    1
}
fn default_pool_max() -> u32 {
    10
}
fn default_connect_timeout_ms() -> u64 {
    30_000
}
fn default_read_timeout_ms() -> u64 {
    30_000
}

impl SourceConfig {
    /// Returns the configured connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Returns the configured read timeout as a [`Duration`].
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Acknowledgement levels accepted for the Kafka producer, mirrored from
/// the broker's own `acks` setting.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Acks {
    /// Wait for every in-sync replica to acknowledge.
    All,
    /// Wait only for the partition leader.
    One,
    /// Do not wait for any acknowledgement.
    None,
}

impl Default for Acks {
    fn default() -> Self {
        Acks::All
    }
}

/// Compression codec applied by the Kafka producer.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Snappy compression.
    Snappy,
    /// No compression.
    None,
}

impl Default for Compression {
    fn default() -> Self {
        Compression::Snappy
    }
}

/// Kafka egress settings.
#[derive(Serialize, Deserialize, Validate, Debug, Clone, PartialEq)]
pub struct LogConfig {
    /// Comma-separated list of broker addresses.
    pub bootstrap: String,
    /// Destination topic.
    pub topic: String,
    /// Client id advertised to the broker.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Maximum size in bytes of a single produce request.
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: u32,
    /// Required acknowledgement level.
    #[serde(default)]
    pub acks: Acks,
    /// Maximum number of records accumulated before a flush is forced.
    #[serde(default = "default_egress_batch_count")]
    #[validate(range(min = 1))]
    pub egress_batch_count: usize,
    /// Producer linger, in milliseconds, before a batch is sent.
    #[serde(default = "default_linger_ms")]
    #[validate(range(min = 0, max = 5))]
    pub linger_ms: u64,
    /// Compression codec.
    #[serde(default)]
    pub compression: Compression,
    /// Whether the idempotent producer is enabled.
    #[serde(default = "default_idempotent")]
    pub idempotent: bool,
}

fn default_client_id() -> String {
    "mongo-kafka-cdc".to_string()
}
fn default_max_request_bytes() -> u32 {
    1024 * 1024
}
fn default_egress_batch_count() -> usize {
    100
}
fn default_linger_ms() -> u64 {
    0
}
fn default_idempotent() -> bool {
    true
}

/// Pipeline-wide behavioral settings.
#[derive(Serialize, Deserialize, Validate, Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Whether the bulk snapshot phase runs before tailing.
    #[serde(default = "default_snapshot_enabled")]
    pub snapshot_enabled: bool,
    /// Whether to force a snapshot even if external orchestration believes
    /// one already completed. The core itself keeps no completion marker
    /// (see spec §4.4); this flag is read only by the assembly layer.
    #[serde(default)]
    pub snapshot_force: bool,
    /// Port for the `/health` and `/ready` HTTP endpoints.
    #[serde(default = "default_health_port")]
    pub health_port: u16,
    /// Maximum retry attempts applied by the circuit breaker's callers.
    #[serde(default = "default_retry_max_attempts")]
    #[validate(range(min = 1))]
    pub retry_max_attempts: u32,
    /// Backoff between retry attempts, in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_snapshot_enabled() -> bool {
    true
}
fn default_health_port() -> u16 {
    8080
}
fn default_retry_max_attempts() -> u32 {
    5
}
fn default_retry_backoff_ms() -> u64 {
    1000
}

/// Resume-cursor store settings. Exactly one backing is selected at
/// assembly time: remote when both AWS credentials are non-empty,
/// local otherwise (spec §6).
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CursorConfig {
    /// Path to the local cursor file, used when the remote backing is not
    /// selected.
    #[serde(default = "default_local_path")]
    pub local_path: String,
    /// S3 bucket holding the cursor object.
    #[serde(default = "default_remote_bucket")]
    pub remote_bucket: String,
    /// S3 key of the cursor object.
    #[serde(default = "default_remote_key")]
    pub remote_key: String,
    /// AWS region for the remote backing.
    pub region: Option<String>,
    /// AWS access key id. Presence (together with the secret key) selects
    /// the remote backing.
    pub aws_access_key_id: Option<String>,
    /// AWS secret access key.
    pub aws_secret_access_key: Option<String>,
}

fn default_local_path() -> String {
    "./resume-token.json".to_string()
}
fn default_remote_bucket() -> String {
    "mongo-kafka-cdc-tokens".to_string()
}
fn default_remote_key() -> String {
    "resume-token.json".to_string()
}

impl CursorConfig {
    /// Returns `true` when the remote (object-store) cursor backing
    /// should be used instead of the local filesystem.
    pub fn use_remote_backing(&self) -> bool {
        non_empty(&self.aws_access_key_id) && non_empty(&self.aws_secret_access_key)
    }
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}

/// The fully resolved, validated pipeline configuration. Immutable once
/// built; nothing in this crate or its callers mutates it afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Source connection settings.
    pub source: SourceConfig,
    /// Kafka egress settings.
    pub log: LogConfig,
    /// Pipeline-wide behavioral settings.
    pub pipeline: RunConfig,
    /// Resume-cursor store settings.
    pub cursor: CursorConfig,
}

/// The on-disk / pre-override shape of the configuration file. All
/// sections are optional in the file; missing sections fall back to
/// their field-level defaults once env overrides are applied.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
struct FileConfig {
    source: Option<PartialSource>,
    log: Option<PartialLog>,
    pipeline: Option<PartialRun>,
    cursor: Option<PartialCursor>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
struct PartialSource {
    uri: Option<String>,
    database: Option<String>,
    collection: Option<String>,
    batch_size: Option<u32>,
    pool_min: Option<u32>,
    pool_max: Option<u32>,
    connect_timeout_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
struct PartialLog {
    bootstrap: Option<String>,
    topic: Option<String>,
    client_id: Option<String>,
    max_request_bytes: Option<u32>,
    acks: Option<Acks>,
    egress_batch_count: Option<usize>,
    linger_ms: Option<u64>,
    compression: Option<Compression>,
    idempotent: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
struct PartialRun {
    snapshot_enabled: Option<bool>,
    snapshot_force: Option<bool>,
    health_port: Option<u16>,
    retry_max_attempts: Option<u32>,
    retry_backoff_ms: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
struct PartialCursor {
    local_path: Option<String>,
    remote_bucket: Option<String>,
    remote_key: Option<String>,
    region: Option<String>,
}

/// Overrides read from the process environment (spec §6's env-var table).
/// Never read anywhere but here; the rest of the pipeline only ever sees
/// a resolved [`Config`].
#[derive(Debug, Clone, Default)]
struct EnvOverrides {
    vars: HashMap<&'static str, String>,
}

const ENV_VARS: &[&str] = &[
    "MONGODB_URI",
    "MONGODB_DATABASE",
    "MONGODB_COLLECTION",
    "MONGODB_BATCH_SIZE",
    "MONGODB_MAX_POOL_SIZE",
    "MONGODB_MIN_POOL_SIZE",
    "RESUME_TOKEN_PATH",
    "RESUME_TOKEN_BUCKET",
    "RESUME_TOKEN_KEY",
    "KAFKA_BOOTSTRAP_SERVERS",
    "KAFKA_TOPIC",
    "KAFKA_CLIENT_ID",
    "KAFKA_MAX_REQUEST_SIZE",
    "KAFKA_ACKS",
    "KAFKA_BATCH_SIZE",
    "INITIAL_LOAD_ENABLED",
    "INITIAL_LOAD_FORCE",
    "HEALTH_PORT",
    "RETRY_MAX_ATTEMPTS",
    "RETRY_BACKOFF_MS",
    "AWS_REGION",
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
];

impl EnvOverrides {
    fn from_process_env() -> Self {
        let mut vars = HashMap::new();
        for name in ENV_VARS {
            if let Ok(value) = env::var(name) {
                let _ = vars.insert(*name, value);
            }
        }
        Self { vars }
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    fn parse<T>(&self, name: &'static str) -> Result<Option<T>, Error>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            Some(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|err| Error::InvalidEnvVar {
                    var: name.to_string(),
                    message: err.to_string(),
                }),
            None => Ok(None),
        }
    }
}

impl Config {
    /// Loads configuration from an optional YAML file merged with process
    /// environment variables (environment wins), then validates the
    /// result. `file_path` may point to a nonexistent path only when
    /// every required field is supplied via the environment.
    pub fn load(file_path: Option<&Path>) -> Result<Self, Error> {
        let file_config = match file_path {
            Some(path) if path.exists() => {
                tracing::debug!(file = %path.display(), "loading configuration file");
                read_file(path)?
            }
            _ => FileConfig::default(),
        };

        let env = EnvOverrides::from_process_env();
        let config = merge(file_config, &env)?;

        config
            .source
            .validate()
            .and_then(|()| config.log.validate())
            .and_then(|()| config.pipeline.validate())
            .map_err(|err| Error::Invalid {
                message: err.to_string(),
            })?;

        if config.source.uri.is_empty() {
            return Err(Error::MissingField {
                field: "source.uri".to_string(),
            });
        }
        if config.log.bootstrap.is_empty() {
            return Err(Error::MissingField {
                field: "log.bootstrap".to_string(),
            });
        }
        if config.log.topic.is_empty() {
            return Err(Error::MissingField {
                field: "log.topic".to_string(),
            });
        }

        Ok(config)
    }
}

fn read_file(path: &Path) -> Result<FileConfig, Error> {
    let file = File::open(path).map_err(|err| Error::InvalidFile {
        file: path.display().to_string(),
        message: err.to_string(),
    })?;
    let reader = BufReader::new(file);
    serde_yaml::from_reader(reader).map_err(|err| Error::InvalidFile {
        file: path.display().to_string(),
        message: err.to_string(),
    })
}

fn merge(file: FileConfig, env: &EnvOverrides) -> Result<Config, Error> {
    let source_partial = file.source.unwrap_or_default();
    let source = SourceConfig {
        uri: env
            .get("MONGODB_URI")
            .map(str::to_string)
            .or(source_partial.uri)
            .unwrap_or_default(),
        database: env
            .get("MONGODB_DATABASE")
            .map(str::to_string)
            .or(source_partial.database)
            .unwrap_or_default(),
        collection: env
            .get("MONGODB_COLLECTION")
            .map(str::to_string)
            .or(source_partial.collection)
            .unwrap_or_default(),
        batch_size: env
            .parse("MONGODB_BATCH_SIZE")?
            .or(source_partial.batch_size)
            .unwrap_or_else(default_batch_size),
        pool_min: env
            .parse("MONGODB_MIN_POOL_SIZE")?
            .or(source_partial.pool_min)
            .unwrap_or_else(default_pool_min),
        pool_max: env
            .parse("MONGODB_MAX_POOL_SIZE")?
            .or(source_partial.pool_max)
            .unwrap_or_else(default_pool_max),
        connect_timeout_ms: source_partial
            .connect_timeout_ms
            .unwrap_or_else(default_connect_timeout_ms),
        read_timeout_ms: source_partial
            .read_timeout_ms
            .unwrap_or_else(default_read_timeout_ms),
    };

    let log_partial = file.log.unwrap_or_default();
    let log = LogConfig {
        bootstrap: env
            .get("KAFKA_BOOTSTRAP_SERVERS")
            .map(str::to_string)
            .or(log_partial.bootstrap)
            .unwrap_or_default(),
        topic: env
            .get("KAFKA_TOPIC")
            .map(str::to_string)
            .or(log_partial.topic)
            .unwrap_or_default(),
        client_id: env
            .get("KAFKA_CLIENT_ID")
            .map(str::to_string)
            .or(log_partial.client_id)
            .unwrap_or_else(default_client_id),
        max_request_bytes: env
            .parse("KAFKA_MAX_REQUEST_SIZE")?
            .or(log_partial.max_request_bytes)
            .unwrap_or_else(default_max_request_bytes),
        acks: env
            .get("KAFKA_ACKS")
            .and_then(parse_acks)
            .or(log_partial.acks)
            .unwrap_or_default(),
        egress_batch_count: env
            .parse("KAFKA_BATCH_SIZE")?
            .or(log_partial.egress_batch_count)
            .unwrap_or_else(default_egress_batch_count),
        linger_ms: log_partial.linger_ms.unwrap_or_else(default_linger_ms),
        compression: log_partial.compression.unwrap_or_default(),
        idempotent: log_partial.idempotent.unwrap_or_else(default_idempotent),
    };

    let run_partial = file.pipeline.unwrap_or_default();
    let pipeline = RunConfig {
        snapshot_enabled: env
            .parse("INITIAL_LOAD_ENABLED")?
            .or(run_partial.snapshot_enabled)
            .unwrap_or_else(default_snapshot_enabled),
        snapshot_force: env
            .parse("INITIAL_LOAD_FORCE")?
            .or(run_partial.snapshot_force)
            .unwrap_or_default(),
        health_port: env
            .parse("HEALTH_PORT")?
            .or(run_partial.health_port)
            .unwrap_or_else(default_health_port),
        retry_max_attempts: env
            .parse("RETRY_MAX_ATTEMPTS")?
            .or(run_partial.retry_max_attempts)
            .unwrap_or_else(default_retry_max_attempts),
        retry_backoff_ms: env
            .parse("RETRY_BACKOFF_MS")?
            .or(run_partial.retry_backoff_ms)
            .unwrap_or_else(default_retry_backoff_ms),
    };

    let cursor_partial = file.cursor.unwrap_or_default();
    let cursor = CursorConfig {
        local_path: env
            .get("RESUME_TOKEN_PATH")
            .map(str::to_string)
            .or(cursor_partial.local_path)
            .unwrap_or_else(default_local_path),
        remote_bucket: env
            .get("RESUME_TOKEN_BUCKET")
            .map(str::to_string)
            .or(cursor_partial.remote_bucket)
            .unwrap_or_else(default_remote_bucket),
        remote_key: env
            .get("RESUME_TOKEN_KEY")
            .map(str::to_string)
            .or(cursor_partial.remote_key)
            .unwrap_or_else(default_remote_key),
        region: env
            .get("AWS_REGION")
            .map(str::to_string)
            .or(cursor_partial.region),
        aws_access_key_id: env.get("AWS_ACCESS_KEY_ID").map(str::to_string),
        aws_secret_access_key: env.get("AWS_SECRET_ACCESS_KEY").map(str::to_string),
    };

    Ok(Config {
        source,
        log,
        pipeline,
        cursor,
    })
}

fn parse_acks(raw: &str) -> Option<Acks> {
    match raw {
        "all" => Some(Acks::All),
        "1" | "one" => Some(Acks::One),
        "0" | "none" => Some(Acks::None),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use std::{env, sync::Mutex};

    use super::*;

    // Every test in this module mutates process-global environment
    // variables; this keeps them from interleaving under the default
    // parallel test runner.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for name in ENV_VARS {
            env::remove_var(name);
        }
    }

    #[test]
    fn defaults_fill_in_missing_sections() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("MONGODB_URI", "mongodb://localhost:27017");
        env::set_var("MONGODB_DATABASE", "app");
        env::set_var("MONGODB_COLLECTION", "orders");
        env::set_var("KAFKA_BOOTSTRAP_SERVERS", "localhost:9092");
        env::set_var("KAFKA_TOPIC", "orders-cdc");

        let config = Config::load(None).expect("config should load");

        assert_eq!(config.source.batch_size, 1000);
        assert_eq!(config.log.egress_batch_count, 100);
        assert!(config.pipeline.snapshot_enabled);
        assert!(!config.cursor.use_remote_backing());
        clear_env();
    }

    #[test]
    fn env_overrides_file() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("MONGODB_URI", "mongodb://env-host:27017");
        env::set_var("MONGODB_DATABASE", "app");
        env::set_var("MONGODB_COLLECTION", "orders");
        env::set_var("KAFKA_BOOTSTRAP_SERVERS", "localhost:9092");
        env::set_var("KAFKA_TOPIC", "orders-cdc");

        let file = FileConfig {
            source: Some(PartialSource {
                uri: Some("mongodb://file-host:27017".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let env = EnvOverrides::from_process_env();
        let config = merge(file, &env).expect("merge should succeed");

        assert_eq!(config.source.uri, "mongodb://env-host:27017");
        clear_env();
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let result = Config::load(None);
        assert!(matches!(result, Err(Error::MissingField { .. })));
    }

    #[test]
    fn aws_credentials_select_remote_backing() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("MONGODB_URI", "mongodb://localhost:27017");
        env::set_var("MONGODB_DATABASE", "app");
        env::set_var("MONGODB_COLLECTION", "orders");
        env::set_var("KAFKA_BOOTSTRAP_SERVERS", "localhost:9092");
        env::set_var("KAFKA_TOPIC", "orders-cdc");
        env::set_var("AWS_ACCESS_KEY_ID", "AKIA...");
        env::set_var("AWS_SECRET_ACCESS_KEY", "secret");

        let config = Config::load(None).expect("config should load");
        assert!(config.cursor.use_remote_backing());
        clear_env();
    }

    #[test]
    fn invalid_egress_batch_count_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("MONGODB_URI", "mongodb://localhost:27017");
        env::set_var("MONGODB_DATABASE", "app");
        env::set_var("MONGODB_COLLECTION", "orders");
        env::set_var("KAFKA_BOOTSTRAP_SERVERS", "localhost:9092");
        env::set_var("KAFKA_TOPIC", "orders-cdc");
        env::set_var("KAFKA_BATCH_SIZE", "0");

        let result = Config::load(None);
        assert!(matches!(result, Err(Error::Invalid { .. })));
        clear_env();
    }
}
