//! Production [`LogClient`] backed by `rdkafka`'s async producer.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    error::KafkaError,
    producer::{FutureProducer, FutureRecord},
    util::Timeout,
};

use crate::{DeliveryReport, Error, LogClient, Record};

/// Acknowledgement mode, mirrored from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acks {
    /// No acknowledgement required.
    None,
    /// Leader acknowledgement only.
    Leader,
    /// Full in-sync-replica-set acknowledgement.
    All,
}

impl Acks {
    fn as_str(self) -> &'static str {
        match self {
            Acks::None => "0",
            Acks::Leader => "1",
            Acks::All => "all",
        }
    }
}

/// Compression codec, mirrored from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// No compression.
    None,
    /// Snappy compression.
    Snappy,
}

impl Compression {
    fn as_str(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Snappy => "snappy",
        }
    }
}

/// A [`LogClient`] over a single `rdkafka::producer::FutureProducer`,
/// always configured with idempotent-producer semantics (spec.md §4.2).
pub struct RdKafkaLogClient {
    producer: FutureProducer,
    send_timeout: Duration,
}

impl RdKafkaLogClient {
    /// Builds a producer against `bootstrap_servers`, applying the
    /// configured client id, acks, max request size, linger, and
    /// compression.
    pub fn connect(
        bootstrap_servers: &str,
        client_id: &str,
        acks: Acks,
        max_request_bytes: u32,
        linger_ms: u32,
        compression: Compression,
        send_timeout: Duration,
    ) -> Result<Self, Error> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("client.id", client_id)
            .set("enable.idempotence", "true")
            .set("acks", acks.as_str())
            .set("message.max.bytes", max_request_bytes.to_string())
            .set("linger.ms", linger_ms.to_string())
            .set("compression.type", compression.as_str())
            .create()
            .map_err(|err: KafkaError| Error::Connection {
                reason: err.to_string(),
            })?;

        Ok(Self {
            producer,
            send_timeout,
        })
    }
}

#[async_trait]
impl LogClient for RdKafkaLogClient {
    async fn send(&self, topic: &str, record: Record) -> Result<DeliveryReport, Error> {
        let future_record = FutureRecord::to(topic).key(&record.key).payload(&record.payload);

        match self.producer.send(future_record, Timeout::After(self.send_timeout)).await {
            Ok((partition, offset)) => Ok(DeliveryReport {
                topic: topic.to_string(),
                partition,
                offset,
            }),
            Err((err, _owned_message)) => Err(Error::Delivery {
                reason: err.to_string(),
            }),
        }
    }

    async fn close(&self) -> Result<(), Error> {
        self.producer
            .flush(self.send_timeout)
            .map_err(|err| Error::Close {
                reason: err.to_string(),
            })
    }
}
