//! Broker consumer (spec §4.6, component C6): pulls batches from a
//! consumer group with manual offset control.
//!
//! Grounded on `dashflow-streaming::kafka`'s `rdkafka` client-config
//! conventions (`BaseConsumer`/`Consumer` trait usage, security settings)
//! generalized to a consumer-group `StreamConsumer`, since the spec's
//! manual commit / pause / resume / seek surface matches `rdkafka`'s
//! native consumer-group API more directly than the teacher's own
//! single-partition `rskafka` consumer (which has no consumer-group
//! commit path at all).

use crate::error::{Error, Result};
use rdkafka::client::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::message::{Headers, Message};
use rdkafka::{Offset, TopicPartitionList};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tichain_core::DataPointBatch;
use tracing::{info, warn};

/// Bumps a generation counter on partition revocation so in-flight
/// batches consumed under a prior generation can detect that committing
/// their offset is no longer safe (spec §4.6: "on partition revocation,
/// in-flight batches must not commit").
#[derive(Default)]
struct RevocationContext {
    generation: Arc<AtomicU64>,
}

impl ClientContext for RevocationContext {}

impl ConsumerContext for RevocationContext {
    fn pre_rebalance(&self, rebalance: &Rebalance) {
        if let Rebalance::Revoke(_) = rebalance {
            self.generation.fetch_add(1, Ordering::SeqCst);
            warn!("consumer group rebalance: partitions revoked");
        }
    }

    fn post_rebalance(&self, rebalance: &Rebalance) {
        if let Rebalance::Assign(tpl) = rebalance {
            info!(partitions = tpl.count(), "consumer group rebalance: partitions assigned");
        }
    }
}

/// Configuration for the broker consumer.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub bootstrap_servers: String,
    pub topic: String,
    pub group_id: String,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            topic: crate::producer::DEFAULT_TOPIC.to_string(),
            group_id: "tichain-ingestion".to_string(),
        }
    }
}

/// Identifies the broker position of a consumed message, carried through
/// to `commit()` and, on failure, to the DLQ (spec §4.6).
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    generation: u64,
}

/// The chain entry headers attached by `BrokerProducer::publish_to`
/// (spec §4.5(e), §4.10 step 5b), read back so the consumer side can run
/// `IntegrityChain::validate` without a second round trip to the chain
/// store.
#[derive(Debug, Clone)]
pub struct ChainHeaders {
    pub sequence: u64,
    pub previous_hash: String,
    pub chain_hash: String,
}

fn parse_chain_headers(headers: &rdkafka::message::BorrowedHeaders<'_>) -> Option<ChainHeaders> {
    let pairs = (0..headers.count()).map(|i| {
        let header = headers.get(i);
        (header.key, header.value)
    });
    chain_headers_from_pairs(pairs)
}

/// Pure reassembly of [`ChainHeaders`] from `(key, value)` pairs, kept
/// separate from `rdkafka`'s header type so it is testable without a live
/// broker message.
fn chain_headers_from_pairs<'a>(
    pairs: impl Iterator<Item = (&'a str, Option<&'a [u8]>)>,
) -> Option<ChainHeaders> {
    let mut sequence = None;
    let mut previous_hash = None;
    let mut chain_hash = None;

    for (key, value) in pairs {
        let value = value.and_then(|v| std::str::from_utf8(v).ok());
        match (key, value) {
            ("sequence", Some(v)) => sequence = v.parse::<u64>().ok(),
            ("previous_hash", Some(v)) => previous_hash = Some(v.to_string()),
            ("chain_hash", Some(v)) => chain_hash = Some(v.to_string()),
            _ => {}
        }
    }

    Some(ChainHeaders {
        sequence: sequence?,
        previous_hash: previous_hash?,
        chain_hash: chain_hash?,
    })
}

/// Result of one `consume()` call.
pub enum ConsumeOutcome {
    /// A batch that deserialized successfully. `chain_headers` is `None`
    /// when the message carries no (or malformed) chain headers; chain
    /// validation is then skipped for this batch rather than blocking
    /// ingestion (spec §7: a validation failure "does not block
    /// ingestion").
    Batch {
        batch: DataPointBatch,
        context: MessageContext,
        chain_headers: Option<ChainHeaders>,
    },
    /// Deserialization failed; caller routes `raw_payload` to the DLQ and
    /// then commits the offset so the poison message is never redelivered
    /// (spec §4.10 step 2).
    DeserializationFailure {
        context: MessageContext,
        raw_payload: Vec<u8>,
        error: String,
    },
}

/// Pulls batches from the broker with manual offset control (spec §4.6).
pub struct BrokerConsumer {
    consumer: StreamConsumer<RevocationContext>,
    generation: Arc<AtomicU64>,
}

impl BrokerConsumer {
    pub fn new(bootstrap_servers: &str, topic: &str, group_id: &str) -> Result<Self> {
        Self::with_config(ConsumerConfig {
            bootstrap_servers: bootstrap_servers.to_string(),
            topic: topic.to_string(),
            group_id: group_id.to_string(),
        })
    }

    pub fn with_config(config: ConsumerConfig) -> Result<Self> {
        let generation = Arc::new(AtomicU64::new(0));
        let context = RevocationContext {
            generation: Arc::clone(&generation),
        };

        let consumer: StreamConsumer<RevocationContext> = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("group.id", &config.group_id)
            // Manual offset control (spec §4.6): we decide exactly when
            // an offset becomes visible to the group.
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .set("isolation.level", "read_committed")
            .create_with_context(context)
            .map_err(Error::Kafka)?;

        consumer.subscribe(&[&config.topic]).map_err(Error::Kafka)?;

        Ok(Self {
            consumer,
            generation,
        })
    }

    /// `Consume(timeout)`: returns `Ok(None)` on a poll timeout with no
    /// message, a `Batch` on success, or a `DeserializationFailure` with
    /// enough context to route the payload to the DLQ.
    pub async fn consume(&self, timeout: Duration) -> Result<Option<ConsumeOutcome>> {
        let result = tokio::time::timeout(timeout, self.consumer.recv()).await;
        let msg = match result {
            Err(_elapsed) => return Ok(None),
            Ok(Err(e)) => return Err(Error::Kafka(e)),
            Ok(Ok(msg)) => msg,
        };

        let context = MessageContext {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            generation: self.generation.load(Ordering::SeqCst),
        };
        let payload = msg.payload().unwrap_or_default();
        let chain_headers = msg.headers().and_then(parse_chain_headers);

        match serde_json::from_slice::<DataPointBatch>(payload) {
            Ok(batch) => Ok(Some(ConsumeOutcome::Batch {
                batch,
                context,
                chain_headers,
            })),
            Err(e) => Ok(Some(ConsumeOutcome::DeserializationFailure {
                context,
                raw_payload: payload.to_vec(),
                error: e.to_string(),
            })),
        }
    }

    /// `Commit(context)`: commits the offset one past the consumed
    /// message, synchronously. Refuses if the partition was revoked since
    /// the message was consumed (spec §4.6 revocation invariant).
    pub fn commit(&self, context: &MessageContext) -> Result<()> {
        if context.generation != self.generation.load(Ordering::SeqCst) {
            return Err(Error::PartitionRevoked);
        }

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &context.topic,
            context.partition,
            Offset::Offset(context.offset + 1),
        )
        .map_err(Error::Kafka)?;
        self.consumer
            .commit(&tpl, rdkafka::consumer::CommitMode::Sync)
            .map_err(Error::Kafka)
    }

    /// Pause consumption of all assigned partitions (back-pressure).
    pub fn pause(&self) -> Result<()> {
        let assignment = self.consumer.assignment().map_err(Error::Kafka)?;
        self.consumer.pause(&assignment).map_err(Error::Kafka)
    }

    /// Resume consumption of all assigned partitions.
    pub fn resume(&self) -> Result<()> {
        let assignment = self.consumer.assignment().map_err(Error::Kafka)?;
        self.consumer.resume(&assignment).map_err(Error::Kafka)
    }

    /// `Seek`: reposition a partition (used by the gap recovery
    /// controller when replaying from a known offset).
    pub fn seek(&self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        self.consumer
            .seek(
                topic,
                partition,
                Offset::Offset(offset),
                rdkafka::util::Timeout::After(Duration::from_secs(5)),
            )
            .map_err(Error::Kafka)
    }

    pub fn health_check(&self) -> Result<()> {
        self.consumer
            .fetch_metadata(None, Duration::from_secs(5))
            .map(|_| ())
            .map_err(Error::Kafka)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_earliest_reset_topology() {
        let config = ConsumerConfig::default();
        assert_eq!(config.topic, crate::producer::DEFAULT_TOPIC);
        assert_eq!(config.group_id, "tichain-ingestion");
    }

    #[test]
    fn chain_headers_parsed_when_all_present() {
        let pairs = vec![
            ("batch_id", Some(b"b1".as_slice())),
            ("sequence", Some(b"42".as_slice())),
            ("previous_hash", Some(b"abc".as_slice())),
            ("chain_hash", Some(b"def".as_slice())),
        ];
        let headers = chain_headers_from_pairs(pairs.into_iter()).unwrap();
        assert_eq!(headers.sequence, 42);
        assert_eq!(headers.previous_hash, "abc");
        assert_eq!(headers.chain_hash, "def");
    }

    #[test]
    fn chain_headers_missing_one_field_is_none() {
        let pairs = vec![
            ("sequence", Some(b"42".as_slice())),
            ("previous_hash", Some(b"abc".as_slice())),
        ];
        assert!(chain_headers_from_pairs(pairs.into_iter()).is_none());
    }

    #[test]
    fn chain_headers_non_numeric_sequence_is_none() {
        let pairs = vec![
            ("sequence", Some(b"not-a-number".as_slice())),
            ("previous_hash", Some(b"abc".as_slice())),
            ("chain_hash", Some(b"def".as_slice())),
        ];
        assert!(chain_headers_from_pairs(pairs.into_iter()).is_none());
    }
}
