//! Dead-letter queue handling (spec §4.6, §4.10 step 2): messages that
//! fail deserialization or permanent-classified processing are sent here
//! with full forensic context.
//!
//! Grounded on `dashflow-streaming::dlq::{DlqMessage, DlqHandler}`: a
//! base64-encoded original payload, a sha256 of the full (possibly
//! truncated) payload, and structured error context, sent fire-and-forget
//! under a semaphore so a DLQ outage cannot backpressure the hot path.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, warn};
use uuid::Uuid;

/// Bound on the payload stored inline in a DLQ message; larger payloads
/// are truncated and carry a sha256 of the full payload for forensics.
const MAX_ORIGINAL_PAYLOAD_BYTES: usize = 512 * 1024;

/// Maximum number of fire-and-forget DLQ sends in flight at once.
const DEFAULT_MAX_CONCURRENT_DLQ_SENDS: usize = 100;

/// A failed message preserved for forensic analysis and potential replay
/// (spec §4.6: "emits a failed-context carrying topic/partition/offset").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqMessage {
    pub original_payload_base64: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_payload_size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_payload_truncated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_payload_sha256: Option<String>,
    pub error: String,
    pub source_topic: String,
    pub source_partition: i32,
    pub source_offset: i64,
    pub occurred_at: String,
    pub consumer_id: String,
    pub error_type: String,
    pub trace_id: String,
}

impl DlqMessage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        original_payload: &[u8],
        error: impl Into<String>,
        source_topic: impl Into<String>,
        source_partition: i32,
        source_offset: i64,
        consumer_id: impl Into<String>,
        error_type: impl Into<String>,
    ) -> Self {
        let full_len = original_payload.len();
        let (to_encode, truncated) = if full_len > MAX_ORIGINAL_PAYLOAD_BYTES {
            (&original_payload[..MAX_ORIGINAL_PAYLOAD_BYTES], true)
        } else {
            (original_payload, false)
        };

        let (size_bytes, truncated_flag, sha256) = if truncated {
            let mut hasher = Sha256::new();
            hasher.update(original_payload);
            (
                Some(full_len as u64),
                Some(true),
                Some(hex::encode(hasher.finalize())),
            )
        } else {
            (None, None, None)
        };

        Self {
            original_payload_base64: BASE64.encode(to_encode),
            original_payload_size_bytes: size_bytes,
            original_payload_truncated: truncated_flag,
            original_payload_sha256: sha256,
            error: error.into(),
            source_topic: source_topic.into(),
            source_partition,
            source_offset,
            occurred_at: chrono::Utc::now().to_rfc3339(),
            consumer_id: consumer_id.into(),
            error_type: error_type.into(),
            trace_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.original_payload_truncated == Some(true)
    }
}

/// Sends failed messages to the configured DLQ topic, with a semaphore
/// bounding concurrent fire-and-forget sends so a DLQ outage cannot cause
/// unbounded task growth on the hot path.
pub struct DlqHandler {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
    send_semaphore: Arc<Semaphore>,
}

impl DlqHandler {
    pub fn new(producer: FutureProducer, topic: impl Into<String>, timeout: Duration) -> Self {
        Self {
            producer,
            topic: topic.into(),
            timeout,
            send_semaphore: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT_DLQ_SENDS)),
        }
    }

    /// Builds a standalone handler with its own producer client, for
    /// callers (the ingestion pipeline's consume-side DLQ routing) that
    /// are not already holding a [`crate::producer::BrokerProducer`].
    pub fn connect(bootstrap_servers: &str, topic: &str, timeout: Duration) -> crate::error::Result<Self> {
        let producer: FutureProducer = rdkafka::config::ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .create()
            .map_err(crate::error::Error::Kafka)?;
        Ok(Self::new(producer, topic, timeout))
    }

    /// Send and wait for the broker ack.
    pub async fn send(&self, message: &DlqMessage) -> crate::error::Result<()> {
        let payload = serde_json::to_string(message)?;
        let record = FutureRecord::to(&self.topic)
            .payload(&payload)
            .key(&message.trace_id);
        self.producer
            .send(record, Timeout::After(self.timeout))
            .await
            .map(|_| ())
            .map_err(|(e, _)| crate::error::Error::DlqSendFailed(e.to_string()))
    }

    /// Fire-and-forget send, dropped under backpressure rather than
    /// blocking or spawning unboundedly.
    pub fn send_fire_and_forget(&self, message: DlqMessage) {
        let Ok(permit) = Arc::clone(&self.send_semaphore).try_acquire_owned() else {
            warn!(trace_id = %message.trace_id, "dropping DLQ message: backpressure limit reached");
            return;
        };

        let producer = self.producer.clone();
        let topic = self.topic.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            let _permit = permit;
            let payload = match serde_json::to_string(&message) {
                Ok(p) => p,
                Err(e) => {
                    error!(error = %e, "failed to serialize DLQ message");
                    return;
                }
            };
            let record = FutureRecord::to(&topic)
                .payload(&payload)
                .key(&message.trace_id);
            if let Err((e, _)) = producer.send(record, Timeout::After(timeout)).await {
                error!(trace_id = %message.trace_id, error = %e, "DLQ send failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_payload_is_not_truncated() {
        let msg = DlqMessage::new(b"hello", "decode error", "datapoints", 0, 42, "consumer-1", "decode_error");
        assert!(!msg.is_truncated());
        assert_eq!(msg.source_offset, 42);
    }

    #[test]
    fn oversized_payload_is_truncated_and_hashed() {
        let payload = vec![7u8; MAX_ORIGINAL_PAYLOAD_BYTES + 10];
        let msg = DlqMessage::new(&payload, "oops", "datapoints", 0, 1, "c", "decode_error");
        assert!(msg.is_truncated());
        assert!(msg.original_payload_sha256.is_some());
        assert_eq!(msg.original_payload_size_bytes, Some(payload.len() as u64));
    }
}
