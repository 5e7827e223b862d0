use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use thiserror::Error;
use tichain_core::Classify;

/// Errors from the broker producer, consumer, and DLQ (components C5, C6).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    #[error("kafka client error: {0}")]
    Kafka(#[from] KafkaError),

    #[error("kafka send failed after {attempts} attempts: {source}")]
    SendFailed {
        attempts: u32,
        #[source]
        source: KafkaError,
    },

    #[error("message exceeds maximum size {max} bytes: {actual} bytes")]
    MessageTooLarge { actual: usize, max: usize },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("dead-letter queue send failed: {0}")]
    DlqSendFailed(String),

    #[error("consumer is not subscribed to any partitions")]
    NotSubscribed,

    #[error("invalid topic configuration: {0}")]
    InvalidTopicConfig(String),

    #[error("partitions were revoked before the in-flight batch could commit")]
    PartitionRevoked,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Classifies a raw `rdkafka` error as retryable by matching the small,
/// fixed set of broker-transport error codes that a retry can plausibly
/// resolve, rather than substring-matching the error's `Display` text
/// (spec §9 REDESIGN FLAG).
fn is_retryable_kafka_error(err: &KafkaError) -> bool {
    let code = match err {
        KafkaError::MessageProduction(code) | KafkaError::MessageConsumption(code) => Some(*code),
        KafkaError::Global(code) => Some(*code),
        _ => None,
    };
    matches!(
        code,
        Some(
            RDKafkaErrorCode::AllBrokersDown
                | RDKafkaErrorCode::OperationTimedOut
                | RDKafkaErrorCode::RequestTimedOut
                | RDKafkaErrorCode::BrokerTransportFailure
                | RDKafkaErrorCode::NetworkException
                | RDKafkaErrorCode::NotLeaderForPartition
                | RDKafkaErrorCode::LeaderNotAvailable
        )
    )
}

impl Classify for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Kafka(e) => is_retryable_kafka_error(e),
            Error::SendFailed { source, .. } => is_retryable_kafka_error(source),
            // A revoked partition isn't retried by us; the rebalanced
            // consumer will receive the redelivery, but the caller must
            // not commit or otherwise treat this batch as processed.
            Error::PartitionRevoked => true,
            Error::MessageTooLarge { .. }
            | Error::Serialization(_)
            | Error::DlqSendFailed(_)
            | Error::NotSubscribed
            | Error::InvalidTopicConfig(_) => false,
        }
    }
}
