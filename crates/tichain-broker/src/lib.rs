//! Durable broker producer/consumer and dead-letter queue (spec §4.5,
//! §4.6, components C5, C6) for the temporal integrity chain platform.

pub mod consumer;
pub mod dlq;
pub mod error;
pub mod producer;
pub mod topics;

pub use consumer::{BrokerConsumer, ChainHeaders, ConsumeOutcome, ConsumerConfig, MessageContext};
pub use dlq::{DlqHandler, DlqMessage};
pub use error::{Error, Result};
pub use producer::{BrokerProducer, ProducerConfig, RetryConfig};
pub use topics::{create_topic, TopicConfig};
