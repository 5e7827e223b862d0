//! Top-level application configuration (spec §10.4): one `AppConfig`
//! built once from the environment, never a process-wide mutable
//! singleton. Every subcommand that touches live infrastructure builds
//! its dependencies from the same `AppConfig::from_env()`.

use crate::env_vars as ev;
use std::time::Duration;
use tichain_broker::producer::{DEFAULT_BACKFILL_TOPIC, DEFAULT_DLQ_TOPIC, DEFAULT_TOPIC};
use tichain_pipeline::{PipelineConfig, RecoveryConfig};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub kafka_bootstrap_servers: String,
    pub kafka_consumer_group: String,
    pub kafka_topic: String,
    pub kafka_dlq_topic: String,
    pub kafka_backfill_topic: String,
    pub postgres_url: String,
    pub redis_idempotency_url: String,
    pub redis_cache_url: String,
    pub clickhouse_url: String,
    pub clickhouse_database: String,
    pub shadow_db_path: String,
    pub chain_db_path: String,
    pub health_port: u16,
    pub pid_file: String,
    pub log_json: bool,
    pub log_filter: Option<String>,
}

impl AppConfig {
    /// Single construction path (spec §10.4), used by every subcommand
    /// and overridden field-by-field in tests.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            kafka_bootstrap_servers: ev::env_string_or_default(ev::KAFKA_BOOTSTRAP_SERVERS, "localhost:9092"),
            kafka_consumer_group: ev::env_string_or_default(ev::KAFKA_CONSUMER_GROUP, "tichain-pipeline"),
            kafka_topic: ev::env_string_or_default(ev::KAFKA_TOPIC, DEFAULT_TOPIC),
            kafka_dlq_topic: ev::env_string_or_default(ev::KAFKA_DLQ_TOPIC, DEFAULT_DLQ_TOPIC),
            kafka_backfill_topic: ev::env_string_or_default(ev::KAFKA_BACKFILL_TOPIC, DEFAULT_BACKFILL_TOPIC),
            postgres_url: ev::env_string_or_default(
                ev::POSTGRES_URL,
                "host=localhost user=tichain password=tichain dbname=tichain",
            ),
            redis_idempotency_url: ev::env_string_or_default(ev::REDIS_IDEMPOTENCY_URL, "redis://localhost:6379/0"),
            redis_cache_url: ev::env_string_or_default(ev::REDIS_CACHE_URL, "redis://localhost:6379/1"),
            clickhouse_url: ev::env_string_or_default(ev::CLICKHOUSE_URL, "http://localhost:8123"),
            clickhouse_database: ev::env_string_or_default(ev::CLICKHOUSE_DATABASE, "tichain"),
            shadow_db_path: ev::env_string_or_default(ev::SHADOW_DB_PATH, "tichain-shadow.sqlite"),
            chain_db_path: ev::env_string_or_default(ev::CHAIN_DB_PATH, "tichain-chain.sqlite"),
            health_port: ev::env_u16_or_default(ev::HEALTH_PORT, 8080),
            pid_file: ev::env_string_or_default(ev::PID_FILE, "tichain.pid"),
            log_json: ev::env_bool_or_default(ev::LOG_JSON, false),
            log_filter: std::env::var(ev::LOG_FILTER).ok(),
        }
    }

    #[must_use]
    pub fn health_url(&self) -> String {
        format!("http://127.0.0.1:{}/healthz", self.health_port)
    }

    #[must_use]
    pub fn metrics_url(&self) -> String {
        format!("http://127.0.0.1:{}/metrics", self.health_port)
    }

    #[must_use]
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            consumer_id: self.kafka_consumer_group.clone(),
            ..PipelineConfig::default()
        }
    }

    #[must_use]
    pub fn recovery_config(&self) -> RecoveryConfig {
        RecoveryConfig {
            replay_topic: self.kafka_backfill_topic.clone(),
            ..RecoveryConfig::default()
        }
    }

    #[must_use]
    pub fn dlq_send_timeout(&self) -> Duration {
        Duration::from_secs(5)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_localhost() {
        let config = AppConfig {
            kafka_bootstrap_servers: "localhost:9092".to_string(),
            ..AppConfig::from_env()
        };
        assert_eq!(config.kafka_bootstrap_servers, "localhost:9092");
        assert!(config.health_url().starts_with("http://127.0.0.1:"));
    }
}
