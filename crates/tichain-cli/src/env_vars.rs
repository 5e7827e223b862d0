//! Centralized environment variable names and typed helpers, mirroring
//! `dashflow-streaming::env_vars` (spec §10.4: "env vars with typed
//! accessors ... falling back to documented defaults").

pub const KAFKA_BOOTSTRAP_SERVERS: &str = "TICHAIN_KAFKA_BOOTSTRAP_SERVERS";
pub const KAFKA_CONSUMER_GROUP: &str = "TICHAIN_KAFKA_CONSUMER_GROUP";
pub const KAFKA_TOPIC: &str = "TICHAIN_KAFKA_TOPIC";
pub const KAFKA_DLQ_TOPIC: &str = "TICHAIN_KAFKA_DLQ_TOPIC";
pub const KAFKA_BACKFILL_TOPIC: &str = "TICHAIN_KAFKA_BACKFILL_TOPIC";

pub const POSTGRES_URL: &str = "TICHAIN_POSTGRES_URL";
pub const REDIS_IDEMPOTENCY_URL: &str = "TICHAIN_REDIS_IDEMPOTENCY_URL";
pub const REDIS_CACHE_URL: &str = "TICHAIN_REDIS_CACHE_URL";
pub const CLICKHOUSE_URL: &str = "TICHAIN_CLICKHOUSE_URL";
pub const CLICKHOUSE_DATABASE: &str = "TICHAIN_CLICKHOUSE_DATABASE";

pub const SHADOW_DB_PATH: &str = "TICHAIN_SHADOW_DB_PATH";
pub const CHAIN_DB_PATH: &str = "TICHAIN_CHAIN_DB_PATH";

pub const HEALTH_PORT: &str = "TICHAIN_HEALTH_PORT";
pub const PID_FILE: &str = "TICHAIN_PID_FILE";
pub const LOG_JSON: &str = "TICHAIN_LOG_JSON";
pub const LOG_FILTER: &str = "TICHAIN_LOG_FILTER";

#[must_use]
pub fn env_string_or_default(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[must_use]
pub fn env_u16_or_default(name: &str, default: u16) -> u16 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(default)
}

#[must_use]
pub fn env_bool_or_default(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_default_used_when_unset() {
        std::env::remove_var("TICHAIN_TEST_STRING_UNSET");
        assert_eq!(
            env_string_or_default("TICHAIN_TEST_STRING_UNSET", "fallback"),
            "fallback"
        );
    }

    #[test]
    fn u16_falls_back_on_invalid_value() {
        std::env::set_var("TICHAIN_TEST_U16_INVALID", "not-a-port");
        assert_eq!(env_u16_or_default("TICHAIN_TEST_U16_INVALID", 9000), 9000);
        std::env::remove_var("TICHAIN_TEST_U16_INVALID");
    }

    #[test]
    fn bool_parses_true_and_false() {
        std::env::set_var("TICHAIN_TEST_BOOL", "true");
        assert!(env_bool_or_default("TICHAIN_TEST_BOOL", false));
        std::env::set_var("TICHAIN_TEST_BOOL", "false");
        assert!(!env_bool_or_default("TICHAIN_TEST_BOOL", true));
        std::env::remove_var("TICHAIN_TEST_BOOL");
    }
}
