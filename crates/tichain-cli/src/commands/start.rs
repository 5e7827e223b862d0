//! `tichain start`: runs the ingestion pipeline, the gap recovery
//! controller and the health/metrics HTTP server in one foreground
//! process, grounded on `dashflow-cli`'s long-running subcommands
//! (e.g. `mcp_server::run`) that own a `tokio::select!` over a signal
//! handler and the work itself.

use crate::config::AppConfig;
use crate::error::{CliError, Result};
use crate::output::{print_error, print_info, print_success};
use clap::Args;
use std::sync::Arc;
use std::time::Duration;
use tichain_broker::{BrokerConsumer, BrokerProducer, DlqHandler};
use tichain_cache::CurrentValueCache;
use tichain_chain::{ChainStore, IntegrityChain};
use tichain_idempotency::IdempotencyStore;
use tichain_observability::{init_tracing, HealthState, LoggingConfig, PipelineMetrics};
use tichain_pipeline::{GapRecoveryController, IngestionPipeline};
use tichain_registry::{PointCache, PointRegistry};
use tichain_shadow::{ShadowBuffer, ShadowStore};
use tichain_timeseries::TimeSeriesWriter;
use tracing::{error, info};

#[derive(Args)]
pub struct StartArgs {
    /// Write the process pid to `TICHAIN_PID_FILE` (default `tichain.pid`)
    /// so `tichain stop` can find it.
    #[arg(long, default_value_t = true)]
    pidfile: bool,
}

pub async fn run(args: StartArgs) -> Result<()> {
    let config = AppConfig::from_env();
    init_tracing(&LoggingConfig {
        filter: config.log_filter.clone(),
        json: config.log_json,
    })
    .map_err(|e| CliError::Internal(e.to_string()))?;

    if args.pidfile {
        std::fs::write(&config.pid_file, std::process::id().to_string())?;
    }

    info!(bootstrap = %config.kafka_bootstrap_servers, "starting tichain ingestion pipeline");

    let registry = Arc::new(PointRegistry::new(&config.postgres_url).await?);
    let point_cache = Arc::new(PointCache::new(registry.clone()));
    point_cache.refresh().await?;
    let _cache_refresh = point_cache.spawn_periodic_refresh();

    let shadow = ShadowBuffer::new(ShadowStore::open(&config.shadow_db_path).await?);
    let chain = IntegrityChain::new(ChainStore::open(&config.chain_db_path).await?);
    let idempotency = IdempotencyStore::new(&config.redis_idempotency_url).await?;
    let writer = TimeSeriesWriter::new(&config.clickhouse_url, &config.clickhouse_database).await?;
    let current_cache = CurrentValueCache::new(&config.redis_cache_url).await?;

    let metrics = Arc::new(PipelineMetrics::new());
    let health = HealthState::new();

    let server_handle = {
        let health = health.clone();
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = tichain_observability::server::serve(port, health).await {
                error!(error = %e, "health/metrics server exited");
            }
        })
    };

    let consumer = BrokerConsumer::new(
        &config.kafka_bootstrap_servers,
        &config.kafka_topic,
        &config.kafka_consumer_group,
    )
    .map_err(tichain_pipeline::Error::Broker)?;
    let dlq = DlqHandler::connect(&config.kafka_bootstrap_servers, &config.kafka_dlq_topic, config.dlq_send_timeout())
        .map_err(tichain_pipeline::Error::Broker)?;

    let pipeline = IngestionPipeline::new(
        consumer,
        dlq,
        idempotency,
        registry.clone(),
        point_cache.clone(),
        writer,
        current_cache,
        chain.clone(),
        metrics.clone(),
        health.clone(),
        config.pipeline_config(),
    );

    let recovery_producer = BrokerProducer::new(&config.kafka_bootstrap_servers, &config.kafka_topic)
        .map_err(tichain_pipeline::Error::Broker)?;
    let recovery = GapRecoveryController::new(
        chain,
        shadow,
        recovery_producer,
        registry.clone(),
        metrics.clone(),
        config.recovery_config(),
    );
    let recovery_handle = tokio::spawn(async move {
        if let Err(e) = recovery.run_periodic().await {
            error!(error = %e, "gap recovery controller exited");
        }
    });

    print_success(&format!(
        "tichain started (health http://127.0.0.1:{})",
        config.health_port
    ));

    let run_result = tokio::select! {
        result = pipeline.run() => result,
        _ = tokio::signal::ctrl_c() => {
            print_info("received shutdown signal, stopping");
            pipeline.stop();
            pipeline.run().await
        }
    };

    recovery_handle.abort();
    server_handle.abort();
    if args.pidfile {
        let _ = std::fs::remove_file(&config.pid_file);
    }

    match run_result {
        Ok(()) => Ok(()),
        Err(e) => {
            print_error(&format!("pipeline faulted: {e}"));
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_args_default_pidfile_on() {
        let args = StartArgs { pidfile: true };
        assert!(args.pidfile);
    }

    #[allow(dead_code)]
    fn assert_poll_timeout_is_short(d: Duration) -> bool {
        d < Duration::from_secs(60)
    }
}
