//! `tichain recover --source <id>`: one-shot operator command, connects
//! directly to the shared broker/chain/shadow/registry infrastructure
//! (not to a running daemon) and replays whatever gaps are outstanding
//! for one source.

use crate::config::AppConfig;
use crate::error::Result;
use crate::output::print_success;
use clap::Args;
use std::sync::Arc;
use tichain_broker::BrokerProducer;
use tichain_chain::{ChainStore, IntegrityChain};
use tichain_observability::PipelineMetrics;
use tichain_pipeline::GapRecoveryController;
use tichain_registry::PointRegistry;
use tichain_shadow::{ShadowBuffer, ShadowStore};

#[derive(Args)]
pub struct RecoverArgs {
    /// Data source to scan and replay gaps for.
    #[arg(long)]
    source: String,
}

pub async fn run(args: RecoverArgs) -> Result<()> {
    let config = AppConfig::from_env();

    let chain = IntegrityChain::new(ChainStore::open(&config.chain_db_path).await?);
    let shadow = ShadowBuffer::new(ShadowStore::open(&config.shadow_db_path).await?);
    let producer = BrokerProducer::new(&config.kafka_bootstrap_servers, &config.kafka_topic)
        .map_err(tichain_pipeline::Error::Broker)?;
    let registry = Arc::new(PointRegistry::new(&config.postgres_url).await?);
    let metrics = Arc::new(PipelineMetrics::new());

    let controller = GapRecoveryController::new(chain, shadow, producer, registry, metrics, config.recovery_config());
    controller.recover_source(&args.source).await?;

    print_success(&format!("recovery pass complete for source {}", args.source));
    Ok(())
}
