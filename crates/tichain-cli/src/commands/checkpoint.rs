//! `tichain checkpoint --source <id> --reason <text>`: one-shot operator
//! command that records a manual checkpoint marker on the integrity
//! chain for a source, connecting directly to the chain store.

use crate::config::AppConfig;
use crate::error::Result;
use crate::output::{print_info, print_success};
use clap::Args;
use tichain_chain::{ChainStore, IntegrityChain};

#[derive(Args)]
pub struct CheckpointArgs {
    /// Data source to checkpoint.
    #[arg(long)]
    source: String,

    /// Operator-supplied reason, recorded on the checkpoint marker.
    #[arg(long)]
    reason: String,
}

pub async fn run(args: CheckpointArgs) -> Result<()> {
    let config = AppConfig::from_env();
    let chain = IntegrityChain::new(ChainStore::open(&config.chain_db_path).await?);

    match chain.checkpoint(&args.source, &args.reason).await? {
        Some(entry) => {
            print_success(&format!(
                "checkpointed {} at sequence {} (chain_hash={})",
                args.source, entry.sequence, entry.chain_hash
            ));
        }
        None => {
            print_info(&format!("no chain entries yet for source {}, nothing to checkpoint", args.source));
        }
    }
    Ok(())
}
