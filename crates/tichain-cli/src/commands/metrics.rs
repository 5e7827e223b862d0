//! `tichain metrics`: prints the daemon's `/metrics` Prometheus text
//! exposition verbatim to stdout, for piping into `curl`-shaped tooling.

use crate::config::AppConfig;
use crate::error::{CliError, Result};

pub async fn run() -> Result<()> {
    let config = AppConfig::from_env();
    let body = reqwest::get(config.metrics_url())
        .await
        .map_err(|e| CliError::Upstream(format!("could not reach {}: {e}", config.metrics_url())))?
        .error_for_status()
        .map_err(|e| CliError::Internal(format!("metrics endpoint returned an error: {e}")))?
        .text()
        .await
        .map_err(|e| CliError::Internal(format!("failed to read metrics body: {e}")))?;

    print!("{body}");
    Ok(())
}
