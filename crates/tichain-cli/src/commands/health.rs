//! `tichain health`: thin HTTP client against the running daemon's
//! `/healthz`, grounded on `dashflow-cli::commands::status`'s
//! check-then-report pattern but over HTTP rather than TCP connect.

use crate::config::AppConfig;
use crate::error::{CliError, Result};
use crate::output::{print_error, print_success, print_warning};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct HealthReport {
    status: String,
    last_error: Option<String>,
    recent_error: bool,
}

pub async fn run() -> Result<()> {
    let config = AppConfig::from_env();
    let response = reqwest::get(config.health_url())
        .await
        .map_err(|e| CliError::Upstream(format!("could not reach {}: {e}", config.health_url())))?;

    let status = response.status();
    let report: HealthReport = response
        .json()
        .await
        .map_err(|e| CliError::Internal(format!("malformed health response: {e}")))?;

    if !status.is_success() && report.recent_error {
        print_warning(&format!("status={} recent_error=true", report.status));
        if let Some(err) = &report.last_error {
            print_error(err);
        }
        return Err(CliError::Internal(format!("pipeline unhealthy: {}", report.status)));
    }

    print_success(&format!("status={}", report.status));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_report_deserializes_minimal_shape() {
        let json = r#"{"status":"running","last_error":null,"recent_error":false}"#;
        let report: HealthReport = serde_json::from_str(json).unwrap();
        assert_eq!(report.status, "running");
        assert!(!report.recent_error);
    }
}
