//! CLI-local error type mapping onto the exit codes in spec §6: 0
//! success, 64 bad arguments, 69 upstream unavailable, 70
//! internal/faulted. Downstream crate errors are classified by their own
//! `Classify::is_retryable()` rather than re-matched here (spec §9
//! REDESIGN FLAG), so a transient dependency failure always reports 69
//! and a genuine defect always reports 70.

use thiserror::Error;
use tichain_core::Classify;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_BAD_ARGS: i32 = 64;
pub const EXIT_UPSTREAM_UNAVAILABLE: i32 = 69;
pub const EXIT_INTERNAL: i32 = 70;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    BadArgs(String),
    #[error("{0}")]
    Upstream(String),
    #[error("{0}")]
    Internal(String),
}

impl CliError {
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::BadArgs(_) => EXIT_BAD_ARGS,
            CliError::Upstream(_) => EXIT_UPSTREAM_UNAVAILABLE,
            CliError::Internal(_) => EXIT_INTERNAL,
        }
    }

    fn from_classified(e: impl Classify + std::fmt::Display) -> Self {
        if e.is_retryable() {
            CliError::Upstream(e.to_string())
        } else {
            CliError::Internal(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, CliError>;

macro_rules! from_classified_error {
    ($ty:ty) => {
        impl From<$ty> for CliError {
            fn from(e: $ty) -> Self {
                CliError::from_classified(e)
            }
        }
    };
}

from_classified_error!(tichain_pipeline::Error);
from_classified_error!(tichain_chain::Error);
from_classified_error!(tichain_shadow::Error);
from_classified_error!(tichain_broker::Error);
from_classified_error!(tichain_registry::Error);
from_classified_error!(tichain_idempotency::Error);
from_classified_error!(tichain_timeseries::Error);
from_classified_error!(tichain_cache::Error);

impl From<reqwest::Error> for CliError {
    fn from(e: reqwest::Error) -> Self {
        CliError::Upstream(e.to_string())
    }
}

impl From<tichain_observability::Error> for CliError {
    fn from(e: tichain_observability::Error) -> Self {
        CliError::Internal(e.to_string())
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_spec() {
        assert_eq!(CliError::BadArgs("x".into()).exit_code(), 64);
        assert_eq!(CliError::Upstream("x".into()).exit_code(), 69);
        assert_eq!(CliError::Internal("x".into()).exit_code(), 70);
    }
}
