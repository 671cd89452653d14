//! Tracing subscriber setup
//!
//! `RUST_LOG` wins over the configured level when present. Output is plain
//! text unless `logging.json` is set.

use phivault_domain::{LoggingSettings, PhiVaultError};
use tracing_subscriber::EnvFilter;

use crate::errors::InfraError;

/// Install the global tracing subscriber.
///
/// Returns `Ok(false)` if a subscriber was already installed, which makes
/// repeated calls from tests and embedders harmless.
///
/// # Errors
/// Returns `InfraError::Config` if the configured level is not a valid
/// filter directive.
pub fn init_tracing(settings: &LoggingSettings) -> Result<bool, InfraError> {
    let filter = build_filter(settings)?;

    let installed = if settings.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).with_current_span(true).try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init()
    };

    Ok(installed.is_ok())
}

fn build_filter(settings: &LoggingSettings) -> Result<EnvFilter, InfraError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    EnvFilter::try_new(&settings.level).map_err(|e| {
        InfraError::Config(PhiVaultError::Config(format!(
            "invalid logging.level '{}': {e}",
            settings.level
        )))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_directive_lists() {
        let settings =
            LoggingSettings { level: "info,phivault_core=debug".into(), json: false };
        assert!(build_filter(&settings).is_ok());
    }

    #[test]
    fn second_init_reports_existing_subscriber() {
        let settings = LoggingSettings::default();
        let _ = init_tracing(&settings).unwrap();
        assert!(!init_tracing(&settings).unwrap());
    }
}
