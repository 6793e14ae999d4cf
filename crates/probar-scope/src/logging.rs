//! Log subscriber setup for test runs

use crate::config::{LogConfig, LogFormat};
use crate::result::{ScopeError, ScopeResult};
use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber described by `config`.
///
/// `RUST_LOG` takes precedence over `config.level`. Returns `false` when a
/// subscriber was already installed, which leaves that one in place.
///
/// # Errors
///
/// Returns [`ScopeError::Config`] when `config.level` is not a valid filter.
pub fn init_logging(config: &LogConfig) -> ScopeResult<bool> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| ScopeError::config(format!("invalid log level {}: {e}", config.level)))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true);
    let installed = match config.format {
        LogFormat::Pretty => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    };

    if installed {
        tracing::debug!(format = ?config.format, "logging initialised");
    }
    Ok(installed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_repeat_init_is_noop() {
        let config = LogConfig::default();
        let _ = init_logging(&config).unwrap();
        assert!(!init_logging(&config).unwrap());
    }

    #[test]
    fn test_invalid_level() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LogConfig {
            level: "probar_scope=loudest".to_string(),
            format: LogFormat::Json,
        };
        assert!(matches!(
            init_logging(&config),
            Err(ScopeError::Config { .. })
        ));
    }
}
