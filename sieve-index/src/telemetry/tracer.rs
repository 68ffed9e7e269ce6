//! Tracing subscriber initialization.

use sieve_core::{ConfigError, SieveConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber described by `config`.
///
/// `log_filter` is an env-filter directive (e.g. `sieve_index=debug,info`);
/// `log_json` switches the formatter to JSON lines. Returns `Ok(false)` if a
/// global subscriber was already installed, which makes repeated calls from
/// tests harmless.
pub fn init_tracing(config: &SieveConfig) -> Result<bool, ConfigError> {
    let env_filter =
        EnvFilter::try_new(&config.log_filter).map_err(|e| ConfigError::InvalidValue {
            field: "log_filter".to_string(),
            value: config.log_filter.clone(),
            reason: e.to_string(),
        })?;

    let json = config
        .log_json
        .then(|| tracing_subscriber::fmt::layer().json());
    let plain = (!config.log_json).then(tracing_subscriber::fmt::layer);

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(json)
        .with(plain)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(
            filter = %config.log_filter,
            json = config.log_json,
            "Tracing initialized"
        );
    }
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_rejected() {
        let config = SieveConfig {
            log_filter: "sieve_index=loud".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            init_tracing(&config),
            Err(ConfigError::InvalidValue { field, .. }) if field == "log_filter"
        ));
    }

    #[test]
    fn test_second_init_is_harmless() {
        let config = SieveConfig::default();
        init_tracing(&config).unwrap();
        assert!(!init_tracing(&config).unwrap());
    }
}
