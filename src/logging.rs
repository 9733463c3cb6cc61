//! Tracing subscriber setup

use crate::config::GeneralConfig;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber
///
/// `RUST_LOG` takes precedence over the configured level. Calling this twice
/// is harmless; the second call keeps the first subscriber.
pub fn init(config: &GeneralConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("svncache={}", config.log_level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = if config.log_format == "json" {
        builder.json().try_init()
    } else {
        builder.without_time().try_init()
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let config = GeneralConfig::default();
        init(&config);
        init(&GeneralConfig {
            log_format: "json".to_string(),
            ..config
        });
    }
}
