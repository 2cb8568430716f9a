//! Tracing initialization.
//!
//! `RUST_LOG` takes precedence over the configured level so individual modules can
//! be turned up without editing the configuration:
//!
//! ```bash
//! RUST_LOG=raman_scan::scan=debug raman-scan scan --x 0 --y 0 --width 10 --height 10
//! ```

use crate::config::ApplicationConfig;
use tracing_subscriber::EnvFilter;

/// Installs the global `fmt` subscriber.
///
/// Returns `false` when a subscriber was already installed (tests and embedding
/// applications may have done so first); the existing one is left in place.
pub fn init(config: &ApplicationConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("raman_scan={}", config.log_level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json_logs {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };

    if installed {
        tracing::debug!(level = %config.log_level, json = config.json_logs, "Tracing initialized");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        let config = ApplicationConfig::default();
        let _ = init(&config);
        assert!(!init(&config));
    }
}
