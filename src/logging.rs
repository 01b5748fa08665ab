//! Logging initialization and configuration.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "nav_billing=info";

fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Initialize the logging system.
///
/// Uses the `RUST_LOG` environment variable for filtering. If not set,
/// defaults to `nav_billing=info`.
///
/// # Panics
///
/// Panics if called more than once, or if another tracing subscriber
/// has already been set.
pub fn init() {
    tracing_subscriber::registry()
        .with(env_filter(DEFAULT_FILTER))
        .with(tracing_subscriber::fmt::layer().compact())
        .init();
}

/// Try to initialize the logging system.
///
/// Returns `Ok(())` if successful, or `Err` if logging has already been
/// initialized.
pub fn try_init() -> Result<(), tracing_subscriber::util::TryInitError> {
    try_init_with_level(DEFAULT_FILTER)
}

/// Try to initialize logging with an explicit fallback filter, such as the
/// `logging.level` value from [`Config`](crate::config::Config).
///
/// `RUST_LOG` still takes precedence when it is set.
pub fn try_init_with_level(level: &str) -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(tracing_subscriber::fmt::layer().compact())
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_init_idempotent() {
        // First call may or may not succeed depending on test order
        let _ = try_init();
        let _ = try_init();
    }

    #[test]
    fn test_try_init_with_level() {
        let _ = try_init_with_level("nav_billing=debug");
        tracing::debug!("debug message after init");
        tracing::warn!("warn message after init");
    }

    #[test]
    fn test_try_init_with_configured_level() {
        let config = crate::config::Config::load(None).unwrap_or_default();
        assert!(!config.log_filter().is_empty());
        let _ = try_init_with_level(config.log_filter());
        tracing::info!("info message after configured init");
    }
}
