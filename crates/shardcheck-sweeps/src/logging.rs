use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LoggingConfig;

/// Installs a global stdout subscriber filtered at `level`. `RUST_LOG` takes precedence when it is set.
///
/// Fails if a global subscriber has already been installed.
pub fn init_logging(level: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stdout).with_target(true).with_line_number(false))
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize logging: {error}"))?;
    tracing::debug!(level, "initialized logging");
    Ok(())
}

/// Installs the global subscriber described by the `[logging]` configuration section.
pub fn init_logging_from_config(config: &LoggingConfig) -> anyhow::Result<()> {
    init_logging(config.level.as_str())
}

/// Returns `true` if `level` names a [`tracing`] level.
pub fn is_valid_level(level: &str) -> bool {
    matches!(level.to_lowercase().as_str(), "trace" | "debug" | "info" | "warn" | "error")
}
