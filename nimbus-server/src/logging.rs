//! Logging initialization
//!
//! Installed once by the binary. Output always goes to stderr: worker
//! processes share this entry point and their stdout is the IPC channel.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use nimbus_config::domains::logging::LogFormat;
use nimbus_config::LoggingConfig;

/// Initialize the global tracing subscriber from the logging config.
/// `RUST_LOG` overrides the configured level when set.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    match config.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to init logging: {}", e))?;
        }
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to init logging: {}", e))?;
        }
    }

    Ok(())
}
