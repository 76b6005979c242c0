//! Logging initialization
//!
//! Console logging through `tracing-subscriber` with an optional
//! daily-rotated file layer through `tracing-appender`. `RUST_LOG` always
//! wins over the configured levels so a service can be re-leveled in the
//! field without touching its config file.

use std::path::PathBuf;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name (e.g., "cryosrv")
    pub service_name: String,
    /// Base directory for log files; `None` disables the file layer
    pub log_dir: Option<PathBuf>,
    /// Console log level
    pub console_level: Level,
    /// File log level
    pub file_level: Level,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".to_string(),
            log_dir: None,
            console_level: Level::INFO,
            file_level: Level::DEBUG,
        }
    }
}

/// Initialize the logging system with configuration.
///
/// Returns the appender worker guard when a file layer is active; the caller
/// must hold it for the lifetime of the process or buffered lines are lost
/// on exit.
pub fn init_with_config(config: &LogConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},{}={}",
            config.console_level,
            config.service_name,
            config.file_level.to_string().to_lowercase()
        ))
    });

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_ansi(true).with_target(true));

    if let Some(dir) = &config.log_dir {
        std::fs::create_dir_all(dir)?;
        let appender =
            tracing_appender::rolling::daily(dir, format!("{}.log", config.service_name));
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        registry
            .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
            .init();
        Ok(Some(guard))
    } else {
        registry.init();
        Ok(None)
    }
}

/// Minimal console-only initialization for tools and examples.
pub fn init(level: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .init();

    Ok(())
}
