//! `tracing-subscriber` setup for the binary.

use tracing::Subscriber;
use tracing_subscriber::{
    EnvFilter, fmt, fmt::time::UtcTime, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Output format of the process logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LoggerFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Logger settings.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Output format.
    pub format: LoggerFormat,
    /// `EnvFilter` directive, e.g. `info` or `taskgate=debug,redis=warn`.
    pub level: String,
    /// Include event targets.
    pub with_targets: bool,
    /// ANSI colors (text format only).
    pub use_color: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            format: LoggerFormat::Text,
            level: "info".to_string(),
            with_targets: true,
            use_color: true,
        }
    }
}

/// Logger installation failure.
#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    /// A global subscriber is already set.
    #[error("Logger has been already initialized")]
    AlreadyInitialized,
    /// The filter directive did not parse.
    #[error("Invalid log level: {0}")]
    InvalidLogLevel(String),
    /// Anything else from `tracing-subscriber`.
    #[error("Failed to initialize logger: {0}")]
    InitializationFailed(String),
}

/// Install the global subscriber described by `cfg`.
pub fn logger_init(cfg: &LoggerConfig) -> Result<(), LoggerError> {
    let filter = mk_filter(&cfg.level)?;

    match cfg.format {
        LoggerFormat::Text => {
            let fmt_layer = fmt::layer()
                .with_ansi(cfg.use_color)
                .with_target(cfg.with_targets)
                .with_timer(UtcTime::rfc_3339());

            init_with(tracing_subscriber::registry().with(filter).with(fmt_layer))
        }
        LoggerFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_target(cfg.with_targets)
                .with_timer(UtcTime::rfc_3339());

            init_with(tracing_subscriber::registry().with(filter).with(fmt_layer))
        }
    }
}

fn mk_filter(level: &str) -> Result<EnvFilter, LoggerError> {
    EnvFilter::try_new(level).map_err(|_| LoggerError::InvalidLogLevel(level.to_string()))
}

fn init_with<S>(subscriber: S) -> Result<(), LoggerError>
where
    S: Subscriber + Send + Sync + 'static,
{
    subscriber.try_init().map_err(|e| {
        let s = e.to_string();
        if s.contains("SetGlobalDefaultError") || s.contains("already been set") {
            LoggerError::AlreadyInitialized
        } else {
            LoggerError::InitializationFailed(s)
        }
    })
}
