//! Process configuration.

use std::{path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};

use crate::{LoggerConfig, LoggerFormat, RateWindow, RedisKey, TaskgateError, WorkerOptions};

/// Name of the burst window; also its key segment.
pub const BURST_WINDOW_NAME: &str = "burstLimiter";

/// Name of the sustained window; also its key segment.
pub const SUSTAINED_WINDOW_NAME: &str = "sustainedLimiter";

/// Where rate counters and queue records live.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Shared, durable Redis state.
    Redis,
    /// In-process state; lost on restart.
    Memory,
}

/// Command line and environment configuration.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "taskgate",
    about = "Per-subject dual-window admission in front of a delayed task queue"
)]
pub struct Config {
    /// Address to bind.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// State backend.
    #[arg(long, env = "TASKGATE_BACKEND", value_enum, default_value_t = Backend::Redis)]
    pub backend: Backend,

    /// Redis host, ignored when `--redis-url` is set.
    #[arg(long, env = "REDIS_HOST", default_value = "127.0.0.1")]
    pub redis_host: String,

    /// Redis port, ignored when `--redis-url` is set.
    #[arg(long, env = "REDIS_PORT", default_value_t = 6379)]
    pub redis_port: u16,

    /// Full Redis URL.
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Pooled Redis connections.
    #[arg(long, env = "TASKGATE_REDIS_CONNECTIONS", default_value_t = 4)]
    pub redis_connections: usize,

    /// Connect and response timeout for Redis calls.
    #[arg(long, env = "TASKGATE_REDIS_TIMEOUT_MS", default_value_t = 2000)]
    pub redis_timeout_ms: u64,

    /// Prefix for every Redis key.
    #[arg(long, env = "TASKGATE_KEY_PREFIX", default_value = "taskgate")]
    pub key_prefix: String,

    /// Queue namespace.
    #[arg(long, env = "TASKGATE_QUEUE", default_value = "taskQueue")]
    pub queue_name: String,

    /// Burst window capacity.
    #[arg(long, default_value_t = 1)]
    pub burst_points: u64,

    /// Burst window period.
    #[arg(long, default_value_t = 1000)]
    pub burst_period_ms: u64,

    /// Block applied after the first burst denial; 0 disables it.
    #[arg(long, default_value_t = 60_000)]
    pub burst_block_ms: u64,

    /// Sustained window capacity.
    #[arg(long, default_value_t = 3)]
    pub sustained_points: u64,

    /// Sustained window period.
    #[arg(long, default_value_t = 60_000)]
    pub sustained_period_ms: u64,

    /// Concurrent queue consumers.
    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    /// Idle pause between empty claims.
    #[arg(long, default_value_t = 250)]
    pub poll_interval_ms: u64,

    /// Claim lease; unacknowledged claims are redelivered after this.
    #[arg(long, default_value_t = 30_000)]
    pub lease_ms: u64,

    /// Delay before a fatally failed task is retried.
    #[arg(long, default_value_t = 5_000)]
    pub retry_delay_ms: u64,

    /// Completion log file.
    #[arg(long, default_value = "task.log")]
    pub completion_log: PathBuf,

    /// Log filter directive.
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LoggerFormat::Text)]
    pub log_format: LoggerFormat,
}

impl Config {
    /// `--redis-url`, or one built from host and port.
    pub fn redis_url(&self) -> String {
        match &self.redis_url {
            Some(url) => url.clone(),
            None => format!("redis://{}:{}/", self.redis_host, self.redis_port),
        }
    }

    /// `host:port` to bind.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Redis call timeout.
    pub fn redis_timeout(&self) -> Duration {
        Duration::from_millis(self.redis_timeout_ms)
    }

    /// Validated key prefix.
    pub fn key_prefix(&self) -> Result<RedisKey, TaskgateError> {
        RedisKey::try_from(self.key_prefix.as_str())
    }

    /// Validated queue name.
    pub fn queue_name(&self) -> Result<RedisKey, TaskgateError> {
        RedisKey::try_from(self.queue_name.as_str())
    }

    /// The burst window.
    pub fn burst_window(&self) -> Result<RateWindow, TaskgateError> {
        RateWindow::from_raw(
            BURST_WINDOW_NAME,
            self.burst_points,
            self.burst_period_ms,
            self.burst_block_ms,
        )
    }

    /// The sustained window.
    pub fn sustained_window(&self) -> Result<RateWindow, TaskgateError> {
        RateWindow::from_raw(
            SUSTAINED_WINDOW_NAME,
            self.sustained_points,
            self.sustained_period_ms,
            0,
        )
    }

    /// Worker pool tuning.
    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            workers: self.workers,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            lease: Duration::from_millis(self.lease_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            ..WorkerOptions::default()
        }
    }

    /// Logger settings.
    pub fn logger_config(&self) -> LoggerConfig {
        LoggerConfig {
            format: self.log_format,
            level: self.log_level.clone(),
            ..LoggerConfig::default()
        }
    }
}
