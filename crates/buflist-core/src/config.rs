//! Configuration structures for buflist.
//!
//! Configuration is loaded from TOML files or built in code with the
//! `with_*` setters. Durations are expressed in milliseconds.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Buffer configuration
    #[serde(default)]
    pub buffer: BufferOptions,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Buffer options.
///
/// Immutable once handed to a [`BufferList`](crate::BufferList).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct BufferOptions {
    /// Number of items per dispatched batch; also the size threshold that
    /// triggers a flush
    #[serde(default = "default_clear_batching_size")]
    pub clear_batching_size: usize,

    /// Ingest queue length at which producers block
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    /// Capacity of the fault queue; overflow drops the oldest item
    #[serde(default = "default_max_fault_size")]
    pub max_fault_size: usize,

    /// Inactivity period before buffered items are flushed (0 disables)
    #[serde(default = "default_idle_clear_ttl_ms")]
    pub idle_clear_ttl_ms: u64,

    /// Poll interval for producers blocked on a full ingest queue
    #[serde(default = "default_max_size_waiting_delay_ms")]
    pub max_size_waiting_delay_ms: u64,

    /// Hard deadline for draining the buffer on dispose
    #[serde(default = "default_dispose_timeout_ms")]
    pub dispose_timeout_ms: u64,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            clear_batching_size: default_clear_batching_size(),
            max_size: default_max_size(),
            max_fault_size: default_max_fault_size(),
            idle_clear_ttl_ms: default_idle_clear_ttl_ms(),
            max_size_waiting_delay_ms: default_max_size_waiting_delay_ms(),
            dispose_timeout_ms: default_dispose_timeout_ms(),
        }
    }
}

impl BufferOptions {
    /// Create options with the given batch size and defaults elsewhere.
    ///
    /// `max_size` and `max_fault_size` are raised to the batch size when the
    /// defaults would be smaller.
    pub fn new(clear_batching_size: usize) -> Self {
        let defaults = Self::default();
        Self {
            clear_batching_size,
            max_size: defaults.max_size.max(clear_batching_size),
            max_fault_size: defaults.max_fault_size.max(clear_batching_size),
            ..defaults
        }
    }

    /// Set the maximum ingest queue length.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the fault queue capacity.
    pub fn with_max_fault_size(mut self, max_fault_size: usize) -> Self {
        self.max_fault_size = max_fault_size;
        self
    }

    /// Set the idle flush period. `Duration::ZERO` disables idle flushing.
    pub fn with_idle_clear_ttl(mut self, ttl: Duration) -> Self {
        self.idle_clear_ttl_ms = duration_to_ms(ttl);
        self
    }

    /// Set the backpressure poll interval.
    pub fn with_max_size_waiting_delay(mut self, delay: Duration) -> Self {
        self.max_size_waiting_delay_ms = duration_to_ms(delay);
        self
    }

    /// Set the drain deadline used by dispose.
    pub fn with_dispose_timeout(mut self, timeout: Duration) -> Self {
        self.dispose_timeout_ms = duration_to_ms(timeout);
        self
    }

    /// Idle flush period, `None` when idle flushing is disabled.
    pub fn idle_clear_ttl(&self) -> Option<Duration> {
        match self.idle_clear_ttl_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Backpressure poll interval.
    pub fn max_size_waiting_delay(&self) -> Duration {
        Duration::from_millis(self.max_size_waiting_delay_ms)
    }

    /// Drain deadline used by dispose.
    pub fn dispose_timeout(&self) -> Duration {
        Duration::from_millis(self.dispose_timeout_ms)
    }

    /// Validate the options, naming the offending field on failure.
    pub fn validate(&self) -> crate::Result<()> {
        if self.clear_batching_size == 0 {
            return Err(crate::Error::Config(
                "clear_batching_size must be greater than 0".into(),
            ));
        }

        if self.max_size < self.clear_batching_size {
            return Err(crate::Error::Config(format!(
                "max_size ({}) must be >= clear_batching_size ({})",
                self.max_size, self.clear_batching_size
            )));
        }

        if self.max_fault_size < self.clear_batching_size {
            return Err(crate::Error::Config(format!(
                "max_fault_size ({}) must be >= clear_batching_size ({})",
                self.max_fault_size, self.clear_batching_size
            )));
        }

        if self.max_size_waiting_delay_ms == 0 {
            return Err(crate::Error::Config(
                "max_size_waiting_delay_ms must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}

/// Monitoring configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log level.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    /// Directive string accepted by an env filter.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Plain text format
    Text,
}

// Default value functions
fn default_clear_batching_size() -> usize {
    100
}
fn default_max_size() -> usize {
    10_000
}
fn default_max_fault_size() -> usize {
    10_000
}
fn default_idle_clear_ttl_ms() -> u64 {
    1_000
}
fn default_max_size_waiting_delay_ms() -> u64 {
    100
}
fn default_dispose_timeout_ms() -> u64 {
    30_000
}

/// Whole milliseconds, rounding a nonzero sub-millisecond remainder up.
fn duration_to_ms(d: Duration) -> u64 {
    let ms = d.as_millis() + u128::from(d.subsec_nanos() % 1_000_000 != 0);
    u64::try_from(ms).unwrap_or(u64::MAX)
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        self.buffer.validate()?;

        if self.buffer.idle_clear_ttl_ms == 0 {
            tracing::warn!("Idle flush disabled; partial batches wait for an explicit clear");
        }

        Ok(())
    }
}
