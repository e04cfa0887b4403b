//! Runtime Configuration
//!
//! Configuration can be set programmatically or loaded from environment
//! variables.
//!
//! # Environment Variables
//!
//! All environment variables use the `STRAND_` prefix:
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `STRAND_NUM_WORKERS` | Number of worker threads | CPU count |
//! | `STRAND_THREAD_NAME` | Worker thread name prefix | `strand-worker` |
//! | `STRAND_THREAD_STACK_SIZE` | Worker thread stack size in bytes | 2097152 (2MB) |
//! | `STRAND_LOG_LEVEL` | Log level (off/error/warn/info/debug/trace) | info |
//! | `STRAND_LOG_TIMESTAMPS` | Include timestamps ("true"/"false") | true |
//!
//! # Example
//!
//! ```rust,ignore
//! use strand_runtime::config::RuntimeConfig;
//!
//! // Load from environment with defaults
//! let config = RuntimeConfig::from_env();
//!
//! // Or use the builder pattern
//! let config = RuntimeConfig::builder()
//!     .num_workers(4)
//!     .thread_name("app-worker")
//!     .build()?;
//! ```

use std::env;

use thiserror::Error;

/// Smallest accepted worker thread stack.
pub const MIN_THREAD_STACK_SIZE: usize = 64 * 1024;

/// Log level for runtime logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// No logging.
    Off,
    /// Error messages only.
    Error,
    /// Warnings and errors.
    Warn,
    /// Informational messages (default).
    #[default]
    Info,
    /// Debug messages.
    Debug,
    /// Trace-level messages.
    Trace,
}

impl LogLevel {
    /// Parse a log level from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" | "none" | "0" => Some(LogLevel::Off),
            "error" | "err" | "1" => Some(LogLevel::Error),
            "warn" | "warning" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    /// Convert to a string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Execution context configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Number of worker threads.
    /// Default: number of available CPUs.
    pub num_workers: usize,

    /// Worker thread name prefix; threads are named `<prefix>-<index>`.
    /// Default: `strand-worker`.
    pub thread_name: String,

    /// Worker thread stack size in bytes.
    /// Default: 2MB.
    pub thread_stack_size: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            num_workers: num_cpus(),
            thread_name: "strand-worker".to_string(),
            thread_stack_size: 2 * 1024 * 1024, // 2 MB
        }
    }
}

impl ExecutorConfig {
    /// Validate the executor settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "executor.num_workers".into(),
                message: "must be at least 1".into(),
            });
        }

        if self.thread_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "executor.thread_name".into(),
                message: "must not be empty".into(),
            });
        }

        if self.thread_stack_size < MIN_THREAD_STACK_SIZE {
            return Err(ConfigError::InvalidValue {
                field: "executor.thread_stack_size".into(),
                message: format!("must be at least {} bytes", MIN_THREAD_STACK_SIZE),
            });
        }

        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level.
    /// Default: Info.
    pub level: LogLevel,

    /// Include timestamps in log output.
    /// Default: true.
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            timestamps: true,
        }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// Execution context configuration.
    pub executor: ExecutorConfig,

    /// Logging configuration.
    pub log: LogConfig,
}

impl RuntimeConfig {
    /// Create a new builder for RuntimeConfig.
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::new()
    }

    /// Load configuration from environment variables.
    ///
    /// Variables that are not set, or do not parse, keep their defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = parse_env_usize("STRAND_NUM_WORKERS") {
            if val > 0 {
                config.executor.num_workers = val;
            }
        }

        if let Ok(val) = env::var("STRAND_THREAD_NAME") {
            if !val.trim().is_empty() {
                config.executor.thread_name = val;
            }
        }

        if let Some(val) = parse_env_usize("STRAND_THREAD_STACK_SIZE") {
            if val >= MIN_THREAD_STACK_SIZE {
                config.executor.thread_stack_size = val;
            }
        }

        if let Ok(val) = env::var("STRAND_LOG_LEVEL") {
            if let Some(level) = LogLevel::parse(&val) {
                config.log.level = level;
            }
        }

        if let Some(val) = parse_env_bool("STRAND_LOG_TIMESTAMPS") {
            config.log.timestamps = val;
        }

        config
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.executor.validate()
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Invalid configuration value.
    #[error("invalid configuration for '{field}': {message}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// Error message.
        message: String,
    },
    /// A worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
    /// The global logger could not be installed.
    #[error("failed to install logger: {0}")]
    Logger(String),
}

/// Builder for RuntimeConfig.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads.
    pub fn num_workers(mut self, n: usize) -> Self {
        self.config.executor.num_workers = n;
        self
    }

    /// Set the worker thread name prefix.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.executor.thread_name = name.into();
        self
    }

    /// Set the worker thread stack size in bytes.
    pub fn thread_stack_size(mut self, size: usize) -> Self {
        self.config.executor.thread_stack_size = size;
        self
    }

    /// Set the log level.
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.log.level = level;
        self
    }

    /// Enable or disable timestamps in log output.
    pub fn log_timestamps(mut self, enabled: bool) -> Self {
        self.config.log.timestamps = enabled;
        self
    }

    /// Build the configuration.
    ///
    /// This validates the configuration and returns an error if invalid.
    pub fn build(self) -> Result<RuntimeConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build the configuration without validation.
    pub fn build_unchecked(self) -> RuntimeConfig {
        self.config
    }
}

/// Parse an environment variable as usize.
fn parse_env_usize(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Parse an environment variable as bool.
fn parse_env_bool(name: &str) -> Option<bool> {
    env::var(name).ok().and_then(|s| match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    })
}

/// Get the number of available CPUs.
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
