//! Logging Infrastructure
//!
//! The runtime reports through `tracing` events; this module only installs a
//! subscriber for applications that do not bring their own.
//!
//! Events emitted by the runtime:
//!
//! - fiber spawn and completion at `debug`
//! - continuation push/pop and suspension at `trace`
//! - interruption requests and interruption taking effect at `debug`
//! - defects caught from user code at `warn`
//! - task panics on worker threads at `error`
//!
//! `RUST_LOG` overrides the configured level when set.
//!
//! # Example
//!
//! ```rust,ignore
//! use strand_runtime::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env();
//! strand_runtime::log::init(&config.log);
//! ```

use tracing_subscriber::EnvFilter;

use crate::config::{ConfigError, LogConfig, LogLevel};

/// Build the filter directive for a level.
pub fn directive(level: LogLevel) -> &'static str {
    level.as_str()
}

fn filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive(config.level)))
}

/// Install the global subscriber, returning an error if one already exists.
pub fn try_init(config: &LogConfig) -> Result<(), ConfigError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(config))
        .with_thread_names(true);

    let result = if config.timestamps {
        builder.try_init()
    } else {
        builder.without_time().try_init()
    };

    result.map_err(|err| ConfigError::Logger(err.to_string()))
}

/// Install the global subscriber, ignoring an already installed one.
pub fn init(config: &LogConfig) {
    let _ = try_init(config);
}
