//! # Strand Runtime Library
//!
//! Strand is a lazy effect runtime. Programs are written as immutable
//! [`Effect`] descriptions and interpreted on demand by lightweight fibers
//! multiplexed over a small thread pool.
//!
//! - **Effect algebra**: sequencing, parallel zips, structured failure
//!   handling, guaranteed finalizers, reader-style environments
//! - **Fibers**: fork, join, await, and cooperative interruption
//! - **Causes**: a three-way error model of domain failures, defects and
//!   interruption, always delivered as values
//! - **Execution contexts**: a work-stealing thread pool, or any
//!   [`Executor`] implementation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        STRAND RUNTIME                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐           │
//! │  │    Effect    │  │    Fiber     │  │   Runtime    │           │
//! │  │ (effect.rs)  │  │  (fiber.rs)  │  │ (runtime.rs) │           │
//! │  └──────────────┘  └──────────────┘  └──────────────┘           │
//! │         │                 │                 │                   │
//! │         └─────────────────┼─────────────────┘                   │
//! │                           │                                     │
//! │  ┌──────────────┐  ┌──────────────────┐  ┌──────────────┐       │
//! │  │    Nodes     │  │   Interpreter    │  │   Executor   │       │
//! │  │  (node.rs)   │  │(fiber_context.rs)│  │(executor.rs) │       │
//! │  └──────────────┘  └──────────────────┘  └──────────────┘       │
//! │                                                                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use strand_runtime::Effect;
//!
//! let program = Effect::succeed(|| 1)
//!     .zip_par(Effect::succeed(|| 2))
//!     .map(|(a, b)| a + b)
//!     .ensuring(Effect::succeed(|| println!("done")));
//!
//! assert_eq!(strand_runtime::run(program).into_result().ok(), Some(3));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod cause;
pub mod config;
mod continuation;
pub mod effect;
pub mod executor;
pub mod fiber;
mod fiber_context;
pub mod interrupt;
pub mod log;
mod node;
pub mod panic;
pub mod runtime;
pub mod sync;

// Re-exports
pub use cause::{Cause, Defect, Error, Exit};
pub use config::{ConfigError, LogLevel, RuntimeConfig, RuntimeConfigBuilder};
pub use effect::{Callback, Effect};
pub use executor::{Executor, Immediate, Task, ThreadPool};
pub use fiber::{Fiber, FiberId};
pub use interrupt::InterruptStatus;
pub use node::Value;
pub use runtime::Runtime;
pub use sync::CountDownLatch;

/// Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Global runtime configuration.
static RUNTIME_CONFIG: std::sync::OnceLock<RuntimeConfig> = std::sync::OnceLock::new();

/// Initialize logging and build a runtime from `STRAND_*` environment
/// variables.
pub fn init_from_env() -> Result<Runtime, ConfigError> {
    init_with_config(RuntimeConfig::from_env())
}

/// Initialize logging and build a runtime from `config`.
///
/// The first configuration used here is recorded and available through
/// [`runtime_config`].
pub fn init_with_config(config: RuntimeConfig) -> Result<Runtime, ConfigError> {
    config.validate()?;
    log::init(&config.log);
    let runtime = Runtime::new(&config)?;
    let _ = RUNTIME_CONFIG.set(config);
    Ok(runtime)
}

/// Get the configuration recorded by [`init_with_config`].
///
/// Returns `None` if the runtime was not initialized through it.
pub fn runtime_config() -> Option<&'static RuntimeConfig> {
    RUNTIME_CONFIG.get()
}

/// Run `effect` on the global runtime and block until it exits.
pub fn run<A: Value>(effect: Effect<A>) -> Exit<A> {
    Runtime::global().unsafe_run_sync(effect)
}
