//! # Runtime
//!
//! The boundary between ordinary code and effect descriptions. A
//! [`Runtime`] owns an execution context and turns a root effect into a
//! running fiber.
//!
//! `unsafe_run_sync` is the only place the runtime blocks a thread: it
//! parks the caller on a [`CountDownLatch`] until the root fiber exits.
//! Do not call it from inside an effect running on the same pool.
//!
//! # Example
//!
//! ```rust,ignore
//! use strand_runtime::{Effect, Runtime, RuntimeConfig};
//!
//! let runtime = Runtime::new(&RuntimeConfig::builder().num_workers(2).build()?)?;
//! let exit = runtime.unsafe_run_sync(Effect::succeed(|| 6 * 7));
//! assert_eq!(exit.into_result().ok(), Some(42));
//! ```

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;

use crate::cause::{Cause, Exit};
use crate::config::{ConfigError, RuntimeConfig};
use crate::effect::Effect;
use crate::executor::{Executor, Immediate, ThreadPool};
use crate::fiber::Fiber;
use crate::fiber_context::FiberContext;
use crate::node::{AnyValue, Value};
use crate::panic::catch_defect;
use crate::sync::CountDownLatch;

/// Runs effects on an execution context.
pub struct Runtime {
    executor: Arc<dyn Executor>,
}

impl Runtime {
    /// Build a runtime backed by a new thread pool.
    pub fn new(config: &RuntimeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let pool = ThreadPool::new(&config.executor)?;
        Ok(Self::with_executor(Arc::new(pool)))
    }

    /// Build a runtime on an existing execution context.
    pub fn with_executor(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }

    /// The process-wide runtime, configured from `STRAND_*` variables on
    /// first use.
    pub fn global() -> &'static Runtime {
        static GLOBAL: OnceLock<Runtime> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            let config = RuntimeConfig::from_env();
            Runtime::new(&config).unwrap_or_else(|err| {
                tracing::error!(error = %err, "falling back to the immediate executor");
                Runtime::with_executor(Arc::new(Immediate))
            })
        })
    }

    /// The execution context root fibers start on.
    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    /// Start `effect` on a new root fiber and return its handle.
    pub fn fork<A: Value>(&self, effect: Effect<A>) -> Fiber<A> {
        let context = self.root(effect);
        context.start();
        Fiber::new(context)
    }

    /// Start `effect` and call `callback` with its exit. Never blocks.
    pub fn unsafe_run_async<A, F>(&self, effect: Effect<A>, callback: F) -> Fiber<A>
    where
        A: Value,
        F: FnOnce(Exit<A>) + Send + 'static,
    {
        let context = self.root(effect);
        let callback = Mutex::new(Some(callback));
        context.await_exit(Arc::new(move |exit: &Exit<AnyValue>| {
            if let Some(callback) = callback.lock().take() {
                let exit = exit.clone().recover();
                let _ = catch_defect(|| callback(exit));
            }
        }));
        context.start();
        Fiber::new(context)
    }

    /// Run `effect` and block until it exits.
    pub fn unsafe_run_sync<A: Value>(&self, effect: Effect<A>) -> Exit<A> {
        let (latch, slot) = self.submit(effect);
        latch.wait();
        let exit = slot.lock().take();
        exit.unwrap_or_else(|| Exit::Failure(Cause::die("root fiber finished without an exit")))
    }

    /// Run `effect` and block until it exits or `timeout` expires.
    ///
    /// Returns `None` on timeout; the fiber keeps running.
    pub fn unsafe_run_sync_timeout<A: Value>(
        &self,
        effect: Effect<A>,
        timeout: Duration,
    ) -> Option<Exit<A>> {
        let (latch, slot) = self.submit(effect);
        if !latch.wait_timeout(timeout) {
            tracing::debug!(?timeout, "gave up waiting for root fiber");
            return None;
        }
        let exit = slot.lock().take();
        exit
    }

    fn submit<A: Value>(&self, effect: Effect<A>) -> (Arc<CountDownLatch>, Arc<Mutex<Option<Exit<A>>>>) {
        let latch = Arc::new(CountDownLatch::new(1));
        let slot = Arc::new(Mutex::new(None));
        {
            let latch = latch.clone();
            let slot = slot.clone();
            self.unsafe_run_async(effect, move |exit| {
                *slot.lock() = Some(exit);
                latch.count_down();
            });
        }
        (latch, slot)
    }

    fn root<A: Value>(&self, effect: Effect<A>) -> Arc<FiberContext> {
        FiberContext::new(effect.into_node(), self.executor.clone(), Vec::new())
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("executor", &self.executor.name())
            .finish()
    }
}
