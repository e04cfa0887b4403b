//! # Fiber Handles
//!
//! A [`Fiber`] is the externally visible handle to a running computation,
//! produced by `Effect::fork` or by the runtime entry points. Every
//! operation on it is itself an effect, except [`Fiber::poll`], which only
//! inspects the current state.
//!
//! The handle is cheap to clone; its identity is the underlying fiber
//! context, which is released once the fiber is done and no handle refers
//! to it.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cause::Exit;
use crate::effect::{Callback, Effect};
use crate::fiber_context::FiberContext;
use crate::node::{AnyValue, Value};

/// Unique identifier for a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FiberId(pub u64);

impl FiberId {
    /// Create a new fiber ID.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fiber({})", self.0)
    }
}

/// Global fiber ID counter.
static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a new unique fiber ID.
pub fn next_fiber_id() -> FiberId {
    FiberId(NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed))
}

/// A handle to a running (or finished) fiber producing an `A`.
pub struct Fiber<A> {
    context: Arc<FiberContext>,
    _marker: PhantomData<fn() -> A>,
}

impl<A: Value> Fiber<A> {
    pub(crate) fn new(context: Arc<FiberContext>) -> Self {
        Self {
            context,
            _marker: PhantomData,
        }
    }

    /// The fiber's identifier.
    pub fn id(&self) -> FiberId {
        self.context.id()
    }

    /// Wait for the fiber to finish and produce its exit, whatever it is.
    pub fn await_exit(&self) -> Effect<Exit<A>> {
        let context = self.context.clone();
        Effect::async_effect(move |callback: Callback<Exit<A>>| {
            let callback = Mutex::new(Some(callback));
            context.await_exit(Arc::new(move |exit: &Exit<AnyValue>| {
                if let Some(callback) = callback.lock().take() {
                    callback.complete(exit.clone().recover());
                }
            }));
        })
    }

    /// Wait for the fiber and continue with its value, or fail with its
    /// cause.
    pub fn join(&self) -> Effect<A> {
        self.await_exit().flat_map(Effect::from_exit)
    }

    /// Request interruption. Returns immediately; it does not wait for the
    /// fiber to stop.
    pub fn interrupt(&self) -> Effect<()> {
        let context = self.context.clone();
        Effect::succeed(move || context.interrupt())
    }

    /// The exit, if the fiber is already done.
    pub fn poll(&self) -> Option<Exit<A>> {
        self.context.poll().map(|exit| exit.recover())
    }

    /// Check if the fiber is done.
    pub fn is_done(&self) -> bool {
        self.context.poll().is_some()
    }
}

impl<A> Clone for Fiber<A> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A> fmt::Debug for Fiber<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Fiber").field(&self.context.id()).finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cause::Cause;
    use crate::executor::Immediate;
    use crate::runtime::Runtime;

    fn immediate() -> Runtime {
        Runtime::with_executor(Arc::new(Immediate))
    }

    #[test]
    fn test_fiber_id_generation() {
        let id1 = next_fiber_id();
        let id2 = next_fiber_id();
        assert_ne!(id1, id2);
        assert!(id2.0 > id1.0);
        assert_eq!(FiberId::new(9).as_u64(), 9);
        assert_eq!(FiberId::new(9).to_string(), "Fiber(9)");
    }

    #[test]
    fn test_poll_finished_fiber() {
        let fiber = immediate().fork(Effect::succeed_now(5));
        assert!(fiber.is_done());
        assert_eq!(fiber.poll().and_then(|exit| exit.into_result().ok()), Some(5));
    }

    #[test]
    fn test_poll_suspended_fiber() {
        let fiber = immediate().fork(Effect::<i32>::async_effect(|_callback| {}));
        assert!(!fiber.is_done());
        assert!(fiber.poll().is_none());
    }

    #[test]
    fn test_join_reraises_failure() {
        let runtime = immediate();
        let effect = Effect::<i32>::fail(|| "boom")
            .fork()
            .flat_map(|fiber| fiber.join());
        let exit = runtime.unsafe_run_sync(effect);
        assert!(exit.cause().is_some_and(Cause::is_fail));
    }

    #[test]
    fn test_await_exit_reports_failure_as_value() {
        let runtime = immediate();
        let effect = Effect::<i32>::die("bug")
            .fork()
            .flat_map(|fiber| fiber.await_exit());
        let exit = runtime.unsafe_run_sync(effect).into_result().unwrap();
        assert!(exit.cause().is_some_and(Cause::is_die));
    }

    #[test]
    fn test_deep_join_chain_on_immediate() {
        fn chain(depth: u32) -> Effect<u32> {
            if depth == 0 {
                return Effect::succeed_now(0);
            }
            Effect::defer(move || chain(depth - 1))
                .fork()
                .flat_map(|fiber| fiber.join())
                .map(|n| n + 1)
        }
        let exit = immediate().unsafe_run_sync(chain(20_000));
        assert_eq!(exit.into_result().ok(), Some(20_000));
    }

    #[test]
    fn test_fiber_debug_shows_id() {
        let fiber = immediate().fork(Effect::unit());
        assert_eq!(format!("{:?}", fiber), format!("Fiber({:?})", fiber.id()));
    }
}
