//! # Effect Descriptions
//!
//! [`Effect<A>`] is an immutable description of a computation that, when
//! interpreted by a fiber, either produces an `A` or fails with a
//! [`Cause`]. Building an effect never runs anything; every constructor and
//! combinator here is a pure function from descriptions to descriptions.
//!
//! ## Building blocks
//!
//! | Constructor | Meaning |
//! |---|---|
//! | [`Effect::succeed_now`] | an already known value |
//! | [`Effect::succeed`] | a deferred computation |
//! | [`Effect::async_effect`] | a value supplied later by a callback |
//! | [`Effect::fail`] / [`Effect::die`] | short-circuit with a cause |
//! | [`Effect::environment`] | read the provided environment |
//!
//! Everything else (`map`, `zip_par`, `catch_all`, `ensuring`, ...) is
//! assembled from the same small set of nodes.
//!
//! ## Example
//!
//! ```rust,ignore
//! use strand_runtime::{Effect, Runtime};
//!
//! let program = Effect::succeed(|| 20)
//!     .zip_par(Effect::succeed(|| 22))
//!     .map(|(a, b)| a + b);
//!
//! let exit = Runtime::global().unsafe_run_sync(program);
//! assert_eq!(exit.into_result().ok(), Some(42));
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::cause::{Cause, Error, Exit};
use crate::continuation::{Continuation, FoldHandler};
use crate::executor::Executor;
use crate::fiber::Fiber;
use crate::fiber_context::FiberContext;
use crate::interrupt::InterruptStatus;
use crate::node::{erase, recover, AnyValue, Node, Resume, Value};

/// A lazy, reusable description of a computation producing an `A`.
pub struct Effect<A> {
    node: Arc<Node>,
    _marker: PhantomData<fn() -> A>,
}

/// Completion handle passed to an [`Effect::async_effect`] registration.
///
/// Consumed by [`complete`](Callback::complete), so it can be invoked at
/// most once. May be called from any thread, including from inside the
/// registration itself.
pub struct Callback<A> {
    resume: Resume,
    _marker: PhantomData<fn(A)>,
}

impl<A: Value> Callback<A> {
    /// Resume the suspended fiber with `value`.
    pub fn complete(self, value: A) {
        (self.resume)(erase(value))
    }
}

impl<A> fmt::Debug for Callback<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback")
    }
}

impl<A> Effect<A> {
    fn from_node(node: Arc<Node>) -> Self {
        Self {
            node,
            _marker: PhantomData,
        }
    }

    pub(crate) fn into_node(self) -> Arc<Node> {
        self.node
    }
}

impl<A> Clone for Effect<A> {
    fn clone(&self) -> Self {
        Self::from_node(self.node.clone())
    }
}

impl<A> fmt::Debug for Effect<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Effect({})", self.node.kind())
    }
}

/// Typed continuation: recover the erased value, then call `f`.
fn typed<A, B, F>(f: F) -> impl Fn(AnyValue) -> Arc<Node> + Send + Sync + 'static
where
    A: Value,
    B: 'static,
    F: Fn(A) -> Effect<B> + Send + Sync + 'static,
{
    move |value| match recover::<A>(value) {
        Ok(value) => f(value).node,
        Err(cause) => Node::fail_now(cause),
    }
}

impl Effect<()> {
    /// An effect that succeeds with `()`.
    pub fn unit() -> Self {
        Self::from_node(Node::unit())
    }

    /// Move the rest of the fiber, and any fibers it forks, onto `executor`.
    pub fn shift(executor: Arc<dyn Executor>) -> Self {
        Self::from_node(Arc::new(Node::Shift(executor)))
    }
}

impl<A: Value> Effect<A> {
    // ------------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------------

    /// An effect that succeeds with an already computed value.
    pub fn succeed_now(value: A) -> Self {
        Self::from_node(Node::succeed_now(erase(value)))
    }

    /// An effect that calls `f` each time it is run.
    pub fn succeed<F>(f: F) -> Self
    where
        F: Fn() -> A + Send + Sync + 'static,
    {
        Self::from_node(Node::sync(move || erase(f())))
    }

    /// Build the effect to run only when it is run.
    pub fn defer<F>(f: F) -> Self
    where
        F: Fn() -> Effect<A> + Send + Sync + 'static,
    {
        Self::from_node(Arc::new(Node::FlatMap {
            effect: Node::unit(),
            continuation: Continuation::new(move |_| f().node),
        }))
    }

    /// An effect whose value is supplied later through a [`Callback`].
    ///
    /// `register` runs when the effect is interpreted. The fiber suspends
    /// until the callback is completed, on whatever thread completes it.
    pub fn async_effect<F>(register: F) -> Self
    where
        F: Fn(Callback<A>) + Send + Sync + 'static,
    {
        Self::from_node(Arc::new(Node::Async(Arc::new(move |resume: Resume| {
            register(Callback {
                resume,
                _marker: PhantomData,
            })
        }))))
    }

    /// An effect that fails with a domain error.
    pub fn fail<E, F>(f: F) -> Self
    where
        F: Fn() -> E + Send + Sync + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        Self::fail_cause(move || Cause::fail(f()))
    }

    /// An effect that fails with the cause returned by `f`.
    pub fn fail_cause<F>(f: F) -> Self
    where
        F: Fn() -> Cause + Send + Sync + 'static,
    {
        Self::from_node(Arc::new(Node::Fail(Arc::new(f))))
    }

    /// An effect that fails with an already known cause.
    pub fn fail_cause_now(cause: Cause) -> Self {
        Self::from_node(Node::fail_now(cause))
    }

    /// An effect that fails with a defect.
    pub fn die(message: impl Into<String>) -> Self {
        Self::fail_cause_now(Cause::die(message))
    }

    /// Succeed or fail according to `exit`.
    pub fn from_exit(exit: Exit<A>) -> Self {
        match exit {
            Exit::Success(value) => Self::succeed_now(value),
            Exit::Failure(cause) => Self::fail_cause_now(cause),
        }
    }

    /// The innermost environment of type `A` provided around this effect.
    pub fn environment() -> Self {
        Self::access_effect(Self::succeed_now)
    }

    /// Read the environment as an `R` and continue with `f`.
    ///
    /// Dies if no environment is provided, or if the innermost one is not
    /// an `R`.
    pub fn access_effect<R, F>(f: F) -> Self
    where
        R: Value,
        F: Fn(R) -> Effect<A> + Send + Sync + 'static,
    {
        Self::from_node(Arc::new(Node::Access(Continuation::new(typed(f)))))
    }

    /// Read the environment as an `R` and map it.
    pub fn access<R, F>(f: F) -> Self
    where
        R: Value,
        F: Fn(R) -> A + Send + Sync + 'static,
    {
        Self::access_effect(move |env: R| Effect::succeed_now(f(env)))
    }

    // ------------------------------------------------------------------------
    // Sequencing
    // ------------------------------------------------------------------------

    /// Run this effect, then the one `f` builds from its value.
    pub fn flat_map<B, F>(self, f: F) -> Effect<B>
    where
        B: Value,
        F: Fn(A) -> Effect<B> + Send + Sync + 'static,
    {
        Effect::from_node(Arc::new(Node::FlatMap {
            effect: self.node,
            continuation: Continuation::new(typed(f)),
        }))
    }

    /// Transform the value.
    pub fn map<B, F>(self, f: F) -> Effect<B>
    where
        B: Value,
        F: Fn(A) -> B + Send + Sync + 'static,
    {
        self.flat_map(move |a| Effect::succeed_now(f(a)))
    }

    /// Replace the value with `value`.
    pub fn as_value<B: Value>(self, value: B) -> Effect<B> {
        self.map(move |_| value.clone())
    }

    /// Discard the value.
    pub fn as_unit(self) -> Effect<()> {
        self.as_value(())
    }

    /// Run both effects in sequence and combine their values with `f`.
    pub fn zip_with<B, C, F>(self, that: Effect<B>, f: F) -> Effect<C>
    where
        B: Value,
        C: Value,
        F: Fn(A, B) -> C + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.flat_map(move |a| {
            let f = f.clone();
            that.clone().map(move |b| f(a.clone(), b))
        })
    }

    /// Run both effects in sequence and pair their values.
    pub fn zip<B: Value>(self, that: Effect<B>) -> Effect<(A, B)> {
        self.zip_with(that, |a, b| (a, b))
    }

    /// Run both effects in sequence, keeping the left value.
    pub fn zip_left<B: Value>(self, that: Effect<B>) -> Effect<A> {
        self.zip_with(that, |a, _| a)
    }

    /// Run both effects in sequence, keeping the right value.
    pub fn zip_right<B: Value>(self, that: Effect<B>) -> Effect<B> {
        self.flat_map(move |_| that.clone())
    }

    /// Run this effect on a new fiber while `that` runs on the current one,
    /// then pair their values.
    pub fn zip_par<B: Value>(self, that: Effect<B>) -> Effect<(A, B)> {
        self.fork().flat_map(move |fiber: Fiber<A>| {
            that.clone()
                .flat_map(move |b: B| fiber.join().map(move |a| (a, b.clone())))
        })
    }

    /// Run this effect `n` times in sequence.
    pub fn repeat(self, n: usize) -> Effect<()> {
        if n == 0 {
            return Effect::unit();
        }
        let this = self.clone();
        self.flat_map(move |_| this.clone().repeat(n - 1))
    }

    /// Run this effect again and again until it fails or is interrupted.
    pub fn forever(self) -> Self {
        let this = self.clone();
        self.flat_map(move |_| this.clone().forever())
    }

    // ------------------------------------------------------------------------
    // Failure handling
    // ------------------------------------------------------------------------

    /// Handle every outcome, including defects and interruption.
    pub fn fold_cause_effect<B, F, S>(self, on_failure: F, on_success: S) -> Effect<B>
    where
        B: Value,
        F: Fn(Cause) -> Effect<B> + Send + Sync + 'static,
        S: Fn(A) -> Effect<B> + Send + Sync + 'static,
    {
        let handler = FoldHandler::new(move |cause| on_failure(cause).node, typed(on_success));
        Effect::from_node(Arc::new(Node::Fold {
            effect: self.node,
            handler,
        }))
    }

    /// Handle domain errors and successes with effects. Defects and
    /// interruption pass through.
    pub fn fold_effect<B, F, S>(self, on_failure: F, on_success: S) -> Effect<B>
    where
        B: Value,
        F: Fn(Error) -> Effect<B> + Send + Sync + 'static,
        S: Fn(A) -> Effect<B> + Send + Sync + 'static,
    {
        self.fold_cause_effect(
            move |cause| match cause {
                Cause::Fail(error) => on_failure(error),
                other => Effect::fail_cause_now(other),
            },
            on_success,
        )
    }

    /// Map domain errors and successes to a value.
    pub fn fold<B, F, S>(self, on_failure: F, on_success: S) -> Effect<B>
    where
        B: Value,
        F: Fn(Error) -> B + Send + Sync + 'static,
        S: Fn(A) -> B + Send + Sync + 'static,
    {
        self.fold_effect(
            move |error| Effect::succeed_now(on_failure(error)),
            move |a| Effect::succeed_now(on_success(a)),
        )
    }

    /// Recover from domain errors.
    pub fn catch_all<F>(self, handler: F) -> Self
    where
        F: Fn(Error) -> Effect<A> + Send + Sync + 'static,
    {
        self.fold_effect(handler, Effect::succeed_now)
    }

    /// Run `finalizer` after this effect however it exits.
    ///
    /// A failing finalizer replaces the outcome of this effect.
    pub fn ensuring<B: Value>(self, finalizer: Effect<B>) -> Self {
        Self::from_node(Node::ensuring(self.node, finalizer.node))
    }

    // ------------------------------------------------------------------------
    // Interruption
    // ------------------------------------------------------------------------

    /// Run this effect with the given interrupt status, restoring the
    /// previous one afterwards.
    pub fn with_interrupt_status(self, status: InterruptStatus) -> Self {
        Self::from_node(Arc::new(Node::SetInterruptStatus {
            effect: self.node,
            status,
        }))
    }

    /// Defer interruption until this effect exits.
    pub fn uninterruptible(self) -> Self {
        self.with_interrupt_status(InterruptStatus::Uninterruptible)
    }

    /// Allow interruption inside this effect.
    pub fn interruptible(self) -> Self {
        self.with_interrupt_status(InterruptStatus::Interruptible)
    }

    // ------------------------------------------------------------------------
    // Environment and concurrency
    // ------------------------------------------------------------------------

    /// Run this effect with `environment` as its innermost environment.
    pub fn provide<R: Value>(self, environment: R) -> Self {
        Self::from_node(Arc::new(Node::Provide {
            effect: self.node,
            environment: erase(environment),
        }))
    }

    /// Start this effect on a new fiber and continue with its handle.
    pub fn fork(self) -> Effect<Fiber<A>> {
        Effect::<Arc<FiberContext>>::from_node(Arc::new(Node::Fork(self.node))).map(Fiber::new)
    }
}

// ============================================================================
// Tests
// ============================================================================
