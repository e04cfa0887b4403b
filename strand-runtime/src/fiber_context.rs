//! # Fiber Context
//!
//! The engine behind every [`Fiber`](crate::fiber::Fiber): an interpreter
//! loop over effect nodes, plus the state that joiners synchronize on.
//!
//! ## Interpreter
//!
//! The loop keeps a *current node* and an explicit continuation stack. It
//! never recurses, so sequencing of any length runs in bounded native stack.
//! A batch ends when the fiber completes or suspends at an asynchronous
//! boundary; the resume callback later re-enters the loop on whatever thread
//! calls it. If the callback fires while the registration is still running,
//! the value is handed back to the running loop instead.
//!
//! Loops never nest on one thread. A batch that would start while another
//! loop is running on the same thread (a joiner woken by a completing child,
//! a fork or shift onto an inline executor) is queued behind it, and the
//! outermost loop drains the queue once it returns.
//!
//! Before each step the loop polls the interruption flags. When an interrupt
//! takes effect, the pending node is pushed as a one-shot continuation and an
//! `Interrupt` failure takes its place, so it unwinds like any failure and
//! reaches the nearest fold handler.
//!
//! ## Completion
//!
//! The only state shared with other fibers is the `Running`/`Done` cell. It
//! is an epoch-managed atomic pointer to an immutable snapshot and changes
//! only through compare-and-swap:
//!
//! - `complete`: swap `Running(observers)` for `Done(exit)`, then notify the
//!   observers in registration order. Completing twice is a fatal bug.
//! - `await_exit`: swap in a copy of the observer list with one more entry,
//!   or call the observer right away if the fiber is already done.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crossbeam_epoch::{self as epoch, Atomic, Owned};
use parking_lot::Mutex;

use crate::cause::{Cause, Defect, Exit};
use crate::continuation::{Continuation, FoldHandler, Frame};
use crate::executor::Executor;
use crate::fiber::{next_fiber_id, FiberId};
use crate::interrupt::InterruptFlags;
use crate::node::{erase, AnyValue, Node, Resume};
use crate::panic::catch_defect;

/// Called once with the fiber's exit.
pub(crate) type Observer = Arc<dyn Fn(&Exit<AnyValue>) + Send + Sync>;

/// Snapshot stored in the atomic state cell.
enum FiberState {
    /// Still running; observers wait for the exit.
    Running(Vec<Observer>),
    /// Finished.
    Done(Exit<AnyValue>),
}

/// Outcome of interpreting a single node.
enum Step {
    /// Interpret this node next.
    Next(Arc<Node>),
    /// A value was produced; continue with the top of the stack.
    Value(AnyValue),
    /// A cause was raised; unwind to the nearest fold handler.
    Fail(Cause),
    /// The batch ends here; someone else resumes the fiber.
    Suspend,
}

/// The interpreter state of one fiber.
pub(crate) struct FiberContext {
    /// Unique identifier.
    id: FiberId,
    /// `Running`/`Done` cell, never null.
    state: Atomic<FiberState>,
    /// Interruption flags.
    interrupt: InterruptFlags,
    /// Environment stack; the top is the current environment.
    environment: Mutex<Vec<AnyValue>>,
    /// Current execution context.
    executor: Mutex<Arc<dyn Executor>>,
    /// Seed effect, taken by `start`.
    effect: Mutex<Option<Arc<Node>>>,
}

impl FiberContext {
    pub(crate) fn new(
        effect: Arc<Node>,
        executor: Arc<dyn Executor>,
        environment: Vec<AnyValue>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: next_fiber_id(),
            state: Atomic::new(FiberState::Running(Vec::new())),
            interrupt: InterruptFlags::new(),
            environment: Mutex::new(environment),
            executor: Mutex::new(executor),
            effect: Mutex::new(Some(effect)),
        })
    }

    pub(crate) fn id(&self) -> FiberId {
        self.id
    }

    fn executor(&self) -> Arc<dyn Executor> {
        self.executor.lock().clone()
    }

    /// Submit the first batch of interpretation to the execution context.
    /// Later calls do nothing.
    ///
    /// A root fiber drains on its own queue if it starts inline, so a caller
    /// blocking on it from inside another loop does not wait on itself.
    pub(crate) fn start(self: &Arc<Self>) {
        self.launch(true);
    }

    fn launch(self: &Arc<Self>, root: bool) {
        let Some(effect) = self.effect.lock().take() else {
            return;
        };
        let executor = self.executor();
        tracing::debug!(fiber = %self.id, executor = executor.name(), "fiber started");

        let batch = Batch::new(self.clone(), effect, Vec::new());
        executor.execute(Box::new(move || batch.run(root)));
    }

    /// Request interruption.
    pub(crate) fn interrupt(&self) {
        if self.interrupt.request() {
            tracing::debug!(fiber = %self.id, "interruption requested");
        }
    }

    // ------------------------------------------------------------------------
    // Completion and join
    // ------------------------------------------------------------------------

    /// Move from `Running` to `Done` and notify every observer.
    ///
    /// # Panics
    ///
    /// Panics if the fiber is already done.
    pub(crate) fn complete(&self, exit: Exit<AnyValue>) {
        let observers = {
            let guard = &epoch::pin();
            let mut done = Owned::new(FiberState::Done(exit.clone()));
            loop {
                let current = self.state.load(Ordering::Acquire, guard);
                // SAFETY: the cell is never null, and snapshots are only
                // reclaimed through the epoch once they have been replaced.
                let observers = match unsafe { current.deref() } {
                    FiberState::Running(observers) => observers.clone(),
                    FiberState::Done(_) => panic!("{} completed more than once", self.id),
                };
                match self.state.compare_exchange(
                    current,
                    done,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                    guard,
                ) {
                    Ok(_) => {
                        // SAFETY: `current` is unlinked and no longer reachable.
                        unsafe { guard.defer_destroy(current) };
                        break observers;
                    }
                    Err(err) => done = err.new,
                }
            }
        };

        tracing::debug!(
            fiber = %self.id,
            success = exit.is_success(),
            observers = observers.len(),
            "fiber completed"
        );

        for observer in observers {
            observer(&exit);
        }
    }

    /// Register an observer, or call it immediately if already done.
    pub(crate) fn await_exit(&self, observer: Observer) {
        let finished = {
            let guard = &epoch::pin();
            loop {
                let current = self.state.load(Ordering::Acquire, guard);
                // SAFETY: see `complete`.
                let next = match unsafe { current.deref() } {
                    FiberState::Done(exit) => break exit.clone(),
                    FiberState::Running(observers) => {
                        let mut observers = observers.clone();
                        observers.push(observer.clone());
                        Owned::new(FiberState::Running(observers))
                    }
                };
                if self
                    .state
                    .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire, guard)
                    .is_ok()
                {
                    // SAFETY: `current` is unlinked and no longer reachable.
                    unsafe { guard.defer_destroy(current) };
                    return;
                }
            }
        };

        observer(&finished);
    }

    /// The exit, if done.
    pub(crate) fn poll(&self) -> Option<Exit<AnyValue>> {
        let guard = &epoch::pin();
        let current = self.state.load(Ordering::Acquire, guard);
        // SAFETY: see `complete`.
        match unsafe { current.deref() } {
            FiberState::Done(exit) => Some(exit.clone()),
            FiberState::Running(_) => None,
        }
    }

    // ------------------------------------------------------------------------
    // Interpreter
    // ------------------------------------------------------------------------

    fn run_loop(self: &Arc<Self>, mut current: Arc<Node>, mut stack: Vec<Frame>) {
        loop {
            if self.interrupt.should_interrupt() {
                self.interrupt.begin_finalizing();
                tracing::debug!(fiber = %self.id, pending = current.kind(), "interruption taking effect");
                stack.push(Frame::Apply(Continuation::constant(current)));
                current = Node::fail_now(Cause::Interrupt);
            }

            match self.step(&current, &mut stack) {
                Step::Next(node) => current = node,
                Step::Value(value) => match stack.pop() {
                    Some(frame) => {
                        tracing::trace!(fiber = %self.id, depth = stack.len(), "pop continuation");
                        current = guarded(|| frame.resume(value));
                    }
                    None => {
                        self.complete(Exit::Success(value));
                        return;
                    }
                },
                Step::Fail(cause) => match unwind(&mut stack) {
                    Some(handler) => current = guarded(|| handler.recover(cause)),
                    None => {
                        self.complete(Exit::Failure(cause));
                        return;
                    }
                },
                Step::Suspend => return,
            }
        }
    }

    fn step(self: &Arc<Self>, node: &Node, stack: &mut Vec<Frame>) -> Step {
        match node {
            Node::Succeed(value) => Step::Value(value.clone()),

            Node::Sync(thunk) => match catch_defect(|| thunk()) {
                Ok(value) => Step::Value(value),
                Err(defect) => Step::Fail(Cause::Die(defect)),
            },

            Node::FlatMap {
                effect,
                continuation,
            } => {
                stack.push(Frame::Apply(continuation.clone()));
                tracing::trace!(fiber = %self.id, depth = stack.len(), "push continuation");
                Step::Next(effect.clone())
            }

            Node::Fold { effect, handler } => {
                stack.push(Frame::Fold(handler.clone()));
                tracing::trace!(fiber = %self.id, depth = stack.len(), "push fold handler");
                Step::Next(effect.clone())
            }

            Node::Fail(cause) => match catch_defect(|| cause()) {
                Ok(cause) => Step::Fail(cause),
                Err(defect) => Step::Fail(Cause::Die(defect)),
            },

            Node::Async(register) => self.suspend(register.as_ref(), stack),

            Node::Fork(effect) => {
                let child = FiberContext::new(
                    effect.clone(),
                    self.executor(),
                    self.environment.lock().clone(),
                );
                tracing::debug!(parent = %self.id, child = %child.id, "fiber forked");
                child.launch(false);
                Step::Value(erase(child))
            }

            Node::Shift(executor) => {
                *self.executor.lock() = executor.clone();
                tracing::trace!(fiber = %self.id, executor = executor.name(), "shifted execution context");

                let batch = Batch::new(self.clone(), Node::unit(), mem::take(stack));
                executor.execute(Box::new(move || batch.run(false)));
                Step::Suspend
            }

            // The restorer goes on the stack in the same step as the state
            // change, so an interrupt at the next check unwinds through it.
            Node::SetInterruptStatus { effect, status } => {
                let previous = self.interrupt.set_status(*status);
                let fiber = self.clone();
                let restore = Node::sync(move || {
                    fiber.interrupt.set_status(previous);
                    erase(())
                });
                stack.push(Frame::Fold(Node::finalizer(restore)));
                Step::Next(effect.clone())
            }

            Node::Provide {
                effect,
                environment,
            } => {
                self.environment.lock().push(environment.clone());
                let fiber = self.clone();
                let restore = Node::sync(move || {
                    fiber.environment.lock().pop();
                    erase(())
                });
                stack.push(Frame::Fold(Node::finalizer(restore)));
                Step::Next(effect.clone())
            }

            Node::Access(continuation) => {
                let environment = self.environment.lock().last().cloned();
                match environment {
                    Some(environment) => Step::Next(guarded(|| continuation.apply(environment))),
                    None => Step::Fail(Cause::Die(Defect::missing_environment())),
                }
            }
        }
    }

    /// Hand `register` a resume callback and end the batch, unless the
    /// callback fired before `register` returned.
    fn suspend(self: &Arc<Self>, register: &(dyn Fn(Resume) + Send + Sync), stack: &mut Vec<Frame>) -> Step {
        let suspension = Arc::new(Suspension::new());
        let resume: Resume = {
            let fiber = self.clone();
            let suspension = suspension.clone();
            Box::new(move |value| suspension.resume(&fiber, value))
        };

        if let Err(defect) = catch_defect(|| register(resume)) {
            suspension.abandon();
            return Step::Fail(Cause::Die(defect));
        }

        match suspension.park(mem::take(stack)) {
            Parked::Suspended => {
                tracing::trace!(fiber = %self.id, "suspended at async boundary");
                Step::Suspend
            }
            Parked::Resumed(parked, value) => {
                *stack = parked;
                Step::Value(value)
            }
        }
    }

    /// Re-enter the loop with a value after a suspension.
    ///
    /// On a thread that is already running a loop, the fiber goes back to
    /// its own execution context instead.
    fn resume(self: &Arc<Self>, value: AnyValue, stack: Vec<Frame>) {
        tracing::trace!(fiber = %self.id, depth = stack.len(), "resumed");
        let batch = Batch::new(self.clone(), Node::succeed_now(value), stack);
        if Batch::draining() {
            self.executor().execute(Box::new(move || batch.run(false)));
        } else {
            batch.run(false);
        }
    }

    #[cfg(test)]
    fn interrupt_status(&self) -> crate::interrupt::InterruptStatus {
        self.interrupt.status()
    }
}

impl Drop for FiberContext {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no other thread can reach the cell.
        unsafe {
            let current = self.state.load(Ordering::Relaxed, epoch::unprotected());
            if !current.is_null() {
                drop(current.into_owned());
            }
        }
    }
}

impl fmt::Debug for FiberContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberContext")
            .field("id", &self.id)
            .field("done", &self.poll().is_some())
            .field("interrupt", &self.interrupt)
            .finish()
    }
}

/// Pop frames until a fold handler is found. Plain continuations only apply
/// to values, so they are dropped unevaluated.
fn unwind(stack: &mut Vec<Frame>) -> Option<Arc<FoldHandler>> {
    while let Some(frame) = stack.pop() {
        if let Frame::Fold(handler) = frame {
            return Some(handler);
        }
    }
    None
}

/// Run user code that produces the next node, turning a panic into a `Die`.
fn guarded(f: impl FnOnce() -> Arc<Node>) -> Arc<Node> {
    catch_defect(f).unwrap_or_else(|defect| Node::fail_now(Cause::Die(defect)))
}

thread_local! {
    /// Batches waiting behind the loop running on this thread, if any.
    static PENDING: RefCell<Option<VecDeque<Batch>>> = RefCell::new(None);
}

/// A slice of a fiber's run: the node to interpret and the stack under it.
struct Batch {
    fiber: Arc<FiberContext>,
    current: Arc<Node>,
    stack: Vec<Frame>,
}

impl Batch {
    fn new(fiber: Arc<FiberContext>, current: Arc<Node>, stack: Vec<Frame>) -> Self {
        Self {
            fiber,
            current,
            stack,
        }
    }

    /// Whether a loop is running on this thread.
    fn draining() -> bool {
        PENDING.with(|pending| pending.borrow().is_some())
    }

    /// Run on this thread, or queue behind the loop already running here.
    /// An `isolated` batch always drains on a fresh queue of its own.
    fn run(self, isolated: bool) {
        let mut next = Some(self);
        let outer = PENDING.with(|pending| {
            let mut pending = pending.borrow_mut();
            if !isolated {
                if let Some(queue) = pending.as_mut() {
                    queue.extend(next.take());
                    return None;
                }
            }
            Some(pending.replace(VecDeque::new()))
        });
        let Some(outer) = outer else {
            return;
        };

        let _scope = DrainScope { outer };
        while let Some(batch) = next {
            batch.fiber.run_loop(batch.current, batch.stack);
            next = PENDING.with(|pending| pending.borrow_mut().as_mut().and_then(VecDeque::pop_front));
        }
    }
}

/// Puts back the enclosing queue when a drain ends, even by unwinding.
struct DrainScope {
    outer: Option<VecDeque<Batch>>,
}

impl Drop for DrainScope {
    fn drop(&mut self) {
        let outer = self.outer.take();
        PENDING.with(|pending| *pending.borrow_mut() = outer);
    }
}

const REGISTERING: u8 = 0;
const SUSPENDED: u8 = 1;
const RESUMED: u8 = 2;
const ABANDONED: u8 = 3;

enum Parked {
    Suspended,
    Resumed(Vec<Frame>, AnyValue),
}

/// Rendezvous between a loop suspending at an async boundary and the
/// callback that resumes it.
struct Suspension {
    state: AtomicU8,
    value: Mutex<Option<AnyValue>>,
    stack: Mutex<Option<Vec<Frame>>>,
}

impl Suspension {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(REGISTERING),
            value: Mutex::new(None),
            stack: Mutex::new(None),
        }
    }

    /// Called by the loop once `register` has returned.
    fn park(&self, stack: Vec<Frame>) -> Parked {
        *self.stack.lock() = Some(stack);
        match self
            .state
            .compare_exchange(REGISTERING, SUSPENDED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Parked::Suspended,
            Err(_) => {
                let stack = self.stack.lock().take().unwrap_or_default();
                match self.value.lock().take() {
                    Some(value) => Parked::Resumed(stack, value),
                    None => Parked::Suspended,
                }
            }
        }
    }

    /// Called by the resume callback.
    fn resume(&self, fiber: &Arc<FiberContext>, value: AnyValue) {
        *self.value.lock() = Some(value);
        if self
            .state
            .compare_exchange(REGISTERING, RESUMED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            // Still inside `register`: the loop picks the value up.
            return;
        }
        if self
            .state
            .compare_exchange(SUSPENDED, RESUMED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let stack = self.stack.lock().take();
        let value = self.value.lock().take();
        if let (Some(stack), Some(value)) = (stack, value) {
            fiber.resume(value, stack);
        }
    }

    fn abandon(&self) {
        self.state.store(ABANDONED, Ordering::Release);
    }
}

// ============================================================================
// Tests
// ============================================================================
