//! # Effect Nodes
//!
//! The closed set of effect-description variants, in type-erased form. The
//! public, typed view is [`crate::effect::Effect`]; this module is what the
//! interpreter in [`crate::fiber_context`] matches on.
//!
//! Nodes are immutable once built and shared through `Arc`, so one
//! description can be interpreted any number of times, by any number of
//! fibers.

use std::any::Any;
use std::fmt;
use std::mem;
use std::sync::{Arc, OnceLock};

use crate::cause::{Cause, Defect, Exit};
use crate::continuation::{Continuation, FoldHandler};
use crate::executor::Executor;
use crate::interrupt::InterruptStatus;

/// Values that can flow through an effect.
///
/// Blanket-implemented for every `Clone + Send + Sync + 'static` type.
pub trait Value: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Value for T {}

/// A value with its type erased.
pub(crate) type AnyValue = Arc<dyn Any + Send + Sync>;

/// Completion function handed to an asynchronous registration.
pub(crate) type Resume = Box<dyn FnOnce(AnyValue) + Send>;

pub(crate) fn erase<A: Value>(value: A) -> AnyValue {
    Arc::new(value)
}

/// Recover a typed value. A mismatch can only come from a runtime bug, so it
/// is reported as a defect rather than a panic.
pub(crate) fn recover<A: Value>(value: AnyValue) -> Result<A, Cause> {
    match value.downcast::<A>() {
        Ok(shared) => Ok(Arc::try_unwrap(shared).unwrap_or_else(|shared| (*shared).clone())),
        Err(_) => Err(Cause::Die(Defect::type_mismatch::<A>())),
    }
}

impl Exit<AnyValue> {
    pub(crate) fn recover<A: Value>(self) -> Exit<A> {
        match self {
            Exit::Success(value) => recover(value).into(),
            Exit::Failure(cause) => Exit::Failure(cause),
        }
    }
}

/// An effect-description node.
pub(crate) enum Node {
    /// Already-known value.
    Succeed(AnyValue),
    /// Deferred computation.
    Sync(Arc<dyn Fn() -> AnyValue + Send + Sync>),
    /// Run `effect`, feed its value to `continuation`.
    FlatMap {
        effect: Arc<Node>,
        continuation: Continuation,
    },
    /// Suspend until an external callback supplies the value.
    Async(Arc<dyn Fn(Resume) + Send + Sync>),
    /// Start `effect` on a new fiber.
    Fork(Arc<Node>),
    /// Short-circuit with a cause.
    Fail(Arc<dyn Fn() -> Cause + Send + Sync>),
    /// Structured failure/success handler around `effect`.
    Fold {
        effect: Arc<Node>,
        handler: Arc<FoldHandler>,
    },
    /// Switch the execution context of subsequent steps.
    Shift(Arc<dyn Executor>),
    /// Run `effect` with the given interrupt status.
    SetInterruptStatus {
        effect: Arc<Node>,
        status: InterruptStatus,
    },
    /// Run `effect` with `environment` on top of the environment stack.
    Provide {
        effect: Arc<Node>,
        environment: AnyValue,
    },
    /// Read the current environment and continue.
    Access(Continuation),
}

impl Node {
    pub(crate) fn succeed_now(value: AnyValue) -> Arc<Node> {
        Arc::new(Node::Succeed(value))
    }

    pub(crate) fn unit() -> Arc<Node> {
        Node::succeed_now(erase(()))
    }

    pub(crate) fn sync<F>(f: F) -> Arc<Node>
    where
        F: Fn() -> AnyValue + Send + Sync + 'static,
    {
        Arc::new(Node::Sync(Arc::new(f)))
    }

    pub(crate) fn fail_now(cause: Cause) -> Arc<Node> {
        Arc::new(Node::Fail(Arc::new(move || cause.clone())))
    }

    /// Run `first`, discard its value, then run `next`.
    pub(crate) fn then(first: Arc<Node>, next: Arc<Node>) -> Arc<Node> {
        Arc::new(Node::FlatMap {
            effect: first,
            continuation: Continuation::constant(next),
        })
    }

    /// Run `finalizer` after `effect` on every exit path, then re-raise the
    /// cause or re-return the value.
    pub(crate) fn ensuring(effect: Arc<Node>, finalizer: Arc<Node>) -> Arc<Node> {
        Arc::new(Node::Fold {
            effect,
            handler: Node::finalizer(finalizer),
        })
    }

    /// Fold handler that runs `finalizer` and passes the outcome through.
    pub(crate) fn finalizer(finalizer: Arc<Node>) -> Arc<FoldHandler> {
        let on_failure = finalizer.clone();
        FoldHandler::new(
            move |cause| Node::then(on_failure.clone(), Node::fail_now(cause)),
            move |value| Node::then(finalizer.clone(), Node::succeed_now(value)),
        )
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Node::Succeed(_) => "succeed",
            Node::Sync(_) => "sync",
            Node::FlatMap { .. } => "flat_map",
            Node::Async(_) => "async",
            Node::Fork(_) => "fork",
            Node::Fail(_) => "fail",
            Node::Fold { .. } => "fold",
            Node::Shift(_) => "shift",
            Node::SetInterruptStatus { .. } => "set_interrupt_status",
            Node::Provide { .. } => "provide",
            Node::Access(_) => "access",
        }
    }

    /// Detach the directly nested node, if any.
    fn take_child(&mut self) -> Option<Arc<Node>> {
        match self {
            Node::FlatMap { effect, .. }
            | Node::Fork(effect)
            | Node::Fold { effect, .. }
            | Node::SetInterruptStatus { effect, .. }
            | Node::Provide { effect, .. } => Some(mem::replace(effect, placeholder())),
            _ => None,
        }
    }
}

/// Shared stand-in used while tearing down nested nodes.
fn placeholder() -> Arc<Node> {
    static PLACEHOLDER: OnceLock<Arc<Node>> = OnceLock::new();
    PLACEHOLDER.get_or_init(Node::unit).clone()
}

// Left-nested descriptions can be arbitrarily deep; unlink them iteratively
// so dropping one never recurses on the native stack.
impl Drop for Node {
    fn drop(&mut self) {
        let Some(child) = self.take_child() else {
            return;
        };
        let mut pending = vec![child];
        while let Some(node) = pending.pop() {
            if let Ok(mut node) = Arc::try_unwrap(node) {
                if let Some(child) = node.take_child() {
                    pending.push(child);
                }
            }
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node::{}", self.kind())
    }
}
