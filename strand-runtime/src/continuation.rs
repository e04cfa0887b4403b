//! # Type-Erased Continuations
//!
//! The interpreter keeps an explicit stack of "what to do with the value once
//! it is known" instead of using the native call stack. Effects of many
//! different value types share that stack, so every entry is type-erased: it
//! takes an untyped value and produces the next node to interpret. Typed
//! call sites in [`crate::effect`] recover the concrete type before calling
//! user code.
//!
//! ## Frames
//!
//! - [`Frame::Apply`]: a plain continuation pushed by sequencing. It only runs
//!   on the success path and is discarded unevaluated while a failure unwinds.
//! - [`Frame::Fold`]: a handler pushed by a fold node. It carries both a
//!   failure and a success branch, and it is what failure propagation looks
//!   for.

use std::fmt;
use std::sync::Arc;

use crate::cause::Cause;
use crate::node::{AnyValue, Node};

/// A boxed continuation: apply an untyped value, produce the next node.
#[derive(Clone)]
pub(crate) struct Continuation(Arc<dyn Fn(AnyValue) -> Arc<Node> + Send + Sync>);

impl Continuation {
    pub(crate) fn new<F>(f: F) -> Self
    where
        F: Fn(AnyValue) -> Arc<Node> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// A continuation that ignores its input and yields `node`.
    pub(crate) fn constant(node: Arc<Node>) -> Self {
        Self::new(move |_| node.clone())
    }

    pub(crate) fn apply(&self, value: AnyValue) -> Arc<Node> {
        (self.0)(value)
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Continuation")
    }
}

/// Both branches of a fold node.
pub(crate) struct FoldHandler {
    on_failure: Arc<dyn Fn(Cause) -> Arc<Node> + Send + Sync>,
    on_success: Continuation,
}

impl FoldHandler {
    pub(crate) fn new<F, S>(on_failure: F, on_success: S) -> Arc<Self>
    where
        F: Fn(Cause) -> Arc<Node> + Send + Sync + 'static,
        S: Fn(AnyValue) -> Arc<Node> + Send + Sync + 'static,
    {
        Arc::new(Self {
            on_failure: Arc::new(on_failure),
            on_success: Continuation::new(on_success),
        })
    }

    pub(crate) fn recover(&self, cause: Cause) -> Arc<Node> {
        (self.on_failure)(cause)
    }

    pub(crate) fn resume(&self, value: AnyValue) -> Arc<Node> {
        self.on_success.apply(value)
    }
}

impl fmt::Debug for FoldHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FoldHandler")
    }
}

/// An entry on a fiber's continuation stack.
#[derive(Debug, Clone)]
pub(crate) enum Frame {
    /// Success-only continuation.
    Apply(Continuation),
    /// Failure and success handler.
    Fold(Arc<FoldHandler>),
}

impl Frame {
    /// Continue with a successful value.
    pub(crate) fn resume(&self, value: AnyValue) -> Arc<Node> {
        match self {
            Frame::Apply(k) => k.apply(value),
            Frame::Fold(handler) => handler.resume(value),
        }
    }
}
