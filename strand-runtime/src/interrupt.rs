//! Cooperative Interruption
//!
//! Interruption in strand is cooperative: requesting it only sets a flag, and
//! the interpreter polls that flag between steps. It never preempts a step
//! that is already running native code.
//!
//! # Flags
//!
//! Each fiber carries three independent atomic flags:
//!
//! - `requested`: has interruption been asked for
//! - `finalizing`: is the interrupt path already unwinding (finalizers are
//!   running and must not be interrupted again)
//! - `interruptible`: is the current region subject to interruption at all

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether a region of an effect may be interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InterruptStatus {
    /// Interruption takes effect at the next step (default).
    #[default]
    Interruptible,
    /// Interruption is deferred until the region exits.
    Uninterruptible,
}

impl InterruptStatus {
    /// Check if this status allows interruption.
    pub fn is_interruptible(&self) -> bool {
        matches!(self, InterruptStatus::Interruptible)
    }

    fn from_bool(interruptible: bool) -> Self {
        if interruptible {
            InterruptStatus::Interruptible
        } else {
            InterruptStatus::Uninterruptible
        }
    }
}

impl fmt::Display for InterruptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterruptStatus::Interruptible => write!(f, "interruptible"),
            InterruptStatus::Uninterruptible => write!(f, "uninterruptible"),
        }
    }
}

/// Interruption state of a single fiber.
#[derive(Debug)]
pub(crate) struct InterruptFlags {
    /// Whether interruption has been requested.
    requested: AtomicBool,
    /// Whether the interrupt path is currently unwinding.
    finalizing: AtomicBool,
    /// Whether the current region is interruptible.
    interruptible: AtomicBool,
}

impl InterruptFlags {
    pub(crate) fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
            finalizing: AtomicBool::new(false),
            interruptible: AtomicBool::new(true),
        }
    }

    /// Request interruption. Returns `true` for the first request.
    pub(crate) fn request(&self) -> bool {
        !self.requested.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub(crate) fn is_finalizing(&self) -> bool {
        self.finalizing.load(Ordering::SeqCst)
    }

    /// Check whether the next step must be replaced by an interruption.
    pub(crate) fn should_interrupt(&self) -> bool {
        self.is_requested() && self.status().is_interruptible() && !self.is_finalizing()
    }

    pub(crate) fn begin_finalizing(&self) {
        self.finalizing.store(true, Ordering::SeqCst);
    }

    pub(crate) fn status(&self) -> InterruptStatus {
        InterruptStatus::from_bool(self.interruptible.load(Ordering::SeqCst))
    }

    /// Set the interrupt status, returning the previous one.
    pub(crate) fn set_status(&self, status: InterruptStatus) -> InterruptStatus {
        InterruptStatus::from_bool(
            self.interruptible
                .swap(status.is_interruptible(), Ordering::SeqCst),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status() {
        assert_eq!(InterruptStatus::default(), InterruptStatus::Interruptible);
        assert_eq!(InterruptFlags::new().status(), InterruptStatus::Interruptible);
    }

    #[test]
    fn test_request_is_idempotent() {
        let flags = InterruptFlags::new();
        assert!(flags.request());
        assert!(!flags.request());
        assert!(flags.is_requested());
    }

    #[test]
    fn test_should_interrupt_requires_all_conditions() {
        let flags = InterruptFlags::new();
        assert!(!flags.should_interrupt());

        flags.request();
        assert!(flags.should_interrupt());

        let previous = flags.set_status(InterruptStatus::Uninterruptible);
        assert_eq!(previous, InterruptStatus::Interruptible);
        assert!(!flags.should_interrupt());

        flags.set_status(previous);
        assert!(flags.should_interrupt());

        flags.begin_finalizing();
        assert!(!flags.should_interrupt());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(InterruptStatus::Uninterruptible.to_string(), "uninterruptible");
    }
}
