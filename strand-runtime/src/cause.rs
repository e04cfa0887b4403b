//! # Causes and Exits
//!
//! Structured outcome types shared by the interpreter, fibers and callers.
//!
//! A fiber either succeeds with a value or fails with a [`Cause`]. Causes
//! come in three flavours:
//!
//! - **Fail**: an expected domain error, recoverable with `catch_all`/`fold`
//! - **Die**: a defect (a panic escaping user code), only recoverable at the
//!   cause level with `fold_cause_effect`
//! - **Interrupt**: cooperative cancellation, also only visible at the
//!   cause level
//!
//! Failures are always values. Nothing in this module panics.

use std::sync::Arc;

use thiserror::Error;

/// A recoverable domain error carried by [`Cause::Fail`].
pub type Error = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// An unexpected defect: a native panic that escaped a computation step, or
/// a broken runtime expectation such as a missing environment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct Defect {
    message: String,
}

impl Defect {
    /// Create a defect with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The defect message (the panic payload, when it was a string).
    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn type_mismatch<T>() -> Self {
        Self::new(format!(
            "expected a value of type `{}`",
            std::any::type_name::<T>()
        ))
    }

    pub(crate) fn missing_environment() -> Self {
        Self::new("no environment has been provided")
    }
}

/// The structured reason a fiber did not succeed.
#[derive(Debug, Clone, Error)]
pub enum Cause {
    /// Expected, recoverable failure.
    #[error("fail: {0}")]
    Fail(Error),
    /// Unexpected defect.
    #[error("die: {0}")]
    Die(Defect),
    /// Cooperative cancellation.
    #[error("interrupted")]
    Interrupt,
}

impl Cause {
    /// Build a `Fail` cause from anything convertible into a boxed error,
    /// including `&str` and `String`.
    pub fn fail(error: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> Self {
        Cause::Fail(Arc::from(error.into()))
    }

    /// Build a `Die` cause from a message.
    pub fn die(message: impl Into<String>) -> Self {
        Cause::Die(Defect::new(message))
    }

    /// Check if this is an expected failure.
    pub fn is_fail(&self) -> bool {
        matches!(self, Cause::Fail(_))
    }

    /// Check if this is a defect.
    pub fn is_die(&self) -> bool {
        matches!(self, Cause::Die(_))
    }

    /// Check if this is an interruption.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Cause::Interrupt)
    }

    /// The domain error, if this is a `Fail`.
    pub fn failure(&self) -> Option<&Error> {
        match self {
            Cause::Fail(error) => Some(error),
            _ => None,
        }
    }

    /// The defect, if this is a `Die`.
    pub fn defect(&self) -> Option<&Defect> {
        match self {
            Cause::Die(defect) => Some(defect),
            _ => None,
        }
    }
}

impl From<Defect> for Cause {
    fn from(defect: Defect) -> Self {
        Cause::Die(defect)
    }
}

/// The terminal outcome of a fiber.
#[derive(Debug, Clone)]
pub enum Exit<A> {
    /// The fiber produced a value.
    Success(A),
    /// The fiber failed.
    Failure(Cause),
}

impl<A> Exit<A> {
    /// Check if the exit is a success.
    pub fn is_success(&self) -> bool {
        matches!(self, Exit::Success(_))
    }

    /// Check if the exit is a failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, Exit::Failure(_))
    }

    /// The success value, if any.
    pub fn value(&self) -> Option<&A> {
        match self {
            Exit::Success(value) => Some(value),
            Exit::Failure(_) => None,
        }
    }

    /// The failure cause, if any.
    pub fn cause(&self) -> Option<&Cause> {
        match self {
            Exit::Success(_) => None,
            Exit::Failure(cause) => Some(cause),
        }
    }

    /// Transform the success value.
    pub fn map<B>(self, f: impl FnOnce(A) -> B) -> Exit<B> {
        match self {
            Exit::Success(value) => Exit::Success(f(value)),
            Exit::Failure(cause) => Exit::Failure(cause),
        }
    }

    /// Convert into a `Result`.
    pub fn into_result(self) -> Result<A, Cause> {
        match self {
            Exit::Success(value) => Ok(value),
            Exit::Failure(cause) => Err(cause),
        }
    }
}

impl<A> From<Result<A, Cause>> for Exit<A> {
    fn from(result: Result<A, Cause>) -> Self {
        match result {
            Ok(value) => Exit::Success(value),
            Err(cause) => Exit::Failure(cause),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cause_predicates() {
        assert!(Cause::fail("boom").is_fail());
        assert!(Cause::die("bug").is_die());
        assert!(Cause::Interrupt.is_interrupt());
        assert!(!Cause::Interrupt.is_fail());
    }

    #[test]
    fn test_cause_display() {
        assert_eq!(Cause::fail("boom").to_string(), "fail: boom");
        assert_eq!(Cause::die("bug").to_string(), "die: bug");
        assert_eq!(Cause::Interrupt.to_string(), "interrupted");
    }

    #[test]
    fn test_cause_accessors() {
        let cause = Cause::fail("boom");
        assert_eq!(cause.failure().map(|e| e.to_string()).as_deref(), Some("boom"));
        assert!(cause.defect().is_none());

        let cause = Cause::from(Defect::new("bug"));
        assert_eq!(cause.defect().map(Defect::message), Some("bug"));
    }

    #[test]
    fn test_defect_type_mismatch_names_type() {
        let defect = Defect::type_mismatch::<u64>();
        assert!(defect.message().contains("u64"));
    }

    #[test]
    fn test_exit_map_and_result() {
        let exit: Exit<i32> = Exit::Success(20);
        assert_eq!(exit.map(|n| n + 22).into_result().ok(), Some(42));

        let exit: Exit<i32> = Exit::Failure(Cause::Interrupt);
        assert!(exit.is_failure());
        assert!(exit.value().is_none());
        assert!(exit.map(|n| n + 1).into_result().is_err());
    }

    #[test]
    fn test_exit_from_result() {
        let exit: Exit<&str> = Ok("ok").into();
        assert!(exit.is_success());
        let exit: Exit<&str> = Err(Cause::die("x")).into();
        assert!(exit.cause().is_some_and(Cause::is_die));
    }
}
