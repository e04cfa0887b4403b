//! Defect Capture
//!
//! Panics raised by user code while a fiber interprets an effect must never
//! unwind through the interpreter loop. This module catches them at each call
//! site and turns the payload into a [`Defect`], which the interpreter then
//! raises as a `Die` cause.
//!
//! # Example
//!
//! ```rust,ignore
//! use strand_runtime::panic::catch_defect;
//!
//! let result = catch_defect(|| -> i32 { panic!("boom") });
//! assert_eq!(result.unwrap_err().message(), "boom");
//! ```

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::cause::Defect;

/// Number of defects caught since process start.
static DEFECT_COUNT: AtomicU64 = AtomicU64::new(0);

/// Get the number of defects caught so far.
pub fn defect_count() -> u64 {
    DEFECT_COUNT.load(Ordering::Relaxed)
}

/// Extract a human readable message from a panic payload.
pub fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}

/// Run `f`, converting a panic into a [`Defect`].
pub fn catch_defect<T>(f: impl FnOnce() -> T) -> Result<T, Defect> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        DEFECT_COUNT.fetch_add(1, Ordering::Relaxed);
        let defect = Defect::new(payload_message(payload.as_ref()));
        tracing::warn!(defect = %defect, "defect caught while interpreting effect");
        defect
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catch_defect_passes_values_through() {
        assert_eq!(catch_defect(|| 7).ok(), Some(7));
    }

    #[test]
    fn test_catch_defect_str_payload() {
        let before = defect_count();
        let defect = catch_defect(|| -> () { panic!("boom") }).unwrap_err();
        assert_eq!(defect.message(), "boom");
        assert!(defect_count() > before);
    }

    #[test]
    fn test_catch_defect_string_payload() {
        let defect = catch_defect(|| -> () { panic!("code {}", 42) }).unwrap_err();
        assert_eq!(defect.message(), "code 42");
    }

    #[test]
    fn test_payload_message_other() {
        let payload: Box<dyn Any + Send> = Box::new(17u8);
        assert_eq!(payload_message(payload.as_ref()), "panic with a non-string payload");
    }
}
