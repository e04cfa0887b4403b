//! # Synchronization Primitives
//!
//! The runtime is callback driven and never blocks a scheduler thread. The
//! single exception is the outermost "run and wait" bridge, which parks the
//! calling thread on a [`CountDownLatch`] until the root fiber completes.

use std::fmt;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A countdown latch.
///
/// Threads calling [`wait`](CountDownLatch::wait) block until
/// [`count_down`](CountDownLatch::count_down) has been called `count` times.
pub struct CountDownLatch {
    /// Remaining count.
    count: Mutex<usize>,
    /// Notified when the count reaches zero.
    zero: Condvar,
}

impl CountDownLatch {
    /// Create a latch that opens after `count` calls to `count_down`.
    pub fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            zero: Condvar::new(),
        }
    }

    /// Decrement the count, waking all waiters when it reaches zero.
    ///
    /// Extra calls after the latch is open have no effect.
    pub fn count_down(&self) {
        let mut count = self.count.lock();
        if *count == 0 {
            return;
        }
        *count -= 1;
        if *count == 0 {
            self.zero.notify_all();
        }
    }

    /// Get the remaining count.
    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    /// Check if the latch is open.
    pub fn is_open(&self) -> bool {
        self.count() == 0
    }

    /// Block until the latch opens.
    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.zero.wait(&mut count);
        }
    }

    /// Block until the latch opens or `timeout` expires.
    ///
    /// Returns `true` if the latch opened.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut count = self.count.lock();
        if *count == 0 {
            return true;
        }
        self.zero
            .wait_while_for(&mut count, |count| *count > 0, timeout);
        *count == 0
    }
}

impl fmt::Debug for CountDownLatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountDownLatch")
            .field("count", &self.count())
            .finish()
    }
}
