//! # Execution Contexts
//!
//! An execution context is anything that accepts a unit of work and runs it
//! at some point, on some thread. Fibers submit their first batch of
//! interpretation to one, and `Effect::shift` switches which one a fiber
//! uses for the work it forks afterwards.
//!
//! ## Provided implementations
//!
//! - [`ThreadPool`]: fixed set of worker threads with work stealing
//! - [`Immediate`]: runs the task on the submitting thread
//!
//! ## Technical References
//!
//! - [Chase-Lev Deque](https://doi.org/10.1145/1073970.1073974)
//! - [crossbeam-deque](https://docs.rs/crossbeam-deque)

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_deque::{Injector, Steal, Stealer, Worker as Deque};
use parking_lot::{Condvar, Mutex};

use crate::config::{ConfigError, ExecutorConfig};
use crate::panic::payload_message;

/// A unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A work-submission abstraction.
pub trait Executor: Send + Sync + 'static {
    /// Submit a task. It must eventually run exactly once.
    fn execute(&self, task: Task);

    /// A short name for diagnostics.
    fn name(&self) -> &str {
        "executor"
    }
}

/// Runs every task synchronously on the submitting thread.
///
/// Deterministic, which makes it handy in tests. A forked fiber runs to its
/// first suspension before `fork` returns.
#[derive(Debug, Clone, Copy, Default)]
pub struct Immediate;

impl Executor for Immediate {
    fn execute(&self, task: Task) {
        task();
    }

    fn name(&self) -> &str {
        "immediate"
    }
}

/// How long an idle worker sleeps before re-checking the queues.
const IDLE_TIMEOUT: Duration = Duration::from_millis(50);

/// State shared between the pool handle and its workers.
struct Shared {
    /// Global injection queue.
    global_queue: Injector<Task>,
    /// Stealers for every worker's local deque.
    stealers: Vec<Stealer<Task>>,
    /// Shutdown flag.
    shutdown: AtomicBool,
    /// Number of workers currently parked.
    idle: Mutex<usize>,
    /// Wakes parked workers.
    wakeup: Condvar,
    /// Number of live worker threads.
    active_workers: AtomicUsize,
}

/// Work-stealing thread pool.
pub struct ThreadPool {
    /// Thread name prefix.
    name: String,
    /// Shared queues and flags.
    shared: Arc<Shared>,
    /// Worker thread handles.
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPool {
    /// Start a pool with the given configuration.
    pub fn new(config: &ExecutorConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let deques: Vec<Deque<Task>> = (0..config.num_workers).map(|_| Deque::new_fifo()).collect();
        let shared = Arc::new(Shared {
            global_queue: Injector::new(),
            stealers: deques.iter().map(Deque::stealer).collect(),
            shutdown: AtomicBool::new(false),
            idle: Mutex::new(0),
            wakeup: Condvar::new(),
            active_workers: AtomicUsize::new(0),
        });

        let mut threads = Vec::with_capacity(config.num_workers);
        for (id, local) in deques.into_iter().enumerate() {
            let worker = Worker {
                id,
                shared: shared.clone(),
                local,
            };
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name, id))
                .stack_size(config.thread_stack_size)
                .spawn(move || worker.run_loop());
            match spawned {
                Ok(handle) => threads.push(handle),
                Err(err) => {
                    shared.shutdown.store(true, Ordering::Release);
                    shared.wakeup.notify_all();
                    return Err(ConfigError::Spawn(err.to_string()));
                }
            }
        }

        tracing::debug!(
            name = %config.thread_name,
            workers = config.num_workers,
            "thread pool started"
        );

        Ok(Self {
            name: config.thread_name.clone(),
            shared,
            threads: Mutex::new(threads),
        })
    }

    /// Get the number of workers.
    pub fn num_workers(&self) -> usize {
        self.shared.stealers.len()
    }

    /// Get the number of worker threads still running.
    pub fn active_workers(&self) -> usize {
        self.shared.active_workers.load(Ordering::Acquire)
    }

    /// Request shutdown. Queued tasks that have not started are dropped.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        let _idle = self.shared.idle.lock();
        self.shared.wakeup.notify_all();
    }

    /// Check if the pool is shutting down.
    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }
}

impl Executor for ThreadPool {
    fn execute(&self, task: Task) {
        if self.is_shutting_down() {
            tracing::warn!(pool = %self.name, "task submitted after shutdown was dropped");
            return;
        }
        self.shared.global_queue.push(task);
        let idle = self.shared.idle.lock();
        if *idle > 0 {
            self.shared.wakeup.notify_one();
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
        let current = thread::current().id();
        for handle in self.threads.lock().drain(..) {
            // The last handle can be released by one of our own workers.
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("name", &self.name)
            .field("num_workers", &self.num_workers())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

/// A worker thread in the pool.
struct Worker {
    /// Worker ID.
    id: usize,
    /// Shared pool state.
    shared: Arc<Shared>,
    /// Local work deque.
    local: Deque<Task>,
}

impl Worker {
    /// Run the worker loop.
    fn run_loop(self) {
        self.shared.active_workers.fetch_add(1, Ordering::AcqRel);

        loop {
            if self.shared.shutdown.load(Ordering::Acquire) {
                break;
            }

            match self.find_work() {
                Some(task) => self.run_task(task),
                None => self.park(),
            }
        }

        self.shared.active_workers.fetch_sub(1, Ordering::AcqRel);
    }

    /// Find work using work-stealing.
    fn find_work(&self) -> Option<Task> {
        // 1. Try local queue first
        if let Some(task) = self.local.pop() {
            return Some(task);
        }

        // 2. Try global queue
        loop {
            match self.shared.global_queue.steal_batch_and_pop(&self.local) {
                Steal::Success(task) => return Some(task),
                Steal::Empty => break,
                Steal::Retry => continue,
            }
        }

        // 3. Try stealing from other workers
        for (index, stealer) in self.shared.stealers.iter().enumerate() {
            if index == self.id {
                continue;
            }
            loop {
                match stealer.steal() {
                    Steal::Success(task) => return Some(task),
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
            }
        }

        None
    }

    fn park(&self) {
        let mut idle = self.shared.idle.lock();
        if self.shared.shutdown.load(Ordering::Acquire) || !self.shared.global_queue.is_empty() {
            return;
        }
        *idle += 1;
        self.shared.wakeup.wait_for(&mut idle, IDLE_TIMEOUT);
        *idle -= 1;
    }

    fn run_task(&self, task: Task) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            tracing::error!(
                worker = self.id,
                panic = %payload_message(payload.as_ref()),
                "task panicked on worker thread"
            );
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
