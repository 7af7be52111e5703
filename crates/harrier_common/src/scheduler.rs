//! Background job scheduling.
//!
//! Index populations run as cancellable background jobs. The execution
//! strategy is injected: production code hands the service a
//! `ThreadScheduler`, tests wrap it in a `SlowScheduler` to widen the window
//! between capture registration and scan start, or substitute their own
//! implementation entirely. The scheduler is owned by its creator and has an
//! explicit `shutdown()`; there is no process-global scheduler.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::SchedulerError;

/// How long `shutdown()` waits for live jobs before giving up.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const QUIESCE_POLL: Duration = Duration::from_millis(10);

/// A background execution context for population jobs.
///
/// Implementations must run each job at most once, on a context other than
/// the caller's. They may delay a job arbitrarily; correctness of the
/// population does not depend on when the job starts, only on capture being
/// registered before it does.
pub trait JobScheduler: Send + Sync {
    /// Schedule `job` for execution. `name` labels the job for diagnostics.
    fn spawn(
        &self,
        name: &str,
        job: Box<dyn FnOnce() + Send + 'static>,
    ) -> Result<JobHandle, SchedulerError>;
}

/// Handle to a scheduled job.
#[derive(Debug)]
pub struct JobHandle {
    name: String,
    thread: thread::JoinHandle<()>,
}

impl JobHandle {
    /// Block until the job finishes.
    pub fn join(self) {
        if self.thread.join().is_err() {
            tracing::error!(job = %self.name, "background job panicked");
        }
    }

    /// Whether the job has finished (non-blocking).
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Production scheduler: one named OS thread per job.
///
/// Tracks the number of live jobs so `shutdown()` can wait for quiescence.
/// After shutdown, further spawns are rejected with
/// [`SchedulerError::ShutDown`].
pub struct ThreadScheduler {
    live: Arc<AtomicUsize>,
    stopping: AtomicBool,
}

impl ThreadScheduler {
    pub fn new() -> Self {
        ThreadScheduler {
            live: Arc::new(AtomicUsize::new(0)),
            stopping: AtomicBool::new(false),
        }
    }

    /// Number of jobs currently running.
    pub fn live_jobs(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Stop admitting jobs and wait (bounded) for running ones to finish.
    /// Idempotent. Jobs still running after the grace period are left to
    /// finish on their own; their threads are not killed.
    pub fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        while self.live.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            thread::sleep(QUIESCE_POLL);
        }
        let leftover = self.live.load(Ordering::SeqCst);
        if leftover > 0 {
            tracing::warn!(leftover, "scheduler shut down with jobs still running");
        }
    }
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Decrements the live count when the job exits, panic or not.
struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl JobScheduler for ThreadScheduler {
    fn spawn(
        &self,
        name: &str,
        job: Box<dyn FnOnce() + Send + 'static>,
    ) -> Result<JobHandle, SchedulerError> {
        if self.stopping.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShutDown);
        }
        self.live.fetch_add(1, Ordering::SeqCst);
        let guard = LiveGuard(Arc::clone(&self.live));
        let thread = thread::Builder::new()
            .name(format!("harrier-{name}"))
            .spawn(move || {
                let _guard = guard;
                job();
            })
            .map_err(|e| {
                // Spawn failure drops the closure, and the guard with it.
                tracing::error!(job = name, error = %e, "failed to spawn job thread");
                SchedulerError::Spawn(e)
            })?;
        Ok(JobHandle {
            name: name.to_string(),
            thread,
        })
    }
}

/// Delegating scheduler that parks before each job body runs.
///
/// Fault-injection hook for tests: widens the window between index creation
/// (capture registered) and scan start, stressing the
/// registration-before-scan ordering.
pub struct SlowScheduler {
    inner: Arc<dyn JobScheduler>,
    delay: Duration,
}

impl SlowScheduler {
    pub fn new(inner: Arc<dyn JobScheduler>, delay: Duration) -> Self {
        SlowScheduler { inner, delay }
    }
}

impl JobScheduler for SlowScheduler {
    fn spawn(
        &self,
        name: &str,
        job: Box<dyn FnOnce() + Send + 'static>,
    ) -> Result<JobHandle, SchedulerError> {
        let delay = self.delay;
        self.inner.spawn(
            name,
            Box::new(move || {
                thread::sleep(delay);
                job();
            }),
        )
    }
}
