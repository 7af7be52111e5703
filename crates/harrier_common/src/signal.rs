//! Cooperative stop signal for background work.
//!
//! Population jobs park between work cycles and must wake promptly when the
//! index is dropped or the service shuts down. A Condvar-backed wait gives
//! millisecond wakeup latency instead of sleeping out the full interval.
//!
//! # Usage
//! ```ignore
//! let stop = StopSignal::new();
//! let stop_job = stop.clone();
//!
//! // In the background job:
//! while !stop_job.is_stopped() {
//!     // do work ...
//!     stop_job.wait_timeout(Duration::from_millis(50));
//! }
//!
//! // From the control plane:
//! stop.stop(); // wakes the job immediately
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Shared stop flag with Condvar wakeup. Clones share the same state.
#[derive(Clone)]
pub struct StopSignal {
    inner: Arc<SignalInner>,
}

struct SignalInner {
    flag: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl StopSignal {
    /// Create a new signal in the running (not stopped) state.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                flag: AtomicBool::new(false),
                mutex: Mutex::new(()),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Request stop. Wakes all waiters immediately. Idempotent.
    pub fn stop(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        // Hold the mutex while notifying so a waiter that checked the flag
        // but has not started waiting yet cannot miss the wakeup.
        let _guard = self.inner.mutex.lock().unwrap_or_else(|e| e.into_inner());
        self.inner.condvar.notify_all();
    }

    /// Check whether stop has been requested (non-blocking).
    pub fn is_stopped(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Park for at most `duration`, waking immediately on `stop()`.
    /// Returns `true` if stop was requested (caller should exit).
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let guard = self.inner.mutex.lock().unwrap_or_else(|e| e.into_inner());
        if self.is_stopped() {
            return true;
        }
        let (_guard, _timeout) = self
            .inner
            .condvar
            .wait_timeout(guard, duration)
            .unwrap_or_else(|e| e.into_inner());
        self.is_stopped()
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}
