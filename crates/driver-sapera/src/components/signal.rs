//! Wait/signal primitive shared between the completion handler and the
//! acquisition worker, plus the cancellation token built on it.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Edge-triggered, auto-resetting event.
///
/// A `set()` that happens before `wait()` is not lost, but pending signals do
/// not accumulate: any number of `set()` calls release at most one `wait()`.
#[derive(Debug, Default)]
pub struct AutoResetEvent {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl AutoResetEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the event, releasing one waiter (now or in the future).
    pub fn set(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.cond.notify_one();
    }

    /// Block until signalled, then reset.
    pub fn wait(&self) {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            self.cond.wait(&mut signaled);
        }
        *signaled = false;
    }

    /// Block until signalled or `timeout` elapses. Returns whether the event
    /// was consumed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut signaled = self.signaled.lock();
        if !*signaled {
            let _ = self.cond.wait_for(&mut signaled, timeout);
        }
        std::mem::replace(&mut *signaled, false)
    }

    pub fn is_set(&self) -> bool {
        *self.signaled.lock()
    }
}

/// Cancellation request for one acquisition epoch.
///
/// Cancelling also raises the epoch's wake signal so a worker blocked in
/// [`AutoResetEvent::wait`] re-checks the flag.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    wake: Arc<AutoResetEvent>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(AutoResetEvent::new()),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.wake.set();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// The signal a worker blocks on for this epoch.
    pub fn wake_signal(&self) -> Arc<AutoResetEvent> {
        self.wake.clone()
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
