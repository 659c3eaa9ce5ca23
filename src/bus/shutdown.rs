//! Process-wide shutdown signal shared by every consumer loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Set-once flag that loops check at every poll boundary.
///
/// Waiters parked in `wait_timeout` wake as soon as it is triggered.
#[derive(Clone, Default)]
pub(crate) struct ShutdownSignal {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    set: AtomicBool,
    lock: Mutex<()>,
    cvar: Condvar,
}

impl ShutdownSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Set the signal. Returns `false` if it was already set.
    pub(crate) fn trigger(&self) -> bool {
        let _guard = self.inner.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let first = !self.inner.set.swap(true, Ordering::SeqCst);
        self.inner.cvar.notify_all();
        first
    }

    pub(crate) fn is_set(&self) -> bool {
        self.inner.set.load(Ordering::SeqCst)
    }

    /// Sleep for up to `timeout`, returning early once triggered.
    pub(crate) fn wait_timeout(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !self.is_set() {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            guard = self
                .inner
                .cvar
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}
