//! Subscription handles.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

type Teardown = Box<dyn FnOnce() + Send>;

/// Handle to an attached subscriber.
///
/// Dropping the handle unsubscribes. Once `unsubscribe` returns the
/// subscriber receives no item that was not already being delivered.
pub struct Subscription {
    active: Arc<AtomicBool>,
    teardown: Mutex<Option<Teardown>>,
}

impl Subscription {
    pub(crate) fn new<F>(active: Arc<AtomicBool>, teardown: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            active,
            teardown: Mutex::new(Some(Box::new(teardown))),
        }
    }

    /// A subscription to something that has already terminated.
    pub(crate) fn closed() -> Self {
        Self {
            active: Arc::new(AtomicBool::new(false)),
            teardown: Mutex::new(None),
        }
    }

    /// Detach the subscriber. Idempotent.
    pub fn unsubscribe(&self) {
        self.active.store(false, Ordering::SeqCst);
        let teardown = self
            .teardown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    /// True once unsubscribed, completed, or terminated by an error.
    pub fn is_closed(&self) -> bool {
        !self.active.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .finish()
    }
}
