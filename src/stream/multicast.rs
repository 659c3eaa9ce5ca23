//! Hot broadcast subject.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::error;

use super::observer::Observer;
use super::subscription::Subscription;
use super::Stream;
use crate::error::StreamError;

/// A hot, non-replaying broadcast of values to every attached subscriber.
///
/// Subscribers attached after an item was emitted never see it. After
/// `complete`, current subscribers receive `on_completed` once and later
/// subscribers receive it immediately on attach.
///
/// A subscriber whose chain panics is detached and sent
/// `StreamError::Subscriber`; the other subscribers are unaffected.
///
/// ## Example
///
/// ```
/// use reactive_topics::stream::Multicast;
/// use std::sync::{Arc, Mutex};
///
/// let subject = Multicast::new();
/// subject.emit(1); // nobody listening
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&seen);
/// let _sub = subject.stream().subscribe(move |v: i32| sink.lock().unwrap().push(v));
///
/// subject.emit(2);
/// assert_eq!(*seen.lock().unwrap(), vec![2]);
/// ```
pub struct Multicast<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    /// Serializes emits so every subscriber sees the same order.
    emitting: Mutex<()>,
    next_id: AtomicU64,
}

struct State<T> {
    subscribers: Vec<Entry<T>>,
    completed: bool,
}

struct Entry<T> {
    id: u64,
    observer: Arc<dyn Observer<T>>,
    active: Arc<AtomicBool>,
}

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            observer: Arc::clone(&self.observer),
            active: Arc::clone(&self.active),
        }
    }
}

impl<T> Clone for Multicast<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Multicast<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Multicast<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    subscribers: Vec::new(),
                    completed: false,
                }),
                emitting: Mutex::new(()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Deliver `value` to every active subscriber, in attach order.
    ///
    /// Ignored once completed. Must not be called re-entrantly from a
    /// subscriber of the same multicast.
    pub fn emit(&self, value: T) {
        let _order = self
            .inner
            .emitting
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let snapshot = {
            let state = self.inner.lock_state();
            if state.completed {
                return;
            }
            state.subscribers.clone()
        };

        for entry in snapshot {
            if !entry.active.load(Ordering::SeqCst) {
                continue;
            }
            let item = value.clone();
            let delivered = panic::catch_unwind(AssertUnwindSafe(|| entry.observer.on_next(item)));
            if let Err(payload) = delivered {
                self.inner.fail(&entry, panic_message(payload.as_ref()));
            }
        }
    }

    /// Signal completion to every subscriber and stop accepting items.
    pub fn complete(&self) {
        let _order = self
            .inner
            .emitting
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let subscribers = {
            let mut state = self.inner.lock_state();
            if state.completed {
                return;
            }
            state.completed = true;
            std::mem::take(&mut state.subscribers)
        };

        for entry in subscribers {
            if entry.active.swap(false, Ordering::SeqCst) {
                let completed = panic::catch_unwind(AssertUnwindSafe(|| entry.observer.on_completed()));
                if let Err(payload) = completed {
                    error!(
                        panic = %panic_message(payload.as_ref()),
                        "completion handler panicked"
                    );
                }
            }
        }
    }

    /// Attach an observer.
    pub fn subscribe(&self, observer: Arc<dyn Observer<T>>) -> Subscription {
        let active = Arc::new(AtomicBool::new(true));
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut state = self.inner.lock_state();
            if !state.completed {
                state.subscribers.push(Entry {
                    id,
                    observer,
                    active: Arc::clone(&active),
                });

                let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
                return Subscription::new(active, move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.remove(id);
                    }
                });
            }
        }

        observer.on_completed();
        Subscription::closed()
    }

    /// A composable view over this multicast.
    pub fn stream(&self) -> Stream<T> {
        let subject = self.clone();
        Stream::from_subscribe(move |observer| subject.subscribe(observer))
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock_state().subscribers.len()
    }

    pub fn is_completed(&self) -> bool {
        self.inner.lock_state().completed
    }
}

impl<T> Inner<T> {
    fn lock_state(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: u64) {
        self.lock_state().subscribers.retain(|entry| entry.id != id);
    }

    /// Detach a subscriber whose chain panicked and tell it why.
    fn fail(&self, entry: &Entry<T>, reason: String) {
        entry.active.store(false, Ordering::SeqCst);
        self.remove(entry.id);

        let err = StreamError::Subscriber(reason);
        let notified = panic::catch_unwind(AssertUnwindSafe(|| entry.observer.on_error(err.clone())));
        if notified.is_err() {
            error!(error = %err, "error handler panicked; subscriber dropped");
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
