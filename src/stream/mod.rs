//! Push-based streams.
//!
//! A `Stream<T>` is a lazily composed view over a `Multicast<T>`. Operators
//! build a new view; nothing is attached until `subscribe*` is called, and
//! each subscription gets its own operator chain. A panic anywhere in that
//! chain (predicate, selector, handler) terminates that subscription only.
//!
//! ```text
//!   consumer loop ──emit──► Multicast<T> ──► [filter → map → on_next]  (sub A)
//!                                       └──► [on_next]                 (sub B)
//! ```

mod multicast;
mod observer;
mod subscription;

use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::error::StreamError;

pub use multicast::Multicast;
pub use observer::Observer;
pub use subscription::Subscription;

pub(crate) use multicast::panic_message;
use observer::{FnObserver, NextObserver};

type SubscribeFn<T> = dyn Fn(Arc<dyn Observer<T>>) -> Subscription + Send + Sync;

/// A composable, clonable view over a push source.
pub struct Stream<T> {
    subscribe: Arc<SubscribeFn<T>>,
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Self {
            subscribe: Arc::clone(&self.subscribe),
        }
    }
}

impl<T: Send + 'static> Stream<T> {
    pub(crate) fn from_subscribe<F>(subscribe: F) -> Self
    where
        F: Fn(Arc<dyn Observer<T>>) -> Subscription + Send + Sync + 'static,
    {
        Self {
            subscribe: Arc::new(subscribe),
        }
    }

    /// Attach a fully custom observer.
    pub fn subscribe_observer(&self, observer: Arc<dyn Observer<T>>) -> Subscription {
        (self.subscribe)(observer)
    }

    /// Attach an item handler. Errors are logged; completion is ignored.
    pub fn subscribe<N>(&self, on_next: N) -> Subscription
    where
        N: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe_observer(Arc::new(NextObserver::new(on_next)))
    }

    /// Attach item, error, and completion handlers.
    ///
    /// A panic in `on_next` is routed to `on_error` and ends the
    /// subscription.
    pub fn subscribe_with<N, E, C>(&self, on_next: N, on_error: E, on_completed: C) -> Subscription
    where
        N: Fn(T) + Send + Sync + 'static,
        E: Fn(StreamError) + Send + Sync + 'static,
        C: Fn() + Send + Sync + 'static,
    {
        self.subscribe_observer(Arc::new(FnObserver::new(on_next, on_error, on_completed)))
    }

    /// Attach an item handler with errors and completion logged.
    pub fn subscribe_logged<N>(&self, on_next: N) -> Subscription
    where
        N: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe_with(
            on_next,
            |err| error!(error = %err, "stream error"),
            || debug!("stream completed"),
        )
    }

    /// Keep only items matching `predicate`.
    pub fn filter<P>(&self, predicate: P) -> Stream<T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        self.lift(move |down: Arc<dyn Observer<T>>| {
            let predicate = Arc::clone(&predicate);
            Operator::<T, T, _>::new(down, move |value: T, down: &dyn Observer<T>| {
                if predicate(&value) {
                    down.on_next(value);
                }
            })
        })
    }

    /// Project every item through `selector`.
    pub fn map<R, F>(&self, selector: F) -> Stream<R>
    where
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        let selector = Arc::new(selector);
        self.lift(move |down: Arc<dyn Observer<R>>| {
            let selector = Arc::clone(&selector);
            Operator::<T, R, _>::new(down, move |value: T, down: &dyn Observer<R>| {
                down.on_next(selector(value));
            })
        })
    }

    /// Project and drop `None`s in one step.
    pub fn filter_map<R, F>(&self, selector: F) -> Stream<R>
    where
        R: Send + 'static,
        F: Fn(T) -> Option<R> + Send + Sync + 'static,
    {
        let selector = Arc::new(selector);
        self.lift(move |down: Arc<dyn Observer<R>>| {
            let selector = Arc::clone(&selector);
            Operator::<T, R, _>::new(down, move |value: T, down: &dyn Observer<R>| {
                if let Some(mapped) = selector(value) {
                    down.on_next(mapped);
                }
            })
        })
    }

    /// Run a side effect for every item, passing it through unchanged.
    pub fn inspect<F>(&self, f: F) -> Stream<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.lift(move |down: Arc<dyn Observer<T>>| {
            let f = Arc::clone(&f);
            Operator::<T, T, _>::new(down, move |value: T, down: &dyn Observer<T>| {
                f(&value);
                down.on_next(value);
            })
        })
    }

    /// Turn an error into a logged completion for the downstream subscriber.
    pub fn catch_and_log(&self) -> Stream<T> {
        self.lift(|down: Arc<dyn Observer<T>>| CatchAndLog::new(down))
    }

    /// Build a stream whose subscribers are wrapped by `wrap` before being
    /// attached upstream.
    fn lift<R, O, W>(&self, wrap: W) -> Stream<R>
    where
        R: Send + 'static,
        O: Observer<T> + 'static,
        W: Fn(Arc<dyn Observer<R>>) -> O + Send + Sync + 'static,
    {
        let upstream = self.clone();
        Stream::from_subscribe(move |down: Arc<dyn Observer<R>>| {
            upstream.subscribe_observer(Arc::new(wrap(down)))
        })
    }
}

/// Per-subscriber operator: transforms items, forwards terminal signals.
struct Operator<T, R, F> {
    down: Arc<dyn Observer<R>>,
    step: F,
    _input: PhantomData<fn(T)>,
}

impl<T, R, F> Operator<T, R, F> {
    fn new(down: Arc<dyn Observer<R>>, step: F) -> Self {
        Self {
            down,
            step,
            _input: PhantomData,
        }
    }
}

impl<T, R, F> Observer<T> for Operator<T, R, F>
where
    F: Fn(T, &dyn Observer<R>) + Send + Sync,
{
    fn on_next(&self, value: T) {
        (self.step)(value, self.down.as_ref())
    }

    fn on_error(&self, error: StreamError) {
        self.down.on_error(error)
    }

    fn on_completed(&self) {
        self.down.on_completed()
    }
}

/// Completes the downstream subscriber when an error arrives from upstream.
///
/// A panic raised below this operator is the subscriber's own failure: it is
/// sent to `on_error` right away and the panic continues up so the
/// multicast detaches the subscriber. The error that then comes back up the
/// chain is dropped here.
struct CatchAndLog<T> {
    down: Arc<dyn Observer<T>>,
    downstream_failed: AtomicBool,
}

impl<T> CatchAndLog<T> {
    fn new(down: Arc<dyn Observer<T>>) -> Self {
        Self {
            down,
            downstream_failed: AtomicBool::new(false),
        }
    }
}

impl<T> Observer<T> for CatchAndLog<T> {
    fn on_next(&self, value: T) {
        let delivered = panic::catch_unwind(AssertUnwindSafe(|| self.down.on_next(value)));
        if let Err(payload) = delivered {
            self.downstream_failed.store(true, Ordering::SeqCst);
            self.down
                .on_error(StreamError::Subscriber(panic_message(payload.as_ref())));
            panic::resume_unwind(payload);
        }
    }

    fn on_error(&self, error: StreamError) {
        if self.downstream_failed.load(Ordering::SeqCst) {
            return;
        }
        warn!(error = %error, "stream error caught; completing subscriber");
        self.down.on_completed()
    }

    fn on_completed(&self) {
        self.down.on_completed()
    }
}
