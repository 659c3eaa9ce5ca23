//! Observer trait and the closure-backed observers used by `subscribe*`.

use tracing::{debug, error};

use crate::error::StreamError;

/// Receiver of a push stream.
///
/// After `on_error` or `on_completed` an observer receives nothing further.
pub trait Observer<T>: Send + Sync {
    fn on_next(&self, value: T);
    fn on_error(&self, error: StreamError);
    fn on_completed(&self);
}

/// Observer assembled from three closures.
pub(crate) struct FnObserver<N, E, C> {
    on_next: N,
    on_error: E,
    on_completed: C,
}

impl<N, E, C> FnObserver<N, E, C> {
    pub(crate) fn new(on_next: N, on_error: E, on_completed: C) -> Self {
        Self {
            on_next,
            on_error,
            on_completed,
        }
    }
}

impl<T, N, E, C> Observer<T> for FnObserver<N, E, C>
where
    N: Fn(T) + Send + Sync,
    E: Fn(StreamError) + Send + Sync,
    C: Fn() + Send + Sync,
{
    fn on_next(&self, value: T) {
        (self.on_next)(value)
    }

    fn on_error(&self, error: StreamError) {
        (self.on_error)(error)
    }

    fn on_completed(&self) {
        (self.on_completed)()
    }
}

/// Observer that only handles items; errors and completion are logged.
pub(crate) struct NextObserver<N> {
    on_next: N,
}

impl<N> NextObserver<N> {
    pub(crate) fn new(on_next: N) -> Self {
        Self { on_next }
    }
}

impl<T, N> Observer<T> for NextObserver<N>
where
    N: Fn(T) + Send + Sync,
{
    fn on_next(&self, value: T) {
        (self.on_next)(value)
    }

    fn on_error(&self, err: StreamError) {
        error!(error = %err, "subscriber terminated without an error handler");
    }

    fn on_completed(&self) {
        debug!("stream completed");
    }
}
