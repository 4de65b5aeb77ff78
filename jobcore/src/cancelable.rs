//! A future whose producer registers a cancellation hook up front.
//!
//! Exactly one of completion and cancellation wins. The hook runs synchronously
//! inside [`CancelHandle::cancel`]; the producer is still expected to call
//! [`Completer::complete`] once its work has wound down, at which point the
//! future resolves with `Err(Canceled)`.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::oneshot;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("cancelled before completion")]
pub struct Canceled;

type Hook = Box<dyn FnOnce() + Send>;

enum State {
    Pending(Option<Hook>),
    Completed,
    Canceled,
}

struct Shared {
    state: Mutex<State>,
}

impl Shared {
    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }
}

/// Create a linked producer/consumer pair. `on_cancel` runs at most once.
pub fn cancelable<T>(
    on_cancel: impl FnOnce() + Send + 'static,
) -> (Completer<T>, CancelableFuture<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State::Pending(Some(Box::new(on_cancel)))),
    });
    let (tx, rx) = oneshot::channel();
    let completer = Completer {
        shared: shared.clone(),
        tx,
    };
    let future = CancelableFuture {
        rx,
        handle: CancelHandle { shared },
    };
    (completer, future)
}

/// Producer side.
pub struct Completer<T> {
    shared: Arc<Shared>,
    tx: oneshot::Sender<Result<T, Canceled>>,
}

impl<T> Completer<T> {
    /// Resolve the future with `value`.
    ///
    /// Returns `false` if cancellation already claimed the future, in which case
    /// the consumer sees `Err(Canceled)` and `value` is dropped.
    pub fn complete(self, value: T) -> bool {
        let won = self.shared.with_state(|state| match state {
            State::Pending(_) => {
                *state = State::Completed;
                true
            }
            _ => false,
        });
        let _ = self.tx.send(if won { Ok(value) } else { Err(Canceled) });
        won
    }

    pub fn is_canceled(&self) -> bool {
        self.shared
            .with_state(|state| matches!(state, State::Canceled))
    }
}

/// Requests cancellation of a [`CancelableFuture`]. Cheap to clone.
#[derive(Clone)]
pub struct CancelHandle {
    shared: Arc<Shared>,
}

impl CancelHandle {
    /// Returns `true` if this call cancelled the future, `false` if it had
    /// already completed or been cancelled.
    pub fn cancel(&self) -> bool {
        let hook = self.shared.with_state(|state| match state {
            State::Pending(hook) => {
                let hook = hook.take();
                *state = State::Canceled;
                Some(hook)
            }
            _ => None,
        });
        match hook {
            Some(hook) => {
                if let Some(hook) = hook {
                    hook();
                }
                true
            }
            None => false,
        }
    }
}

/// Consumer side. Resolves to `Err(Canceled)` if cancelled or if the producer
/// is dropped without completing.
pub struct CancelableFuture<T> {
    rx: oneshot::Receiver<Result<T, Canceled>>,
    handle: CancelHandle,
}

impl<T> CancelableFuture<T> {
    pub fn cancel_handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    pub fn cancel(&self) -> bool {
        self.handle.cancel()
    }

    /// A future that is already resolved with `value`.
    pub fn ready(value: T) -> Self {
        let (completer, future) = cancelable(|| {});
        completer.complete(value);
        future
    }
}

impl<T> Future for CancelableFuture<T> {
    type Output = Result<T, Canceled>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Canceled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn completion_wins_over_later_cancel() {
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let calls = hook_calls.clone();
        let (completer, future) = cancelable(move || {
            calls.fetch_add(1, Ordering::SeqCst);
        });
        let handle = future.cancel_handle();

        assert!(completer.complete(7));
        assert!(!handle.cancel());
        assert_eq!(future.await, Ok(7));
        assert_eq!(hook_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancel_runs_hook_once_and_claims_result() {
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let calls = hook_calls.clone();
        let (completer, future) = cancelable(move || {
            calls.fetch_add(1, Ordering::SeqCst);
        });

        assert!(future.cancel());
        assert!(!future.cancel());
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
        assert!(completer.is_canceled());

        assert!(!completer.complete(7));
        assert_eq!(future.await, Err(Canceled));
    }

    #[tokio::test]
    async fn dropped_producer_resolves_as_canceled() {
        let (completer, future) = cancelable::<u8>(|| {});
        drop(completer);
        assert_eq!(future.await, Err(Canceled));
    }
}
