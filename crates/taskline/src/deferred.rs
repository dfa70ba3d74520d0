//! # Deferred values
//!
//! A [`Promise`] is a future whose outcome is supplied from the outside through
//! a [`Resolver`]. The resolver can be cloned and handed to any number of
//! producers; the first `resolve` or `reject` wins and every later call is a
//! no-op. Continuations are ordinary future combinators, so they can be
//! attached before or after the value is settled.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::Abandoned;

type Slot<T, E> = Arc<Mutex<Option<oneshot::Sender<Result<T, E>>>>>;

/// Create a linked promise/resolver pair.
pub fn deferred<T, E>() -> (Promise<T, E>, Resolver<T, E>) {
    let (tx, rx) = oneshot::channel();
    (
        Promise { rx },
        Resolver {
            slot: Arc::new(Mutex::new(Some(tx))),
        },
    )
}

/// Receiving half of a deferred value.
///
/// Resolves to whatever the resolver settles it with. If every resolver is
/// dropped before settling, the promise fails with [`Abandoned`].
#[must_use = "promises do nothing unless awaited"]
pub struct Promise<T, E> {
    rx: oneshot::Receiver<Result<T, E>>,
}

impl<T, E> Future for Promise<T, E>
where
    E: From<Abandoned>,
{
    type Output = Result<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(E::from(Abandoned))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Settling half of a deferred value.
pub struct Resolver<T, E> {
    slot: Slot<T, E>,
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T, E> Resolver<T, E> {
    /// Fulfil the promise. Returns `false` if it was already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Reject the promise. Returns `false` if it was already settled.
    pub fn reject(&self, error: E) -> bool {
        self.settle(Err(error))
    }

    pub fn is_settled(&self) -> bool {
        self.slot.lock().is_none()
    }

    fn settle(&self, outcome: Result<T, E>) -> bool {
        let Some(tx) = self.slot.lock().take() else {
            return false;
        };
        // The promise may already be gone; settling still counts.
        let _ = tx.send(outcome);
        true
    }
}

/// Complete after `duration`.
pub async fn delay(duration: Duration) {
    tokio::time::sleep(duration).await;
}

/// Extension adding [`DelayExt::delay`] to every future.
pub trait DelayExt: Future + Sized {
    /// Yield this future's output only after an extra `duration`.
    fn delay(self, duration: Duration) -> impl Future<Output = Self::Output> {
        async move {
            let value = self.await;
            tokio::time::sleep(duration).await;
            value
        }
    }
}

impl<F: Future> DelayExt for F {}
