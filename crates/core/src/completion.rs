//! Completion notifications for submitted commands.
//!
//! Channels resolve requests through a boxed [`Notifier`] callback. Callers
//! that want to `.await` the outcome use [`Completion`], which wraps a
//! oneshot receiver fed by such a callback.

use crate::error::DeviceError;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Callback invoked at most once with the reply to a request.
///
/// Dropping a notifier without calling it abandons the request.
pub type Notifier<R> = Box<dyn FnOnce(R) + Send + 'static>;

/// Awaitable outcome of a submitted command.
#[derive(Debug)]
pub struct Completion<T> {
    rx: oneshot::Receiver<T>,
}

impl<T: Send + 'static> Completion<T> {
    /// Create a notifier/completion pair that passes the reply through unchanged.
    pub fn pair() -> (Notifier<T>, Self) {
        Self::pair_with(Some)
    }

    /// Create a notifier/completion pair that converts the channel's reply type.
    ///
    /// If `map` returns `None` the completion resolves to [`DeviceError::Abandoned`].
    pub fn pair_with<R, F>(map: F) -> (Notifier<R>, Self)
    where
        R: 'static,
        F: FnOnce(R) -> Option<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let notifier: Notifier<R> = Box::new(move |reply| {
            if let Some(value) = map(reply) {
                // The caller may have stopped waiting; that is fine.
                let _ = tx.send(value);
            }
        });
        (notifier, Self { rx })
    }

    /// Check for a result without waiting.
    ///
    /// Returns `None` while the request is still pending.
    pub fn try_take(&mut self) -> Option<Result<T, DeviceError>> {
        match self.rx.try_recv() {
            Ok(value) => Some(Ok(value)),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(DeviceError::Abandoned)),
        }
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T, DeviceError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.map_err(|_| DeviceError::Abandoned))
    }
}
