use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};

use tokio::task::{JoinError, JoinHandle};

/// A thin wrapper around [`tokio::task::JoinHandle`] that adds the
/// `#[must_use]` lint to ensure that all spawned tasks are joined or
/// explicitly annotated that no joining is required.
#[must_use]
pub struct PeykTask<T>(JoinHandle<T>);

impl<T> PeykTask<T> {
    pub fn spawn<F>(future: F) -> PeykTask<F::Output>
    where
        F: Future<Output = T> + Send + 'static,
        F::Output: Send + 'static,
    {
        PeykTask(tokio::spawn(future))
    }

    /// Explicitly drop the handle: the task keeps running but nothing will
    /// observe its result. Used for fire-and-forget notifications.
    pub fn detach(self) {
        drop(self.0);
    }
}

impl<T> Future for PeykTask<T> {
    type Output = Result<T, JoinError>;
    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}
