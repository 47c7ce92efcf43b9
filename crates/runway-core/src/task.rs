use std::future::Future;

use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

/// A running download or extraction.
///
/// The operation was already started when this handle was returned; awaiting
/// [`TaskHandle::wait`] only collects its result. Dropping the handle detaches
/// the operation without cancelling it.
#[derive(Debug)]
pub struct TaskHandle<E> {
    token: CancellationToken,
    join: JoinHandle<Result<(), E>>,
}

impl<E> TaskHandle<E>
where
    E: From<JoinError> + Send + 'static,
{
    pub(crate) fn spawn<F>(token: CancellationToken, future: F) -> Self
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
    {
        Self {
            token,
            join: tokio::spawn(future),
        }
    }

    pub(crate) fn spawn_blocking<F>(token: CancellationToken, work: F) -> Self
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
    {
        Self {
            token,
            join: tokio::task::spawn_blocking(work),
        }
    }

    /// Request cooperative cancellation. The operation stops at its next
    /// checkpoint and resolves to its cancellation error.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the operation to finish.
    ///
    /// # Errors
    /// Returns the operation's own error, or a worker error if the task
    /// panicked.
    pub async fn wait(self) -> Result<(), E> {
        match self.join.await {
            Ok(result) => result,
            Err(error) => Err(E::from(error)),
        }
    }
}
