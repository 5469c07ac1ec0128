//! One-shot delayed work that can be called off.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// A future that runs once after a delay unless cancelled first.
///
/// Dropping the task cancels it. Once the delay has elapsed and the work
/// has started, cancelling no longer has any effect.
#[derive(Debug)]
pub struct ScheduledTask {
    token: CancellationToken,
}

impl ScheduledTask {
    /// Spawn `work` to run after `delay`. Must be called inside a tokio runtime.
    pub fn after<F>(delay: Duration, work: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(delay) => work.await,
            }
        });
        Self { token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
