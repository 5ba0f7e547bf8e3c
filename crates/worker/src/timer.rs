//! Cancellable inter-poll wait.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// How a [`CancellableTimer::wait`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Elapsed,
    Cancelled,
}

/// A sleep that ends early once its token is cancelled.
///
/// Cancellation is permanent: every wait after [`cancel`](Self::cancel)
/// returns [`WaitOutcome::Cancelled`] immediately.
#[derive(Debug, Clone, Default)]
pub struct CancellableTimer {
    token: CancellationToken,
}

impl CancellableTimer {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Sleep for `duration` unless cancelled first.
    pub async fn wait(&self, duration: Duration) -> WaitOutcome {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => WaitOutcome::Cancelled,
            _ = tokio::time::sleep(duration) => WaitOutcome::Elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn elapses_after_the_full_duration() {
        let timer = CancellableTimer::default();
        let start = Instant::now();

        assert_eq!(timer.wait(Duration::from_secs(5)).await, WaitOutcome::Elapsed);
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_wakes_a_pending_wait() {
        let timer = CancellableTimer::default();
        let waiter = tokio::spawn({
            let timer = timer.clone();
            async move {
                let start = Instant::now();
                (timer.wait(Duration::from_secs(3600)).await, start.elapsed())
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        timer.cancel();

        let (outcome, waited) = waiter.await.unwrap();
        assert_eq!(outcome, WaitOutcome::Cancelled);
        assert!(waited < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn waits_after_cancel_return_immediately() {
        let timer = CancellableTimer::default();
        timer.cancel();

        assert!(timer.is_cancelled());
        assert_eq!(timer.wait(Duration::from_secs(3600)).await, WaitOutcome::Cancelled);
    }
}
