use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How a [`Deadline`] wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineOutcome {
    Elapsed,
    /// The application began shutting down first.
    Cancelled,
}

/// A fixed point in time the supervisor waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(delay: Duration) -> Self {
        Self {
            at: Instant::now() + delay,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Sleeps until the deadline, or until `shutdown` fires.
    pub async fn wait(&self, shutdown: &CancellationToken) -> DeadlineOutcome {
        tokio::select! {
            () = tokio::time::sleep_until(self.at) => DeadlineOutcome::Elapsed,
            () = shutdown.cancelled() => DeadlineOutcome::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_elapses() {
        let token = CancellationToken::new();
        let deadline = Deadline::after(Duration::from_millis(10));
        assert_eq!(deadline.wait(&token).await, DeadlineOutcome::Elapsed);
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_wait_cancelled_by_shutdown() {
        let token = CancellationToken::new();
        let deadline = Deadline::after(Duration::from_secs(3600));
        token.cancel();
        assert_eq!(deadline.wait(&token).await, DeadlineOutcome::Cancelled);
        assert!(deadline.remaining() > Duration::from_secs(3000));
    }
}
