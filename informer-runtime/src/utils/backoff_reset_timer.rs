use std::time::Duration;

use tokio::time::Instant;

use super::ResettableBackoff;

/// A backoff that starts over once failures stop for a while
///
/// Every delay handed out is timestamped. If the next delay is asked for more than
/// `reset_after` later, the inner backoff is reset first. Failures that keep coming
/// in close together therefore keep growing the delay, no matter how many successful
/// steps happen in between them.
///
/// Time is read from tokio's clock, so a paused test runtime controls it.
#[derive(Debug)]
pub struct ResetTimerBackoff<B> {
    backoff: B,
    last_backoff: Option<Instant>,
    reset_after: Duration,
}

impl<B: ResettableBackoff> ResetTimerBackoff<B> {
    /// Wrap `backoff`, resetting it after `reset_after` without any delay being requested
    pub fn new(backoff: B, reset_after: Duration) -> Self {
        Self {
            backoff,
            last_backoff: None,
            reset_after,
        }
    }
}

impl<B: ResettableBackoff> Iterator for ResetTimerBackoff<B> {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let now = Instant::now();
        if let Some(last_backoff) = self.last_backoff {
            if now > last_backoff + self.reset_after {
                tracing::debug!(
                    quiet_for = ?now.duration_since(last_backoff),
                    reset_after = ?self.reset_after,
                    "resetting backoff after a quiet period"
                );
                self.backoff.reset();
            }
        }
        self.last_backoff = Some(now);
        self.backoff.next()
    }
}
