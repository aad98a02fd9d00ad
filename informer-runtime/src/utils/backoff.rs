use std::time::Duration;

use backon::{Backoff, BackoffBuilder, ExponentialBuilder};

/// A [`Backoff`] that can also be reset.
///
/// Implemented by [`ResettableBackoffWrapper`], and driven by
/// [`ResetTimerBackoff`](super::ResetTimerBackoff).
pub trait ResettableBackoff: Backoff {
    /// Start over from the first delay
    fn reset(&mut self);
}

/// Implements [`ResettableBackoff`] by reconstructing the backing [`Backoff`] each time [`Self::reset`] has been called.
#[derive(Debug, Clone)]
pub struct ResettableBackoffWrapper<B: BackoffBuilder> {
    backoff_builder: B,
    current_backoff: Option<B::Backoff>,
}

impl<B: BackoffBuilder> ResettableBackoffWrapper<B> {
    /// Wrap a builder, the first backoff is built lazily
    pub fn new(backoff_builder: B) -> Self {
        Self {
            backoff_builder,
            current_backoff: None,
        }
    }
}

impl<B: BackoffBuilder + Clone> Iterator for ResettableBackoffWrapper<B> {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        self.current_backoff
            .get_or_insert_with(|| self.backoff_builder.clone().build())
            .next()
    }
}

impl<B: BackoffBuilder + Clone> ResettableBackoff for ResettableBackoffWrapper<B>
where
    Self: Backoff,
{
    fn reset(&mut self) {
        self.current_backoff = None;
    }
}

/// The backoff policy informers use unless configured otherwise
///
/// Starts at 800ms, doubles on every consecutive failure up to 30s, is jittered,
/// and never gives up. Informers wrap it in a [`ResetTimerBackoff`](super::ResetTimerBackoff)
/// so the sequence only starts over after [`DEFAULT_BACKOFF_RESET`] without failures.
pub fn default_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(800))
        .with_max_delay(Duration::from_secs(30))
        .with_factor(2.0)
        .with_jitter()
        .without_max_times()
}

/// How long the reflector has to go without failures before its backoff starts over
pub const DEFAULT_BACKOFF_RESET: Duration = Duration::from_secs(120);
