//! Backoff plumbing for the reflector's retry loop

mod backoff;
mod backoff_reset_timer;

pub use backoff::{default_backoff, ResettableBackoff, ResettableBackoffWrapper, DEFAULT_BACKOFF_RESET};
pub use backoff_reset_timer::ResetTimerBackoff;
