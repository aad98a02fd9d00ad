//! Library half of the `podwatch` binary
//!
//! The [`Driver`] runs the one-shot setup and teardown calls, while a pod
//! [`Informer`](informer_runtime::Informer) with a [`LoggingHandler`] reports what the
//! cluster does in the meantime.

#![deny(unsafe_code)]

pub mod driver;
pub mod handlers;
mod pod;

pub use driver::{Driver, DriverError, Report, Target};
pub use handlers::LoggingHandler;
pub use pod::SimplePod;
