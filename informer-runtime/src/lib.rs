//! Informer runtime components
//!
//! This crate keeps an in-memory cache of one collection in sync with the server and
//! tells interested parties about every change, in order.
//!
//! The pieces, bottom up:
//! - [`watcher()`] lists a collection and then watches it, relisting whenever the
//!   watch can no longer be resumed
//! - a [`reflector::Reflector`] applies watcher events to a [`Store`] and queues the
//!   resulting [`ChangeEvent`]s
//! - a [`dispatcher::Dispatcher`] drains that queue into registered [`EventHandler`]s
//!
//! Most users only need the [`Informer`], which wires all of them together.

#![deny(unsafe_code)]
#![deny(clippy::all)]

pub mod dispatcher;
pub mod informer;
pub mod queue;
pub mod reflector;
pub mod utils;
pub mod watcher;

pub use dispatcher::{EventHandler, HandlerFns, HandlerId};
pub use informer::{Config, Informer, InformerHandle, ShutdownTimeout};
pub use queue::ChangeEvent;
pub use reflector::Store;
pub use watcher::watcher;
