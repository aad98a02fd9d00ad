//! Delivers queued changes to registered event handlers
//!
//! Handlers are registered on a shared [`Registrations`] set, which may change while
//! the [`Dispatcher`] runs. Each change is offered to every handler in registration
//! order. A handler that fails or panics is logged and skipped, and a slow handler is
//! cut off after the per-callback timeout so it cannot hold up the others.
use crate::queue::{ChangeEvent, DeltaReceiver};
use async_trait::async_trait;
use futures::FutureExt;
use informer_core::ResourceObject;
use parking_lot::RwLock;
use std::{
    any::Any,
    collections::BTreeMap,
    fmt,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Failure reported by an [`EventHandler`] callback
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Observer callbacks for one collection
///
/// All callbacks default to doing nothing, implement the ones you care about.
/// Objects are shared snapshots of the cache: they cannot be mutated, and holding on
/// to them does not keep anything locked.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// An object appeared
    async fn on_add(&self, obj: Arc<ResourceObject>) -> Result<(), HandlerError> {
        let _ = obj;
        Ok(())
    }

    /// An object changed from `old` to `new`
    async fn on_update(&self, old: Arc<ResourceObject>, new: Arc<ResourceObject>) -> Result<(), HandlerError> {
        let _ = (old, new);
        Ok(())
    }

    /// An object disappeared, `obj` is its last known state
    async fn on_delete(&self, obj: Arc<ResourceObject>) -> Result<(), HandlerError> {
        let _ = obj;
        Ok(())
    }
}

type ObjFn = Box<dyn Fn(Arc<ResourceObject>) + Send + Sync>;
type UpdateFn = Box<dyn Fn(Arc<ResourceObject>, Arc<ResourceObject>) + Send + Sync>;

/// An [`EventHandler`] made of plain closures
///
/// The closures are called inline on the dispatcher task. The per-callback timeout
/// can only cut off a callback at an `.await`, so a closure that blocks holds up
/// delivery to every handler until it returns. Implement [`EventHandler`] with async
/// methods for slow work instead.
///
/// ```
/// use informer_runtime::dispatcher::HandlerFns;
/// let handler = HandlerFns::new()
///     .on_add(|obj| println!("added {}", obj.name()))
///     .on_delete(|obj| println!("deleted {}", obj.name()));
/// ```
#[derive(Default)]
pub struct HandlerFns {
    add: Option<ObjFn>,
    update: Option<UpdateFn>,
    delete: Option<ObjFn>,
}

impl HandlerFns {
    /// A handler that ignores everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` for every added object
    #[must_use]
    pub fn on_add(mut self, f: impl Fn(Arc<ResourceObject>) + Send + Sync + 'static) -> Self {
        self.add = Some(Box::new(f));
        self
    }

    /// Run `f` with the previous and current state of every updated object
    #[must_use]
    pub fn on_update(
        mut self,
        f: impl Fn(Arc<ResourceObject>, Arc<ResourceObject>) + Send + Sync + 'static,
    ) -> Self {
        self.update = Some(Box::new(f));
        self
    }

    /// Run `f` for every deleted object
    #[must_use]
    pub fn on_delete(mut self, f: impl Fn(Arc<ResourceObject>) + Send + Sync + 'static) -> Self {
        self.delete = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for HandlerFns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerFns")
            .field("add", &self.add.is_some())
            .field("update", &self.update.is_some())
            .field("delete", &self.delete.is_some())
            .finish()
    }
}

#[async_trait]
impl EventHandler for HandlerFns {
    async fn on_add(&self, obj: Arc<ResourceObject>) -> Result<(), HandlerError> {
        if let Some(f) = &self.add {
            f(obj);
        }
        Ok(())
    }

    async fn on_update(&self, old: Arc<ResourceObject>, new: Arc<ResourceObject>) -> Result<(), HandlerError> {
        if let Some(f) = &self.update {
            f(old, new);
        }
        Ok(())
    }

    async fn on_delete(&self, obj: Arc<ResourceObject>) -> Result<(), HandlerError> {
        if let Some(f) = &self.delete {
            f(obj);
        }
        Ok(())
    }
}

/// Handle to one registration, used to remove it again
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

/// The set of handlers a [`Dispatcher`] delivers to
///
/// Cloning gives another handle to the same set. Changes take effect from the next
/// delivered event.
#[derive(Clone, Default)]
pub struct Registrations {
    handlers: Arc<RwLock<BTreeMap<HandlerId, Arc<dyn EventHandler>>>>,
    next_id: Arc<AtomicU64>,
}

impl Registrations {
    /// Register a handler, after every handler registered before it
    pub fn add(&self, handler: impl EventHandler + 'static) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().insert(id, Arc::new(handler));
        debug!(handler = %id, "registered event handler");
        id
    }

    /// Remove a handler, returning whether it was registered
    ///
    /// A callback of this handler that is already running is allowed to finish.
    pub fn remove(&self, id: HandlerId) -> bool {
        let removed = self.handlers.write().remove(&id).is_some();
        if removed {
            debug!(handler = %id, "removed event handler");
        }
        removed
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Whether no handler is registered
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    fn snapshot(&self) -> Vec<(HandlerId, Arc<dyn EventHandler>)> {
        self.handlers
            .read()
            .iter()
            .map(|(id, handler)| (*id, handler.clone()))
            .collect()
    }
}

impl fmt::Debug for Registrations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registrations")
            .field("handlers", &self.handlers.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Drains a delta queue into registered handlers
#[derive(Debug)]
pub struct Dispatcher {
    queue: DeltaReceiver,
    registrations: Registrations,
    handler_timeout: Duration,
}

impl Dispatcher {
    /// Deliver from `queue` to `registrations`, bounding each callback by `handler_timeout`
    pub fn new(queue: DeltaReceiver, registrations: Registrations, handler_timeout: Duration) -> Self {
        Self {
            queue,
            registrations,
            handler_timeout,
        }
    }

    /// Run until `cancel` fires or the queue is closed and drained
    ///
    /// On cancellation the callback in flight is allowed to finish (within its
    /// timeout), nothing further is delivered.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let change = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                change = self.queue.pop() => match change {
                    Some(change) => change,
                    None => break,
                },
            };
            for (id, handler) in self.registrations.snapshot() {
                if cancel.is_cancelled() {
                    break;
                }
                self.deliver(id, handler.as_ref(), &change).await;
            }
        }
        debug!("dispatcher stopped");
    }

    async fn deliver(&self, id: HandlerId, handler: &dyn EventHandler, change: &ChangeEvent) {
        let object = change.object_ref();
        let callback = async {
            match change {
                ChangeEvent::Added(obj) => handler.on_add(obj.clone()).await,
                ChangeEvent::Modified { previous, current } => {
                    handler.on_update(previous.clone(), current.clone()).await
                }
                ChangeEvent::Deleted(obj) => handler.on_delete(obj.clone()).await,
            }
        };
        let guarded = AssertUnwindSafe(callback).catch_unwind();
        match tokio::time::timeout(self.handler_timeout, guarded).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(err))) => {
                warn!(handler = %id, event = change.kind(), %object, error = %err, "event handler failed")
            }
            Ok(Err(panic)) => error!(
                handler = %id,
                event = change.kind(),
                %object,
                panic = panic_message(&*panic),
                "event handler panicked"
            ),
            Err(_) => warn!(
                handler = %id,
                event = change.kind(),
                %object,
                timeout = ?self.handler_timeout,
                "event handler timed out"
            ),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}
