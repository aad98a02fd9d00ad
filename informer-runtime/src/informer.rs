//! The informer: a reflector and a dispatcher sharing one store and one queue
use crate::{
    dispatcher::{Dispatcher, EventHandler, HandlerId, Registrations},
    queue::delta_queue,
    reflector::{Reflector, Store, Writer},
    utils::{default_backoff, ResetTimerBackoff, ResettableBackoffWrapper, DEFAULT_BACKOFF_RESET},
    watcher,
};
use backon::ExponentialBuilder;
use informer_client::Api;
use informer_core::ResourceVersion;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

/// Tuning for an [`Informer`]
#[derive(Clone, Debug)]
pub struct Config {
    /// What to list and watch
    pub watcher: watcher::Config,
    /// Capacity of the delta queue, `None` for unbounded
    ///
    /// A full bounded queue makes the reflector wait for the dispatcher.
    pub queue_capacity: Option<usize>,
    /// How long a single handler callback may run before it is abandoned
    pub handler_timeout: Duration,
    /// Backoff applied after every watcher error, including routine resyncs
    pub backoff: ExponentialBuilder,
    /// How long the reflector must go without errors before `backoff` starts over
    pub backoff_reset: Duration,
    /// How long [`InformerHandle::shutdown`] waits for both tasks to stop
    pub grace_period: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watcher: watcher::Config::default(),
            queue_capacity: None,
            handler_timeout: Duration::from_secs(5),
            backoff: default_backoff(),
            backoff_reset: DEFAULT_BACKOFF_RESET,
            grace_period: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Only list and watch objects matching a label selector
    #[must_use]
    pub fn labels(mut self, label_selector: &str) -> Self {
        self.watcher = self.watcher.labels(label_selector);
        self
    }

    /// Ask the server to end each list/watch call after `timeout_secs`
    #[must_use]
    pub fn timeout(mut self, timeout_secs: u32) -> Self {
        self.watcher = self.watcher.timeout(timeout_secs);
        self
    }

    /// Disables watch bookmarks
    #[must_use]
    pub fn disable_bookmarks(mut self) -> Self {
        self.watcher = self.watcher.disable_bookmarks();
        self
    }

    /// Bound the delta queue
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Set the per-callback timeout
    #[must_use]
    pub fn handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// Replace the retry backoff
    #[must_use]
    pub fn backoff(mut self, backoff: ExponentialBuilder) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the quiet period after which the backoff starts over from its first delay
    #[must_use]
    pub fn backoff_reset(mut self, quiet_period: Duration) -> Self {
        self.backoff_reset = quiet_period;
        self
    }

    /// Set the shutdown grace period
    #[must_use]
    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }
}

/// An eventually consistent local view of one collection, with change notifications
///
/// Register handlers, then [`run`](Informer::run) or [`spawn`](Informer::spawn) it.
/// The reflector and the dispatcher run as two concurrent activities; a slow handler
/// never stalls reading from the server.
///
/// ```no_run
/// use informer_client::{fake::FakeCluster, Api};
/// use informer_core::Kind;
/// use informer_runtime::{dispatcher::HandlerFns, Config, Informer};
/// use tokio_util::sync::CancellationToken;
/// # async fn wrapper() -> Result<(), Box<dyn std::error::Error>> {
/// let pods = Api::all(FakeCluster::seeded().client(), Kind::Pod);
/// let informer = Informer::new(pods, Config::default());
/// informer.add_event_handler(HandlerFns::new().on_add(|pod| println!("new pod {}", pod.name())));
/// let handle = informer.spawn(CancellationToken::new());
/// handle.store().wait_until_ready().await?;
/// handle.shutdown().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Informer {
    api: Api,
    config: Config,
    writer: Writer,
    registrations: Registrations,
    resume_from: Option<ResourceVersion>,
}

impl Informer {
    /// An informer for the collection `api` is bound to
    pub fn new(api: Api, config: Config) -> Self {
        Self {
            api,
            config,
            writer: Writer::default(),
            registrations: Registrations::default(),
            resume_from: None,
        }
    }

    /// Skip the initial list and watch from a known resource version
    #[must_use]
    pub fn resume_from(mut self, resource_version: ResourceVersion) -> Self {
        self.resume_from = Some(resource_version);
        self
    }

    /// A read handle to the local cache
    pub fn store(&self) -> Store {
        self.writer.as_reader()
    }

    /// Register observer callbacks
    pub fn add_event_handler(&self, handler: impl EventHandler + 'static) -> HandlerId {
        self.registrations.add(handler)
    }

    /// Remove previously registered callbacks
    pub fn remove_event_handler(&self, id: HandlerId) -> bool {
        self.registrations.remove(id)
    }

    fn into_parts(self) -> (Reflector, Dispatcher, Parts) {
        let Informer {
            api,
            config,
            writer,
            registrations,
            resume_from,
        } = self;
        let parts = Parts {
            collection: api.collection().to_string(),
            store: writer.as_reader(),
            registrations: registrations.clone(),
            grace_period: config.grace_period,
        };
        let (tx, rx) = delta_queue(config.queue_capacity);
        let backoff = ResetTimerBackoff::new(
            ResettableBackoffWrapper::new(config.backoff),
            config.backoff_reset,
        );
        let mut reflector = Reflector::new(api, config.watcher, writer, tx, backoff);
        if let Some(rv) = resume_from {
            reflector = reflector.resume_from(rv);
        }
        let dispatcher = Dispatcher::new(rx, registrations, config.handler_timeout);
        (reflector, dispatcher, parts)
    }

    /// Run the reflector and dispatcher until `cancel` fires
    ///
    /// Both halves run concurrently on the current task. Use [`Informer::spawn`] to run
    /// them as separate tasks instead.
    pub async fn run(self, cancel: CancellationToken) {
        let (reflector, dispatcher, parts) = self.into_parts();
        let collection = parts.collection;
        tokio::join!(
            reflector
                .run(cancel.clone())
                .instrument(info_span!("reflector", %collection)),
            dispatcher
                .run(cancel.clone())
                .instrument(info_span!("dispatcher", %collection)),
        );
    }

    /// Start the reflector and dispatcher as two background tasks
    ///
    /// `cancel` stops both, as does [`InformerHandle::shutdown`]. The spans of both
    /// tasks are children of the span that is current here.
    pub fn spawn(self, cancel: CancellationToken) -> InformerHandle {
        let (reflector, dispatcher, parts) = self.into_parts();
        let collection = parts.collection.as_str();
        let reflector = tokio::spawn(
            reflector
                .run(cancel.clone())
                .instrument(info_span!("reflector", %collection)),
        );
        let dispatcher = tokio::spawn(
            dispatcher
                .run(cancel.clone())
                .instrument(info_span!("dispatcher", %collection)),
        );
        InformerHandle {
            cancel,
            reflector,
            dispatcher,
            store: parts.store,
            registrations: parts.registrations,
            grace_period: parts.grace_period,
        }
    }
}

struct Parts {
    collection: String,
    store: Store,
    registrations: Registrations,
    grace_period: Duration,
}

/// The tasks did not stop within the grace period and were aborted
#[derive(Debug, Error)]
#[error("informer did not stop within {0:?}, tasks were aborted")]
pub struct ShutdownTimeout(pub Duration);

/// A running, spawned [`Informer`]
#[derive(Debug)]
pub struct InformerHandle {
    cancel: CancellationToken,
    reflector: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
    store: Store,
    registrations: Registrations,
    grace_period: Duration,
}

impl InformerHandle {
    /// A read handle to the local cache
    pub fn store(&self) -> Store {
        self.store.clone()
    }

    /// Register observer callbacks, effective from the next dispatched change
    pub fn add_event_handler(&self, handler: impl EventHandler + 'static) -> HandlerId {
        self.registrations.add(handler)
    }

    /// Remove previously registered callbacks
    pub fn remove_event_handler(&self, id: HandlerId) -> bool {
        self.registrations.remove(id)
    }

    /// The token that stops this informer
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop both tasks, waiting at most the configured grace period
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownTimeout`] if either task is still running after the grace
    /// period; both are aborted in that case.
    pub async fn shutdown(self) -> Result<(), ShutdownTimeout> {
        let grace = self.grace_period;
        self.shutdown_within(grace).await
    }

    /// Stop both tasks, waiting at most `grace`
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownTimeout`] if either task is still running after `grace`.
    pub async fn shutdown_within(self, grace: Duration) -> Result<(), ShutdownTimeout> {
        self.cancel.cancel();
        let InformerHandle {
            mut reflector,
            mut dispatcher,
            ..
        } = self;
        let joined = tokio::time::timeout(grace, async {
            let (r, d) = tokio::join!(&mut reflector, &mut dispatcher);
            for res in [r, d] {
                if let Err(err) = res {
                    warn!(error = %err, "informer task ended abnormally");
                }
            }
        })
        .await;
        match joined {
            Ok(()) => {
                debug!("informer stopped");
                Ok(())
            }
            Err(_) => {
                reflector.abort();
                dispatcher.abort();
                warn!(?grace, "informer did not stop in time, aborting");
                Err(ShutdownTimeout(grace))
            }
        }
    }
}
