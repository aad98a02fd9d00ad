//! Caches objects in memory and turns watcher events into ordered changes

pub mod store;

pub use store::{Store, Writer};

use crate::{queue::DeltaSender, watcher};
use backon::Backoff;
use futures::{pin_mut, StreamExt};
use informer_client::Api;
use informer_core::ResourceVersion;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Create a [`Writer`] and its first [`Store`] reader
#[must_use]
pub fn store() -> (Store, Writer) {
    let writer = Writer::default();
    (writer.as_reader(), writer)
}

/// Keeps a [`Store`] in sync with a collection and feeds a delta queue
///
/// The reflector drives a [`watcher()`](watcher::watcher), applies every event to its
/// [`Writer`] and pushes the resulting changes, in order, onto the queue. Watcher errors
/// never reach the queue: each one is logged and followed by the next delay of the
/// backoff before the watcher is polled again. That includes routine resyncs, so a
/// server that keeps closing or expiring watches is not hammered with relists.
///
/// ```no_run
/// use informer_client::{fake::FakeCluster, Api};
/// use informer_core::Kind;
/// use informer_runtime::{queue::delta_queue, reflector::{self, Reflector}, utils, watcher};
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
/// # async fn wrapper() {
/// let pods = Api::all(FakeCluster::seeded().client(), Kind::Pod);
/// let (reader, writer) = reflector::store();
/// let (tx, mut rx) = delta_queue(None);
/// let backoff = utils::ResetTimerBackoff::new(
///     utils::ResettableBackoffWrapper::new(utils::default_backoff()),
///     Duration::from_secs(120),
/// );
/// let reflector = Reflector::new(pods, watcher::Config::default(), writer, tx, backoff);
/// tokio::spawn(reflector.run(CancellationToken::new()));
/// while let Some(change) = rx.pop().await {
///     println!("{} {}", change.kind(), change.object_ref());
/// }
/// # }
/// ```
pub struct Reflector {
    api: Api,
    config: watcher::Config,
    writer: Writer,
    queue: DeltaSender,
    backoff: Box<dyn Backoff>,
    resume_from: Option<ResourceVersion>,
}

impl Reflector {
    /// Set up a reflector, nothing happens until [`Reflector::run`]
    ///
    /// The reflector stops once `backoff` runs out of delays.
    pub fn new(
        api: Api,
        config: watcher::Config,
        writer: Writer,
        queue: DeltaSender,
        backoff: impl Backoff + 'static,
    ) -> Self {
        Self {
            api,
            config,
            writer,
            queue,
            backoff: Box::new(backoff),
            resume_from: None,
        }
    }

    /// Skip the initial list and start watching from `resource_version`
    ///
    /// The store is considered ready from the start: the caller vouches for the
    /// state up to that version.
    #[must_use]
    pub fn resume_from(mut self, resource_version: ResourceVersion) -> Self {
        self.resume_from = Some(resource_version);
        self
    }

    /// Run until `cancel` fires, the delta queue's consumer goes away or the backoff gives up
    ///
    /// Cancellation drops the open watch, and nothing touches the store after this returns.
    pub async fn run(self, cancel: CancellationToken) {
        let Reflector {
            api,
            config,
            mut writer,
            queue,
            mut backoff,
            resume_from,
        } = self;
        if resume_from.is_some() {
            writer.mark_ready();
        }
        let stream = watcher::watcher(api, config, resume_from);
        pin_mut!(stream);
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = stream.next() => event,
            };
            match event {
                Some(Ok(event)) => {
                    for change in writer.apply_watcher_event(event) {
                        debug!(
                            event = change.kind(),
                            object = %change.object_ref(),
                            resource_version = ?change.resource_version(),
                            "applied change"
                        );
                        let pushed = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return,
                            pushed = queue.push(change) => pushed,
                        };
                        if pushed.is_err() {
                            debug!("delta queue closed, stopping");
                            return;
                        }
                    }
                }
                Some(Err(err)) => {
                    let Some(delay) = backoff.next() else {
                        warn!(error = %err, "watcher error, backoff exhausted, giving up");
                        break;
                    };
                    if err.is_resync() {
                        info!(reason = %err, ?delay, "resyncing");
                    } else {
                        warn!(error = %err, ?delay, "watcher error, retrying");
                    }
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => break,
            }
        }
        debug!("reflector stopped");
    }
}
