//! Watches a collection for changes, recovering from disconnects by relisting
//!
//! See [`watcher`] for the primary entry point.

use educe::Educe;
use futures::{stream::BoxStream, Stream, StreamExt};
use informer_client::{Api, Error as ClientError};
use informer_core::{ErrorResponse, ListParams, ResourceObject, ResourceVersion, WatchEvent, WatchParams};
use thiserror::Error;
use tracing::debug;

/// Errors yielded by the [`watcher`] stream
///
/// All of them are recoverable: the next poll of the stream continues from the
/// appropriate state. Consumers are expected to back off before polling again.
#[derive(Debug, Error)]
pub enum Error {
    /// Listing the collection failed, the list will be retried
    #[error("failed to perform initial object list: {0}")]
    InitialListFailed(#[source] ClientError),
    /// Opening the watch failed
    ///
    /// It is retried from the same resume point, unless the resume point has
    /// expired, in which case the collection is relisted.
    #[error("failed to start watching object: {0}")]
    WatchStartFailed(#[source] ClientError),
    /// The server sent an error frame on an open watch, the collection will be relisted
    #[error("error returned by apiserver during watch: {0}")]
    WatchError(#[source] ErrorResponse),
    /// The watch connection broke, the collection will be relisted
    #[error("watch stream failed: {0}")]
    WatchFailed(#[source] ClientError),
    /// The server ended the watch at the given version, the collection will be relisted
    #[error("watch closed by apiserver at {0}")]
    WatchClosed(ResourceVersion),
}

impl Error {
    /// Whether this is part of the normal list/watch cycle rather than a failure
    ///
    /// Servers end watches on their own schedule and expire old resume points, so
    /// these are worth a resync but not a warning.
    pub fn is_resync(&self) -> bool {
        match self {
            Error::WatchStartFailed(ClientError::Expired(_)) | Error::WatchClosed(_) => true,
            Error::WatchError(err) => err.is_gone(),
            _ => false,
        }
    }
}

/// Convenient alias for `Result<T, watcher::Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Watch events returned from the [`watcher`]
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// An object was added or modified
    Applied(ResourceObject),
    /// An object was deleted
    ///
    /// NOTE: Deletions that happen while the watcher is disconnected are only
    /// visible as absences from the next [`Restarted`](Event::Restarted).
    Deleted(ResourceObject),
    /// The collection was relisted, so `Deleted` events may have been missed
    ///
    /// Should be used as a signal to replace the store contents atomically.
    ///
    /// Any objects that were previously [`Applied`](Event::Applied) but are not listed in this event
    /// should be assumed to have been [`Deleted`](Event::Deleted).
    Restarted(Vec<ResourceObject>),
}

/// Tuning for the [`watcher`]
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// A selector to restrict the list of returned objects by their labels.
    ///
    /// Defaults to everything if `None`.
    pub label_selector: Option<String>,

    /// Timeout for the list/watch call.
    ///
    /// This limits the duration of the call, regardless of any activity or inactivity.
    /// If unset for a watch call, the server picks its own. The watcher relists when
    /// the server closes the stream.
    pub timeout: Option<u32>,

    /// Enables watch bookmarks, which advance the resume point without events
    pub bookmarks: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            label_selector: None,
            timeout: None,
            bookmarks: true,
        }
    }
}

impl Config {
    /// Configure the timeout for list/watch calls
    ///
    /// This limits the duration of the call, regardless of any activity or inactivity.
    #[must_use]
    pub fn timeout(mut self, timeout_secs: u32) -> Self {
        self.timeout = Some(timeout_secs);
        self
    }

    /// Configure the selector to restrict the list of returned objects by their labels.
    #[must_use]
    pub fn labels(mut self, label_selector: &str) -> Self {
        self.label_selector = Some(label_selector.to_string());
        self
    }

    /// Disables watch bookmarks
    #[must_use]
    pub fn disable_bookmarks(mut self) -> Self {
        self.bookmarks = false;
        self
    }

    fn to_list_params(&self) -> ListParams {
        ListParams {
            label_selector: self.label_selector.clone(),
            timeout: self.timeout,
        }
    }

    fn to_watch_params(&self) -> WatchParams {
        WatchParams {
            label_selector: self.label_selector.clone(),
            timeout: self.timeout,
            bookmarks: self.bookmarks,
        }
    }
}

/// The internal finite state machine driving the [`watcher`]
#[derive(Educe)]
#[educe(Debug)]
enum State {
    /// The Watcher is empty, and the next poll will start the initial LIST to get all existing objects
    Empty,
    /// A resume point is known, so we should move on to starting the actual watch.
    InitListed { resource_version: ResourceVersion },
    /// The watch is in progress, from this point we just return events from the server.
    ///
    /// If the connection is disrupted, or the server ends the stream, the resume point
    /// is discarded and we go back to `Empty` to relist.
    Watching {
        resource_version: ResourceVersion,
        #[educe(Debug(ignore))]
        stream: BoxStream<'static, informer_client::Result<WatchEvent>>,
    },
}

/// Progresses the watcher a single step, returning (event, state)
///
/// This function should be trampolined: if event == `None`
/// then the function should be called again until it returns a Some.
async fn step_trampolined(api: &Api, config: &Config, state: State) -> (Option<Result<Event>>, State) {
    match state {
        State::Empty => match api.list(&config.to_list_params()).await {
            Ok(list) => match list.resource_version.clone() {
                Some(resource_version) => {
                    debug!(%resource_version, objects = list.items.len(), "listed collection");
                    (Some(Ok(Event::Restarted(list.items))), State::InitListed {
                        resource_version,
                    })
                }
                None => {
                    let status = ErrorResponse::failure(500, "InternalError", "list returned no resourceVersion");
                    (
                        Some(Err(Error::InitialListFailed(ClientError::Api(status)))),
                        State::Empty,
                    )
                }
            },
            Err(err) => (Some(Err(Error::InitialListFailed(err))), State::Empty),
        },
        State::InitListed { resource_version } => {
            match api.watch(&config.to_watch_params(), &resource_version).await {
                Ok(stream) => {
                    debug!(%resource_version, "watch started");
                    (None, State::Watching {
                        resource_version,
                        stream,
                    })
                }
                Err(err @ ClientError::Expired(_)) => (Some(Err(Error::WatchStartFailed(err))), State::Empty),
                Err(err) => (Some(Err(Error::WatchStartFailed(err))), State::InitListed {
                    resource_version,
                }),
            }
        }
        State::Watching {
            resource_version,
            mut stream,
        } => match stream.next().await {
            Some(Ok(WatchEvent::Added(obj) | WatchEvent::Modified(obj))) => {
                let resource_version = obj.resource_version().cloned().unwrap_or(resource_version);
                (Some(Ok(Event::Applied(obj))), State::Watching {
                    resource_version,
                    stream,
                })
            }
            Some(Ok(WatchEvent::Deleted(obj))) => {
                let resource_version = obj.resource_version().cloned().unwrap_or(resource_version);
                (Some(Ok(Event::Deleted(obj))), State::Watching {
                    resource_version,
                    stream,
                })
            }
            Some(Ok(WatchEvent::Bookmark(bm))) => {
                debug!(resource_version = %bm.metadata.resource_version, "bookmark received");
                (None, State::Watching {
                    resource_version: bm.metadata.resource_version,
                    stream,
                })
            }
            // HTTP GONE means we have desynced, any other error frame leaves us unsure too
            Some(Ok(WatchEvent::Error(err))) => (Some(Err(Error::WatchError(err))), State::Empty),
            Some(Err(err)) => (Some(Err(Error::WatchFailed(err))), State::Empty),
            None => (Some(Err(Error::WatchClosed(resource_version))), State::Empty),
        },
    }
}

/// Trampoline helper for `step_trampolined`
async fn step(api: &Api, config: &Config, mut state: State) -> (Result<Event>, State) {
    loop {
        match step_trampolined(api, config, state).await {
            (Some(result), new_state) => return (result, new_state),
            (None, new_state) => state = new_state,
        }
    }
}

/// Watches a collection for changes continuously
///
/// Compared to [`Api::watch`], this automatically tries to recover the stream upon errors.
///
/// Errors from the underlying watch are propagated, after which the stream will go into recovery mode on the next poll.
/// The stream never waits on its own: apply a backoff by not polling it for a while after
/// each error, like the [`Reflector`](crate::reflector::Reflector) does.
///
/// This is intended to provide a safe and atomic input interface for a state store like a
/// [`Writer`](crate::reflector::store::Writer).
///
/// # Recovery
///
/// - A failed list is retried as-is.
/// - A failed watch start is retried from the same resume point, unless the resume
///   point has expired, in which case the collection is relisted.
/// - A broken, expired or server-closed watch discards the resume point and relists,
///   starting with an [`Event::Restarted`].
///
/// Every one of these yields an error first, so no recovery path loops without giving
/// the consumer a chance to wait. [`Error::is_resync`] tells routine resyncs apart from failures.
///
/// When `resume_from` is set the initial list is skipped and the first watch starts
/// from that version.
pub fn watcher(
    api: Api,
    config: Config,
    resume_from: Option<ResourceVersion>,
) -> impl Stream<Item = Result<Event>> + Send {
    let initial = match resume_from {
        Some(resource_version) => State::InitListed { resource_version },
        None => State::Empty,
    };
    futures::stream::unfold((api, config, initial), |(api, config, state)| async {
        let (event, state) = step(&api, &config, state).await;
        Some((event, (api, config, state)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{pin_mut, poll, StreamExt};
    use informer_client::fake::{FakeCluster, Verb};
    use informer_core::{Kind, ObjectRef};

    fn pods(cluster: &FakeCluster) -> Api {
        Api::all(cluster.client(), Kind::Pod)
    }

    #[tokio::test]
    async fn lists_then_follows_changes() {
        let cluster = FakeCluster::seeded();
        let stream = watcher(pods(&cluster), Config::default(), None);
        pin_mut!(stream);

        match stream.next().await {
            Some(Ok(Event::Restarted(objs))) => assert_eq!(objs.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
        assert!(poll!(stream.next()).is_pending());

        cluster.insert(Kind::Pod, ResourceObject::pod("default", "nginx", "nginx"));
        assert!(matches!(stream.next().await, Some(Ok(Event::Applied(p))) if p.name() == "nginx"));
        cluster.remove(Kind::Pod, &ObjectRef::new("nginx").within("default"));
        assert!(matches!(stream.next().await, Some(Ok(Event::Deleted(p))) if p.name() == "nginx"));
    }

    #[tokio::test]
    async fn bookmarks_are_swallowed() {
        let cluster = FakeCluster::seeded();
        let stream = watcher(pods(&cluster), Config::default(), None);
        pin_mut!(stream);
        assert!(matches!(stream.next().await, Some(Ok(Event::Restarted(_)))));
        assert!(poll!(stream.next()).is_pending());
        cluster.bookmark();
        assert!(poll!(stream.next()).is_pending());
        assert_eq!(cluster.calls(Verb::Watch), 1);
    }

    #[tokio::test]
    async fn list_failures_are_reported_and_retried() {
        let cluster = FakeCluster::seeded();
        cluster.fail_next(Verb::List, 1);
        let stream = watcher(pods(&cluster), Config::default(), None);
        pin_mut!(stream);
        assert!(matches!(stream.next().await, Some(Err(Error::InitialListFailed(_)))));
        assert!(matches!(stream.next().await, Some(Ok(Event::Restarted(_)))));
    }

    #[tokio::test]
    async fn watch_start_failures_keep_the_resume_point() {
        let cluster = FakeCluster::seeded();
        cluster.fail_next(Verb::Watch, 1);
        let stream = watcher(pods(&cluster), Config::default(), None);
        pin_mut!(stream);
        assert!(matches!(stream.next().await, Some(Ok(Event::Restarted(_)))));
        assert!(matches!(stream.next().await, Some(Err(Error::WatchStartFailed(_)))));
        assert!(poll!(stream.next()).is_pending());
        assert_eq!(cluster.calls(Verb::List), 1);
        assert_eq!(cluster.calls(Verb::Watch), 2);
        assert!(Error::WatchClosed(seen).is_resync());
    }

    #[tokio::test]
    async fn expired_resume_point_relists() {
        let cluster = FakeCluster::seeded();
        let stale = cluster.resource_version();
        cluster.insert(Kind::Pod, ResourceObject::pod("default", "nginx", "nginx"));
        cluster.compact();

        let stream = watcher(pods(&cluster), Config::default(), Some(stale));
        pin_mut!(stream);
        match stream.next().await {
            Some(Err(err @ Error::WatchStartFailed(ClientError::Expired(_)))) => assert!(err.is_resync()),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(cluster.calls(Verb::List), 0);
        match stream.next().await {
            Some(Ok(Event::Restarted(objs))) => assert_eq!(objs.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(cluster.calls(Verb::List), 1);
    }

    #[tokio::test]
    async fn resuming_replays_missed_changes() {
        let cluster = FakeCluster::seeded();
        let since = cluster.resource_version();
        cluster.insert(Kind::Pod, ResourceObject::pod("default", "nginx", "nginx"));

        let stream = watcher(pods(&cluster), Config::default(), Some(since));
        pin_mut!(stream);
        assert!(matches!(stream.next().await, Some(Ok(Event::Applied(p))) if p.name() == "nginx"));
        assert_eq!(cluster.calls(Verb::List), 0);
    }

    #[tokio::test]
    async fn disrupted_watches_relist() {
        let cluster = FakeCluster::seeded();
        let stream = watcher(pods(&cluster), Config::default(), None);
        pin_mut!(stream);
        assert!(matches!(stream.next().await, Some(Ok(Event::Restarted(_)))));
        assert!(poll!(stream.next()).is_pending());

        cluster.break_watches();
        match stream.next().await {
            Some(Err(err @ Error::WatchFailed(_))) => assert!(!err.is_resync()),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(stream.next().await, Some(Ok(Event::Restarted(_)))));

        assert!(poll!(stream.next()).is_pending());
        cluster.expire_watches();
        match stream.next().await {
            Some(Err(err @ Error::WatchError(_))) => assert!(err.is_resync()),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(stream.next().await, Some(Ok(Event::Restarted(_)))));
        assert_eq!(cluster.calls(Verb::List), 3);
    }

    #[tokio::test]
    async fn closed_watches_relist() {
        let cluster = FakeCluster::seeded();
        let stream = watcher(pods(&cluster), Config::default(), None);
        pin_mut!(stream);
        assert!(matches!(stream.next().await, Some(Ok(Event::Restarted(_)))));
        cluster.insert(Kind::Pod, ResourceObject::pod("default", "web", "nginx"));
        assert!(matches!(stream.next().await, Some(Ok(Event::Applied(p))) if p.name() == "web"));
        let seen = cluster.resource_version();

        cluster.close_watches();
        match stream.next().await {
            Some(Err(Error::WatchClosed(rv))) => assert_eq!(rv, seen),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(cluster.calls(Verb::List), 1);
        match stream.next().await {
            Some(Ok(Event::Restarted(objs))) => assert_eq!(objs.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(cluster.calls(Verb::List), 2);
        assert!(Error::WatchClosed(seen).is_resync());
    }

    #[tokio::test]
    async fn label_selector_applies_to_list_and_watch() {
        let cluster = FakeCluster::seeded();
        let stream = watcher(pods(&cluster), Config::default().labels("app=web"), None);
        pin_mut!(stream);
        assert!(matches!(stream.next().await, Some(Ok(Event::Restarted(objs))) if objs.is_empty()));
        cluster.insert(Kind::Pod, ResourceObject::pod("default", "db", "postgres"));
        cluster.insert(
            Kind::Pod,
            ResourceObject::pod("default", "web", "nginx").label("app", "web"),
        );
        assert!(matches!(stream.next().await, Some(Ok(Event::Applied(p))) if p.name() == "web"));
    }
}
