//! An in-memory cluster implementing [`ResourceClient`]
//!
//! [`FakeCluster`] keeps namespaces and pods in memory, assigns resource versions from a
//! single revision counter, retains a bounded change history for watch resumption, and
//! lets tests inject failures and disturb open watches.
//!
//! ```
//! use informer_client::{fake::FakeCluster, Api};
//! use informer_core::{Kind, ListParams, ResourceObject};
//!
//! # async fn wrapper() -> Result<(), informer_client::Error> {
//! let cluster = FakeCluster::seeded();
//! let namespaces = Api::all(cluster.client(), Kind::Namespace);
//! namespaces.create(&ResourceObject::namespace("aerospike")).await?;
//! let list = namespaces.list(&ListParams::default()).await?;
//! assert!(list.names().contains(&"aerospike"));
//! # Ok(())
//! # }
//! ```
use crate::{client::ResourceClient, Client, Error, Result, WatchStream};
use async_trait::async_trait;
use futures::{channel::mpsc, StreamExt};
use informer_core::{
    watch::Bookmark, Collection, ErrorResponse, Kind, ListParams, ObjectList, ObjectRef, ResourceObject,
    ResourceVersion, Selector, WatchEvent, WatchParams,
};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::Arc,
};

const HISTORY_LIMIT: usize = 1024;

/// The calls a [`FakeCluster`] counts and can be told to fail
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    /// [`ResourceClient::list`]
    List,
    /// [`ResourceClient::create`]
    Create,
    /// [`ResourceClient::delete`]
    Delete,
    /// [`ResourceClient::watch`]
    Watch,
}

type Key = (Kind, ObjectRef);

/// A recorded mutation, kept so watches can resume from an older revision
struct Change {
    revision: u64,
    kind: Kind,
    previous: Option<ResourceObject>,
    event: WatchEvent,
}

struct Watcher {
    collection: Collection,
    selector: Selector,
    bookmarks: bool,
    tx: mpsc::UnboundedSender<Result<WatchEvent>>,
}

impl Watcher {
    fn selects(&self, obj: &ResourceObject) -> bool {
        self.collection.contains_namespace(obj.namespace_name()) && self.selector.matches(&obj.metadata.labels)
    }

    /// How a change looks from this watcher's point of view
    ///
    /// Label changes move objects in and out of a selector, so a modification can
    /// appear as an addition or deletion here.
    fn view(&self, change: &Change) -> Option<WatchEvent> {
        if change.kind != self.collection.kind {
            return None;
        }
        match &change.event {
            WatchEvent::Added(obj) | WatchEvent::Deleted(obj) => {
                self.selects(obj).then(|| change.event.clone())
            }
            WatchEvent::Modified(obj) => {
                let before = change.previous.as_ref().is_some_and(|prev| self.selects(prev));
                match (before, self.selects(obj)) {
                    (true, true) => Some(WatchEvent::Modified(obj.clone())),
                    (false, true) => Some(WatchEvent::Added(obj.clone())),
                    (true, false) => Some(WatchEvent::Deleted(obj.clone())),
                    (false, false) => None,
                }
            }
            WatchEvent::Bookmark(_) | WatchEvent::Error(_) => None,
        }
    }

    fn send(&self, event: Result<WatchEvent>) -> bool {
        self.tx.unbounded_send(event).is_ok()
    }
}

#[derive(Default)]
struct State {
    revision: u64,
    objects: BTreeMap<Key, ResourceObject>,
    history: VecDeque<Change>,
    /// Oldest revision a watch may still resume from
    compacted: u64,
    watchers: Vec<Watcher>,
    failures: HashMap<Verb, usize>,
    calls: HashMap<Verb, usize>,
}

impl State {
    fn next_version(&mut self) -> ResourceVersion {
        self.revision += 1;
        self.revision.to_string().into()
    }

    fn record(&mut self, kind: Kind, previous: Option<ResourceObject>, event: WatchEvent) {
        let change = Change {
            revision: self.revision,
            kind,
            previous,
            event,
        };
        self.watchers.retain(|w| match w.view(&change) {
            Some(ev) => w.send(Ok(ev)),
            None => !w.tx.is_closed(),
        });
        if self.history.len() == HISTORY_LIMIT {
            if let Some(oldest) = self.history.pop_front() {
                self.compacted = oldest.revision;
            }
        }
        self.history.push_back(change);
    }

    fn put(&mut self, kind: Kind, mut obj: ResourceObject) -> ResourceObject {
        obj.metadata.resource_version = Some(self.next_version());
        let key = (kind, ObjectRef::from_obj(&obj));
        let previous = self.objects.insert(key, obj.clone());
        let event = match previous {
            Some(_) => WatchEvent::Modified(obj.clone()),
            None => WatchEvent::Added(obj.clone()),
        };
        self.record(kind, previous, event);
        obj
    }

    fn take(&mut self, kind: Kind, oref: &ObjectRef) -> Option<ResourceObject> {
        let mut obj = self.objects.remove(&(kind, oref.clone()))?;
        if kind == Kind::Namespace {
            let pods = self
                .objects
                .keys()
                .filter(|(k, r)| *k == Kind::Pod && r.namespace.as_deref() == Some(oref.name.as_str()))
                .map(|(_, r)| r.clone())
                .collect::<Vec<_>>();
            for pod in pods {
                self.take(Kind::Pod, &pod);
            }
        }
        obj.metadata.resource_version = Some(self.next_version());
        self.record(kind, Some(obj.clone()), WatchEvent::Deleted(obj.clone()));
        Some(obj)
    }

    fn namespace_exists(&self, name: &str) -> bool {
        self.objects.contains_key(&(Kind::Namespace, ObjectRef::new(name)))
    }

    /// Count the call and consume one injected failure for it, if any
    fn enter(&mut self, verb: Verb) -> Result<()> {
        *self.calls.entry(verb).or_default() += 1;
        match self.failures.get_mut(&verb) {
            Some(n) if *n > 0 => {
                *n -= 1;
                Err(Error::unavailable(format!("injected {verb:?} failure")))
            }
            _ => Ok(()),
        }
    }

    fn check_namespace(&self, collection: &Collection) -> Result<()> {
        match &collection.namespace {
            Some(ns) if !self.namespace_exists(ns) => Err(not_found("namespaces", ns)),
            _ => Ok(()),
        }
    }

    fn list(&self, collection: &Collection, selector: &Selector) -> Result<ObjectList> {
        self.check_namespace(collection)?;
        let items = self
            .objects
            .iter()
            .filter(|((kind, _), obj)| {
                *kind == collection.kind
                    && collection.contains_namespace(obj.namespace_name())
                    && selector.matches(&obj.metadata.labels)
            })
            .map(|(_, obj)| obj.clone())
            .collect();
        Ok(ObjectList {
            items,
            resource_version: Some(self.revision.to_string().into()),
        })
    }

    fn create(&mut self, collection: &Collection, obj: &ResourceObject) -> Result<ResourceObject> {
        let kind = collection.kind;
        if obj.name().is_empty() {
            return Err(invalid(kind, "", "metadata.name: Required value"));
        }
        let mut obj = obj.clone();
        if kind.is_namespaced() {
            let Some(ns) = obj.metadata.namespace.clone().or_else(|| collection.namespace.clone()) else {
                return Err(invalid(kind, obj.name(), "metadata.namespace: Required value"));
            };
            if !collection.contains_namespace(Some(&ns)) {
                return Err(invalid(kind, obj.name(), "the namespace of the object does not match the request"));
            }
            if !self.namespace_exists(&ns) {
                return Err(not_found("namespaces", &ns));
            }
            obj.metadata.namespace = Some(ns);
        } else {
            obj.metadata.namespace = None;
        }
        if self.objects.contains_key(&(kind, ObjectRef::from_obj(&obj))) {
            return Err(Error::from_response(ErrorResponse::failure(
                409,
                "AlreadyExists",
                format!("{} \"{}\" already exists", kind.plural(), obj.name()),
            )));
        }
        Ok(self.put(kind, obj))
    }

    fn delete(&mut self, collection: &Collection, name: &str) -> Result<()> {
        let kind = collection.kind;
        let oref = match (&collection.namespace, kind.is_namespaced()) {
            (Some(ns), true) => ObjectRef::new(name).within(ns),
            (None, true) => return Err(invalid(kind, name, "a namespace is required to delete")),
            (_, false) => ObjectRef::new(name),
        };
        self.take(kind, &oref)
            .map(|_| ())
            .ok_or_else(|| not_found(kind.plural(), name))
    }

    fn watch(&mut self, collection: &Collection, wp: &WatchParams, since: &ResourceVersion) -> Result<WatchStream> {
        let selector = wp.selector().map_err(Error::InvalidSelector)?;
        let since = since.as_str().parse::<u64>().map_err(|_| {
            Error::from_response(ErrorResponse::failure(
                400,
                "BadRequest",
                format!("invalid resource version: {since}"),
            ))
        })?;
        if since < self.compacted {
            return Err(expired(since, self.revision));
        }
        let (tx, rx) = mpsc::unbounded();
        let watcher = Watcher {
            collection: collection.clone(),
            selector,
            bookmarks: wp.bookmarks,
            tx,
        };
        for change in self.history.iter().filter(|c| c.revision > since) {
            if let Some(ev) = watcher.view(change) {
                watcher.send(Ok(ev));
            }
        }
        self.watchers.push(watcher);
        Ok(rx.boxed())
    }
}

fn not_found(plural: &str, name: &str) -> Error {
    Error::from_response(ErrorResponse::failure(
        404,
        "NotFound",
        format!("{plural} \"{name}\" not found"),
    ))
}

fn invalid(kind: Kind, name: &str, detail: &str) -> Error {
    Error::from_response(ErrorResponse::failure(
        422,
        "Invalid",
        format!("{kind} \"{name}\" is invalid: {detail}"),
    ))
}

fn expired(since: u64, current: u64) -> Error {
    Error::from_response(expired_status(since, current))
}

fn expired_status(since: u64, current: u64) -> ErrorResponse {
    ErrorResponse::failure(
        410,
        "Expired",
        format!("too old resource version: {since} ({current})"),
    )
}

/// An in-memory cluster holding namespaces and pods
///
/// Cloning gives another handle to the same cluster. Resource versions are decimal
/// revision numbers shared by all objects, like an etcd revision.
///
/// Watch timeouts in [`WatchParams`] are ignored: streams stay open until the
/// cluster closes them or the receiver is dropped.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for FakeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FakeCluster")
            .field("revision", &state.revision)
            .field("objects", &state.objects.len())
            .field("watchers", &state.watchers.len())
            .finish()
    }
}

impl FakeCluster {
    /// An empty cluster, without even a default namespace
    pub fn new() -> Self {
        Self::default()
    }

    /// A cluster that looks freshly provisioned
    ///
    /// Holds the `default`, `kube-public` and `kube-system` namespaces, plus a `coredns`
    /// pod labelled `k8s-app=kube-dns` in `kube-system`.
    pub fn seeded() -> Self {
        let cluster = Self::new();
        for ns in ["default", "kube-public", "kube-system"] {
            cluster.insert(Kind::Namespace, ResourceObject::namespace(ns));
        }
        cluster.insert(
            Kind::Pod,
            ResourceObject::pod("kube-system", "coredns", "registry.k8s.io/coredns/coredns:v1.11.1")
                .label("k8s-app", "kube-dns"),
        );
        cluster
    }

    /// A [`Client`] talking to this cluster
    pub fn client(&self) -> Client {
        Client::new(self.clone())
    }

    /// Make the next `times` calls of `verb` fail with [`Error::Unavailable`]
    pub fn fail_next(&self, verb: Verb, times: usize) {
        *self.state.lock().failures.entry(verb).or_default() += times;
    }

    /// How many calls of `verb` were made so far, including failed ones
    pub fn calls(&self, verb: Verb) -> usize {
        self.state.lock().calls.get(&verb).copied().unwrap_or_default()
    }

    /// Store an object directly, as another actor would, bypassing validation
    ///
    /// Replaces any object with the same identity. Returns the stored object with its
    /// new resource version.
    pub fn insert(&self, kind: Kind, obj: ResourceObject) -> ResourceObject {
        self.state.lock().put(kind, obj)
    }

    /// Mutate a stored object in place, bumping its resource version
    pub fn modify(
        &self,
        kind: Kind,
        oref: &ObjectRef,
        f: impl FnOnce(&mut ResourceObject),
    ) -> Option<ResourceObject> {
        let mut state = self.state.lock();
        let mut obj = state.objects.get(&(kind, oref.clone()))?.clone();
        f(&mut obj);
        Some(state.put(kind, obj))
    }

    /// Remove an object directly, cascading for namespaces
    pub fn remove(&self, kind: Kind, oref: &ObjectRef) -> Option<ResourceObject> {
        self.state.lock().take(kind, oref)
    }

    /// Look up a stored object
    pub fn get(&self, kind: Kind, oref: &ObjectRef) -> Option<ResourceObject> {
        self.state.lock().objects.get(&(kind, oref.clone())).cloned()
    }

    /// All stored objects of a kind, ordered by identity
    pub fn objects(&self, kind: Kind) -> Vec<ResourceObject> {
        let state = self.state.lock();
        state
            .objects
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, obj)| obj.clone())
            .collect()
    }

    /// The latest revision handed out
    pub fn resource_version(&self) -> ResourceVersion {
        self.state.lock().revision.to_string().into()
    }

    /// Forget all history, so watches resuming from any earlier version get `Expired`
    pub fn compact(&self) {
        let mut state = self.state.lock();
        state.history.clear();
        state.compacted = state.revision;
    }

    /// Compact history and end every open watch with an `ERROR 410 Expired` frame
    pub fn expire_watches(&self) {
        self.compact();
        let mut state = self.state.lock();
        let status = expired_status(0, state.revision);
        for w in state.watchers.drain(..) {
            w.send(Ok(WatchEvent::Error(status.clone())));
        }
    }

    /// End every open watch cleanly, as a server-side timeout would
    pub fn close_watches(&self) {
        self.state.lock().watchers.clear();
    }

    /// End every open watch with a transport error
    pub fn break_watches(&self) {
        let mut state = self.state.lock();
        for w in state.watchers.drain(..) {
            w.send(Err(Error::unavailable("connection reset by peer")));
        }
    }

    /// Send a bookmark at the current revision to every watch that asked for them
    pub fn bookmark(&self) {
        let mut state = self.state.lock();
        let bookmark = Bookmark::at(state.revision.to_string().into());
        state
            .watchers
            .retain(|w| !w.bookmarks || w.send(Ok(WatchEvent::Bookmark(bookmark.clone()))));
    }

    /// Number of watches whose receiving end is still alive
    pub fn open_watches(&self) -> usize {
        let mut state = self.state.lock();
        state.watchers.retain(|w| !w.tx.is_closed());
        state.watchers.len()
    }
}

#[async_trait]
impl ResourceClient for FakeCluster {
    async fn list(&self, collection: &Collection, lp: &ListParams) -> Result<ObjectList> {
        let mut state = self.state.lock();
        state.enter(Verb::List)?;
        let selector = lp.selector().map_err(Error::InvalidSelector)?;
        state.list(collection, &selector)
    }

    async fn create(&self, collection: &Collection, obj: &ResourceObject) -> Result<ResourceObject> {
        let mut state = self.state.lock();
        state.enter(Verb::Create)?;
        state.create(collection, obj)
    }

    async fn delete(&self, collection: &Collection, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.enter(Verb::Delete)?;
        state.delete(collection, name)
    }

    async fn watch(
        &self,
        collection: &Collection,
        wp: &WatchParams,
        since: &ResourceVersion,
    ) -> Result<WatchStream> {
        let mut state = self.state.lock();
        state.enter(Verb::Watch)?;
        state.watch(collection, wp, since)
    }
}
