//! The local cache a reflector writes and everyone else reads
use crate::{queue::ChangeEvent, watcher};
use ahash::AHashMap;
use informer_core::{ObjectRef, ResourceObject};
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

type Cache = Arc<RwLock<AHashMap<ObjectRef, Arc<ResourceObject>>>>;

/// A writable Store handle
///
/// This is exclusive since it's not safe to share a single `Store` between multiple reflectors.
/// In particular, `Restarted` events will clobber the state of other connected reflectors.
///
/// Every mutation returns the [`ChangeEvent`]s it caused, which is how the reflector
/// feeds its delta queue.
#[derive(Debug)]
pub struct Writer {
    store: Cache,
    ready_tx: watch::Sender<bool>,
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

impl Writer {
    /// An empty, not yet ready store
    pub fn new() -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            store: Cache::default(),
            ready_tx,
        }
    }

    /// Return a read handle to the store
    ///
    /// Multiple read handles may be obtained, by either calling `as_reader` multiple times,
    /// or by calling `Store::clone()` afterwards.
    #[must_use]
    pub fn as_reader(&self) -> Store {
        Store {
            store: self.store.clone(),
            ready_rx: self.ready_tx.subscribe(),
        }
    }

    /// Insert or replace an object
    ///
    /// An object whose resource version matches the cached one is not a change and yields `None`.
    pub fn upsert(&mut self, obj: ResourceObject) -> Option<ChangeEvent> {
        let key = ObjectRef::from_obj(&obj);
        let current = Arc::new(obj);
        let mut store = self.store.write();
        if store.get(&key).is_some_and(|cached| same_version(cached, &current)) {
            return None;
        }
        Some(match store.insert(key, current.clone()) {
            Some(previous) => ChangeEvent::Modified { previous, current },
            None => ChangeEvent::Added(current),
        })
    }

    /// Remove an object, returning its last cached value
    pub fn remove(&mut self, key: &ObjectRef) -> Option<Arc<ResourceObject>> {
        self.store.write().remove(key)
    }

    /// Replace the whole store with a fresh snapshot, atomically
    ///
    /// Returns the changes that take the old contents to the new one: additions and
    /// updates in snapshot order, followed by deletions of identities the snapshot no
    /// longer holds.
    pub fn replace(&mut self, objs: Vec<ResourceObject>) -> Vec<ChangeEvent> {
        let mut changes = Vec::with_capacity(objs.len());
        let mut next = AHashMap::with_capacity(objs.len());
        let mut store = self.store.write();
        for obj in objs {
            let key = ObjectRef::from_obj(&obj);
            let current = Arc::new(obj);
            match store.remove(&key) {
                Some(cached) if same_version(&cached, &current) => {
                    next.insert(key, cached);
                }
                Some(previous) => {
                    changes.push(ChangeEvent::Modified {
                        previous,
                        current: current.clone(),
                    });
                    next.insert(key, current);
                }
                None => {
                    changes.push(ChangeEvent::Added(current.clone()));
                    next.insert(key, current);
                }
            }
        }
        let mut gone = std::mem::replace(&mut *store, next).into_iter().collect::<Vec<_>>();
        gone.sort_by(|(a, _), (b, _)| a.cmp(b));
        changes.extend(gone.into_iter().map(|(_, obj)| ChangeEvent::Deleted(obj)));
        changes
    }

    /// Applies a single watcher event to the store, returning the resulting changes
    pub fn apply_watcher_event(&mut self, event: watcher::Event) -> Vec<ChangeEvent> {
        match event {
            watcher::Event::Applied(obj) => self.upsert(obj).into_iter().collect(),
            watcher::Event::Deleted(obj) => {
                let last = self
                    .remove(&ObjectRef::from_obj(&obj))
                    .unwrap_or_else(|| Arc::new(obj));
                vec![ChangeEvent::Deleted(last)]
            }
            watcher::Event::Restarted(objs) => {
                let changes = self.replace(objs);
                self.mark_ready();
                changes
            }
        }
    }

    /// Flag the store as holding a complete view, releasing [`Store::wait_until_ready`]
    pub fn mark_ready(&mut self) {
        self.ready_tx.send_replace(true);
    }
}

fn same_version(cached: &ResourceObject, incoming: &ResourceObject) -> bool {
    match (cached.resource_version(), incoming.resource_version()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// The [`Writer`] was dropped before the store became ready
#[derive(Debug, Error)]
#[error("writer was dropped before store became ready")]
pub struct WriterDropped;

/// A readable cache of objects of one collection
///
/// Cloning will produce a new reference to the same backing store.
///
/// Cannot be constructed directly since one writer handle is required,
/// use `Writer::as_reader()` instead.
#[derive(Debug, Clone)]
pub struct Store {
    store: Cache,
    ready_rx: watch::Receiver<bool>,
}

impl Store {
    /// Retrieve the entry referred to by `key`, if it is in the cache.
    ///
    /// Note that this is a cache and may be stale. Deleted objects may still exist in the cache
    /// despite having been deleted in the cluster, and new objects may not yet exist in the cache.
    #[must_use]
    pub fn get(&self, key: &ObjectRef) -> Option<Arc<ResourceObject>> {
        self.store.read().get(key).cloned()
    }

    /// Return a full snapshot of the current values, ordered by identity
    #[must_use]
    pub fn state(&self) -> Vec<Arc<ResourceObject>> {
        let mut entries = self
            .store
            .read()
            .iter()
            .map(|(key, obj)| (key.clone(), obj.clone()))
            .collect::<Vec<_>>();
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        entries.into_iter().map(|(_, obj)| obj).collect()
    }

    /// Return the number of elements in the store
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.read().len()
    }

    /// Return whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.read().is_empty()
    }

    /// Whether the first snapshot has been applied
    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.ready_rx.borrow()
    }

    /// Wait for the store to be populated by the first snapshot
    ///
    /// # Errors
    ///
    /// Returns an error if the [`Writer`] was dropped before any snapshot was applied.
    pub async fn wait_until_ready(&self) -> Result<(), WriterDropped> {
        let mut ready_rx = self.ready_rx.clone();
        ready_rx.wait_for(|ready| *ready).await.map(|_| ()).map_err(|_| WriterDropped)
    }
}
