//! The delta queue between a reflector and its dispatcher
//!
//! A single-producer, single-consumer FIFO of [`ChangeEvent`]s. It never
//! reorders or coalesces entries. A bounded queue applies backpressure by making
//! [`DeltaSender::push`] wait for room.
use informer_core::{ObjectRef, ResourceObject, ResourceVersion};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// A change to the local cache, in the order it was applied
#[derive(Clone, Debug, PartialEq)]
pub enum ChangeEvent {
    /// An identity appeared
    Added(Arc<ResourceObject>),
    /// A known identity changed
    Modified {
        /// The cached value before this change
        previous: Arc<ResourceObject>,
        /// The value now cached
        current: Arc<ResourceObject>,
    },
    /// An identity disappeared, carrying its last-known value
    Deleted(Arc<ResourceObject>),
}

impl ChangeEvent {
    /// The object this event is about, in its latest known state
    pub fn object(&self) -> &Arc<ResourceObject> {
        match self {
            ChangeEvent::Added(obj) | ChangeEvent::Deleted(obj) => obj,
            ChangeEvent::Modified { current, .. } => current,
        }
    }

    /// Identity of the affected object
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::from_obj(self.object())
    }

    /// The resource version that delivered this change
    pub fn resource_version(&self) -> Option<&ResourceVersion> {
        self.object().resource_version()
    }

    /// Short name of the variant, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::Added(_) => "added",
            ChangeEvent::Modified { .. } => "modified",
            ChangeEvent::Deleted(_) => "deleted",
        }
    }
}

/// The receiving half was dropped
#[derive(Debug, Error)]
#[error("delta queue closed")]
pub struct QueueClosed(pub ChangeEvent);

#[derive(Debug)]
enum Tx {
    Bounded(mpsc::Sender<ChangeEvent>),
    Unbounded(mpsc::UnboundedSender<ChangeEvent>),
}

#[derive(Debug)]
enum Rx {
    Bounded(mpsc::Receiver<ChangeEvent>),
    Unbounded(mpsc::UnboundedReceiver<ChangeEvent>),
}

/// Producing half of a delta queue, owned by the reflector
#[derive(Debug)]
pub struct DeltaSender {
    tx: Tx,
}

/// Consuming half of a delta queue, owned by the dispatcher
#[derive(Debug)]
pub struct DeltaReceiver {
    rx: Rx,
}

/// Create a delta queue
///
/// `None` makes an unbounded queue. `Some(n)` holds at most `n` pending events
/// (at least one), after which producers wait.
pub fn delta_queue(capacity: Option<usize>) -> (DeltaSender, DeltaReceiver) {
    match capacity {
        Some(n) => {
            let (tx, rx) = mpsc::channel(n.max(1));
            (DeltaSender { tx: Tx::Bounded(tx) }, DeltaReceiver {
                rx: Rx::Bounded(rx),
            })
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (DeltaSender { tx: Tx::Unbounded(tx) }, DeltaReceiver {
                rx: Rx::Unbounded(rx),
            })
        }
    }
}

impl DeltaSender {
    /// Append an event, waiting for room if the queue is bounded and full
    pub async fn push(&self, event: ChangeEvent) -> Result<(), QueueClosed> {
        match &self.tx {
            Tx::Bounded(tx) => tx.send(event).await.map_err(|err| QueueClosed(err.0)),
            Tx::Unbounded(tx) => tx.send(event).map_err(|err| QueueClosed(err.0)),
        }
    }
}

impl DeltaReceiver {
    /// Take the oldest event, waiting while the queue is empty
    ///
    /// Returns `None` once the sender is dropped and every queued event was taken.
    pub async fn pop(&mut self) -> Option<ChangeEvent> {
        match &mut self.rx {
            Rx::Bounded(rx) => rx.recv().await,
            Rx::Unbounded(rx) => rx.recv().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{pin_mut, poll};
    use std::task::Poll;

    fn added(name: &str) -> ChangeEvent {
        ChangeEvent::Added(Arc::new(ResourceObject::pod("default", name, "nginx")))
    }

    #[tokio::test]
    async fn preserves_order() {
        let (tx, mut rx) = delta_queue(None);
        for name in ["a", "b", "c"] {
            tx.push(added(name)).await.unwrap();
        }
        drop(tx);
        let mut names = Vec::new();
        while let Some(ev) = rx.pop().await {
            names.push(ev.object().name().to_string());
        }
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn bounded_queue_blocks_producer() {
        let (tx, mut rx) = delta_queue(Some(1));
        tx.push(added("a")).await.unwrap();
        let second = tx.push(added("b"));
        pin_mut!(second);
        assert!(poll!(second.as_mut()).is_pending());
        assert_eq!(rx.pop().await.map(|ev| ev.object().name().to_string()).as_deref(), Some("a"));
        assert!(matches!(poll!(second.as_mut()), Poll::Ready(Ok(()))));
        assert_eq!(rx.pop().await.map(|ev| ev.object().name().to_string()).as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn push_fails_once_consumer_is_gone() {
        let (tx, rx) = delta_queue(None);
        drop(rx);
        let err = tx.push(added("a")).await.unwrap_err();
        assert_eq!(err.0.object().name(), "a");
    }

    #[test]
    fn modified_events_report_current_state() {
        let mut previous = ResourceObject::pod("default", "web", "nginx:1");
        previous.metadata.resource_version = Some("1".into());
        let mut current = ResourceObject::pod("default", "web", "nginx:2");
        current.metadata.resource_version = Some("2".into());
        let ev = ChangeEvent::Modified {
            previous: Arc::new(previous),
            current: Arc::new(current),
        };
        assert_eq!(ev.object().image(), Some("nginx:2"));
        assert_eq!(ev.resource_version(), Some(&"2".into()));
        assert_eq!(ev.object_ref(), ObjectRef::new("web").within("default"));
        assert_eq!(ev.kind(), "modified");
    }
}
