//! Informer behavior end to end, against the in-memory cluster
use async_trait::async_trait;
use backon::ExponentialBuilder;
use informer_client::{
    fake::{FakeCluster, Verb},
    Api,
};
use informer_core::{Collection, Kind, ObjectRef, ResourceObject};
use informer_runtime::{dispatcher::HandlerError, Config, EventHandler, Informer, InformerHandle};
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;

/// What a handler saw, reduced to identities and versions
#[derive(Debug, PartialEq)]
enum Seen {
    Add(ObjectRef, String),
    Update(ObjectRef, String, String),
    Delete(ObjectRef),
}

struct Recorder(mpsc::UnboundedSender<Seen>);

fn rv(obj: &ResourceObject) -> String {
    obj.resource_version().map(ToString::to_string).unwrap_or_default()
}

#[async_trait]
impl EventHandler for Recorder {
    async fn on_add(&self, obj: Arc<ResourceObject>) -> Result<(), HandlerError> {
        self.0.send(Seen::Add(ObjectRef::from_obj(&obj), rv(&obj)))?;
        Ok(())
    }

    async fn on_update(&self, old: Arc<ResourceObject>, new: Arc<ResourceObject>) -> Result<(), HandlerError> {
        self.0.send(Seen::Update(ObjectRef::from_obj(&new), rv(&old), rv(&new)))?;
        Ok(())
    }

    async fn on_delete(&self, obj: Arc<ResourceObject>) -> Result<(), HandlerError> {
        self.0.send(Seen::Delete(ObjectRef::from_obj(&obj)))?;
        Ok(())
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config() -> Config {
    init_logging();
    Config::default()
        .backoff(
            ExponentialBuilder::default()
                .with_min_delay(Duration::from_millis(10))
                .with_max_delay(Duration::from_millis(20))
                .without_max_times(),
        )
        .grace_period(Duration::from_secs(1))
}

/// Delays of 1s, 2s, 4s, 8s and so on, without jitter so virtual time is predictable
fn doubling_config() -> Config {
    config().backoff(
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(30))
            .with_factor(2.0)
            .without_max_times(),
    )
}

async fn start(api: Api) -> (InformerHandle, mpsc::UnboundedReceiver<Seen>) {
    start_with(api, config()).await
}

async fn start_with(api: Api, config: Config) -> (InformerHandle, mpsc::UnboundedReceiver<Seen>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let informer = Informer::new(api, config);
    informer.add_event_handler(Recorder(tx));
    let handle = informer.spawn(CancellationToken::new());
    tokio::time::timeout(Duration::from_secs(5), handle.store().wait_until_ready())
        .await
        .expect("store never became ready")
        .unwrap();
    (handle, rx)
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no event delivered in time")
        .expect("handler dropped")
}

async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<Seen>) {
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(rx.try_recv().ok(), None);
}

async fn converged(handle: &InformerHandle, cluster: &FakeCluster, collection: &Collection) {
    let store = handle.store();
    let check = async {
        loop {
            let cached = store.state().iter().map(|o| (**o).clone()).collect::<Vec<_>>();
            let mut expected = cluster.objects(collection.kind);
            expected.retain(|obj| collection.contains_namespace(obj.namespace_name()));
            if cached == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), check)
        .await
        .expect("store did not converge to the server state");
}

fn web() -> ObjectRef {
    ObjectRef::new("web").within("default")
}

#[tokio::test]
async fn store_ends_at_the_server_state() {
    let cluster = FakeCluster::seeded();
    let (handle, mut rx) = start(Api::all(cluster.client(), Kind::Pod)).await;
    assert!(matches!(next(&mut rx).await, Seen::Add(oref, _) if oref.name == "coredns"));

    cluster.insert(Kind::Pod, ResourceObject::pod("default", "web", "nginx:1"));
    cluster.insert(Kind::Pod, ResourceObject::pod("default", "db", "postgres"));
    cluster.modify(Kind::Pod, &web(), |pod| pod.spec["containers"][0]["image"] = "nginx:2".into());
    cluster.remove(Kind::Pod, &ObjectRef::new("db").within("default"));
    converged(&handle, &cluster, &Collection::all(Kind::Pod)).await;

    let cached = handle.store().get(&web()).unwrap();
    assert_eq!(cached.image(), Some("nginx:2"));
    assert!(handle.store().get(&ObjectRef::new("db").within("default")).is_none());
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn callbacks_follow_server_order_per_object() {
    let cluster = FakeCluster::seeded();
    let (handle, mut rx) = start(Api::namespaced(cluster.client(), Kind::Pod, "default")).await;

    let v1 = rv(&cluster.insert(Kind::Pod, ResourceObject::pod("default", "web", "nginx:1")));
    let v2 = rv(&cluster
        .modify(Kind::Pod, &web(), |pod| {
            pod.metadata.labels.insert("tier".into(), "front".into());
        })
        .unwrap());
    let v3 = rv(&cluster
        .modify(Kind::Pod, &web(), |pod| pod.spec["containers"][0]["image"] = "nginx:2".into())
        .unwrap());
    cluster.remove(Kind::Pod, &web());

    assert_eq!(next(&mut rx).await, Seen::Add(web(), v1.clone()));
    assert_eq!(next(&mut rx).await, Seen::Update(web(), v1, v2.clone()));
    assert_eq!(next(&mut rx).await, Seen::Update(web(), v2, v3));
    assert_eq!(next(&mut rx).await, Seen::Delete(web()));
    assert_quiet(&mut rx).await;
    assert!(handle.store().is_empty());
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn redelivered_snapshots_are_not_reported_again() {
    let cluster = FakeCluster::seeded();
    let (handle, mut rx) = start(Api::all(cluster.client(), Kind::Pod)).await;
    assert!(matches!(next(&mut rx).await, Seen::Add(oref, _) if oref.name == "coredns"));

    // nothing changes while the watch is expired, so the relist matches the cache
    cluster.expire_watches();
    let relisted = async {
        while cluster.calls(Verb::List) < 2 || cluster.open_watches() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), relisted).await.unwrap();

    let marker = rv(&cluster.insert(Kind::Pod, ResourceObject::pod("default", "web", "nginx")));
    assert_eq!(next(&mut rx).await, Seen::Add(web(), marker));
    assert_quiet(&mut rx).await;
    assert_eq!(handle.store().len(), 2);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn expired_watches_resync_to_the_server_state() {
    let cluster = FakeCluster::seeded();
    let kept = ResourceObject::pod("default", "kept", "nginx");
    let gone = ResourceObject::pod("default", "gone", "nginx");
    let v_kept = rv(&cluster.insert(Kind::Pod, kept));
    cluster.insert(Kind::Pod, gone);
    let (handle, mut rx) = start(Api::namespaced(cluster.client(), Kind::Pod, "default")).await;
    assert!(matches!(next(&mut rx).await, Seen::Add(oref, _) if oref.name == "gone"));
    assert!(matches!(next(&mut rx).await, Seen::Add(oref, _) if oref.name == "kept"));
    let default_pods = Collection::namespaced(Kind::Pod, "default");
    converged(&handle, &cluster, &default_pods).await;

    // these land while the watch is gone, so only the relist can reveal them
    cluster.expire_watches();
    let kept_ref = ObjectRef::new("kept").within("default");
    let v_kept2 = rv(&cluster
        .modify(Kind::Pod, &kept_ref, |pod| pod.spec["containers"][0]["image"] = "nginx:2".into())
        .unwrap());
    cluster.remove(Kind::Pod, &ObjectRef::new("gone").within("default"));
    let v_new = rv(&cluster.insert(Kind::Pod, ResourceObject::pod("default", "new", "redis")));

    assert_eq!(next(&mut rx).await, Seen::Update(kept_ref, v_kept, v_kept2));
    assert_eq!(next(&mut rx).await, Seen::Add(ObjectRef::new("new").within("default"), v_new));
    assert_eq!(next(&mut rx).await, Seen::Delete(ObjectRef::new("gone").within("default")));
    assert_quiet(&mut rx).await;
    converged(&handle, &cluster, &default_pods).await;
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn broken_watches_recover_after_growing_backoff() {
    let cluster = FakeCluster::seeded();
    let (handle, mut rx) = start_with(Api::all(cluster.client(), Kind::Pod), doubling_config()).await;
    next(&mut rx).await;

    cluster.fail_next(Verb::List, 2);
    cluster.fail_next(Verb::Watch, 1);
    let broken = Instant::now();
    cluster.break_watches();
    cluster.insert(Kind::Pod, ResourceObject::pod("default", "web", "nginx"));

    // relists fail after 1s and 3s, the third one lands after another 4s
    let seen = tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("no event delivered in time")
        .unwrap();
    assert!(matches!(seen, Seen::Add(oref, _) if oref == web()));
    let elapsed = broken.elapsed();
    assert!(elapsed >= Duration::from_secs(7) && elapsed < Duration::from_secs(8), "{elapsed:?}");
    assert_eq!(cluster.calls(Verb::List), 4);

    // the successful relist does not reset the backoff, so the failed watch waits 8s
    tokio::time::sleep(Duration::from_secs(7)).await;
    assert_eq!(cluster.open_watches(), 0);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(cluster.open_watches(), 1);
    converged(&handle, &cluster, &Collection::all(Kind::Pod)).await;
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn closed_watches_relist_after_backoff() {
    let cluster = FakeCluster::seeded();
    let (handle, mut rx) = start_with(Api::all(cluster.client(), Kind::Pod), doubling_config()).await;
    next(&mut rx).await;

    let closed = Instant::now();
    cluster.close_watches();
    let v = rv(&cluster.insert(Kind::Pod, ResourceObject::pod("default", "web", "nginx")));
    assert_eq!(next(&mut rx).await, Seen::Add(web(), v));
    let elapsed = closed.elapsed();
    assert!(elapsed >= Duration::from_secs(1) && elapsed < Duration::from_secs(2), "{elapsed:?}");
    assert_eq!(cluster.calls(Verb::List), 2);
    assert_quiet(&mut rx).await;
    converged(&handle, &cluster, &Collection::all(Kind::Pod)).await;
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn cancellation_stops_the_informer() {
    let cluster = FakeCluster::seeded();
    let (handle, mut rx) = start(Api::all(cluster.client(), Kind::Pod)).await;
    next(&mut rx).await;
    let store = handle.store();
    assert_eq!(cluster.open_watches(), 1);

    tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
        .await
        .expect("shutdown took longer than its grace period")
        .unwrap();
    assert_eq!(cluster.open_watches(), 0);

    cluster.insert(Kind::Pod, ResourceObject::pod("default", "web", "nginx"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(store.get(&web()).is_none());
    assert_eq!(store.len(), 1);
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn outside_cancellation_stops_run() {
    let cluster = FakeCluster::seeded();
    let cancel = CancellationToken::new();
    let informer = Informer::new(Api::all(cluster.client(), Kind::Namespace), config());
    let store = informer.store();
    let run = tokio::spawn(informer.run(cancel.clone()));
    tokio::time::timeout(Duration::from_secs(5), store.wait_until_ready())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(store.len(), 3);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), run).await.unwrap().unwrap();
    assert_eq!(cluster.open_watches(), 0);
}

#[tokio::test]
async fn pod_lifecycle_is_reported_once() {
    let cluster = FakeCluster::seeded();
    Api::all(cluster.client(), Kind::Namespace)
        .create(&ResourceObject::namespace("aerospike"))
        .await
        .unwrap();
    let pods = Api::namespaced(cluster.client(), Kind::Pod, "aerospike");
    let (handle, mut rx) = start(pods.clone()).await;
    assert!(handle.store().is_empty());

    let created = pods
        .create(&ResourceObject::pod("aerospike", "hello-world", "hello-world"))
        .await
        .unwrap();
    let hello = ObjectRef::new("hello-world").within("aerospike");
    assert_eq!(next(&mut rx).await, Seen::Add(hello.clone(), rv(&created)));
    assert_eq!(handle.store().get(&hello).unwrap().image(), Some("hello-world"));

    pods.delete("hello-world").await.unwrap();
    assert_eq!(next(&mut rx).await, Seen::Delete(hello));
    assert_quiet(&mut rx).await;
    assert!(handle.store().is_empty());
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn resuming_skips_the_initial_list() {
    let cluster = FakeCluster::seeded();
    let since = cluster.resource_version();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let informer = Informer::new(Api::all(cluster.client(), Kind::Pod), config()).resume_from(since);
    informer.add_event_handler(Recorder(tx));
    let handle = informer.spawn(CancellationToken::new());
    tokio::time::timeout(Duration::from_secs(5), handle.store().wait_until_ready())
        .await
        .unwrap()
        .unwrap();

    let v = rv(&cluster.insert(Kind::Pod, ResourceObject::pod("default", "web", "nginx")));
    assert_eq!(next(&mut rx).await, Seen::Add(web(), v));
    assert_eq!(cluster.calls(Verb::List), 0);
    assert!(handle.store().get(&ObjectRef::new("coredns").within("kube-system")).is_none());
    handle.shutdown().await.unwrap();
}
