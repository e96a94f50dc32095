use std::sync::Arc;

use ahash::AHashMap as HashMap;
use async_trait::async_trait;
use tenant_lister_core::{ResourceAttributes, Subject};
use tenant_lister_k8s_api::{Namespace, ObjectMeta};
use tokio::time::{self, Duration};

use super::*;

fn mk_ns(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some([("env".to_string(), "test".to_string())].into()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// A fixed cluster view: a namespace list and, per namespace, the subjects
/// the locator reports.
#[derive(Clone, Default)]
struct StaticCluster {
    namespaces: Vec<Namespace>,
    subjects: HashMap<String, Vec<Subject>>,
    failing: Option<String>,
}

impl StaticCluster {
    fn with_namespace(mut self, ns: Namespace, subjects: Vec<Subject>) -> Self {
        let name = ns.metadata.name.clone().unwrap_or_default();
        self.namespaces.push(ns);
        self.subjects.insert(name, subjects);
        self
    }

    /// The locator fails for the named namespace.
    fn with_failing_namespace(mut self, ns: Namespace) -> Self {
        self.failing = Some(ns.metadata.name.clone().unwrap_or_default());
        self.namespaces.push(ns);
        self
    }
}

#[async_trait]
impl NamespaceLister for StaticCluster {
    async fn list_namespaces(&self) -> anyhow::Result<Vec<Namespace>> {
        Ok(self.namespaces.clone())
    }
}

#[async_trait]
impl SubjectLocator for StaticCluster {
    async fn allowed_subjects(
        &self,
        attributes: &ResourceAttributes,
    ) -> anyhow::Result<Vec<Subject>> {
        assert_eq!(attributes.verb, "get");
        assert_eq!(attributes.resource, "namespaces");
        assert_eq!(attributes.namespace, attributes.name);
        assert!(attributes.resource_request);

        if self.failing.as_deref() == Some(attributes.name.as_str()) {
            anyhow::bail!("clusterrole evicted from the policy cache");
        }
        Ok(self.subjects.get(&attributes.name).cloned().unwrap_or_default())
    }
}

struct FailingLister;

#[async_trait]
impl NamespaceLister for FailingLister {
    async fn list_namespaces(&self) -> anyhow::Result<Vec<Namespace>> {
        anyhow::bail!("informer cache unavailable")
    }
}

struct StuckLister;

#[async_trait]
impl NamespaceLister for StuckLister {
    async fn list_namespaces(&self) -> anyhow::Result<Vec<Namespace>> {
        std::future::pending::<()>().await;
        Ok(Vec::new())
    }
}

/// A locator that parks inside `allowed_subjects` until released, to hold a
/// synchronization in flight.
#[derive(Clone)]
struct GatedCluster {
    inner: StaticCluster,
    entered: Arc<tokio::sync::Notify>,
    release: Arc<tokio::sync::Notify>,
}

impl GatedCluster {
    fn new(inner: StaticCluster) -> Self {
        Self {
            inner,
            entered: Arc::new(tokio::sync::Notify::new()),
            release: Arc::new(tokio::sync::Notify::new()),
        }
    }
}

#[async_trait]
impl SubjectLocator for GatedCluster {
    async fn allowed_subjects(
        &self,
        attributes: &ResourceAttributes,
    ) -> anyhow::Result<Vec<Subject>> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.allowed_subjects(attributes).await
    }
}

async fn synched(cluster: StaticCluster) -> SynchronizedAccessCache<StaticCluster, StaticCluster> {
    let cache = SynchronizedAccessCache::new(cluster.clone(), cluster, SyncConfig::default());
    cache.synch().await.expect("synch must succeed");
    cache
}

#[test]
fn lookup_on_unset_cache_is_empty() {
    let cache = AccessCache::new();
    assert!(cache.list(&Subject::user("alice")).is_empty());
    assert!(cache
        .list_all([&Subject::user("alice"), &Subject::group("devs")])
        .is_empty());
}

#[test]
fn restock_replaces_the_whole_snapshot() {
    let cache = AccessCache::new();

    let mut entries = AccessEntries::default();
    entries.insert(Subject::user("alice"), vec![mk_ns("ns1")]);
    cache.restock(Arc::new(entries));
    assert_eq!(cache.list(&Subject::user("alice")).len(), 1);

    let mut entries = AccessEntries::default();
    entries.insert(Subject::user("bob"), vec![mk_ns("ns2")]);
    cache.restock(Arc::new(entries));
    assert!(cache.list(&Subject::user("alice")).is_empty());
    assert_eq!(cache.list(&Subject::user("bob")).len(), 1);
}

#[test]
fn restock_is_idempotent() {
    let cache = AccessCache::new();
    let mut entries = AccessEntries::default();
    entries.insert(Subject::user("alice"), vec![mk_ns("ns1"), mk_ns("ns2")]);
    let entries = Arc::new(entries);

    cache.restock(entries.clone());
    let first = cache.list(&Subject::user("alice"));
    cache.restock(entries);
    assert_eq!(cache.list(&Subject::user("alice")), first);
}

#[test]
fn restock_with_empty_entries_empties_every_lookup() {
    let cache = AccessCache::new();
    let mut entries = AccessEntries::default();
    entries.insert(Subject::user("alice"), vec![mk_ns("ns1")]);
    cache.restock(Arc::new(entries));

    cache.restock(Arc::new(AccessEntries::default()));
    assert!(cache.list(&Subject::user("alice")).is_empty());
}

#[test]
fn group_lookup_deduplicates_by_namespace_name() {
    let cache = AccessCache::new();
    let mut entries = AccessEntries::default();
    entries.insert(Subject::user("alice"), vec![mk_ns("ns1")]);
    entries.insert(Subject::group("devs"), vec![mk_ns("ns1"), mk_ns("ns2")]);
    cache.restock(Arc::new(entries));

    let alice = Subject::user("alice");
    let devs = Subject::group("devs");
    let out = cache.list_all([&alice, &devs]);
    assert_eq!(out.len(), 2);
    let names: Vec<_> = out
        .iter()
        .map(|ns| ns.metadata.name.clone().unwrap_or_default())
        .collect();
    assert_eq!(names, vec!["ns1", "ns2"]);

    // Unknown subjects contribute nothing; empty input yields empty output.
    assert_eq!(cache.list_all([&alice, &Subject::user("mallory")]).len(), 1);
    assert!(cache.list_all(std::iter::empty()).is_empty());
}

#[tokio::test]
async fn empty_cluster_yields_empty_lookups() {
    let cache = synched(StaticCluster::default()).await;
    assert!(cache.cache().list(&Subject::user("alice")).is_empty());
}

#[tokio::test]
async fn user_record_carries_access_and_visibility_metadata() {
    let cluster =
        StaticCluster::default().with_namespace(mk_ns("myns"), vec![Subject::user("alice")]);
    let cache = synched(cluster).await;

    let records = cache.cache().list(&Subject::user("alice"));
    assert_eq!(records.len(), 1);
    let ns = &records[0];
    assert_eq!(ns.metadata.name.as_deref(), Some("myns"));

    let nls = ns.metadata.labels.as_ref().expect("labels must be set");
    assert_eq!(nls.get(labels::ACCESS_LABEL).map(String::as_str), Some("user"));
    assert_eq!(
        nls.get(labels::VISIBILITY_LABEL).map(String::as_str),
        Some(labels::VISIBILITY_PRIVATE),
    );
    assert_eq!(nls.get("env").map(String::as_str), Some("test"));

    let nas = ns
        .metadata
        .annotations
        .as_ref()
        .expect("annotations must be set");
    assert_eq!(
        nas.get(labels::SUBJECT_NAME_ANNOTATION).map(String::as_str),
        Some("alice"),
    );
    assert!(nas.get(labels::SUBJECT_NAMESPACE_ANNOTATION).is_none());
}

#[tokio::test]
async fn service_account_record_carries_both_subject_annotations() {
    let cluster = StaticCluster::default().with_namespace(
        mk_ns("myns"),
        vec![Subject::service_account("team-a", "pipeline")],
    );
    let cache = synched(cluster).await;

    let records = cache
        .cache()
        .list(&Subject::service_account("team-a", "pipeline"));
    assert_eq!(records.len(), 1);
    let ns = &records[0];

    let nls = ns.metadata.labels.as_ref().expect("labels must be set");
    assert_eq!(
        nls.get(labels::ACCESS_LABEL).map(String::as_str),
        Some("serviceaccount"),
    );

    let nas = ns
        .metadata
        .annotations
        .as_ref()
        .expect("annotations must be set");
    assert_eq!(
        nas.get(labels::SUBJECT_NAME_ANNOTATION).map(String::as_str),
        Some("pipeline"),
    );
    assert_eq!(
        nas.get(labels::SUBJECT_NAMESPACE_ANNOTATION)
            .map(String::as_str),
        Some("team-a"),
    );
}

#[tokio::test]
async fn system_authenticated_marks_every_record_of_the_namespace() {
    let cluster = StaticCluster::default().with_namespace(
        mk_ns("shared"),
        vec![
            Subject::user("alice"),
            Subject::group(tenant_lister_core::GROUP_SYSTEM_AUTHENTICATED),
        ],
    );
    let cache = synched(cluster).await;

    for subject in [
        Subject::user("alice"),
        Subject::group(tenant_lister_core::GROUP_SYSTEM_AUTHENTICATED),
    ] {
        let records = cache.cache().list(&subject);
        assert_eq!(records.len(), 1);
        let nls = records[0].metadata.labels.as_ref().expect("labels");
        assert_eq!(
            nls.get(labels::VISIBILITY_LABEL).map(String::as_str),
            Some(labels::VISIBILITY_AUTHENTICATED),
        );
        assert_eq!(
            nls.get(labels::ACCESS_LABEL).map(String::as_str),
            Some(subject.kind.access_label()),
        );
    }
}

#[tokio::test]
async fn duplicate_subjects_collapse_to_one_entry() {
    let cluster = StaticCluster::default().with_namespace(
        mk_ns("myns"),
        vec![
            Subject::user("alice"),
            Subject::user("alice"),
            Subject::user("alice"),
        ],
    );
    let cache = synched(cluster).await;
    assert_eq!(cache.cache().list(&Subject::user("alice")).len(), 1);
}

#[tokio::test]
async fn namespace_order_is_deterministic_per_subject() {
    let cluster = StaticCluster::default()
        .with_namespace(mk_ns("ns1"), vec![Subject::group("devs")])
        .with_namespace(mk_ns("ns2"), vec![Subject::group("devs")]);
    let cache = synched(cluster).await;

    let names: Vec<_> = cache
        .cache()
        .list(&Subject::group("devs"))
        .iter()
        .map(|ns| ns.metadata.name.clone().unwrap_or_default())
        .collect();
    assert_eq!(names, vec!["ns1", "ns2"]);
}

#[tokio::test]
async fn locator_failure_drops_only_that_namespace() {
    let cluster = StaticCluster::default()
        .with_namespace(mk_ns("healthy"), vec![Subject::user("alice")])
        .with_failing_namespace(mk_ns("broken"));
    let cache = synched(cluster).await;

    let records = cache.cache().list(&Subject::user("alice"));
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].metadata.name.as_deref(), Some("healthy"));
}

#[tokio::test]
async fn list_failure_keeps_the_previous_snapshot() {
    let cluster =
        StaticCluster::default().with_namespace(mk_ns("myns"), vec![Subject::user("alice")]);
    let cache = synched(cluster.clone()).await;

    let failing =
        SynchronizedAccessCache::new(cluster, FailingLister, SyncConfig::default());
    assert!(matches!(
        failing.synch().await,
        Err(SynchError::List(_)),
    ));
    assert!(failing.cache().list(&Subject::user("alice")).is_empty());

    // The first cache's snapshot is untouched by the failed instance.
    assert_eq!(cache.cache().list(&Subject::user("alice")).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn synch_times_out_on_an_unbounded_lister() {
    let cache = SynchronizedAccessCache::new(
        StaticCluster::default(),
        StuckLister,
        SyncConfig {
            synch_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        },
    );
    assert!(matches!(
        cache.synch().await,
        Err(SynchError::DeadlineExceeded),
    ));

    // The flag is cleared on the failure path, so a later synch may run.
    assert!(matches!(
        cache.synch().await,
        Err(SynchError::DeadlineExceeded),
    ));
}

#[tokio::test]
async fn at_most_one_synch_runs_at_a_time() {
    let inner =
        StaticCluster::default().with_namespace(mk_ns("myns"), vec![Subject::user("alice")]);
    let gated = GatedCluster::new(inner.clone());
    let cache = Arc::new(SynchronizedAccessCache::new(
        gated.clone(),
        inner,
        SyncConfig::default(),
    ));

    let running = tokio::spawn({
        let cache = cache.clone();
        async move { cache.synch().await }
    });
    gated.entered.notified().await;

    // While the first synch is parked in the locator, every further synch
    // fails fast and every request after the first coalesces.
    assert!(matches!(cache.synch().await, Err(SynchError::AlreadyRunning)));
    assert!(cache.request(Event::applied("Role")));
    for _ in 0..99 {
        assert!(!cache.request(Event::applied("RoleBinding")));
    }

    gated.release.notify_one();
    running
        .await
        .expect("synch task must not panic")
        .expect("synch must succeed");
    assert_eq!(cache.cache().list(&Subject::user("alice")).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn requested_synchronization_restocks_the_cache() {
    let cluster =
        StaticCluster::default().with_namespace(mk_ns("myns"), vec![Subject::user("alice")]);
    let cache = Arc::new(SynchronizedAccessCache::new(
        cluster.clone(),
        cluster,
        SyncConfig::default(),
    ));

    let (close, watch) = drain::channel();
    SynchronizedAccessCache::spawn(&cache, watch.clone());
    // A second spawn is a no-op.
    SynchronizedAccessCache::spawn(&cache, watch);

    assert!(cache.request(Event::applied("Namespace")));

    time::timeout(Duration::from_secs(60), async {
        loop {
            if !cache.cache().list(&Subject::user("alice")).is_empty() {
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("the dispatcher must restock the cache");

    close.drain().await;
}

#[tokio::test]
async fn metrics_report_snapshot_sizes_and_outcomes() {
    let mut registry = prometheus_client::registry::Registry::default();
    let metrics = AccessCacheMetrics::register(registry.sub_registry_with_prefix("access_cache"));

    let cluster = StaticCluster::default()
        .with_namespace(
            mk_ns("ns1"),
            vec![Subject::user("alice"), Subject::group("devs")],
        )
        .with_namespace(mk_ns("ns2"), vec![Subject::group("devs")]);
    let cache = SynchronizedAccessCache::new(
        cluster.clone(),
        cluster,
        SyncConfig {
            metrics,
            ..Default::default()
        },
    );
    cache.synch().await.expect("synch must succeed");
    cache.request(Event::time());
    cache.request(Event::time());

    let mut out = String::new();
    prometheus_client::encoding::text::encode(&mut out, &registry).expect("encode");

    assert!(out.contains("access_cache_subjects 2"), "{out}");
    assert!(
        out.contains(
            "access_cache_subject_namespace_pairs{subject_gk=\"rbac.authorization.k8s.io/Group\"} 2"
        ),
        "{out}",
    );
    assert!(
        out.contains("access_cache_synch_op_total{status=\"completed\",error=\"\"} 1"),
        "{out}",
    );
    assert!(
        out.contains("access_cache_time_requests_total{status=\"queued\"} 1"),
        "{out}",
    );
    assert!(
        out.contains("access_cache_time_requests_total{status=\"skipped\"} 1"),
        "{out}",
    );
}
