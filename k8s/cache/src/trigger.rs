use std::sync::Arc;

use ahash::AHashSet as HashSet;
use kubert::index::{IndexClusterResource, IndexNamespacedResource, NamespacedRemoved};
use parking_lot::RwLock;
use tenant_lister_k8s_api::Resource;

use crate::{Event, SyncRequester};

/// Decorates an index so that every watch event also offers a
/// synchronization request.
///
/// The wrapped index is applied first, so a synchronization triggered by the
/// request always observes the updated state. Requests carry the resource
/// kind and operation for metrics only.
pub struct SyncTrigger<T> {
    inner: T,
    requests: SyncRequester,
}

// === impl SyncTrigger ===

impl<T> SyncTrigger<T> {
    pub fn new(inner: T, requests: SyncRequester) -> Self {
        Self { inner, requests }
    }

    pub fn shared(inner: T, requests: SyncRequester) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(Self::new(inner, requests)))
    }
}

impl<T, R> IndexNamespacedResource<R> for SyncTrigger<Arc<RwLock<T>>>
where
    T: IndexNamespacedResource<R>,
    R: Resource<DynamicType = ()>,
{
    fn apply(&mut self, resource: R) {
        self.inner.write().apply(resource);
        self.requests.request(Event::applied(R::kind(&())));
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.inner.write().delete(namespace, name);
        self.requests.request(Event::deleted(R::kind(&())));
    }

    fn reset(&mut self, resources: Vec<R>, removed: NamespacedRemoved) {
        self.inner.write().reset(resources, removed);
        self.requests.request(Event::reset(R::kind(&())));
    }
}

impl<T, R> IndexClusterResource<R> for SyncTrigger<Arc<RwLock<T>>>
where
    T: IndexClusterResource<R>,
    R: Resource<DynamicType = ()>,
{
    fn apply(&mut self, resource: R) {
        self.inner.write().apply(resource);
        self.requests.request(Event::applied(R::kind(&())));
    }

    fn delete(&mut self, name: String) {
        self.inner.write().delete(name);
        self.requests.request(Event::deleted(R::kind(&())));
    }

    fn reset(&mut self, resources: Vec<R>, removed: HashSet<String>) {
        self.inner.write().reset(resources, removed);
        self.requests.request(Event::reset(R::kind(&())));
    }
}
