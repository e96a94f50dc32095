//! The synchronized access cache.
//!
//! This crate precomputes, for every subject known to the cluster, the tenant
//! namespaces that subject may read, and serves lookups from an immutable
//! snapshot behind a lock-free pointer:
//!
//! - [`AccessCache`] holds the snapshot pointer. Readers dereference it and
//!   scan their subject's list with no coordination; the writer builds a
//!   fresh snapshot aside and swaps it in with [`AccessCache::restock`].
//! - [`SynchronizedAccessCache`] owns the recomputation: a single-flight
//!   `synch` that lists tenant namespaces, asks the [`SubjectLocator`] who
//!   may read each one, deduplicates, enriches every record with the virtual
//!   metadata in [`labels`], and publishes the result.
//! - [`SyncTrigger`] adapts watch events from `kubert::index` into
//!   coalesced synchronization requests.
//!
//! The cache is not authoritative for writes and never updates
//! incrementally; every restock is a full recompute.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod event;
pub mod labels;
mod metrics;
mod store;
mod sync;
#[cfg(test)]
mod tests;
mod trigger;

pub use self::{
    event::{Event, EventOp},
    metrics::AccessCacheMetrics,
    store::{AccessCache, AccessEntries},
    sync::{SyncConfig, SyncRequester, SynchError, SynchronizedAccessCache},
    trigger::SyncTrigger,
};

use tenant_lister_core::{ResourceAttributes, Subject};
use tenant_lister_k8s_api::Namespace;

/// A read-only, point-in-time view of the cluster's tenant namespaces.
///
/// Expected to be backed by a watch-fed index, so a call is cheap and
/// consistent; the cache treats it as a synchronous snapshot read.
#[async_trait::async_trait]
pub trait NamespaceLister: Send + Sync + 'static {
    async fn list_namespaces(&self) -> anyhow::Result<Vec<Namespace>>;
}

/// Enumerates every subject the cluster's role-based policy authorizes to
/// perform the described action.
///
/// Errors are expected while the underlying policy view is transiently
/// inconsistent (for example, a binding observed before its role); the cache
/// logs them at debug level and treats the namespace as granting nothing.
#[async_trait::async_trait]
pub trait SubjectLocator: Send + Sync + 'static {
    async fn allowed_subjects(
        &self,
        attributes: &ResourceAttributes,
    ) -> anyhow::Result<Vec<Subject>>;
}
