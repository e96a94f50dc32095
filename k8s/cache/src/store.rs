use std::sync::Arc;

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use arc_swap::ArcSwapOption;
use tenant_lister_core::Subject;
use tenant_lister_k8s_api::{Namespace, ResourceExt};

/// The data one snapshot stores: each subject's readable namespaces, already
/// enriched with the virtual metadata. Within one subject's list each
/// namespace name appears at most once.
pub type AccessEntries = HashMap<Subject, Vec<Namespace>>;

/// Holds the current snapshot behind an atomic pointer.
///
/// Readers load the pointer and scan; the writer swaps in a complete
/// replacement. Reads never block writes and writes never block reads.
/// Superseded snapshots stay readable until their last reader drops them.
#[derive(Debug, Default)]
pub struct AccessCache {
    data: ArcSwapOption<AccessEntries>,
}

// === impl AccessCache ===

impl AccessCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the namespaces stored for the subject, or empty if the cache
    /// was never restocked or the subject is unknown.
    pub fn list(&self, subject: &Subject) -> Vec<Namespace> {
        match &*self.data.load() {
            Some(entries) => entries.get(subject).cloned().unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Returns the union of the lists stored for the given subjects,
    /// deduplicated by namespace name.
    ///
    /// The first occurrence of a name wins, so the output follows subject
    /// argument order and, within a subject, snapshot order.
    pub fn list_all<'s>(&self, subjects: impl IntoIterator<Item = &'s Subject>) -> Vec<Namespace> {
        let data = self.data.load();
        let Some(entries) = &*data else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for subject in subjects {
            let Some(namespaces) = entries.get(subject) else {
                continue;
            };
            for ns in namespaces {
                if seen.insert(ns.name_unchecked()) {
                    out.push(ns.clone());
                }
            }
        }
        out.shrink_to_fit();
        out
    }

    /// Atomically replaces the current snapshot.
    ///
    /// Lookups that started before the swap may observe either snapshot,
    /// never a mix; every lookup started afterwards observes the new one.
    pub fn restock(&self, entries: Arc<AccessEntries>) {
        self.data.store(Some(entries));
    }
}
