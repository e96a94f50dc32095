use std::time::Duration;

use ahash::AHashMap as HashMap;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge, histogram::Histogram},
    registry::{Registry, Unit},
};

use crate::{AccessEntries, Event, SynchError};

const STATUS_QUEUED: &str = "queued";
const STATUS_SKIPPED: &str = "skipped";
const STATUS_COMPLETED: &str = "completed";
const STATUS_FAILED: &str = "failed";

/// Collects the access cache's metrics.
///
/// A default-constructed value records into families that were never
/// registered, which is the no-op implementation used when metrics are
/// disabled.
#[derive(Clone, Debug)]
pub struct AccessCacheMetrics {
    /// Subjects in the current snapshot.
    subjects: Gauge,
    /// (subject, namespace) pairs in the current snapshot, by subject kind.
    subject_namespace_pairs: Family<GroupKindLabels, Gauge>,
    /// Synchronization outcomes.
    synchs: Family<SynchLabels, Counter>,
    /// Synchronization wall time.
    synch_durations: Family<StatusLabels, Histogram>,
    /// Per-namespace subject-location failures, swallowed by the sync.
    locator_errors: Counter,
    /// Synchronization requests triggered by events on watched resources.
    resource_requests: Family<RequestLabels, Counter>,
    /// Synchronization requests triggered by the resync period elapsing.
    time_requests: Family<StatusLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct StatusLabels {
    status: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct SynchLabels {
    status: &'static str,
    error: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct RequestLabels {
    status: &'static str,
    kind: String,
    op: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct GroupKindLabels {
    subject_gk: String,
}

// === impl AccessCacheMetrics ===

impl Default for AccessCacheMetrics {
    fn default() -> Self {
        Self {
            subjects: Gauge::default(),
            subject_namespace_pairs: Family::default(),
            synchs: Family::default(),
            synch_durations: Family::new_with_constructor(|| {
                // Restocks are expected to take milliseconds on small
                // clusters and tens of seconds on very large ones.
                Histogram::new(
                    [1.0, 5.0, 25.0, 100.0, 500.0, 2500.0, 10000.0, 60000.0].into_iter(),
                )
            }),
            locator_errors: Counter::default(),
            resource_requests: Family::default(),
            time_requests: Family::default(),
        }
    }
}

impl AccessCacheMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let metrics = Self::default();

        reg.register(
            "subjects",
            "Subjects in the current snapshot",
            metrics.subjects.clone(),
        );
        reg.register(
            "subject_namespace_pairs",
            "(Subject, namespace) pairs in the current snapshot",
            metrics.subject_namespace_pairs.clone(),
        );
        reg.register(
            "synch_op",
            "Synchronization operations",
            metrics.synchs.clone(),
        );
        reg.register_with_unit(
            "synch_duration",
            "Wall time of synchronization operations",
            Unit::Other("milliseconds".to_string()),
            metrics.synch_durations.clone(),
        );
        reg.register(
            "locator_errors",
            "Namespaces that contributed no subjects because the subject locator failed",
            metrics.locator_errors.clone(),
        );
        reg.register(
            "resource_requests",
            "Synchronization requests triggered by events on watched resources",
            metrics.resource_requests.clone(),
        );
        reg.register(
            "time_requests",
            "Synchronization requests triggered when the resync period elapses",
            metrics.time_requests.clone(),
        );

        metrics
    }

    pub(crate) fn observe_request(&self, event: &Event, queued: bool) {
        let status = if queued { STATUS_QUEUED } else { STATUS_SKIPPED };
        if event.is_time_triggered() {
            self.time_requests
                .get_or_create(&StatusLabels { status })
                .inc();
        } else {
            self.resource_requests
                .get_or_create(&RequestLabels {
                    status,
                    kind: event.kind().unwrap_or_default().to_string(),
                    op: event.op().as_str(),
                })
                .inc();
        }
    }

    pub(crate) fn observe_synch(
        &self,
        result: Result<&AccessEntries, &SynchError>,
        elapsed: Duration,
    ) {
        let millis = elapsed.as_secs_f64() * 1000.0;
        match result {
            Err(error) => {
                self.synchs
                    .get_or_create(&SynchLabels {
                        status: STATUS_FAILED,
                        error: error.to_string(),
                    })
                    .inc();
                self.synch_durations
                    .get_or_create(&StatusLabels {
                        status: STATUS_FAILED,
                    })
                    .observe(millis);
            }
            Ok(entries) => {
                self.synchs
                    .get_or_create(&SynchLabels {
                        status: STATUS_COMPLETED,
                        error: String::new(),
                    })
                    .inc();
                self.synch_durations
                    .get_or_create(&StatusLabels {
                        status: STATUS_COMPLETED,
                    })
                    .observe(millis);

                self.subjects.set(entries.len() as i64);

                // Drop series for subject kinds no longer present before
                // overwriting, so stale kinds don't linger.
                self.subject_namespace_pairs.clear();
                let mut pairs = HashMap::new();
                for (subject, namespaces) in entries {
                    *pairs.entry(subject.group_kind()).or_insert(0i64) += namespaces.len() as i64;
                }
                for (subject_gk, count) in pairs {
                    self.subject_namespace_pairs
                        .get_or_create(&GroupKindLabels { subject_gk })
                        .set(count);
                }
            }
        }
    }

    pub(crate) fn observe_locator_error(&self) {
        self.locator_errors.inc();
    }
}
