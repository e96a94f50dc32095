use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tenant_lister_core::{ResourceAttributes, Subject};
use tokio::{
    sync::mpsc,
    time::{self, Duration, Instant},
};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    labels, AccessCache, AccessCacheMetrics, AccessEntries, Event, NamespaceLister, SubjectLocator,
};

const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(10 * 60);
const MIN_SYNCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors raised by [`SynchronizedAccessCache::synch`].
#[derive(Debug, thiserror::Error)]
pub enum SynchError {
    /// Another synchronization is in progress; the caller's request is
    /// dropped, not queued.
    #[error("a synchronization operation is already running")]
    AlreadyRunning,

    #[error("failed to list tenant namespaces: {0}")]
    List(#[source] anyhow::Error),

    /// The synchronization timeout elapsed; the previous snapshot is left
    /// intact.
    #[error("synchronization deadline exceeded")]
    DeadlineExceeded,
}

/// Tunables for [`SynchronizedAccessCache`].
pub struct SyncConfig {
    /// Interval between time-triggered restocks.
    pub resync_period: Duration,

    /// Upper bound on one restock. Defaults to the resync period less one
    /// minute, but no less than one minute.
    pub synch_timeout: Option<Duration>,

    /// Invoked by the dispatcher when a requested synchronization was
    /// rejected because one was already running.
    pub sync_error_handler: Option<Box<dyn Fn(&SynchError) + Send + Sync>>,

    pub metrics: AccessCacheMetrics,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            resync_period: DEFAULT_RESYNC_PERIOD,
            synch_timeout: None,
            sync_error_handler: None,
            metrics: AccessCacheMetrics::default(),
        }
    }
}

fn default_synch_timeout(resync_period: Duration) -> Duration {
    MIN_SYNCH_TIMEOUT.max(resync_period.saturating_sub(Duration::from_secs(60)))
}

/// Offers synchronization requests into the cache's single request slot.
///
/// Cheap to clone; handed to the watch-event triggers.
#[derive(Clone, Debug)]
pub struct SyncRequester {
    tx: mpsc::Sender<()>,
    metrics: AccessCacheMetrics,
}

// === impl SyncRequester ===

impl SyncRequester {
    /// Non-blockingly requests a synchronization.
    ///
    /// Returns `true` if the request slot was empty and the request was
    /// accepted, `false` if one is already pending (the new request
    /// coalesces into it). The attempt is recorded in metrics either way.
    pub fn request(&self, event: Event) -> bool {
        let queued = self.tx.try_send(()).is_ok();
        self.metrics.observe_request(&event, queued);
        queued
    }
}

/// An [`AccessCache`] plus the machinery that keeps it fresh.
///
/// At most one synchronization executes at any moment, enforced by an
/// atomic flag; incoming requests coalesce into a single-slot queue drained
/// by the dispatcher task.
pub struct SynchronizedAccessCache<L, N> {
    cache: Arc<AccessCache>,
    locator: L,
    namespaces: N,

    requests: SyncRequester,
    requests_rx: Mutex<Option<mpsc::Receiver<()>>>,
    synchronizing: AtomicBool,

    resync_period: Duration,
    synch_timeout: Duration,
    sync_error_handler: Option<Box<dyn Fn(&SynchError) + Send + Sync>>,
    metrics: AccessCacheMetrics,
}

// === impl SynchronizedAccessCache ===

impl<L, N> SynchronizedAccessCache<L, N>
where
    L: SubjectLocator,
    N: NamespaceLister,
{
    pub fn new(locator: L, namespaces: N, config: SyncConfig) -> Self {
        let SyncConfig {
            resync_period,
            synch_timeout,
            sync_error_handler,
            metrics,
        } = config;

        let (tx, rx) = mpsc::channel(1);
        Self {
            cache: Arc::new(AccessCache::new()),
            locator,
            namespaces,
            requests: SyncRequester {
                tx,
                metrics: metrics.clone(),
            },
            requests_rx: Mutex::new(Some(rx)),
            synchronizing: AtomicBool::new(false),
            synch_timeout: synch_timeout.unwrap_or_else(|| default_synch_timeout(resync_period)),
            resync_period,
            sync_error_handler,
            metrics,
        }
    }

    pub fn cache(&self) -> &AccessCache {
        &self.cache
    }

    /// A shareable handle on the snapshot store, for lookup-side consumers.
    pub fn cache_handle(&self) -> Arc<AccessCache> {
        self.cache.clone()
    }

    /// A handle for offering synchronization requests, e.g. from watch
    /// event triggers.
    pub fn requester(&self) -> SyncRequester {
        self.requests.clone()
    }

    /// See [`SyncRequester::request`].
    pub fn request(&self, event: Event) -> bool {
        self.requests.request(event)
    }

    /// Performs one full restock.
    ///
    /// Fails fast with [`SynchError::AlreadyRunning`] if another restock is
    /// in flight. Otherwise lists the tenant namespaces, locates the
    /// subjects allowed to read each one, and publishes a fresh snapshot.
    /// On any failure the previous snapshot is left intact.
    pub async fn synch(&self) -> Result<(), SynchError> {
        if self
            .synchronizing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SynchError::AlreadyRunning);
        }
        let _reset = ClearOnDrop(&self.synchronizing);

        let start = Instant::now();
        let result = match time::timeout(self.synch_timeout, self.restock(start + self.synch_timeout))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(SynchError::DeadlineExceeded),
        };

        self.metrics
            .observe_synch(result.as_ref().map(|e| e.as_ref()), start.elapsed());

        result.map(|_| ())
    }

    /// Recomputes the full snapshot and publishes it.
    async fn restock(&self, deadline: Instant) -> Result<Arc<AccessEntries>, SynchError> {
        debug!("starting access cache synchronization");
        let namespaces = self
            .namespaces
            .list_namespaces()
            .await
            .map_err(SynchError::List)?;

        let mut entries = AccessEntries::default();
        let mut pairs = 0usize;
        for ns in &namespaces {
            if Instant::now() >= deadline {
                warn!("access data recomputation interrupted: deadline exceeded");
                return Err(SynchError::DeadlineExceeded);
            }

            let name = ns.metadata.name.clone().unwrap_or_default();
            let attributes = ResourceAttributes::namespace_get(&name);
            let mut subjects = match self.locator.allowed_subjects(&attributes).await {
                Ok(subjects) => subjects,
                Err(error) => {
                    // Expected while the policy view is transiently
                    // inconsistent; the namespace grants nothing this round.
                    self.metrics.observe_locator_error();
                    debug!(namespace = %name, %error, "failed to locate allowed subjects");
                    continue;
                }
            };

            // The locator's output order is unspecified; sort so duplicate
            // detection is exact.
            subjects.sort_unstable();
            subjects.dedup();

            let authenticated = subjects.iter().any(Subject::is_system_authenticated);
            for subject in subjects {
                let record = labels::enriched_copy(ns, &subject, authenticated);
                entries.entry(subject).or_default().push(record);
                pairs += 1;
            }
        }

        let entries = Arc::new(entries);
        self.cache.restock(entries.clone());
        debug!(
            subjects = entries.len(),
            pairs, "access cache restocked"
        );
        Ok(entries)
    }

    /// Launches the periodic ticker and the request dispatcher.
    ///
    /// Idempotent: only the first call spawns the tasks. Both exit when
    /// shutdown is signaled.
    pub fn spawn(this: &Arc<Self>, drain: drain::Watch) {
        let Some(mut requests) = this.requests_rx.lock().take() else {
            return;
        };

        let ticker = {
            let this = this.clone();
            let drain = drain.clone();
            async move {
                loop {
                    tokio::select! {
                        _ = drain.clone().signaled() => {
                            info!("terminating time-based synchronization: shutdown signaled");
                            return;
                        }
                        _ = time::sleep(this.resync_period) => {
                            let queued = this.request(Event::time());
                            debug!(queued, "time-based synchronization requested");
                        }
                    }
                }
            }
        };
        tokio::spawn(ticker.instrument(info_span!("resync_ticker")));

        let dispatcher = {
            let this = this.clone();
            async move {
                loop {
                    tokio::select! {
                        _ = drain.clone().signaled() => {
                            info!("terminating synchronization dispatcher: shutdown signaled");
                            return;
                        }
                        request = requests.recv() => {
                            if request.is_none() {
                                return;
                            }
                            debug!("starting requested synchronization");
                            if let Err(e) = this.synch().await {
                                if matches!(e, SynchError::AlreadyRunning) {
                                    this.handle_sync_error(&e);
                                }
                            }
                        }
                    }
                }
            }
        };
        tokio::spawn(dispatcher.instrument(info_span!("resync_dispatcher")));
    }

    fn handle_sync_error(&self, e: &SynchError) {
        match &self.sync_error_handler {
            Some(handler) => handler(e),
            None => error!(error = %e, "failed to synchronize access cache"),
        }
    }
}

struct ClearOnDrop<'a>(&'a AtomicBool);

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
