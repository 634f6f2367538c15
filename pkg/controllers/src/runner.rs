use pkg_constants::controller::{MIN_RESYNC_INTERVAL_SECS, REQUEUE_BASE_DELAY_SECS};
use pkg_state::registry::{parse_namespace_key, parse_subject_permission_key};
use pkg_state::watch::{EventType, WatchEvent};
use pkg_state::{ClusterApi, Registry};
use pkg_types::subject_permission::{ObjectKey, SubjectPermission};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::namespace::NamespaceController;
use crate::observer::{ReconcileEvent, ReconcileObserver};
use crate::safelist::PatternCache;
use crate::subject_permission::SubjectPermissionController;

/// Drives both reconcilers from the registry's event log, with a periodic
/// full resync that retries anything an event-driven pass left behind.
pub struct ControllerRunner {
    registry: Registry,
    subject_permissions: SubjectPermissionController,
    namespaces: NamespaceController,
    observer: Arc<dyn ReconcileObserver>,
    resync_interval: Duration,
    /// Last generation reconciled per SubjectPermission. Events for an
    /// unchanged generation are our own status writes.
    observed: HashMap<ObjectKey, u64>,
    requeue: Requeue,
}

/// SubjectPermissions whose last pass failed, with the time of their next
/// retry. The delay doubles per consecutive failure, up to `cap`.
struct Requeue {
    base: Duration,
    cap: Duration,
    /// Consecutive failures and the pending retry, if any.
    entries: HashMap<ObjectKey, (u32, Option<Instant>)>,
}

impl Requeue {
    fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base: base.min(cap),
            cap,
            entries: HashMap::new(),
        }
    }

    /// Record a failure and schedule the next retry. Returns its delay.
    fn schedule(&mut self, key: &ObjectKey, now: Instant) -> Duration {
        let attempts = self.entries.get(key).map_or(0, |(attempts, _)| *attempts) + 1;
        let factor = 1u32 << (attempts - 1).min(16);
        let delay = self.base.saturating_mul(factor).min(self.cap);
        self.entries.insert(key.clone(), (attempts, Some(now + delay)));
        delay
    }

    fn clear(&mut self, key: &ObjectKey) {
        self.entries.remove(key);
    }

    fn next_due(&self) -> Option<Instant> {
        self.entries.values().filter_map(|(_, due)| *due).min()
    }

    /// Keys whose retry is due. Their failure count is kept until cleared.
    fn take_due(&mut self, now: Instant) -> Vec<ObjectKey> {
        let mut due: Vec<ObjectKey> = Vec::new();
        for (key, (_, at)) in self.entries.iter_mut() {
            if at.is_some_and(|at| at <= now) {
                *at = None;
                due.push(key.clone());
            }
        }
        due.sort();
        due
    }
}

async fn sleep_until_due(due: Option<Instant>) {
    match due {
        Some(due) => tokio::time::sleep_until(due).await,
        None => std::future::pending().await,
    }
}

impl ControllerRunner {
    pub fn new(
        registry: Registry,
        observer: Arc<dyn ReconcileObserver>,
        resync_interval: Duration,
    ) -> Self {
        let min = Duration::from_secs(MIN_RESYNC_INTERVAL_SECS);
        if resync_interval < min {
            warn!(
                "Resync interval {:?} is below {:?}, using {:?}",
                resync_interval, min, min
            );
        }
        let resync_interval = resync_interval.max(min);
        let api: Arc<dyn ClusterApi> = Arc::new(registry.clone());
        let patterns = PatternCache::new();
        Self {
            subject_permissions: SubjectPermissionController::new(api.clone(), observer.clone())
                .with_pattern_cache(patterns.clone()),
            namespaces: NamespaceController::new(api, observer.clone())
                .with_pattern_cache(patterns),
            observer,
            registry,
            resync_interval,
            observed: HashMap::new(),
            requeue: Requeue::new(Duration::from_secs(REQUEUE_BASE_DELAY_SECS), resync_interval),
        }
    }

    /// Start the controller loop as a background task.
    pub fn start(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "ControllerRunner started (resync={}s)",
                self.resync_interval.as_secs()
            );
            let mut event_rx = self.registry.store().changes.subscribe();
            let mut interval = tokio::time::interval(self.resync_interval);
            loop {
                let retry_at = self.requeue.next_due();
                tokio::select! {
                    _ = interval.tick() => self.resync().await,
                    _ = sleep_until_due(retry_at) => self.retry_due().await,
                    result = event_rx.recv() => {
                        match result {
                            Ok(event) => self.handle_event(&event).await,
                            Err(RecvError::Lagged(skipped)) => {
                                warn!("ControllerRunner lagged behind by {} events, resyncing", skipped);
                                self.resync().await;
                                interval.reset();
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                }
            }
            info!("ControllerRunner stopped");
        })
    }

    async fn handle_event(&mut self, event: &WatchEvent) {
        if let Some(key) = parse_subject_permission_key(&event.key) {
            match event.event_type {
                EventType::Put => {
                    let decoded = event
                        .value
                        .as_deref()
                        .and_then(|v| serde_json::from_slice::<SubjectPermission>(v).ok());
                    if let Some(sp) = decoded
                        && sp.deletion_timestamp.is_none()
                        && self.observed.get(&key) == Some(&sp.generation)
                    {
                        debug!("SubjectPermission {} unchanged (generation={})", key, sp.generation);
                        return;
                    }
                    self.reconcile_subject_permission(&key).await;
                }
                EventType::Delete => {
                    self.observed.remove(&key);
                    self.requeue.clear(&key);
                    self.observer
                        .record_outcome(&ReconcileEvent::Deleted { owner: key });
                }
            }
        } else if let Some(namespace) = parse_namespace_key(&event.key)
            && event.event_type == EventType::Put
        {
            self.reconcile_namespace(&namespace).await;
        }
    }

    /// Reconcile every SubjectPermission, then every namespace.
    async fn resync(&mut self) {
        debug!("ControllerRunner resync");
        match self.registry.list_subject_permissions().await {
            Ok(sps) => {
                for sp in sps {
                    self.reconcile_subject_permission(&sp.key()).await;
                }
            }
            Err(e) => warn!("ControllerRunner: failed to list SubjectPermissions: {}", e),
        }
        match self.registry.list_namespaces().await {
            Ok(namespaces) => {
                for ns in namespaces {
                    self.reconcile_namespace(&ns.name).await;
                }
            }
            Err(e) => warn!("ControllerRunner: failed to list Namespaces: {}", e),
        }
    }

    async fn retry_due(&mut self) {
        for key in self.requeue.take_due(Instant::now()) {
            debug!("Retrying SubjectPermission {}", key);
            self.reconcile_subject_permission(&key).await;
        }
    }

    async fn reconcile_subject_permission(&mut self, key: &ObjectKey) {
        // Read before reconciling: the generation is what the pass acts on.
        let generation = match self.registry.get_subject_permission(key).await {
            Ok(sp) => Some(sp.generation),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                let delay = self.requeue.schedule(key, Instant::now());
                warn!("SubjectPermission {} reconcile error: {} (retry in {:?})", key, e, delay);
                return;
            }
        };
        match self.subject_permissions.reconcile(key).await {
            Ok(_) => self.requeue.clear(key),
            Err(e) => {
                let delay = self.requeue.schedule(key, Instant::now());
                warn!("SubjectPermission {} reconcile error: {} (retry in {:?})", key, e, delay);
            }
        }
        // Recorded even after an error so the failed pass's own status
        // write is not taken as a change; the requeue drives the retry.
        match generation {
            Some(generation) => {
                self.observed.insert(key.clone(), generation);
            }
            None => {
                self.observed.remove(key);
            }
        }
    }

    async fn reconcile_namespace(&self, namespace: &str) {
        if let Err(e) = self.namespaces.reconcile(namespace).await {
            warn!("Namespace {} reconcile error: {}", namespace, e);
        }
    }
}
