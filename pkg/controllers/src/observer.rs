use pkg_constants::metrics::{
    BINDINGS_CREATED_TOTAL, MISSING_ROLES_TOTAL, RECONCILE_FAILURES_TOTAL, RECONCILES_TOTAL,
    SUBJECT_PERMISSION_GAUGE,
};
use pkg_metrics::MetricsRegistry;
use pkg_types::subject_permission::ObjectKey;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::diff::BindingKind;
use crate::reconcile::ReconcileStage;

/// Something worth reporting that happened during a reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileEvent {
    BindingCreated {
        owner: ObjectKey,
        kind: BindingKind,
        name: String,
        namespace: Option<String>,
    },
    RoleMissing {
        owner: ObjectKey,
        role: String,
    },
    InvalidNamespacePattern {
        owner: ObjectKey,
        role: String,
        reason: String,
    },
    /// A SubjectPermission pass finished and its status was written.
    Reconciled {
        owner: ObjectKey,
        conditions_appended: usize,
    },
    /// A SubjectPermission is being deleted.
    Deleted {
        owner: ObjectKey,
    },
    Failed {
        stage: ReconcileStage,
        message: String,
    },
}

/// Receives reconciliation outcomes. Injected into the controllers so they
/// never reach for process-wide logging or metrics state themselves.
pub trait ReconcileObserver: Send + Sync {
    fn record_outcome(&self, event: &ReconcileEvent);
}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ReconcileObserver for TracingObserver {
    fn record_outcome(&self, event: &ReconcileEvent) {
        match event {
            ReconcileEvent::BindingCreated {
                owner,
                kind,
                name,
                namespace: Some(ns),
            } => info!("SubjectPermission {}: created {} {}/{}", owner, kind, ns, name),
            ReconcileEvent::BindingCreated {
                owner, kind, name, ..
            } => info!("SubjectPermission {}: created {} {}", owner, kind, name),
            ReconcileEvent::RoleMissing { owner, role } => {
                warn!("SubjectPermission {}: ClusterRole {} does not exist", owner, role)
            }
            ReconcileEvent::InvalidNamespacePattern {
                owner,
                role,
                reason,
            } => warn!(
                "SubjectPermission {}: namespace patterns for {} are invalid: {}",
                owner, role, reason
            ),
            ReconcileEvent::Reconciled {
                owner,
                conditions_appended,
            } => debug!(
                "SubjectPermission {}: reconciled ({} conditions appended)",
                owner, conditions_appended
            ),
            ReconcileEvent::Deleted { owner } => {
                info!("SubjectPermission {} is being deleted", owner)
            }
            ReconcileEvent::Failed { stage, message } => {
                warn!("Reconcile failed at {}: {}", stage.as_str(), message)
            }
        }
    }
}

/// Maintains the Prometheus metrics of the controller.
pub struct MetricsObserver {
    registry: Arc<MetricsRegistry>,
}

impl MetricsObserver {
    pub fn new(registry: Arc<MetricsRegistry>) -> Self {
        registry.register_counter(BINDINGS_CREATED_TOTAL, "Bindings created by the controller");
        registry.register_counter(
            RECONCILE_FAILURES_TOTAL,
            "Reconciliations that ended in an error",
        );
        registry.register_counter(
            MISSING_ROLES_TOTAL,
            "References to ClusterRoles that do not exist",
        );
        registry.register_counter(RECONCILES_TOTAL, "Completed SubjectPermission reconciliations");
        registry.register_gauge(
            SUBJECT_PERMISSION_GAUGE,
            "SubjectPermissions known to the controller",
        );
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }
}

impl ReconcileObserver for MetricsObserver {
    fn record_outcome(&self, event: &ReconcileEvent) {
        match event {
            ReconcileEvent::BindingCreated { kind, .. } => self
                .registry
                .counter_inc(BINDINGS_CREATED_TOTAL, &[("kind", kind.as_str())]),
            ReconcileEvent::RoleMissing { .. } => {
                self.registry.counter_inc(MISSING_ROLES_TOTAL, &[])
            }
            ReconcileEvent::InvalidNamespacePattern { .. } => {}
            ReconcileEvent::Reconciled { owner, .. } => {
                self.registry.counter_inc(RECONCILES_TOTAL, &[]);
                self.registry.gauge_set(
                    SUBJECT_PERMISSION_GAUGE,
                    &[("name", owner.name.as_str()), ("namespace", owner.namespace.as_str())],
                    1,
                );
            }
            ReconcileEvent::Deleted { owner } => self.registry.gauge_remove(
                SUBJECT_PERMISSION_GAUGE,
                &[("name", owner.name.as_str()), ("namespace", owner.namespace.as_str())],
            ),
            ReconcileEvent::Failed { stage, .. } => self
                .registry
                .counter_inc(RECONCILE_FAILURES_TOTAL, &[("stage", stage.as_str())]),
        }
    }
}

/// Forwards every event to each wrapped observer in turn.
#[derive(Default, Clone)]
pub struct FanoutObserver {
    observers: Vec<Arc<dyn ReconcileObserver>>,
}

impl FanoutObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn ReconcileObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl ReconcileObserver for FanoutObserver {
    fn record_outcome(&self, event: &ReconcileEvent) {
        for observer in &self.observers {
            observer.record_outcome(event);
        }
    }
}
