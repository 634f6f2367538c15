//! Reconciliation of SubjectPermissions into ClusterRoleBindings and RoleBindings.

pub mod conditions;
pub mod diff;
pub mod namespace;
pub mod naming;
pub mod observer;
pub mod reconcile;
pub mod runner;
pub mod safelist;
pub mod subject_permission;

#[cfg(test)]
mod testing;

pub use namespace::NamespaceController;
pub use observer::{MetricsObserver, ReconcileEvent, ReconcileObserver, TracingObserver};
pub use reconcile::{ReconcileError, ReconcileOutcome};
pub use runner::ControllerRunner;
pub use subject_permission::SubjectPermissionController;
