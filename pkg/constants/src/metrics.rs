//! Metrics names and the default exporter port.

/// Default port for the `/metrics` and `/healthz` endpoints.
pub const DEFAULT_METRICS_PORT: u16 = 8383;

pub const BINDINGS_CREATED_TOTAL: &str = "rbac_permissions_bindings_created_total";

pub const RECONCILE_FAILURES_TOTAL: &str = "rbac_permissions_reconcile_failures_total";

pub const MISSING_ROLES_TOTAL: &str = "rbac_permissions_missing_roles_total";

pub const RECONCILES_TOTAL: &str = "rbac_permissions_reconciles_total";

/// Gauge with one series per live SubjectPermission.
pub const SUBJECT_PERMISSION_GAUGE: &str = "rbac_permissions_subject_permission";
