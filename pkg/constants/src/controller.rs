//! Reconciliation constants.

/// Separator between role name and subject name in a binding name.
pub const BINDING_NAME_SEPARATOR: &str = "-";

/// The only role kind bindings created by the engine reference.
pub const CLUSTER_ROLE_KIND: &str = "ClusterRole";

/// Default period of the full resync, in seconds.
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 600;

/// Shortest accepted resync period, in seconds.
pub const MIN_RESYNC_INTERVAL_SECS: u64 = 1;

/// Delay before the first retry of a failed pass. Doubles per consecutive
/// failure, capped at the resync period.
pub const REQUEUE_BASE_DELAY_SECS: u64 = 5;

// ─── Condition messages ────────────────────────────────────────────────────

pub const MSG_CLUSTER_BINDINGS_CREATED: &str = "Successfully created all ClusterRoleBindings";

pub const MSG_ROLE_BINDINGS_CREATED: &str = "Successfully created all RoleBindings";

pub const MSG_CLUSTER_BINDING_FAILED: &str = "Unable to create ClusterRoleBinding";

pub const MSG_ROLE_BINDING_FAILED: &str = "Unable to create RoleBinding";
