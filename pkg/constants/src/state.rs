//! State store key layout.
//!
//! Objects are stored as JSON under etcd-style keys. Namespaced objects
//! append `<namespace>/<name>` to their prefix, cluster-scoped ones `<name>`.

/// Prefix for `Namespace` objects.
pub const NAMESPACES_PREFIX: &str = "/registry/namespaces/";

/// Prefix for `ClusterRole` objects.
pub const CLUSTER_ROLES_PREFIX: &str = "/registry/clusterroles/";

/// Prefix for `ClusterRoleBinding` objects.
pub const CLUSTER_ROLE_BINDINGS_PREFIX: &str = "/registry/clusterrolebindings/";

/// Prefix for `RoleBinding` objects.
pub const ROLE_BINDINGS_PREFIX: &str = "/registry/rolebindings/";

/// Prefix for `SubjectPermission` objects.
pub const SUBJECT_PERMISSIONS_PREFIX: &str = "/registry/subjectpermissions/";

/// Events a change-feed subscriber may fall behind before it must relist.
pub const CHANGE_FEED_CAPACITY: usize = 1024;
