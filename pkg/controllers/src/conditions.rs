//! The condition records a reconciliation pass appends.
//!
//! Every helper returns a new `SubjectPermission` with exactly one more
//! condition; the input value is never modified.

use pkg_constants::controller::{
    MSG_CLUSTER_BINDING_FAILED, MSG_CLUSTER_BINDINGS_CREATED, MSG_ROLE_BINDING_FAILED,
    MSG_ROLE_BINDINGS_CREATED,
};
use pkg_types::subject_permission::{SubjectPermission, SubjectPermissionState};

pub fn role_missing(sp: &SubjectPermission, role: &str) -> SubjectPermission {
    sp.with_condition(
        &format!("{} for clusterPermission does not exist", role),
        &[role.to_string()],
        false,
        SubjectPermissionState::Failed,
    )
}

pub fn invalid_namespace_pattern(
    sp: &SubjectPermission,
    role: &str,
    error: &impl std::fmt::Display,
) -> SubjectPermission {
    sp.with_condition(
        &format!("Invalid namespace regex for {}: {}", role, error),
        &[role.to_string()],
        false,
        SubjectPermissionState::Failed,
    )
}

/// `roles` lists the roles whose ClusterRoleBinding was created in this pass.
pub fn cluster_bindings_created(sp: &SubjectPermission, roles: &[String]) -> SubjectPermission {
    sp.with_condition(
        MSG_CLUSTER_BINDINGS_CREATED,
        roles,
        true,
        SubjectPermissionState::Created,
    )
}

pub fn cluster_binding_failed(
    sp: &SubjectPermission,
    role: &str,
    error: &impl std::fmt::Display,
) -> SubjectPermission {
    sp.with_condition(
        &format!("{}: {}", MSG_CLUSTER_BINDING_FAILED, error),
        &[role.to_string()],
        false,
        SubjectPermissionState::Failed,
    )
}

pub fn role_bindings_created(sp: &SubjectPermission, role: &str) -> SubjectPermission {
    sp.with_condition(
        MSG_ROLE_BINDINGS_CREATED,
        &[role.to_string()],
        true,
        SubjectPermissionState::Created,
    )
}

/// A single RoleBinding created because its namespace appeared or changed.
pub fn role_binding_created_in(
    sp: &SubjectPermission,
    role: &str,
    binding: &str,
    namespace: &str,
) -> SubjectPermission {
    sp.with_condition(
        &format!(
            "Successfully created RoleBinding {} in namespace {}",
            binding, namespace
        ),
        &[role.to_string()],
        true,
        SubjectPermissionState::Created,
    )
}

pub fn role_binding_failed(
    sp: &SubjectPermission,
    role: &str,
    error: &impl std::fmt::Display,
) -> SubjectPermission {
    sp.with_condition(
        &format!("{}: {}", MSG_ROLE_BINDING_FAILED, error),
        &[role.to_string()],
        false,
        SubjectPermissionState::Failed,
    )
}
