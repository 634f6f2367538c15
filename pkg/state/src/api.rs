use async_trait::async_trait;
use pkg_types::namespace::Namespace;
use pkg_types::rbac::{ClusterRole, ClusterRoleBinding, RoleBinding};
use pkg_types::subject_permission::{ObjectKey, SubjectPermission, SubjectPermissionStatus};

use crate::error::StoreError;

/// The object-store operations the reconcilers need.
///
/// Reads return the live state at call time. `create_*` calls fail with
/// [`StoreError::AlreadyExists`] when an object with the same name is already
/// present in that scope; status updates fail with [`StoreError::Conflict`]
/// when the resource changed since `expected_version` was read.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_subject_permission(&self, key: &ObjectKey)
    -> Result<SubjectPermission, StoreError>;

    async fn list_subject_permissions(&self) -> Result<Vec<SubjectPermission>, StoreError>;

    async fn get_namespace(&self, name: &str) -> Result<Namespace, StoreError>;

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, StoreError>;

    async fn list_cluster_roles(&self) -> Result<Vec<ClusterRole>, StoreError>;

    async fn list_cluster_role_bindings(&self) -> Result<Vec<ClusterRoleBinding>, StoreError>;

    async fn list_role_bindings(&self, namespace: &str) -> Result<Vec<RoleBinding>, StoreError>;

    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<(), StoreError>;

    async fn create_role_binding(&self, binding: &RoleBinding) -> Result<(), StoreError>;

    /// Replace the status of a SubjectPermission, returning the stored object.
    async fn update_subject_permission_status(
        &self,
        key: &ObjectKey,
        expected_version: u64,
        status: &SubjectPermissionStatus,
    ) -> Result<SubjectPermission, StoreError>;
}
