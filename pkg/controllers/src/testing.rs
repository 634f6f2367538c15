//! In-memory `ClusterApi` with failure injection, for controller tests.

use async_trait::async_trait;
use pkg_state::{ClusterApi, StoreError};
use pkg_types::namespace::Namespace;
use pkg_types::rbac::{ClusterRole, ClusterRoleBinding, RoleBinding, SubjectKind};
use pkg_types::subject_permission::{
    ObjectKey, Permission, SubjectPermission, SubjectPermissionSpec, SubjectPermissionStatus,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use crate::observer::{ReconcileEvent, ReconcileObserver};

#[derive(Default)]
pub struct FakeState {
    pub subject_permissions: BTreeMap<ObjectKey, SubjectPermission>,
    pub namespaces: Vec<Namespace>,
    pub cluster_roles: Vec<ClusterRole>,
    pub cluster_role_bindings: Vec<ClusterRoleBinding>,
    pub role_bindings: Vec<RoleBinding>,
    /// Every create call, as `<namespace>/<name>` or `<name>`.
    pub create_calls: Vec<String>,
    /// Binding names whose creation fails with a backend error.
    pub fail_create: HashSet<String>,
    /// Binding names that report AlreadyExists without being listed, as if
    /// another writer created them between the list and the create.
    pub racing_create: HashSet<String>,
    pub fail_list_role_bindings: bool,
    pub fail_list_cluster_roles: bool,
    pub fail_status_update: bool,
    pub status_updates: usize,
}

#[derive(Default)]
pub struct FakeCluster {
    pub state: Mutex<FakeState>,
}

fn backend(what: &str) -> StoreError {
    StoreError::Backend(format!("injected {} failure", what))
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespaces(self, names: &[&str]) -> Self {
        self.state.lock().unwrap().namespaces = names.iter().map(|n| Namespace::new(n)).collect();
        self
    }

    pub fn with_cluster_roles(self, names: &[&str]) -> Self {
        self.state.lock().unwrap().cluster_roles = names
            .iter()
            .map(|n| ClusterRole {
                name: n.to_string(),
                rules: vec![],
            })
            .collect();
        self
    }

    pub fn with_subject_permission(self, sp: SubjectPermission) -> Self {
        self.insert_subject_permission(sp);
        self
    }

    pub fn insert_subject_permission(&self, mut sp: SubjectPermission) {
        sp.resource_version = sp.resource_version.max(1);
        sp.generation = sp.generation.max(1);
        self.state
            .lock()
            .unwrap()
            .subject_permissions
            .insert(sp.key(), sp);
    }

    pub fn add_namespace(&self, name: &str) {
        self.state.lock().unwrap().namespaces.push(Namespace::new(name));
    }

    pub fn subject_permission(&self, key: &ObjectKey) -> SubjectPermission {
        self.state.lock().unwrap().subject_permissions[key].clone()
    }

    pub fn cluster_role_binding_names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.cluster_role_bindings.iter().map(|b| b.name.clone()).collect()
    }

    /// `<namespace>/<name>` of every RoleBinding, sorted.
    pub fn role_binding_names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> = state
            .role_bindings
            .iter()
            .map(|b| format!("{}/{}", b.namespace, b.name))
            .collect();
        names.sort();
        names
    }

    pub fn create_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().create_calls.clone()
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_subject_permission(
        &self,
        key: &ObjectKey,
    ) -> Result<SubjectPermission, StoreError> {
        tokio::task::yield_now().await;
        let state = self.state.lock().unwrap();
        state
            .subject_permissions
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "SubjectPermission",
                name: key.to_string(),
            })
    }

    async fn list_subject_permissions(&self) -> Result<Vec<SubjectPermission>, StoreError> {
        tokio::task::yield_now().await;
        let state = self.state.lock().unwrap();
        Ok(state.subject_permissions.values().cloned().collect())
    }

    async fn get_namespace(&self, name: &str) -> Result<Namespace, StoreError> {
        tokio::task::yield_now().await;
        let state = self.state.lock().unwrap();
        state
            .namespaces
            .iter()
            .find(|n| n.name == name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "Namespace",
                name: name.to_string(),
            })
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, StoreError> {
        tokio::task::yield_now().await;
        Ok(self.state.lock().unwrap().namespaces.clone())
    }

    async fn list_cluster_roles(&self) -> Result<Vec<ClusterRole>, StoreError> {
        tokio::task::yield_now().await;
        let state = self.state.lock().unwrap();
        if state.fail_list_cluster_roles {
            return Err(backend("list ClusterRoles"));
        }
        Ok(state.cluster_roles.clone())
    }

    async fn list_cluster_role_bindings(&self) -> Result<Vec<ClusterRoleBinding>, StoreError> {
        tokio::task::yield_now().await;
        Ok(self.state.lock().unwrap().cluster_role_bindings.clone())
    }

    async fn list_role_bindings(&self, namespace: &str) -> Result<Vec<RoleBinding>, StoreError> {
        tokio::task::yield_now().await;
        let state = self.state.lock().unwrap();
        if state.fail_list_role_bindings {
            return Err(backend("list RoleBindings"));
        }
        Ok(state
            .role_bindings
            .iter()
            .filter(|b| b.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        state.create_calls.push(binding.name.clone());
        if state.fail_create.contains(&binding.name) {
            return Err(backend("create"));
        }
        if state.racing_create.contains(&binding.name)
            || state.cluster_role_bindings.iter().any(|b| b.name == binding.name)
        {
            return Err(StoreError::AlreadyExists {
                kind: "ClusterRoleBinding",
                name: binding.name.clone(),
            });
        }
        state.cluster_role_bindings.push(binding.clone());
        Ok(())
    }

    async fn create_role_binding(&self, binding: &RoleBinding) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        let qualified = format!("{}/{}", binding.namespace, binding.name);
        state.create_calls.push(qualified.clone());
        if state.fail_create.contains(&binding.name) {
            return Err(backend("create"));
        }
        if state.racing_create.contains(&binding.name)
            || state
                .role_bindings
                .iter()
                .any(|b| b.namespace == binding.namespace && b.name == binding.name)
        {
            return Err(StoreError::AlreadyExists {
                kind: "RoleBinding",
                name: qualified,
            });
        }
        state.role_bindings.push(binding.clone());
        Ok(())
    }

    async fn update_subject_permission_status(
        &self,
        key: &ObjectKey,
        expected_version: u64,
        status: &SubjectPermissionStatus,
    ) -> Result<SubjectPermission, StoreError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        if state.fail_status_update {
            return Err(backend("status update"));
        }
        let sp = state
            .subject_permissions
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound {
                kind: "SubjectPermission",
                name: key.to_string(),
            })?;
        if sp.resource_version != expected_version {
            return Err(StoreError::Conflict {
                kind: "SubjectPermission",
                name: key.to_string(),
                expected: expected_version,
                actual: sp.resource_version,
            });
        }
        sp.status = status.clone();
        sp.resource_version += 1;
        let updated = sp.clone();
        state.status_updates += 1;
        Ok(updated)
    }
}

/// Collects every event it is given.
#[derive(Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<ReconcileEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<ReconcileEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ReconcileObserver for RecordingObserver {
    fn record_outcome(&self, event: &ReconcileEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

pub fn make_subject_permission(
    name: &str,
    subject: &str,
    cluster_permissions: &[&str],
    permissions: &[(&str, &str, &str)],
) -> SubjectPermission {
    SubjectPermission::new(
        "rbac-system",
        name,
        SubjectPermissionSpec {
            subject_name: subject.to_string(),
            subject_kind: SubjectKind::User,
            cluster_permissions: cluster_permissions.iter().map(|r| r.to_string()).collect(),
            permissions: permissions
                .iter()
                .map(|(role, allowed, denied)| Permission {
                    cluster_role_name: role.to_string(),
                    namespaces_allowed_regex: allowed.to_string(),
                    namespaces_denied_regex: denied.to_string(),
                })
                .collect(),
        },
    )
}
