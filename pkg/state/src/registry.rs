use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::ClusterApi;
use crate::client::StateStore;
use crate::error::StoreError;
use pkg_constants::state::{
    CLUSTER_ROLE_BINDINGS_PREFIX, CLUSTER_ROLES_PREFIX, NAMESPACES_PREFIX, ROLE_BINDINGS_PREFIX,
    SUBJECT_PERMISSIONS_PREFIX,
};
use pkg_types::namespace::Namespace;
use pkg_types::rbac::{ClusterRole, ClusterRoleBinding, RoleBinding};
use pkg_types::subject_permission::{ObjectKey, SubjectPermission, SubjectPermissionStatus};
use pkg_types::validate::{validate_name, validate_subject_permission};

const KIND_NAMESPACE: &str = "Namespace";
const KIND_CLUSTER_ROLE: &str = "ClusterRole";
const KIND_CLUSTER_ROLE_BINDING: &str = "ClusterRoleBinding";
const KIND_ROLE_BINDING: &str = "RoleBinding";
const KIND_SUBJECT_PERMISSION: &str = "SubjectPermission";

pub fn namespace_key(name: &str) -> String {
    format!("{}{}", NAMESPACES_PREFIX, name)
}

pub fn cluster_role_key(name: &str) -> String {
    format!("{}{}", CLUSTER_ROLES_PREFIX, name)
}

pub fn cluster_role_binding_key(name: &str) -> String {
    format!("{}{}", CLUSTER_ROLE_BINDINGS_PREFIX, name)
}

pub fn role_binding_key(namespace: &str, name: &str) -> String {
    format!("{}{}/{}", ROLE_BINDINGS_PREFIX, namespace, name)
}

pub fn subject_permission_key(key: &ObjectKey) -> String {
    format!("{}{}/{}", SUBJECT_PERMISSIONS_PREFIX, key.namespace, key.name)
}

/// Parse a `/registry/subjectpermissions/<ns>/<name>` key.
pub fn parse_subject_permission_key(key: &str) -> Option<ObjectKey> {
    let rest = key.strip_prefix(SUBJECT_PERMISSIONS_PREFIX)?;
    let (namespace, name) = rest.split_once('/')?;
    if namespace.is_empty() || name.is_empty() || name.contains('/') {
        return None;
    }
    Some(ObjectKey::new(namespace, name))
}

/// Parse a `/registry/namespaces/<name>` key.
pub fn parse_namespace_key(key: &str) -> Option<String> {
    let name = key.strip_prefix(NAMESPACES_PREFIX)?;
    if name.is_empty() || name.contains('/') {
        return None;
    }
    Some(name.to_string())
}

/// Typed object API over the raw [`StateStore`].
///
/// Creates are create-if-absent and status updates compare-and-set on
/// `resource_version`. Both run under one registry-wide lock, since SlateDB
/// offers no conditional put.
#[derive(Clone)]
pub struct Registry {
    store: StateStore,
    write_lock: Arc<Mutex<()>>,
}

impl Registry {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.store.get(key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|source| StoreError::Codec {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    async fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let data = serde_json::to_vec(value).map_err(|source| StoreError::Codec {
            key: key.to_string(),
            source,
        })?;
        self.store.put(key, &data).await
    }

    /// Undecodable entries are skipped so one bad object cannot wedge a listing.
    async fn list_json<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>, StoreError> {
        let entries = self.store.list_prefix(prefix).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(key, value)| match serde_json::from_slice(&value) {
                Ok(obj) => Some(obj),
                Err(e) => {
                    warn!("Skipping undecodable object at {}: {}", key, e);
                    None
                }
            })
            .collect())
    }

    async fn create_json<T: Serialize>(
        &self,
        kind: &'static str,
        name: &str,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        if self.store.get(key).await?.is_some() {
            return Err(StoreError::AlreadyExists {
                kind,
                name: name.to_string(),
            });
        }
        self.put_json(key, value).await
    }

    // ============================================================
    // Admission
    // ============================================================

    /// Create or replace a namespace.
    pub async fn apply_namespace(&self, ns: &Namespace) -> Result<(), StoreError> {
        validate_name(&ns.name).map_err(|e| StoreError::Invalid {
            kind: KIND_NAMESPACE,
            reason: e.to_string(),
        })?;
        self.put_json(&namespace_key(&ns.name), ns).await?;
        info!("Applied namespace {}", ns.name);
        Ok(())
    }

    /// Create or replace a ClusterRole.
    pub async fn apply_cluster_role(&self, role: &ClusterRole) -> Result<(), StoreError> {
        if role.name.is_empty() || role.name.contains('/') {
            return Err(StoreError::Invalid {
                kind: KIND_CLUSTER_ROLE,
                reason: format!("invalid name '{}'", role.name),
            });
        }
        self.put_json(&cluster_role_key(&role.name), role).await?;
        info!("Applied ClusterRole {}", role.name);
        Ok(())
    }

    /// Create or update a SubjectPermission's spec. The stored status is
    /// preserved; `generation` is bumped only when the spec changed.
    pub async fn apply_subject_permission(
        &self,
        sp: &SubjectPermission,
    ) -> Result<SubjectPermission, StoreError> {
        validate_subject_permission(sp).map_err(|e| StoreError::Invalid {
            kind: KIND_SUBJECT_PERMISSION,
            reason: e.to_string(),
        })?;

        let _guard = self.write_lock.lock().await;
        let key = sp.key();
        let store_key = subject_permission_key(&key);
        let stored = match self.get_json::<SubjectPermission>(&store_key).await? {
            Some(existing) => {
                let generation = if existing.spec == sp.spec {
                    existing.generation
                } else {
                    existing.generation + 1
                };
                SubjectPermission {
                    spec: sp.spec.clone(),
                    resource_version: existing.resource_version + 1,
                    generation,
                    ..existing
                }
            }
            None => SubjectPermission {
                status: SubjectPermissionStatus::default(),
                resource_version: 1,
                generation: 1,
                deletion_timestamp: None,
                created_at: Utc::now(),
                ..sp.clone()
            },
        };
        self.put_json(&store_key, &stored).await?;
        info!(
            "Applied SubjectPermission {} (generation={})",
            key, stored.generation
        );
        Ok(stored)
    }

    /// Flag a SubjectPermission as being deleted. Bindings it produced are
    /// left in place.
    pub async fn mark_subject_permission_deleting(
        &self,
        key: &ObjectKey,
    ) -> Result<SubjectPermission, StoreError> {
        let _guard = self.write_lock.lock().await;
        let store_key = subject_permission_key(key);
        let existing: SubjectPermission =
            self.get_json(&store_key)
                .await?
                .ok_or_else(|| StoreError::NotFound {
                    kind: KIND_SUBJECT_PERMISSION,
                    name: key.to_string(),
                })?;
        let updated = SubjectPermission {
            deletion_timestamp: Some(existing.deletion_timestamp.unwrap_or_else(Utc::now)),
            resource_version: existing.resource_version + 1,
            ..existing
        };
        self.put_json(&store_key, &updated).await?;
        Ok(updated)
    }

    /// Remove a SubjectPermission. Bindings it produced are left in place.
    pub async fn delete_subject_permission(&self, key: &ObjectKey) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.store.delete(&subject_permission_key(key)).await?;
        info!("Deleted SubjectPermission {}", key);
        Ok(())
    }

    /// Flag then remove every stored SubjectPermission not listed in `keep`.
    /// Returns the removed keys.
    pub async fn prune_subject_permissions(
        &self,
        keep: &[ObjectKey],
    ) -> Result<Vec<ObjectKey>, StoreError> {
        let mut pruned = Vec::new();
        for sp in self.list_subject_permissions().await? {
            let key = sp.key();
            if keep.contains(&key) {
                continue;
            }
            match self.mark_subject_permission_deleting(&key).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
            self.delete_subject_permission(&key).await?;
            pruned.push(key);
        }
        Ok(pruned)
    }
}

#[async_trait]
impl ClusterApi for Registry {
    async fn get_subject_permission(
        &self,
        key: &ObjectKey,
    ) -> Result<SubjectPermission, StoreError> {
        self.get_json(&subject_permission_key(key))
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: KIND_SUBJECT_PERMISSION,
                name: key.to_string(),
            })
    }

    async fn list_subject_permissions(&self) -> Result<Vec<SubjectPermission>, StoreError> {
        self.list_json(SUBJECT_PERMISSIONS_PREFIX).await
    }

    async fn get_namespace(&self, name: &str) -> Result<Namespace, StoreError> {
        self.get_json(&namespace_key(name))
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: KIND_NAMESPACE,
                name: name.to_string(),
            })
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, StoreError> {
        self.list_json(NAMESPACES_PREFIX).await
    }

    async fn list_cluster_roles(&self) -> Result<Vec<ClusterRole>, StoreError> {
        self.list_json(CLUSTER_ROLES_PREFIX).await
    }

    async fn list_cluster_role_bindings(&self) -> Result<Vec<ClusterRoleBinding>, StoreError> {
        self.list_json(CLUSTER_ROLE_BINDINGS_PREFIX).await
    }

    async fn list_role_bindings(&self, namespace: &str) -> Result<Vec<RoleBinding>, StoreError> {
        let prefix = format!("{}{}/", ROLE_BINDINGS_PREFIX, namespace);
        self.list_json(&prefix).await
    }

    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<(), StoreError> {
        let key = cluster_role_binding_key(&binding.name);
        self.create_json(KIND_CLUSTER_ROLE_BINDING, &binding.name, &key, binding)
            .await?;
        debug!("Stored ClusterRoleBinding {}", binding.name);
        Ok(())
    }

    async fn create_role_binding(&self, binding: &RoleBinding) -> Result<(), StoreError> {
        let key = role_binding_key(&binding.namespace, &binding.name);
        let name = format!("{}/{}", binding.namespace, binding.name);
        self.create_json(KIND_ROLE_BINDING, &name, &key, binding)
            .await?;
        debug!("Stored RoleBinding {}", name);
        Ok(())
    }

    async fn update_subject_permission_status(
        &self,
        key: &ObjectKey,
        expected_version: u64,
        status: &SubjectPermissionStatus,
    ) -> Result<SubjectPermission, StoreError> {
        let _guard = self.write_lock.lock().await;
        let store_key = subject_permission_key(key);
        let existing: SubjectPermission =
            self.get_json(&store_key)
                .await?
                .ok_or_else(|| StoreError::NotFound {
                    kind: KIND_SUBJECT_PERMISSION,
                    name: key.to_string(),
                })?;
        if existing.resource_version != expected_version {
            return Err(StoreError::Conflict {
                kind: KIND_SUBJECT_PERMISSION,
                name: key.to_string(),
                expected: expected_version,
                actual: existing.resource_version,
            });
        }
        let updated = SubjectPermission {
            status: status.clone(),
            resource_version: existing.resource_version + 1,
            ..existing
        };
        self.put_json(&store_key, &updated).await?;
        Ok(updated)
    }
}
