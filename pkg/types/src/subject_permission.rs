use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::rbac::SubjectKind;

/// Namespace + name of a namespaced object, as delivered to a reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// --- Spec ---

/// A ClusterRole granted in every namespace selected by the two regexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub cluster_role_name: String,
    pub namespaces_allowed_regex: String,
    #[serde(default)]
    pub namespaces_denied_regex: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectPermissionSpec {
    pub subject_name: String,
    pub subject_kind: SubjectKind,
    /// ClusterRoles bound cluster-wide.
    #[serde(default)]
    pub cluster_permissions: Vec<String>,
    /// ClusterRoles bound per matching namespace.
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

// --- Status ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubjectPermissionState {
    Created,
    Failed,
}

impl fmt::Display for SubjectPermissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectPermissionState::Created => write!(f, "Created"),
            SubjectPermissionState::Failed => write!(f, "Failed"),
        }
    }
}

/// One reconciliation outcome. Never modified once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub last_transition_time: DateTime<Utc>,
    pub state: SubjectPermissionState,
    /// ClusterRoles implicated by this outcome.
    #[serde(default)]
    pub cluster_role_names: Vec<String>,
    pub message: String,
    /// Whether the outcome was a success.
    pub status: bool,
}

/// Reconciliation history. An audit log, never read back as current state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectPermissionStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl SubjectPermissionStatus {
    /// Returns a new status holding every existing condition followed by `condition`.
    pub fn appended(&self, condition: Condition) -> Self {
        let mut conditions = Vec::with_capacity(self.conditions.len() + 1);
        conditions.extend(self.conditions.iter().cloned());
        conditions.push(condition);
        Self { conditions }
    }
}

// --- SubjectPermission ---

/// Grants a subject a set of cluster-wide and per-namespace ClusterRoles.
/// Stored at `/registry/subjectpermissions/<namespace>/<name>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectPermission {
    pub name: String,
    pub namespace: String,
    pub spec: SubjectPermissionSpec,
    #[serde(default)]
    pub status: SubjectPermissionStatus,
    /// Bumped by the store on every write; status updates must present the
    /// version they were computed from.
    #[serde(default)]
    pub resource_version: u64,
    /// Bumped only when the spec changes.
    #[serde(default)]
    pub generation: u64,
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl SubjectPermission {
    pub fn new(namespace: &str, name: &str, spec: SubjectPermissionSpec) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            spec,
            status: SubjectPermissionStatus::default(),
            resource_version: 0,
            generation: 0,
            deletion_timestamp: None,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }

    /// Every ClusterRole referenced by the spec, cluster-wide grants first,
    /// in order of first appearance.
    pub fn referenced_roles(&self) -> Vec<String> {
        let mut roles: Vec<String> = Vec::new();
        let names = self
            .spec
            .cluster_permissions
            .iter()
            .chain(self.spec.permissions.iter().map(|p| &p.cluster_role_name));
        for name in names {
            if !roles.contains(name) {
                roles.push(name.clone());
            }
        }
        roles
    }

    /// Returns a copy of this resource with one more condition appended,
    /// stamped with the current time. `self` is left untouched; persisting
    /// the copy is the caller's job.
    pub fn with_condition(
        &self,
        message: &str,
        role_names: &[String],
        success: bool,
        state: SubjectPermissionState,
    ) -> SubjectPermission {
        let condition = Condition {
            last_transition_time: Utc::now(),
            state,
            cluster_role_names: role_names.to_vec(),
            message: message.to_string(),
            status: success,
        };
        SubjectPermission {
            status: self.status.appended(condition),
            ..self.clone()
        }
    }
}
