use pkg_types::rbac::{ClusterRole, ClusterRoleBinding, RoleBinding, RoleRef, Subject};
use std::collections::HashSet;
use std::fmt;

use crate::naming::binding_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    ClusterRoleBinding,
    RoleBinding,
}

impl BindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindingKind::ClusterRoleBinding => "ClusterRoleBinding",
            BindingKind::RoleBinding => "RoleBinding",
        }
    }
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A binding that should exist: cluster-wide when `namespace` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DesiredBinding {
    pub role_name: String,
    pub subject: Subject,
    pub namespace: Option<String>,
}

impl DesiredBinding {
    pub fn cluster(role_name: &str, subject: &Subject) -> Self {
        Self {
            role_name: role_name.to_string(),
            subject: subject.clone(),
            namespace: None,
        }
    }

    pub fn namespaced(role_name: &str, subject: &Subject, namespace: &str) -> Self {
        Self {
            role_name: role_name.to_string(),
            subject: subject.clone(),
            namespace: Some(namespace.to_string()),
        }
    }

    pub fn kind(&self) -> BindingKind {
        match self.namespace {
            Some(_) => BindingKind::RoleBinding,
            None => BindingKind::ClusterRoleBinding,
        }
    }

    pub fn name(&self) -> String {
        binding_name(&self.role_name, &self.subject.name)
    }

    pub fn to_cluster_role_binding(&self) -> ClusterRoleBinding {
        ClusterRoleBinding {
            name: self.name(),
            subjects: vec![self.subject.clone()],
            role_ref: RoleRef::cluster_role(&self.role_name),
        }
    }

    /// Cluster-scoped desired bindings have no namespace and yield `None`.
    pub fn to_role_binding(&self) -> Option<RoleBinding> {
        let namespace = self.namespace.as_ref()?;
        Some(RoleBinding {
            name: self.name(),
            namespace: namespace.clone(),
            subjects: vec![self.subject.clone()],
            role_ref: RoleRef::cluster_role(&self.role_name),
        })
    }
}

/// Role names in `desired` that no ClusterRole in `actual` carries.
/// Deduplicated, in order of first appearance.
pub fn missing_roles(desired: &[String], actual: &[ClusterRole]) -> Vec<String> {
    let existing: HashSet<&str> = actual.iter().map(|r| r.name.as_str()).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut missing = Vec::new();
    for name in desired {
        if !existing.contains(name.as_str()) && seen.insert(name.as_str()) {
            missing.push(name.clone());
        }
    }
    missing
}

/// Collapse desired bindings that share a scope and name.
fn unique<'a>(desired: &'a [DesiredBinding]) -> impl Iterator<Item = &'a DesiredBinding> {
    let mut seen = HashSet::new();
    desired
        .iter()
        .filter(move |b| seen.insert((b.namespace.clone(), b.name())))
}

/// Cluster-scoped desired bindings whose name is absent from `actual`.
pub fn missing_cluster_role_bindings(
    desired: &[DesiredBinding],
    actual: &[ClusterRoleBinding],
) -> Vec<DesiredBinding> {
    let existing: HashSet<&str> = actual.iter().map(|b| b.name.as_str()).collect();
    unique(desired)
        .filter(|b| b.namespace.is_none())
        .filter(|b| !existing.contains(b.name().as_str()))
        .cloned()
        .collect()
}

/// Namespaced desired bindings with no RoleBinding of the same name in
/// their namespace.
pub fn missing_role_bindings(
    desired: &[DesiredBinding],
    actual: &[RoleBinding],
) -> Vec<DesiredBinding> {
    let existing: HashSet<(&str, &str)> = actual
        .iter()
        .map(|b| (b.namespace.as_str(), b.name.as_str()))
        .collect();
    unique(desired)
        .filter(|b| match &b.namespace {
            Some(ns) => !existing.contains(&(ns.as_str(), b.name().as_str())),
            None => false,
        })
        .cloned()
        .collect()
}
