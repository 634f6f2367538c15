use serde::{Deserialize, Serialize};

use crate::namespace::Namespace;
use crate::rbac::ClusterRole;
use crate::subject_permission::SubjectPermission;

/// Controller configuration file (YAML).
///
/// Example `config.yaml`:
/// ```yaml
/// data-dir: /var/lib/rbac-permissions/data
/// resync-interval-secs: 600
/// metrics-port: 8383
/// log-json: true
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfigFile {
    #[serde(default, alias = "data-dir")]
    pub data_dir: Option<String>,
    #[serde(default, alias = "resync-interval-secs")]
    pub resync_interval_secs: Option<u64>,
    #[serde(default, alias = "metrics-port")]
    pub metrics_port: Option<u16>,
    #[serde(default, alias = "log-json")]
    pub log_json: Option<bool>,
    /// Objects applied to the store at startup.
    #[serde(default)]
    pub manifest: Option<String>,
}

/// Objects seeded into the store at startup.
///
/// ```yaml
/// namespaces:
///   - name: team-a
/// clusterRoles:
///   - name: edit
/// prune: true
/// subjectPermissions:
///   - name: alice
///     namespace: rbac-system
///     spec:
///       subjectName: alice
///       subjectKind: User
///       permissions:
///         - clusterRoleName: edit
///           namespacesAllowedRegex: "team-.*"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub namespaces: Vec<Namespace>,
    #[serde(default)]
    pub cluster_roles: Vec<ClusterRole>,
    #[serde(default)]
    pub subject_permissions: Vec<SubjectPermission>,
    /// Delete stored SubjectPermissions the manifest does not list.
    #[serde(default)]
    pub prune: bool,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}
