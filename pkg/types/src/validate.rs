use anyhow::{Result, bail};

use crate::subject_permission::SubjectPermission;

/// Longest name a binding (and so a role or subject) may end up with.
const MAX_OBJECT_NAME_LEN: usize = 253;

/// Validate a Kubernetes-style resource name (namespaces, SubjectPermissions).
/// Rules: lowercase `[a-z0-9-]`, max 63 chars, no leading/trailing hyphens.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name.len() > 63 {
        bail!("name '{}' exceeds 63 characters (got {})", name, name.len());
    }
    if name.starts_with('-') || name.ends_with('-') {
        bail!("name '{}' must not start or end with a hyphen", name);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        bail!(
            "name '{}' must contain only lowercase letters, digits, and hyphens [a-z0-9-]",
            name
        );
    }
    Ok(())
}

/// Role and subject names end up inside binding names and store keys, so they
/// follow the looser path-segment rules: non-empty, no `/` or `%`, not `.`/`..`.
fn validate_path_segment(what: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("{} must not be empty", what);
    }
    if name == "." || name == ".." {
        bail!("{} '{}' is not a valid name", what, name);
    }
    if name.contains('/') || name.contains('%') {
        bail!("{} '{}' must not contain '/' or '%'", what, name);
    }
    if name.len() > MAX_OBJECT_NAME_LEN {
        bail!("{} '{}' exceeds {} characters", what, name, MAX_OBJECT_NAME_LEN);
    }
    Ok(())
}

/// Admission checks for a SubjectPermission. Regex syntax is deliberately not
/// checked here: a bad pattern is reported per permission entry on the
/// resource status when it is reconciled.
pub fn validate_subject_permission(sp: &SubjectPermission) -> Result<()> {
    validate_name(&sp.name)?;
    validate_name(&sp.namespace)?;
    validate_path_segment("subjectName", &sp.spec.subject_name)?;

    for role in &sp.spec.cluster_permissions {
        validate_path_segment("clusterPermissions entry", role)?;
    }
    for permission in &sp.spec.permissions {
        validate_path_segment("clusterRoleName", &permission.cluster_role_name)?;
        if permission.namespaces_allowed_regex.is_empty() {
            bail!(
                "namespacesAllowedRegex for '{}' must not be empty",
                permission.cluster_role_name
            );
        }
    }

    for role in sp.referenced_roles() {
        let binding_len = role.len() + 1 + sp.spec.subject_name.len();
        if binding_len > MAX_OBJECT_NAME_LEN {
            bail!(
                "binding name for role '{}' and subject '{}' would exceed {} characters",
                role,
                sp.spec.subject_name,
                MAX_OBJECT_NAME_LEN
            );
        }
    }
    Ok(())
}
