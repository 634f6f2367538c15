use pkg_state::ClusterApi;
use pkg_types::rbac::Subject;
use pkg_types::subject_permission::SubjectPermission;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::conditions;
use crate::diff::{BindingKind, DesiredBinding};
use crate::observer::{ReconcileEvent, ReconcileObserver};
use crate::reconcile::{ReconcileError, ReconcileOutcome, read_failed};
use crate::safelist::PatternCache;

/// Creates the RoleBindings a namespace is owed by existing
/// SubjectPermissions, when that namespace appears or changes.
pub struct NamespaceController {
    api: Arc<dyn ClusterApi>,
    observer: Arc<dyn ReconcileObserver>,
    patterns: PatternCache,
}

impl NamespaceController {
    pub fn new(api: Arc<dyn ClusterApi>, observer: Arc<dyn ReconcileObserver>) -> Self {
        Self {
            api,
            observer,
            patterns: PatternCache::new(),
        }
    }

    pub fn with_pattern_cache(mut self, patterns: PatternCache) -> Self {
        self.patterns = patterns;
        self
    }

    pub async fn reconcile(&self, namespace: &str) -> Result<ReconcileOutcome, ReconcileError> {
        let result = self.reconcile_inner(namespace).await;
        if let Err(e) = &result {
            self.observer.record_outcome(&ReconcileEvent::Failed {
                stage: e.stage(),
                message: e.to_string(),
            });
        }
        result
    }

    async fn reconcile_inner(&self, namespace: &str) -> Result<ReconcileOutcome, ReconcileError> {
        match self.api.get_namespace(namespace).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                debug!("Namespace {} not found, nothing to do", namespace);
                return Ok(ReconcileOutcome::NotFound);
            }
            Err(e) => return Err(read_failed("Namespace")(e)),
        }

        let subject_permissions = self
            .api
            .list_subject_permissions()
            .await
            .map_err(read_failed("SubjectPermissions"))?;
        let namespaces = self
            .api
            .list_namespaces()
            .await
            .map_err(read_failed("Namespaces"))?;
        let namespace_names: Vec<&str> = namespaces.iter().map(|n| n.name.as_str()).collect();
        let mut present: HashSet<String> = self
            .api
            .list_role_bindings(namespace)
            .await
            .map_err(read_failed("RoleBindings"))?
            .into_iter()
            .map(|rb| rb.name)
            .collect();

        let mut bindings_created = 0;
        let mut conditions_appended = 0;
        for sp in subject_permissions
            .iter()
            .filter(|sp| sp.deletion_timestamp.is_none())
        {
            let mut current = sp.clone();
            let mut appended = 0;
            let subject = Subject {
                kind: sp.spec.subject_kind,
                name: sp.spec.subject_name.clone(),
            };

            for permission in &sp.spec.permissions {
                let role = &permission.cluster_role_name;
                let safelist = match self.patterns.safelist(
                    &permission.namespaces_allowed_regex,
                    &permission.namespaces_denied_regex,
                    &namespace_names,
                ) {
                    Ok(safelist) => safelist,
                    Err(e) => {
                        debug!(
                            "SubjectPermission {}: skipping {} in {}: {}",
                            sp.key(),
                            role,
                            namespace,
                            e
                        );
                        continue;
                    }
                };
                if !safelist.iter().any(|ns| ns == namespace) {
                    continue;
                }

                let binding = DesiredBinding::namespaced(role, &subject, namespace);
                let name = binding.name();
                if !present.insert(name.clone()) {
                    continue;
                }
                let Some(rb) = binding.to_role_binding() else {
                    continue;
                };
                match self.api.create_role_binding(&rb).await {
                    Ok(()) => {
                        current = conditions::role_binding_created_in(&current, role, &name, namespace);
                        appended += 1;
                        bindings_created += 1;
                        self.observer.record_outcome(&ReconcileEvent::BindingCreated {
                            owner: sp.key(),
                            kind: BindingKind::RoleBinding,
                            name: name.clone(),
                            namespace: Some(namespace.to_string()),
                        });
                    }
                    Err(e) if e.is_already_exists() => {
                        debug!("RoleBinding {}/{} already exists", namespace, name);
                    }
                    Err(source) => {
                        current = conditions::role_binding_failed(&current, role, &source);
                        self.persist(sp, &current).await?;
                        return Err(ReconcileError::Create {
                            kind: BindingKind::RoleBinding,
                            name,
                            source,
                        });
                    }
                }
            }

            if appended > 0 {
                self.persist(sp, &current).await?;
                conditions_appended += appended;
            }
        }

        Ok(ReconcileOutcome::Reconciled {
            bindings_created,
            conditions_appended,
        })
    }

    async fn persist(
        &self,
        fetched: &SubjectPermission,
        updated: &SubjectPermission,
    ) -> Result<(), ReconcileError> {
        let key = fetched.key();
        match self
            .api
            .update_subject_permission_status(&key, fetched.resource_version, &updated.status)
            .await
        {
            Ok(_) => Ok(()),
            Err(source) => Err(ReconcileError::Write { key, source }),
        }
    }
}
