use pkg_state::{ClusterApi, StoreError};
use pkg_types::rbac::{RoleBinding, Subject};
use pkg_types::subject_permission::{ObjectKey, SubjectPermission};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::conditions;
use crate::diff::{
    BindingKind, DesiredBinding, missing_cluster_role_bindings, missing_role_bindings,
    missing_roles,
};
use crate::observer::{ReconcileEvent, ReconcileObserver};
use crate::reconcile::{ReconcileError, ReconcileOutcome, read_failed};
use crate::safelist::PatternCache;

/// Turns one SubjectPermission into the ClusterRoleBindings and RoleBindings
/// it asks for, recording what happened as conditions on its status.
///
/// Bindings are only ever created. A binding that already exists, or that
/// another writer creates first, counts as done.
pub struct SubjectPermissionController {
    api: Arc<dyn ClusterApi>,
    observer: Arc<dyn ReconcileObserver>,
    patterns: PatternCache,
}

/// Work in progress for one invocation.
struct Pass {
    current: SubjectPermission,
    conditions_appended: usize,
    bindings_created: usize,
}

impl Pass {
    fn append(&mut self, next: SubjectPermission) {
        self.current = next;
        self.conditions_appended += 1;
    }
}

impl SubjectPermissionController {
    pub fn new(api: Arc<dyn ClusterApi>, observer: Arc<dyn ReconcileObserver>) -> Self {
        Self {
            api,
            observer,
            patterns: PatternCache::new(),
        }
    }

    /// Share compiled namespace patterns with other controllers.
    pub fn with_pattern_cache(mut self, patterns: PatternCache) -> Self {
        self.patterns = patterns;
        self
    }

    pub async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileOutcome, ReconcileError> {
        let result = self.reconcile_inner(key).await;
        if let Err(e) = &result {
            self.observer.record_outcome(&ReconcileEvent::Failed {
                stage: e.stage(),
                message: e.to_string(),
            });
        }
        result
    }

    async fn reconcile_inner(&self, key: &ObjectKey) -> Result<ReconcileOutcome, ReconcileError> {
        let sp = match self.api.get_subject_permission(key).await {
            Ok(sp) => sp,
            Err(e) if e.is_not_found() => {
                debug!("SubjectPermission {} not found, nothing to do", key);
                return Ok(ReconcileOutcome::NotFound);
            }
            Err(e) => return Err(read_failed("SubjectPermission")(e)),
        };
        if sp.deletion_timestamp.is_some() {
            self.observer
                .record_outcome(&ReconcileEvent::Deleted { owner: key.clone() });
            return Ok(ReconcileOutcome::Deleting);
        }

        let roles = self
            .api
            .list_cluster_roles()
            .await
            .map_err(read_failed("ClusterRoles"))?;
        let cluster_bindings = self
            .api
            .list_cluster_role_bindings()
            .await
            .map_err(read_failed("ClusterRoleBindings"))?;
        let namespaces = self
            .api
            .list_namespaces()
            .await
            .map_err(read_failed("Namespaces"))?;
        let namespace_names: Vec<&str> = namespaces.iter().map(|n| n.name.as_str()).collect();

        let subject = Subject {
            kind: sp.spec.subject_kind,
            name: sp.spec.subject_name.clone(),
        };
        let missing = missing_roles(&sp.referenced_roles(), &roles);
        let mut pass = Pass {
            current: sp.clone(),
            conditions_appended: 0,
            bindings_created: 0,
        };

        for role in &missing {
            pass.append(conditions::role_missing(&pass.current, role));
            self.observer.record_outcome(&ReconcileEvent::RoleMissing {
                owner: key.clone(),
                role: role.clone(),
            });
        }

        // Cluster-wide grants. A missing role is only reported above: the
        // binding is still created and takes effect once the role appears.
        let desired: Vec<DesiredBinding> = sp
            .spec
            .cluster_permissions
            .iter()
            .map(|role| DesiredBinding::cluster(role, &subject))
            .collect();
        let mut created_roles: Vec<String> = Vec::new();
        for binding in missing_cluster_role_bindings(&desired, &cluster_bindings) {
            let crb = binding.to_cluster_role_binding();
            match self.api.create_cluster_role_binding(&crb).await {
                Ok(()) => {
                    pass.bindings_created += 1;
                    self.record_created(key, &binding);
                    created_roles.push(binding.role_name.clone());
                }
                Err(e) if e.is_already_exists() => {
                    debug!("ClusterRoleBinding {} already exists", crb.name);
                }
                Err(source) => {
                    let failed =
                        conditions::cluster_binding_failed(&pass.current, &binding.role_name, &source);
                    pass.append(failed);
                    self.persist(key, &sp, &pass.current).await?;
                    return Err(ReconcileError::Create {
                        kind: BindingKind::ClusterRoleBinding,
                        name: crb.name,
                        source,
                    });
                }
            }
        }
        pass.append(conditions::cluster_bindings_created(&pass.current, &created_roles));

        // Namespace-scoped grants.
        let mut existing: HashMap<String, Vec<RoleBinding>> = HashMap::new();
        let mut attempted: HashSet<(String, String)> = HashSet::new();
        for permission in &sp.spec.permissions {
            let role = &permission.cluster_role_name;
            let safelist = match self.patterns.safelist(
                &permission.namespaces_allowed_regex,
                &permission.namespaces_denied_regex,
                &namespace_names,
            ) {
                Ok(safelist) => safelist,
                Err(e) => {
                    pass.append(conditions::invalid_namespace_pattern(&pass.current, role, &e));
                    self.observer
                        .record_outcome(&ReconcileEvent::InvalidNamespacePattern {
                            owner: key.clone(),
                            role: role.clone(),
                            reason: e.to_string(),
                        });
                    continue;
                }
            };

            for namespace in &safelist {
                let binding = DesiredBinding::namespaced(role, &subject, namespace);
                if !attempted.insert((namespace.clone(), binding.name())) {
                    continue;
                }
                if !existing.contains_key(namespace) {
                    let listed = self
                        .api
                        .list_role_bindings(namespace)
                        .await
                        .map_err(read_failed("RoleBindings"))?;
                    existing.insert(namespace.clone(), listed);
                }
                let present = existing.get(namespace).map(Vec::as_slice).unwrap_or_default();
                if missing_role_bindings(std::slice::from_ref(&binding), present).is_empty() {
                    continue;
                }
                let Some(rb) = binding.to_role_binding() else {
                    continue;
                };
                match self.create_role_binding(&rb).await {
                    Ok(true) => {
                        pass.bindings_created += 1;
                        self.record_created(key, &binding);
                    }
                    Ok(false) => {}
                    Err(source) => {
                        pass.append(conditions::role_binding_failed(&pass.current, role, &source));
                        self.persist(key, &sp, &pass.current).await?;
                        return Err(ReconcileError::Create {
                            kind: BindingKind::RoleBinding,
                            name: rb.name,
                            source,
                        });
                    }
                }
            }
            pass.append(conditions::role_bindings_created(&pass.current, role));
        }

        self.persist(key, &sp, &pass.current).await?;
        self.observer.record_outcome(&ReconcileEvent::Reconciled {
            owner: key.clone(),
            conditions_appended: pass.conditions_appended,
        });
        Ok(ReconcileOutcome::Reconciled {
            bindings_created: pass.bindings_created,
            conditions_appended: pass.conditions_appended,
        })
    }

    /// `Ok(false)` when the binding turned out to exist already.
    async fn create_role_binding(&self, rb: &RoleBinding) -> Result<bool, StoreError> {
        match self.api.create_role_binding(rb).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_already_exists() => {
                debug!("RoleBinding {}/{} already exists", rb.namespace, rb.name);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn record_created(&self, owner: &ObjectKey, binding: &DesiredBinding) {
        self.observer.record_outcome(&ReconcileEvent::BindingCreated {
            owner: owner.clone(),
            kind: binding.kind(),
            name: binding.name(),
            namespace: binding.namespace.clone(),
        });
    }

    /// Write the accumulated status over the version that was fetched.
    async fn persist(
        &self,
        key: &ObjectKey,
        fetched: &SubjectPermission,
        updated: &SubjectPermission,
    ) -> Result<(), ReconcileError> {
        self.api
            .update_subject_permission_status(key, fetched.resource_version, &updated.status)
            .await
            .map(|_| ())
            .map_err(|source| ReconcileError::Write {
                key: key.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCluster, RecordingObserver, make_subject_permission};
    use pkg_types::subject_permission::SubjectPermissionState;

    fn controller(
        cluster: &Arc<FakeCluster>,
    ) -> (SubjectPermissionController, Arc<RecordingObserver>) {
        let observer = Arc::new(RecordingObserver::default());
        let controller = SubjectPermissionController::new(cluster.clone(), observer.clone());
        (controller, observer)
    }

    fn messages(sp: &SubjectPermission) -> Vec<String> {
        sp.status.conditions.iter().map(|c| c.message.clone()).collect()
    }

    #[tokio::test]
    async fn cluster_admin_binding_for_alice() {
        let sp = make_subject_permission("alice", "alice", &["cluster-admin"], &[]);
        let key = sp.key();
        let cluster = Arc::new(
            FakeCluster::new()
                .with_cluster_roles(&["cluster-admin"])
                .with_subject_permission(sp),
        );
        let (controller, observer) = controller(&cluster);

        let outcome = controller.reconcile(&key).await.unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Reconciled {
                bindings_created: 1,
                conditions_appended: 1
            }
        );
        assert_eq!(cluster.cluster_role_binding_names(), vec!["cluster-admin-alice"]);

        let stored = cluster.subject_permission(&key);
        let cond = &stored.status.conditions[0];
        assert_eq!(cond.message, "Successfully created all ClusterRoleBindings");
        assert_eq!(cond.state, SubjectPermissionState::Created);
        assert_eq!(cond.cluster_role_names, vec!["cluster-admin"]);
        assert!(cond.status);
        assert!(observer.events().contains(&ReconcileEvent::BindingCreated {
            owner: key.clone(),
            kind: BindingKind::ClusterRoleBinding,
            name: "cluster-admin-alice".to_string(),
            namespace: None,
        }));
    }

    #[tokio::test]
    async fn missing_role_is_reported_and_still_bound() {
        let sp = make_subject_permission(
            "alice",
            "alice",
            &["ghost-role", "view"],
            &[("ghost-role", ".*", "")],
        );
        let key = sp.key();
        let cluster = Arc::new(
            FakeCluster::new()
                .with_namespaces(&["team-a"])
                .with_cluster_roles(&["view"])
                .with_subject_permission(sp),
        );
        let (controller, observer) = controller(&cluster);

        controller.reconcile(&key).await.unwrap();

        // The role may be created later; the bindings are already in place.
        assert_eq!(
            cluster.cluster_role_binding_names(),
            vec!["ghost-role-alice", "view-alice"]
        );
        assert_eq!(cluster.role_binding_names(), vec!["team-a/ghost-role-alice"]);
        let stored = cluster.subject_permission(&key);
        // Reported once, even though two grants reference it.
        assert_eq!(
            messages(&stored),
            vec![
                "ghost-role for clusterPermission does not exist",
                "Successfully created all ClusterRoleBindings",
                "Successfully created all RoleBindings",
            ]
        );
        assert_eq!(
            stored.status.conditions[1].cluster_role_names,
            vec!["ghost-role", "view"]
        );
        assert_eq!(stored.status.conditions[0].state, SubjectPermissionState::Failed);
        assert!(!stored.status.conditions[0].status);
        assert!(observer.events().contains(&ReconcileEvent::RoleMissing {
            owner: key,
            role: "ghost-role".to_string(),
        }));
    }

    #[tokio::test]
    async fn role_bindings_follow_the_safelist() {
        let sp = make_subject_permission(
            "alice",
            "alice",
            &[],
            &[("edit", "team-.*", "team-secret")],
        );
        let key = sp.key();
        let cluster = Arc::new(
            FakeCluster::new()
                .with_namespaces(&["team-a", "team-b", "team-secret", "other"])
                .with_cluster_roles(&["edit"])
                .with_subject_permission(sp),
        );
        let (controller, _) = controller(&cluster);

        let outcome = controller.reconcile(&key).await.unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Reconciled {
                bindings_created: 2,
                conditions_appended: 2
            }
        );
        assert_eq!(
            cluster.role_binding_names(),
            vec!["team-a/edit-alice", "team-b/edit-alice"]
        );
        let stored = cluster.subject_permission(&key);
        assert_eq!(
            messages(&stored),
            vec![
                "Successfully created all ClusterRoleBindings",
                "Successfully created all RoleBindings",
            ]
        );
        assert_eq!(stored.status.conditions[1].cluster_role_names, vec!["edit"]);
    }

    #[tokio::test]
    async fn second_pass_creates_nothing() {
        let sp = make_subject_permission(
            "alice",
            "alice",
            &["cluster-admin"],
            &[("edit", "team-a", "")],
        );
        let key = sp.key();
        let cluster = Arc::new(
            FakeCluster::new()
                .with_namespaces(&["team-a"])
                .with_cluster_roles(&["cluster-admin", "edit"])
                .with_subject_permission(sp),
        );
        let (controller, _) = controller(&cluster);

        controller.reconcile(&key).await.unwrap();
        let calls_after_first = cluster.create_calls().len();
        let outcome = controller.reconcile(&key).await.unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Reconciled {
                bindings_created: 0,
                conditions_appended: 2
            }
        );
        assert_eq!(cluster.create_calls().len(), calls_after_first);
        let stored = cluster.subject_permission(&key);
        assert_eq!(stored.status.conditions.len(), 4);
        // Nothing new was bound cluster-wide on the converged pass.
        assert!(stored.status.conditions[2].cluster_role_names.is_empty());
        assert_eq!(stored.status.conditions[2].state, SubjectPermissionState::Created);
    }

    #[tokio::test]
    async fn binding_created_by_another_writer_counts_as_success() {
        let sp = make_subject_permission("alice", "alice", &["view"], &[("edit", "team-a", "")]);
        let key = sp.key();
        let cluster = Arc::new(
            FakeCluster::new()
                .with_namespaces(&["team-a"])
                .with_cluster_roles(&["view", "edit"])
                .with_subject_permission(sp),
        );
        {
            let mut state = cluster.state.lock().unwrap();
            state.racing_create.insert("view-alice".to_string());
            state.racing_create.insert("edit-alice".to_string());
        }
        let (controller, observer) = controller(&cluster);

        let outcome = controller.reconcile(&key).await.unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Reconciled {
                bindings_created: 0,
                conditions_appended: 2
            }
        );
        assert!(
            !observer
                .events()
                .iter()
                .any(|e| matches!(e, ReconcileEvent::Failed { .. }))
        );
    }

    #[tokio::test]
    async fn create_failure_is_persisted_then_returned() {
        let sp = make_subject_permission("alice", "alice", &["view"], &[]);
        let key = sp.key();
        let cluster = Arc::new(
            FakeCluster::new()
                .with_cluster_roles(&["view"])
                .with_subject_permission(sp),
        );
        cluster
            .state
            .lock()
            .unwrap()
            .fail_create
            .insert("view-alice".to_string());
        let (controller, observer) = controller(&cluster);

        let err = controller.reconcile(&key).await.unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Create {
                kind: BindingKind::ClusterRoleBinding,
                ..
            }
        ));

        let stored = cluster.subject_permission(&key);
        assert_eq!(stored.status.conditions.len(), 1);
        let cond = &stored.status.conditions[0];
        assert_eq!(cond.state, SubjectPermissionState::Failed);
        assert!(cond.message.starts_with("Unable to create ClusterRoleBinding: "));
        assert_eq!(cond.cluster_role_names, vec!["view"]);
        assert!(matches!(
            observer.events().last(),
            Some(ReconcileEvent::Failed { .. })
        ));
    }

    #[tokio::test]
    async fn role_binding_failure_stops_the_pass() {
        let sp = make_subject_permission(
            "alice",
            "alice",
            &[],
            &[("edit", "team-.*", ""), ("view", "team-.*", "")],
        );
        let key = sp.key();
        let cluster = Arc::new(
            FakeCluster::new()
                .with_namespaces(&["team-a"])
                .with_cluster_roles(&["edit", "view"])
                .with_subject_permission(sp),
        );
        cluster
            .state
            .lock()
            .unwrap()
            .fail_create
            .insert("edit-alice".to_string());
        let (controller, _) = controller(&cluster);

        let err = controller.reconcile(&key).await.unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Create {
                kind: BindingKind::RoleBinding,
                ..
            }
        ));
        assert!(cluster.role_binding_names().is_empty());
        let stored = cluster.subject_permission(&key);
        assert_eq!(
            stored.status.conditions.last().unwrap().message,
            "Unable to create RoleBinding: state store error: injected create failure"
        );
    }

    #[tokio::test]
    async fn status_write_failure_is_a_write_error() {
        let sp = make_subject_permission("alice", "alice", &["view"], &[]);
        let key = sp.key();
        let cluster = Arc::new(
            FakeCluster::new()
                .with_cluster_roles(&["view"])
                .with_subject_permission(sp),
        );
        cluster.state.lock().unwrap().fail_status_update = true;
        let (controller, _) = controller(&cluster);

        let err = controller.reconcile(&key).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Write { .. }));
        // The binding stays; the next pass finds it and only rewrites status.
        assert_eq!(cluster.cluster_role_binding_names(), vec!["view-alice"]);
    }

    #[tokio::test]
    async fn read_failure_persists_nothing() {
        let sp = make_subject_permission("alice", "alice", &["view"], &[]);
        let key = sp.key();
        let cluster = Arc::new(
            FakeCluster::new()
                .with_cluster_roles(&["view"])
                .with_subject_permission(sp),
        );
        cluster.state.lock().unwrap().fail_list_cluster_roles = true;
        let (controller, _) = controller(&cluster);

        let err = controller.reconcile(&key).await.unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Read {
                what: "ClusterRoles",
                ..
            }
        ));
        assert_eq!(cluster.state.lock().unwrap().status_updates, 0);
        assert!(cluster.create_calls().is_empty());
    }

    #[tokio::test]
    async fn invalid_pattern_only_fails_its_own_entry() {
        let sp = make_subject_permission(
            "alice",
            "alice",
            &[],
            &[("edit", "team-(", ""), ("view", "team-a", "")],
        );
        let key = sp.key();
        let cluster = Arc::new(
            FakeCluster::new()
                .with_namespaces(&["team-a"])
                .with_cluster_roles(&["edit", "view"])
                .with_subject_permission(sp),
        );
        let (controller, observer) = controller(&cluster);

        controller.reconcile(&key).await.unwrap();

        assert_eq!(cluster.role_binding_names(), vec!["team-a/view-alice"]);
        let stored = cluster.subject_permission(&key);
        let invalid = &stored.status.conditions[1];
        assert!(invalid.message.starts_with("Invalid namespace regex for edit: "));
        assert_eq!(invalid.state, SubjectPermissionState::Failed);
        assert_eq!(stored.status.conditions[2].cluster_role_names, vec!["view"]);
        assert!(
            observer
                .events()
                .iter()
                .any(|e| matches!(e, ReconcileEvent::InvalidNamespacePattern { role, .. } if role == "edit"))
        );
    }

    #[tokio::test]
    async fn absent_resource_is_a_no_op() {
        let cluster = Arc::new(FakeCluster::new());
        let (controller, observer) = controller(&cluster);
        let outcome = controller
            .reconcile(&ObjectKey::new("rbac-system", "nobody"))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::NotFound);
        assert!(observer.events().is_empty());
    }

    #[tokio::test]
    async fn deleting_resource_is_left_alone() {
        let mut sp = make_subject_permission("alice", "alice", &["view"], &[]);
        sp.deletion_timestamp = Some(chrono::Utc::now());
        let key = sp.key();
        let cluster = Arc::new(
            FakeCluster::new()
                .with_cluster_roles(&["view"])
                .with_subject_permission(sp),
        );
        let (controller, observer) = controller(&cluster);

        let outcome = controller.reconcile(&key).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Deleting);
        assert!(cluster.create_calls().is_empty());
        assert_eq!(observer.events(), vec![ReconcileEvent::Deleted { owner: key }]);
    }

    #[tokio::test]
    async fn concurrent_passes_create_each_binding_once() {
        let sp = make_subject_permission("alice", "alice", &["view"], &[("edit", "team-.*", "")]);
        let key = sp.key();
        let cluster = Arc::new(
            FakeCluster::new()
                .with_namespaces(&["team-a", "team-b"])
                .with_cluster_roles(&["view", "edit"])
                .with_subject_permission(sp),
        );
        let (first, _) = controller(&cluster);
        let (second, _) = controller(&cluster);

        let (a, b) = tokio::join!(first.reconcile(&key), second.reconcile(&key));
        // One of the two status writes may lose the version race; neither
        // pass may fail on creation.
        for result in [a, b] {
            if let Err(e) = result {
                assert!(matches!(e, ReconcileError::Write { .. }), "{e}");
            }
        }
        assert_eq!(cluster.cluster_role_binding_names(), vec!["view-alice"]);
        assert_eq!(
            cluster.role_binding_names(),
            vec!["team-a/edit-alice", "team-b/edit-alice"]
        );
    }
}
