use pkg_state::StoreError;
use pkg_types::subject_permission::ObjectKey;
use thiserror::Error;

use crate::diff::BindingKind;

/// How a successful reconciliation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The object was gone by the time it was fetched.
    NotFound,
    /// The SubjectPermission is being deleted; nothing was created.
    Deleting,
    Reconciled {
        bindings_created: usize,
        conditions_appended: usize,
    },
}

/// Stage at which an invocation gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileStage {
    Fetch,
    CreateBinding,
    PersistStatus,
}

impl ReconcileStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileStage::Fetch => "fetch",
            ReconcileStage::CreateBinding => "create_binding",
            ReconcileStage::PersistStatus => "persist_status",
        }
    }
}

/// Errors that end an invocation. The driver retries the whole invocation.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to read {what}: {source}")]
    Read {
        what: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("failed to create {kind} {name}: {source}")]
    Create {
        kind: BindingKind,
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to update status of SubjectPermission {key}: {source}")]
    Write {
        key: ObjectKey,
        #[source]
        source: StoreError,
    },
}

impl ReconcileError {
    pub fn stage(&self) -> ReconcileStage {
        match self {
            ReconcileError::Read { .. } => ReconcileStage::Fetch,
            ReconcileError::Create { .. } => ReconcileStage::CreateBinding,
            ReconcileError::Write { .. } => ReconcileStage::PersistStatus,
        }
    }
}

/// `map_err` adapter for list/get failures.
pub(crate) fn read_failed(what: &'static str) -> impl FnOnce(StoreError) -> ReconcileError {
    move |source| ReconcileError::Read { what, source }
}
