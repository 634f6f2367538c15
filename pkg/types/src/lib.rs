pub mod config;
pub mod namespace;
pub mod rbac;
pub mod subject_permission;
pub mod validate;
