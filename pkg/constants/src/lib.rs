//! Centralized constants for the rbac-permissions project.
//!
//! All project-wide constant values live here.
//! Change a value in one place and it applies everywhere.

pub mod controller;
pub mod metrics;
pub mod paths;
pub mod state;
