//! Error definitions for the dispatcher and its modules

use crate::world::EntityId;
use thiserror::Error;

/// Errors raised by the dispatcher or returned from module callbacks.
///
/// Errors returned by a module never leave [`super::ControllerDispatcher::update`];
/// they are logged, counted against the module and reported in the frame report.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DispatchError {
    /// A module with this name is already enabled
    #[error("Module already registered: {module}")]
    AlreadyRegistered { module: String },

    #[error("Unknown module: {module}")]
    UnknownModule { module: String },

    /// The readiness probe failed
    #[error("Readiness probe failed: {0}")]
    ProbeFailed(String),

    #[error("Run failed: {0}")]
    RunFailed(String),

    #[error("Stop failed: {0}")]
    StopFailed(String),

    /// A module claimed a group it never declared
    #[error("Module {module} claimed undeclared group {group}")]
    UndeclaredGroup { module: String, group: String },

    /// The shared world lock is poisoned
    #[error("World unavailable: {0}")]
    WorldUnavailable(String),

    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    /// The dispatcher behind a control handle has been dropped
    #[error("Dispatcher closed, dropped command {0}")]
    DispatcherClosed(String),
}
