//! Conclave error types

use thiserror::Error;

use crate::task::TaskStatus;
use crate::types::{TaskId, UnitId, WorkerRole};

/// Errors that can occur in the conclave engine.
///
/// Unresolved goals are not errors: they travel upward as
/// [`EscalationRecord`](crate::escalation::EscalationRecord) values.
#[derive(Debug, Error)]
pub enum ConclaveError {
    /// Company not found for a domain
    #[error("Company not found: {0}")]
    CompanyNotFound(String),

    /// Organizational unit not found
    #[error("Unit not found: {0}")]
    UnitNotFound(UnitId),

    /// A unit may be owned by one parent only
    #[error("Unit {0} is already owned")]
    AlreadyOwned(UnitId),

    /// Archived units cannot change status
    #[error("Unit {0} is archived")]
    UnitArchived(UnitId),

    /// Planning failed or produced nothing usable
    #[error("Planning error: {0}")]
    Planning(String),

    /// Capability lookup or execution failed
    #[error("Capability error: {0}")]
    Capability(String),

    /// A worker asked for a capability outside its role
    #[error("Capability '{capability}' is not permitted for role {role}")]
    PermissionDenied { capability: String, role: WorkerRole },

    /// Worker invocation failed before producing output
    #[error("Worker error: {0}")]
    Worker(String),

    /// Illegal task status transition
    #[error("Task {task_id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// Task tree integrity violation
    #[error("Task tree error: {0}")]
    TaskTree(String),

    /// Documentation store error
    #[error("Document error: {0}")]
    Document(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Opaque failure from an external collaborator
    #[error("Backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

pub type Result<T, E = ConclaveError> = std::result::Result<T, E>;
