//! Escalation records and the human-escalation seam.
//!
//! An unresolved goal is a value, not an error: each level either resolves it
//! or wraps it with its own reason and hands it up. The innermost record keeps
//! the original cause.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::retry::AttemptRecord;
use crate::types::{EscalationId, GoalId, TaskId, UnitId};

/// An unresolved goal travelling upward
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub id: EscalationId,
    pub goal_id: GoalId,
    /// Task that could not be completed, when the failure was task-level
    pub task_id: Option<TaskId>,
    /// Unit that raised this record
    pub unit_id: Option<UnitId>,
    pub reason: String,
    /// Attempt history of the failing task
    pub history: Vec<AttemptRecord>,
    pub cause: Option<Box<EscalationRecord>>,
    pub raised_at: DateTime<Utc>,
}

impl EscalationRecord {
    pub fn new(goal_id: GoalId, reason: impl Into<String>) -> Self {
        Self {
            id: EscalationId::new(),
            goal_id,
            task_id: None,
            unit_id: None,
            reason: reason.into(),
            history: Vec::new(),
            cause: None,
            raised_at: Utc::now(),
        }
    }

    pub fn for_task(mut self, task_id: TaskId, history: Vec<AttemptRecord>) -> Self {
        self.task_id = Some(task_id);
        self.history = history;
        self
    }

    pub fn from_unit(mut self, unit_id: UnitId) -> Self {
        self.unit_id = Some(unit_id);
        self
    }

    /// Wrap `self` as the cause of a new record raised one level up
    pub fn wrap(self, reason: impl Into<String>) -> Self {
        Self {
            id: EscalationId::new(),
            goal_id: self.goal_id,
            task_id: None,
            unit_id: None,
            reason: reason.into(),
            history: Vec::new(),
            cause: Some(Box::new(self)),
            raised_at: Utc::now(),
        }
    }

    /// The innermost record
    pub fn root_cause(&self) -> &EscalationRecord {
        let mut current = self;
        while let Some(cause) = current.cause.as_deref() {
            current = cause;
        }
        current
    }

    /// Number of levels this record has passed through
    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut current = self;
        while let Some(cause) = current.cause.as_deref() {
            depth += 1;
            current = cause;
        }
        depth
    }
}

impl fmt::Display for EscalationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)?;
        let mut current = self.cause.as_deref();
        while let Some(cause) = current {
            write!(f, " <- {}", cause.reason)?;
            current = cause.cause.as_deref();
        }
        Ok(())
    }
}

/// Context handed to the human-escalation handler
#[derive(Debug, Clone)]
pub struct EscalationContext {
    /// Request text as the user gave it
    pub original_request: String,
    pub record: EscalationRecord,
}

/// Notified once per request that no level could resolve
pub trait EscalationHandler: Send + Sync {
    fn escalate(&self, reason: &str, context: &EscalationContext);
}

impl<F> EscalationHandler for F
where
    F: Fn(&str, &EscalationContext) + Send + Sync,
{
    fn escalate(&self, reason: &str, context: &EscalationContext) {
        self(reason, context)
    }
}

/// Handler that only logs
#[derive(Debug, Default)]
pub struct LogEscalationHandler;

impl EscalationHandler for LogEscalationHandler {
    fn escalate(&self, reason: &str, context: &EscalationContext) {
        tracing::warn!(
            goal_id = %context.record.goal_id,
            reason = %reason,
            request = %context.original_request,
            "Escalating to a human"
        );
    }
}
