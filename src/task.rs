//! Task model: lifecycle, attempt results and the team-owned task tree.
//!
//! # State machine
//! ```text
//! Pending ──> InProgress ──> Completed
//!    │            │  ▲  └──> Failed ──(attempts < max)──┐
//!    └──> Blocked ┘  └───────────────────────────────────┘
//! ```
//! A task is terminal once `Completed`, or `Failed` with `attempts >= max_attempts`.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConclaveError, Result};
use crate::types::{AgentId, TaskId};

/// Well-known task context keys
pub mod keys {
    /// Explicit domain hint used for implementer routing
    pub const DOMAIN: &str = "domain";
    /// Location reported by scaffolding, injected into later tasks
    pub const PROJECT_PATH: &str = "project_path";
    /// Verification failure text carried by fix tasks
    pub const VERIFICATION_FAILURE: &str = "verification_failure";
    /// Deploy target selected by the division
    pub const DEPLOY_TARGET: &str = "deploy_target";
    /// Explicit category override
    pub const CATEGORY: &str = "category";
    /// Implementation task a verification task checks
    pub const VERIFIES: &str = "verifies";
    /// Service a runbook or health check is about
    pub const SERVICE: &str = "service";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Implement,
    Verify,
    Fix,
    Review,
    Plan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    /// Best-effort decode of a priority word
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" | "normal" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" | "urgent" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Outcome of one execution attempt. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    pub artifacts: Option<Vec<String>>,
    pub checks_run: Option<u32>,
    pub checks_passed: Option<u32>,
}

impl TaskResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
            artifacts: None,
            checks_run: None,
            checks_passed: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            artifacts: None,
            checks_run: None,
            checks_passed: None,
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_artifacts(mut self, artifacts: Vec<String>) -> Self {
        if !artifacts.is_empty() {
            self.artifacts = Some(artifacts);
        }
        self
    }

    pub fn with_checks(mut self, run: u32, passed: u32) -> Self {
        self.checks_run = Some(run);
        self.checks_passed = Some(passed.min(run));
        self
    }
}

/// A unit of work owned by a team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    kind: TaskKind,
    title: String,
    description: String,
    status: TaskStatus,
    priority: TaskPriority,
    created_by: AgentId,
    parent_id: Option<TaskId>,
    attempts: u32,
    max_attempts: u32,
    context: BTreeMap<String, String>,
    result: Option<TaskResult>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Default attempt ceiling for a task
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

impl Task {
    pub fn new(
        kind: TaskKind,
        title: impl Into<String>,
        description: impl Into<String>,
        created_by: AgentId,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            kind,
            title: title.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            priority: TaskPriority::default(),
            created_by,
            parent_id: None,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            context: BTreeMap::new(),
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_parent(mut self, parent_id: TaskId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Ceiling is clamped to at least one attempt
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    pub fn created_by(&self) -> AgentId {
        self.created_by
    }

    pub fn parent_id(&self) -> Option<TaskId> {
        self.parent_id
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context.get(key).map(String::as_str)
    }

    pub fn result(&self) -> Option<&TaskResult> {
        self.result.as_ref()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Context is writable until the task is terminal
    pub fn set_context(&mut self, key: impl Into<String>, value: impl Into<String>) {
        if !self.is_terminal() {
            self.context.insert(key.into(), value.into());
            self.touch();
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self.status {
            TaskStatus::Completed => true,
            TaskStatus::Failed => self.attempts >= self.max_attempts,
            _ => false,
        }
    }

    /// Whether another attempt may start
    pub fn can_attempt(&self) -> bool {
        !self.is_terminal() && self.attempts < self.max_attempts
    }

    fn transition_allowed(&self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self.status, to) {
            (Pending, InProgress) | (Pending, Blocked) | (Pending, Failed) => true,
            (InProgress, Completed) | (InProgress, Failed) | (InProgress, Blocked) => true,
            (Blocked, InProgress) => true,
            (Failed, InProgress) => self.attempts < self.max_attempts,
            _ => false,
        }
    }

    fn transition(&mut self, to: TaskStatus) -> Result<()> {
        if !self.transition_allowed(to) {
            return Err(ConclaveError::InvalidTransition {
                task_id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.touch();
        Ok(())
    }

    /// Start a new attempt, returning its 1-based number
    pub fn begin_attempt(&mut self) -> Result<u32> {
        if !self.can_attempt() {
            return Err(ConclaveError::InvalidTransition {
                task_id: self.id,
                from: self.status,
                to: TaskStatus::InProgress,
            });
        }
        if self.status != TaskStatus::InProgress {
            self.transition(TaskStatus::InProgress)?;
        }
        self.attempts += 1;
        self.touch();
        Ok(self.attempts)
    }

    /// Attach the result of an unsuccessful attempt while retries remain
    pub fn record_attempt(&mut self, result: TaskResult) {
        self.result = Some(result);
        self.touch();
    }

    pub fn complete(&mut self, result: TaskResult) -> Result<()> {
        self.transition(TaskStatus::Completed)?;
        self.result = Some(result);
        Ok(())
    }

    pub fn fail(&mut self, result: TaskResult) -> Result<()> {
        self.transition(TaskStatus::Failed)?;
        self.result = Some(result);
        Ok(())
    }

    pub fn block(&mut self) -> Result<()> {
        self.transition(TaskStatus::Blocked)
    }

    pub fn unblock(&mut self) -> Result<()> {
        if self.status != TaskStatus::Blocked {
            return Err(ConclaveError::InvalidTransition {
                task_id: self.id,
                from: self.status,
                to: TaskStatus::InProgress,
            });
        }
        self.transition(TaskStatus::InProgress)
    }

    /// Last recorded failure text, if any
    pub fn failure_reason(&self) -> Option<&str> {
        self.result
            .as_ref()
            .filter(|r| !r.success)
            .and_then(|r| r.error.as_deref().or(r.output.as_deref()))
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Node links for a task in the tree
#[derive(Debug, Clone, Default)]
struct Links {
    parent: Option<TaskId>,
    children: Vec<TaskId>,
}

/// Tasks of one goal, linked parent to child. Never holds a cycle.
#[derive(Debug, Default)]
pub struct TaskTree {
    tasks: HashMap<TaskId, Task>,
    links: HashMap<TaskId, Links>,
    order: Vec<TaskId>,
}

impl TaskTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task; its parent, if any, must already be present
    pub fn insert(&mut self, task: Task) -> Result<TaskId> {
        let id = task.id();
        if self.tasks.contains_key(&id) {
            return Err(ConclaveError::TaskTree(format!("task {id} already present")));
        }
        if let Some(parent) = task.parent_id() {
            if parent == id {
                return Err(ConclaveError::TaskTree(format!("task {id} cannot parent itself")));
            }
            let Some(links) = self.links.get_mut(&parent) else {
                return Err(ConclaveError::TaskTree(format!("parent {parent} not found")));
            };
            links.children.push(id);
        }
        self.links.insert(
            id,
            Links {
                parent: task.parent_id(),
                children: Vec::new(),
            },
        );
        self.order.push(id);
        self.tasks.insert(id, task);
        Ok(id)
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn get_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    pub fn parent(&self, id: &TaskId) -> Option<TaskId> {
        self.links.get(id).and_then(|l| l.parent)
    }

    pub fn children(&self, id: &TaskId) -> Vec<TaskId> {
        self.links.get(id).map(|l| l.children.clone()).unwrap_or_default()
    }

    /// Chain of ancestors, nearest first
    pub fn ancestors(&self, id: &TaskId) -> Vec<TaskId> {
        let mut out = Vec::new();
        let mut current = self.parent(id);
        while let Some(pid) = current {
            if out.contains(&pid) {
                break;
            }
            out.push(pid);
            current = self.parent(&pid);
        }
        out
    }

    /// Tasks in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    pub fn count_with_status(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status() == status).count()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
