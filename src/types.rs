//! Identifiers, worker roles and the goal type shared across the hierarchy.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a fresh random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Identifier of a worker (agent)
    AgentId
);
define_id!(
    /// Identifier of a task in a team's task tree
    TaskId
);
define_id!(
    /// Identifier of a goal flowing down the hierarchy
    GoalId
);
define_id!(
    /// Identifier of an organizational unit (company, division, team)
    UnitId
);
define_id!(
    /// Identifier of an escalation record
    EscalationId
);
define_id!(
    /// Identifier of an operations incident
    IncidentId
);

/// Role a worker is bound to. Capabilities are permitted per role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    Planner,
    Implementer,
    Verifier,
    Operator,
    Router,
}

impl WorkerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerRole::Planner => "planner",
            WorkerRole::Implementer => "implementer",
            WorkerRole::Verifier => "verifier",
            WorkerRole::Operator => "operator",
            WorkerRole::Router => "router",
        }
    }
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context key carrying an explicit goal kind hint (`build`, `deploy`, ...)
pub const CONTEXT_KIND: &str = "kind";

/// A unit of intent submitted to the hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: GoalId,
    pub text: String,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl Goal {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: GoalId::new(),
            text: text.into(),
            context: BTreeMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context.get(key).map(String::as_str)
    }
}
