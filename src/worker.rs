//! Worker seam: a role-bound actor invoked with a prompt.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capability::InvocationRecord;
use crate::error::Result;
use crate::types::{AgentId, WorkerRole};

/// One invocation of a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub prompt: String,
    /// Capability the worker must use as its first action
    pub forced_capability: Option<String>,
    /// Ceiling on model exchange rounds for this invocation
    pub max_rounds: usize,
}

impl WorkerRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            forced_capability: None,
            max_rounds: 1,
        }
    }

    pub fn forcing(mut self, capability: impl Into<String>) -> Self {
        self.forced_capability = Some(capability.into());
        self
    }

    pub fn with_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = rounds.max(1);
        self
    }
}

/// What a worker hands back: free text plus its invocation record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub output: String,
    pub record: InvocationRecord,
}

impl WorkerResponse {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            record: InvocationRecord::new(),
        }
    }
}

/// A role-bound actor. Each invocation starts with fresh invocation counters.
#[async_trait]
pub trait Worker: Send + Sync {
    fn id(&self) -> AgentId;

    fn role(&self) -> WorkerRole;

    async fn invoke(&self, request: WorkerRequest) -> Result<WorkerResponse>;

    fn description(&self) -> &str {
        "worker"
    }
}
