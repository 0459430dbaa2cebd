//! Capability registry and role-based permission filtering.
//!
//! Capabilities are opaque: the engine only sees a declared name, parameter
//! schema and role list, and the boolean success of each execution.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ConclaveError, Result};
use crate::types::WorkerRole;

/// Well-known capability names referenced by task categories
pub mod names {
    pub const READ_FILE: &str = "read_file";
    pub const WRITE_FILE: &str = "write_file";
    pub const LIST_FILES: &str = "list_files";
    pub const RUN_COMMAND: &str = "run_command";
    pub const RUN_TESTS: &str = "run_tests";
    pub const GIT: &str = "git";
    pub const SCAFFOLD_PROJECT: &str = "scaffold_project";
    pub const GENERATE_DOCKERFILE: &str = "generate_dockerfile";
    pub const GENERATE_COMPOSE: &str = "generate_compose";
    pub const DOCKER_BUILD: &str = "docker_build";
    pub const CREATE_DEPLOYMENT: &str = "create_deployment";
    pub const DEPLOYMENT_STATUS: &str = "deployment_status";
    pub const CHECK_HEALTH: &str = "check_health";
    pub const READ_LOGS: &str = "read_logs";
    pub const RESTART_SERVICE: &str = "restart_service";
    pub const WRITE_DOC: &str = "write_doc";
    pub const READ_DOC: &str = "read_doc";
}

/// Declared shape of a capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the parameters object
    pub parameters: Value,
    pub allowed_roles: Vec<WorkerRole>,
}

impl CapabilitySpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({ "type": "object", "properties": {} }),
            allowed_roles: Vec::new(),
        }
    }

    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.parameters = schema;
        self
    }

    pub fn allow(mut self, role: WorkerRole) -> Self {
        if !self.allowed_roles.contains(&role) {
            self.allowed_roles.push(role);
        }
        self
    }

    pub fn permits(&self, role: WorkerRole) -> bool {
        self.allowed_roles.contains(&role)
    }
}

/// Result of executing a capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityOutcome {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl CapabilityOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }

    /// Text handed back to the model for this call
    pub fn summary(&self) -> String {
        match (self.success, &self.output, &self.error) {
            (true, Some(out), _) => out.clone(),
            (true, None, _) => "ok".to_string(),
            (false, _, Some(err)) => format!("Error: {err}"),
            (false, _, None) => "Error: capability failed".to_string(),
        }
    }
}

/// A named action a worker may invoke
#[async_trait]
pub trait Capability: Send + Sync {
    fn spec(&self) -> &CapabilitySpec;

    async fn execute(&self, params: Value) -> anyhow::Result<CapabilityOutcome>;
}

type SyncHandler = dyn Fn(&Value) -> anyhow::Result<CapabilityOutcome> + Send + Sync;

/// Capability backed by a synchronous closure
pub struct FnCapability {
    spec: CapabilitySpec,
    handler: Box<SyncHandler>,
}

impl FnCapability {
    pub fn new<F>(spec: CapabilitySpec, handler: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<CapabilityOutcome> + Send + Sync + 'static,
    {
        Self {
            spec,
            handler: Box::new(handler),
        }
    }
}

#[async_trait]
impl Capability for FnCapability {
    fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    async fn execute(&self, params: Value) -> anyhow::Result<CapabilityOutcome> {
        (self.handler)(&params)
    }
}

/// All registered capabilities. Read-only once shared.
#[derive(Default, Clone)]
pub struct CapabilityRegistry {
    capabilities: BTreeMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, capability: Arc<dyn Capability>) -> Result<()> {
        let name = capability.spec().name.clone();
        if self.capabilities.contains_key(&name) {
            return Err(ConclaveError::Capability(format!(
                "capability '{name}' already registered"
            )));
        }
        debug!(capability = %name, "Registered capability");
        self.capabilities.insert(name, capability);
        Ok(())
    }

    /// Builder-style registration
    pub fn with(mut self, capability: impl Capability + 'static) -> Result<Self> {
        self.register(Arc::new(capability))?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.capabilities.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// The subset a worker of `role` is constructed with
    pub fn for_role(&self, role: WorkerRole) -> CapabilitySet {
        let capabilities = self
            .capabilities
            .values()
            .filter(|c| c.spec().permits(role))
            .cloned()
            .collect();
        CapabilitySet { role, capabilities }
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.names())
            .finish()
    }
}

/// Role-filtered view of the registry held by one worker
#[derive(Clone)]
pub struct CapabilitySet {
    role: WorkerRole,
    capabilities: Vec<Arc<dyn Capability>>,
}

impl CapabilitySet {
    pub fn role(&self) -> WorkerRole {
        self.role
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.iter().any(|c| c.spec().name == name)
    }

    pub fn specs(&self) -> Vec<CapabilitySpec> {
        self.capabilities.iter().map(|c| c.spec().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Execute `name`, refusing anything outside this role's subset.
    ///
    /// Execution errors are folded into a failed outcome.
    pub async fn invoke(&self, name: &str, params: Value) -> Result<CapabilityOutcome> {
        let capability = self
            .capabilities
            .iter()
            .find(|c| c.spec().name == name)
            .ok_or_else(|| ConclaveError::PermissionDenied {
                capability: name.to_string(),
                role: self.role,
            })?;

        match capability.execute(params).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(capability = %name, error = %e, "Capability execution failed");
                Ok(CapabilityOutcome::err(e.to_string()))
            }
        }
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.capabilities.iter().map(|c| c.spec().name.as_str()).collect();
        f.debug_struct("CapabilitySet")
            .field("role", &self.role)
            .field("capabilities", &names)
            .finish()
    }
}

/// One capability call as seen by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationEntry {
    pub name: String,
    pub success: bool,
    pub error: Option<String>,
}

/// Per-attempt record of capability invocations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationRecord {
    counts: BTreeMap<String, u32>,
    successes: u32,
    failures: u32,
    calls: Vec<InvocationEntry>,
}

impl InvocationRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, name: &str, outcome: &CapabilityOutcome) {
        *self.counts.entry(name.to_string()).or_insert(0) += 1;
        if outcome.success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.calls.push(InvocationEntry {
            name: name.to_string(),
            success: outcome.success,
            error: outcome.error.clone(),
        });
    }

    pub fn count(&self, name: &str) -> u32 {
        self.counts.get(name).copied().unwrap_or(0)
    }

    pub fn counts(&self) -> &BTreeMap<String, u32> {
        &self.counts
    }

    pub fn total(&self) -> u32 {
        self.successes + self.failures
    }

    pub fn successes(&self) -> u32 {
        self.successes
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn calls(&self) -> &[InvocationEntry] {
        &self.calls
    }

    pub fn has_success(&self) -> bool {
        self.successes > 0
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Whether any of `names` was invoked, successfully or not
    pub fn invoked_any(&self, names: &[&str]) -> bool {
        names.iter().any(|n| self.count(n) > 0)
    }
}
