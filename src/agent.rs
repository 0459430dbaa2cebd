//! Agent implementation - a role-bound worker driving a language model
//! through bounded exchange rounds with a permission-filtered capability set.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::capability::{CapabilityOutcome, CapabilityRegistry, CapabilitySet, CapabilitySpec, InvocationRecord};
use crate::channel::{Event, EventSink};
use crate::error::{ConclaveError, Result};
use crate::types::{AgentId, WorkerRole};
use crate::worker::{Worker, WorkerRequest, WorkerResponse};

/// A capability call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityCall {
    pub id: String,
    pub name: String,
    pub params: Value,
}

/// Result of one call, fed back to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResult {
    pub call_id: String,
    pub name: String,
    pub success: bool,
    pub content: String,
}

/// Conversation entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Turn {
    User(String),
    Assistant { text: String, calls: Vec<CapabilityCall> },
    Results(Vec<CallResult>),
}

/// Input to a single model exchange
#[derive(Debug)]
pub struct ModelRequest<'a> {
    pub system: &'a str,
    pub transcript: &'a [Turn],
    pub capabilities: &'a [CapabilitySpec],
    /// When set, the model must call this capability in its reply
    pub forced: Option<&'a str>,
}

/// Model reply for one round
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelReply {
    pub text: String,
    pub calls: Vec<CapabilityCall>,
}

impl ModelReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            calls: Vec::new(),
        }
    }

    pub fn with_call(mut self, name: impl Into<String>, params: Value) -> Self {
        let id = format!("call_{}", self.calls.len() + 1);
        self.calls.push(CapabilityCall {
            id,
            name: name.into(),
            params,
        });
        self
    }
}

/// Language-model transport: one request/response exchange
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn exchange(&self, request: ModelRequest<'_>) -> anyhow::Result<ModelReply>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentStatus {
    Idle,
    Working,
}

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub role: WorkerRole,
    pub name: String,
    pub system_prompt: String,
}

impl AgentConfig {
    pub fn new(role: WorkerRole, name: impl Into<String>) -> Self {
        Self {
            role,
            name: name.into(),
            system_prompt: format!("You are the {role} of a software delivery team. Act through the capabilities you are given."),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

/// Cumulative usage across invocations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentUsage {
    pub invocations: u64,
    pub rounds: u64,
    pub capability_calls: u64,
    pub failed_calls: u64,
}

/// A single role-bound agent
pub struct Agent {
    /// Unique identifier
    pub id: AgentId,
    pub config: AgentConfig,
    status: RwLock<AgentStatus>,
    /// Capabilities permitted for this agent's role
    capabilities: CapabilitySet,
    model: Arc<dyn LanguageModel>,
    usage: RwLock<AgentUsage>,
    events: EventSink,
}

impl Agent {
    /// Create an agent holding only the capabilities its role permits
    pub fn new(
        config: AgentConfig,
        registry: &CapabilityRegistry,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        let id = AgentId::new();
        let capabilities = registry.for_role(config.role);

        info!(
            agent_id = %id,
            role = %config.role,
            name = %config.name,
            capabilities = capabilities.len(),
            "Creating new agent"
        );

        Self {
            id,
            config,
            status: RwLock::new(AgentStatus::Idle),
            capabilities,
            model,
            usage: RwLock::new(AgentUsage::default()),
            events: EventSink::disabled(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn status(&self) -> AgentStatus {
        *self.status.read()
    }

    fn set_status(&self, status: AgentStatus) {
        *self.status.write() = status;
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    pub fn usage(&self) -> AgentUsage {
        self.usage.read().clone()
    }

    async fn execute_call(&self, call: &CapabilityCall) -> CapabilityOutcome {
        match self.capabilities.invoke(&call.name, call.params.clone()).await {
            Ok(outcome) => outcome,
            Err(ConclaveError::PermissionDenied { capability, role }) => {
                warn!(agent_id = %self.id, capability = %capability, role = %role, "Capability not permitted");
                CapabilityOutcome::err(format!("capability '{capability}' is not permitted for role {role}"))
            }
            Err(e) => CapabilityOutcome::err(e.to_string()),
        }
    }

    async fn run(&self, request: WorkerRequest) -> Result<WorkerResponse> {
        let specs = self.capabilities.specs();
        let forced = match request.forced_capability.as_deref() {
            Some(name) if self.capabilities.contains(name) => Some(name),
            Some(name) => {
                warn!(agent_id = %self.id, capability = %name, "Forced capability outside role, not forcing");
                None
            }
            None => None,
        };

        let mut transcript = vec![Turn::User(request.prompt.clone())];
        let mut record = InvocationRecord::new();
        let mut texts = Vec::new();
        let mut rounds = 0u64;

        for round in 0..request.max_rounds.max(1) {
            rounds += 1;
            let reply = self
                .model
                .exchange(ModelRequest {
                    system: &self.config.system_prompt,
                    transcript: &transcript,
                    capabilities: &specs,
                    forced: if round == 0 { forced } else { None },
                })
                .await
                .map_err(|e| ConclaveError::Worker(format!("{}: {e}", self.config.name)))?;

            let text = reply.text.trim().to_string();
            if !text.is_empty() {
                texts.push(text.clone());
            }
            if reply.calls.is_empty() {
                break;
            }

            let mut results = Vec::with_capacity(reply.calls.len());
            for call in &reply.calls {
                let outcome = self.execute_call(call).await;
                debug!(
                    agent_id = %self.id,
                    capability = %call.name,
                    success = outcome.success,
                    "Capability invoked"
                );
                self.events.emit(Event::CapabilityInvoked {
                    agent_id: self.id,
                    capability: call.name.clone(),
                    success: outcome.success,
                });
                record.record(&call.name, &outcome);
                results.push(CallResult {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    success: outcome.success,
                    content: outcome.summary(),
                });
            }

            transcript.push(Turn::Assistant {
                text,
                calls: reply.calls,
            });
            transcript.push(Turn::Results(results));
        }

        {
            let mut usage = self.usage.write();
            usage.invocations += 1;
            usage.rounds += rounds;
            usage.capability_calls += u64::from(record.total());
            usage.failed_calls += u64::from(record.failures());
        }

        Ok(WorkerResponse {
            output: texts.join("\n"),
            record,
        })
    }
}

#[async_trait]
impl Worker for Agent {
    fn id(&self) -> AgentId {
        self.id
    }

    fn role(&self) -> WorkerRole {
        self.config.role
    }

    #[instrument(skip(self, request), fields(agent = %self.config.name))]
    async fn invoke(&self, request: WorkerRequest) -> Result<WorkerResponse> {
        self.set_status(AgentStatus::Working);
        let result = self.run(request).await;
        self.set_status(AgentStatus::Idle);
        result
    }

    fn description(&self) -> &str {
        &self.config.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{names, FnCapability};
    use crate::test_support::ScriptedModel;

    fn registry() -> CapabilityRegistry {
        let write = CapabilitySpec::new(names::WRITE_FILE, "write a file").allow(WorkerRole::Implementer);
        let deploy = CapabilitySpec::new(names::CREATE_DEPLOYMENT, "deploy").allow(WorkerRole::Operator);
        CapabilityRegistry::new()
            .with(FnCapability::new(write, |params| {
                let path = params["path"].as_str().unwrap_or("?");
                Ok(CapabilityOutcome::ok(format!("wrote {path}")))
            }))
            .unwrap()
            .with(FnCapability::new(deploy, |_| Ok(CapabilityOutcome::ok("deployed"))))
            .unwrap()
    }

    fn agent(model: Arc<ScriptedModel>) -> Agent {
        Agent::new(AgentConfig::new(WorkerRole::Implementer, "builder"), &registry(), model)
    }

    #[test]
    fn test_agent_creation() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let agent = agent(model);
        assert_eq!(agent.status(), AgentStatus::Idle);
        assert_eq!(agent.capabilities().len(), 1);
        assert_eq!(agent.role(), WorkerRole::Implementer);
    }

    #[tokio::test]
    async fn test_invoke_runs_calls_until_model_stops() {
        let model = Arc::new(ScriptedModel::new(vec![
            ModelReply::text("Writing the module").with_call(
                names::WRITE_FILE,
                serde_json::json!({ "path": "src/greeting.rs" }),
            ),
            ModelReply::text("Wrote to src/greeting.rs"),
        ]));
        let agent = agent(model.clone());

        let response = agent
            .invoke(WorkerRequest::new("create greeting").with_rounds(5))
            .await
            .unwrap();

        assert_eq!(response.record.count(names::WRITE_FILE), 1);
        assert!(response.record.has_success());
        assert!(response.output.contains("Wrote to src/greeting.rs"));
        assert_eq!(model.calls(), 2);
        assert_eq!(agent.usage().rounds, 2);
    }

    #[tokio::test]
    async fn test_forcing_applies_to_first_round_only() {
        let model = Arc::new(ScriptedModel::new(vec![
            ModelReply::text("").with_call(names::WRITE_FILE, serde_json::json!({ "path": "a.txt" })),
            ModelReply::text("").with_call(names::WRITE_FILE, serde_json::json!({ "path": "b.txt" })),
            ModelReply::text("done"),
        ]));
        let agent = agent(model.clone());

        agent
            .invoke(WorkerRequest::new("go").forcing(names::WRITE_FILE).with_rounds(3))
            .await
            .unwrap();

        assert_eq!(
            model.forced_history(),
            vec![Some(names::WRITE_FILE.to_string()), None, None]
        );
    }

    #[tokio::test]
    async fn test_forced_capability_outside_role_is_dropped() {
        let model = Arc::new(ScriptedModel::new(vec![ModelReply::text("nothing to do")]));
        let agent = agent(model.clone());

        agent
            .invoke(WorkerRequest::new("go").forcing(names::CREATE_DEPLOYMENT))
            .await
            .unwrap();

        assert_eq!(model.forced_history(), vec![None]);
    }

    #[tokio::test]
    async fn test_unpermitted_call_is_recorded_as_failure() {
        let model = Arc::new(ScriptedModel::new(vec![
            ModelReply::text("").with_call(names::CREATE_DEPLOYMENT, serde_json::json!({})),
            ModelReply::text("gave up"),
        ]));
        let agent = agent(model);

        let response = agent.invoke(WorkerRequest::new("deploy").with_rounds(3)).await.unwrap();
        assert_eq!(response.record.failures(), 1);
        assert!(!response.record.has_success());
        assert!(response.record.calls()[0]
            .error
            .as_deref()
            .unwrap()
            .contains("not permitted"));
    }

    #[tokio::test]
    async fn test_round_ceiling_stops_loop() {
        let looping: Vec<ModelReply> = (0..10)
            .map(|i| {
                ModelReply::text("again")
                    .with_call(names::WRITE_FILE, serde_json::json!({ "path": format!("f{i}.rs") }))
            })
            .collect();
        let model = Arc::new(ScriptedModel::new(looping));
        let agent = agent(model.clone());

        let response = agent.invoke(WorkerRequest::new("loop").with_rounds(2)).await.unwrap();
        assert_eq!(model.calls(), 2);
        assert_eq!(response.record.total(), 2);
    }

    #[tokio::test]
    async fn test_model_error_surfaces_as_worker_error() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let agent = agent(model);
        let err = agent.invoke(WorkerRequest::new("go")).await.unwrap_err();
        assert!(matches!(err, ConclaveError::Worker(_)));
        assert_eq!(agent.status(), AgentStatus::Idle);
    }
}
