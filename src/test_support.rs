//! Scripted doubles for the worker and model seams

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::agent::{LanguageModel, ModelReply, ModelRequest};
use crate::capability::{names, CapabilityOutcome, InvocationRecord};
use crate::error::{ConclaveError, Result};
use crate::types::{AgentId, WorkerRole};
use crate::worker::{Worker, WorkerRequest, WorkerResponse};

/// Model that replays a fixed list of replies
pub struct ScriptedModel {
    replies: Mutex<VecDeque<ModelReply>>,
    forced: Mutex<Vec<Option<String>>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<ModelReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            forced: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.forced.lock().len()
    }

    /// Forced capability seen on each exchange
    pub fn forced_history(&self) -> Vec<Option<String>> {
        self.forced.lock().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn exchange(&self, request: ModelRequest<'_>) -> anyhow::Result<ModelReply> {
        self.forced.lock().push(request.forced.map(str::to_string));
        self.replies
            .lock()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("script exhausted"))
    }
}

/// Worker that replays scripted responses, repeating the fallback once empty
pub struct ScriptedWorker {
    id: AgentId,
    role: WorkerRole,
    script: Mutex<VecDeque<std::result::Result<WorkerResponse, String>>>,
    fallback: Option<WorkerResponse>,
    requests: Mutex<Vec<WorkerRequest>>,
}

impl ScriptedWorker {
    pub fn new(role: WorkerRole, script: Vec<WorkerResponse>) -> Self {
        Self {
            id: AgentId::new(),
            role,
            script: Mutex::new(script.into_iter().map(Ok).collect()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fallback(mut self, response: WorkerResponse) -> Self {
        self.fallback = Some(response);
        self
    }

    /// Queue an invocation error
    pub fn then_error(self, message: &str) -> Self {
        self.script.lock().push_back(Err(message.to_string()));
        self
    }

    pub fn requests(&self) -> Vec<WorkerRequest> {
        self.requests.lock().clone()
    }

    pub fn invocations(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    fn id(&self) -> AgentId {
        self.id
    }

    fn role(&self) -> WorkerRole {
        self.role
    }

    async fn invoke(&self, request: WorkerRequest) -> Result<WorkerResponse> {
        self.requests.lock().push(request);
        let next = self.script.lock().pop_front();
        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(ConclaveError::Worker(message)),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| ConclaveError::Worker("script exhausted".into())),
        }
    }
}

/// Response whose record shows successful calls of `capability`
pub fn acted(output: &str, capability: &str) -> WorkerResponse {
    let mut record = InvocationRecord::new();
    record.record(capability, &CapabilityOutcome::ok("ok"));
    WorkerResponse {
        output: output.to_string(),
        record,
    }
}

/// Response with a successful file write
pub fn wrote(output: &str) -> WorkerResponse {
    acted(output, names::WRITE_FILE)
}

/// Prose only, no capability calls
pub fn narrated(output: &str) -> WorkerResponse {
    WorkerResponse::text(output)
}
