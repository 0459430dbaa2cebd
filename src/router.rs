//! Top-level router - owns companies and is the only caller of the human
//! escalation handler.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::channel::{Event, EventSink};
use crate::company::{Company, CompanyHandle};
use crate::division::GoalHandler;
use crate::error::{ConclaveError, Result};
use crate::escalation::{EscalationContext, EscalationHandler, EscalationRecord, LogEscalationHandler};
use crate::hierarchy::{OrgTree, UnitKind, UnitStatus};
use crate::types::{Goal, UnitId};
use crate::worker::{Worker, WorkerRequest};

/// Goal context key naming the target company
pub const CONTEXT_COMPANY: &str = "company";

/// Domain used when a request names none and no company exists yet
pub const DEFAULT_DOMAIN: &str = "general";

static STATUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:status|report|show\s+(?:me\s+)?(?:the\s+)?(?:status|org(?:anization)?(?:\s+(?:chart|tree))?))\s*[.!?]?\s*$|\bwhat(?:'s|\s+is)\s+the\s+status\b",
    )
    .expect("status pattern")
});

static QUESTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:what|why|how|who|when|where|which|explain)\b|\?\s*$")
        .expect("question pattern")
});

static NAMED_COMPANY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\b(?:company|business|organi[sz]ation)\s+(?:for|called|named)\s+["']?([a-z0-9][a-z0-9_-]*)"#,
    )
    .expect("named company pattern")
});

static FOR_COMPANY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bfor\s+(?:the\s+)?([a-z0-9][a-z0-9_-]*)\s+(?:company|business|organi[sz]ation)\b")
        .expect("for company pattern")
});

/// Domain a request names explicitly, lowercased
pub fn extract_domain(text: &str) -> Option<String> {
    NAMED_COMPANY
        .captures(text)
        .or_else(|| FOR_COMPANY.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_lowercase())
}

fn mentions(text: &str, domain: &str) -> bool {
    Regex::new(&format!(r"(?i)\b{}\b", regex::escape(domain)))
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

/// What the router does with a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestIntent {
    /// Hand to the company serving this domain
    Route(String),
    /// Create a company for this domain, then route
    CreateCompany(String),
    /// Reply directly through the responder
    Answer,
    /// Render the organization tree
    Status,
}

/// Result of one request. Unresolved requests still get a best-effort reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterResponse {
    pub success: bool,
    pub output: String,
    pub escalation_reason: Option<String>,
}

impl RouterResponse {
    fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            escalation_reason: None,
        }
    }
}

/// Builds companies for domains the router has not seen
#[async_trait]
pub trait CompanyFactory: Send + Sync {
    async fn create(&self, domain: &str, events: EventSink) -> Result<Company>;
}

/// The router
pub struct Router {
    pub id: UnitId,
    /// Companies in creation order, keyed by lowercased domain
    companies: RwLock<Vec<(String, CompanyHandle)>>,
    factory: Option<Arc<dyn CompanyFactory>>,
    responder: Option<Arc<dyn Worker>>,
    escalation: Arc<dyn EscalationHandler>,
    events: EventSink,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Create a router with no companies and a logging escalation handler
    pub fn new() -> Self {
        Self {
            id: UnitId::new(),
            companies: RwLock::new(Vec::new()),
            factory: None,
            responder: None,
            escalation: Arc::new(LogEscalationHandler),
            events: EventSink::disabled(),
        }
    }

    pub fn with_factory(mut self, factory: Arc<dyn CompanyFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn with_responder(mut self, responder: Arc<dyn Worker>) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn with_escalation(mut self, handler: Arc<dyn EscalationHandler>) -> Self {
        self.escalation = handler;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Register a company under its domain
    pub fn add_company(&self, company: Company) -> Result<CompanyHandle> {
        let key = company.domain.to_lowercase();
        let mut companies = self.companies.write();
        if let Some((_, existing)) = companies.iter().find(|(d, _)| *d == key) {
            return Err(ConclaveError::AlreadyOwned(existing.id()));
        }
        let handle = CompanyHandle::new(company);
        companies.push((key.clone(), handle.clone()));

        info!(router_id = %self.id, company_id = %handle.id(), domain = %key, "Company registered");
        Ok(handle)
    }

    pub fn company(&self, domain: &str) -> Option<CompanyHandle> {
        let key = domain.to_lowercase();
        self.companies
            .read()
            .iter()
            .find(|(d, _)| *d == key)
            .map(|(_, c)| c.clone())
    }

    pub fn domains(&self) -> Vec<String> {
        self.companies.read().iter().map(|(d, _)| d.clone()).collect()
    }

    fn first_company(&self) -> Option<String> {
        self.companies.read().first().map(|(d, _)| d.clone())
    }

    fn mentioned_company(&self, text: &str) -> Option<String> {
        self.companies
            .read()
            .iter()
            .map(|(d, _)| d)
            .find(|d| mentions(text, d))
            .cloned()
    }

    /// Decide what to do with a goal
    pub fn classify(&self, goal: &Goal) -> RequestIntent {
        if STATUS.is_match(&goal.text) {
            return RequestIntent::Status;
        }

        let named = goal
            .context_value(CONTEXT_COMPANY)
            .map(str::to_lowercase)
            .or_else(|| extract_domain(&goal.text));
        if let Some(domain) = named {
            return if self.company(&domain).is_some() {
                RequestIntent::Route(domain)
            } else {
                RequestIntent::CreateCompany(domain)
            };
        }

        if self.responder.is_some() && QUESTION.is_match(&goal.text) {
            return RequestIntent::Answer;
        }

        match self.mentioned_company(&goal.text).or_else(|| self.first_company()) {
            Some(domain) => RequestIntent::Route(domain),
            None => RequestIntent::CreateCompany(DEFAULT_DOMAIN.to_string()),
        }
    }

    /// Handle a free-text request
    pub async fn handle(&self, text: &str) -> RouterResponse {
        self.submit(Goal::new(text)).await
    }

    /// Handle a goal, escalating to the human handler when nothing resolves it
    #[instrument(skip(self, goal), fields(router_id = %self.id, goal_id = %goal.id))]
    pub async fn submit(&self, goal: Goal) -> RouterResponse {
        self.events.emit(Event::GoalReceived {
            goal_id: goal.id,
            text: goal.text.clone(),
        });

        let intent = self.classify(&goal);
        debug!(?intent, "Request classified");

        let outcome = match intent {
            RequestIntent::Status => Ok(RouterResponse::ok(self.status().render())),
            RequestIntent::Answer => self.answer(&goal).await,
            RequestIntent::Route(domain) => self.route(&goal, &domain).await,
            RequestIntent::CreateCompany(domain) => match self.create_company(&domain).await {
                Ok(_) => self.route(&goal, &domain).await,
                Err(e) => Err(self.refuse(&goal, format!("could not create company '{domain}': {e}"))),
            },
        };

        match outcome {
            Ok(response) => response,
            Err(record) => self.escalate(&goal, record),
        }
    }

    async fn create_company(&self, domain: &str) -> Result<CompanyHandle> {
        let factory = self
            .factory
            .as_ref()
            .ok_or_else(|| ConclaveError::CompanyNotFound(domain.to_string()))?;
        let company = factory.create(domain, self.events.clone()).await?;
        let handle = self.add_company(company)?;

        self.events.emit(Event::CompanyCreated {
            unit_id: handle.id(),
            domain: domain.to_string(),
        });
        Ok(handle)
    }

    async fn route(&self, goal: &Goal, domain: &str) -> Result<RouterResponse, EscalationRecord> {
        let Some(company) = self.company(domain) else {
            return Err(self.refuse(goal, ConclaveError::CompanyNotFound(domain.to_string()).to_string()));
        };

        info!(company_id = %company.id(), domain = %domain, "Routing goal");
        let report = company
            .handle(goal)
            .await
            .map_err(|record| record.wrap(format!("router could not resolve goal for '{domain}'")))?;
        Ok(RouterResponse::ok(report.output))
    }

    async fn answer(&self, goal: &Goal) -> Result<RouterResponse, EscalationRecord> {
        let Some(responder) = &self.responder else {
            return Err(self.refuse(goal, "no responder configured".to_string()));
        };
        match responder.invoke(WorkerRequest::new(goal.text.as_str())).await {
            Ok(response) if !response.output.trim().is_empty() => Ok(RouterResponse::ok(response.output)),
            Ok(_) => Err(self.refuse(goal, "responder returned an empty answer".to_string())),
            Err(e) => Err(self.refuse(goal, format!("responder failed: {e}"))),
        }
    }

    fn refuse(&self, goal: &Goal, reason: String) -> EscalationRecord {
        warn!(router_id = %self.id, reason = %reason, "Router cannot resolve goal");
        EscalationRecord::new(goal.id, reason).from_unit(self.id)
    }

    /// Hand an unresolved request to the human handler, once
    fn escalate(&self, goal: &Goal, record: EscalationRecord) -> RouterResponse {
        let reason = record.root_cause().reason.clone();
        error!(goal_id = %goal.id, depth = record.depth(), reason = %reason, "Escalating to human");

        self.events.emit(Event::HumanEscalation {
            reason: reason.clone(),
        });
        let context = EscalationContext {
            original_request: goal.text.clone(),
            record,
        };
        self.escalation.escalate(&reason, &context);

        RouterResponse {
            success: false,
            output: format!("Request could not be completed and was escalated: {reason}"),
            escalation_reason: Some(reason),
        }
    }

    /// Ownership tree: the router with every company beneath it
    pub fn status(&self) -> OrgTree {
        let children = self
            .companies
            .read()
            .iter()
            .filter_map(|(_, c)| c.org_tree())
            .collect();
        OrgTree {
            unit_id: self.id,
            kind: UnitKind::Router,
            name: "router".to_string(),
            status: UnitStatus::Active,
            children,
        }
    }
}
