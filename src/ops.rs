//! Operations desk - health monitoring, incidents and runbooks.
//!
//! Health checks and runbook steps are ordinary tasks driven through the
//! retry engine with the operator worker, so an exhausted runbook step
//! escalates with its attempt history like any other task.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::category::TaskCategory;
use crate::channel::{Event, EventSink};
use crate::config::{EngineConfig, OpsConfig};
use crate::division::{classify_goal, GoalHandler, GoalKind, UnitReport};
use crate::escalation::EscalationRecord;
use crate::hierarchy::UnitKind;
use crate::retry::{TaskOutcome, TaskRunner};
use crate::task::{keys, Task, TaskKind, TaskPriority};
use crate::types::{Goal, IncidentId, UnitId};
use crate::worker::Worker;

static UNHEALTHY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(unhealthy|down|degraded|unreachable|not responding|timed? ?out|failing|crash\w*|5\d\d)\b",
    )
    .expect("unhealthy pattern")
});

static SERVICE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bservice\s+[`'"]?([A-Za-z0-9][\w.-]*)|\b([A-Za-z0-9][\w.-]*)\s+service\b"#)
        .expect("service pattern")
});

/// Whether a health report describes an unhealthy service
pub fn reports_unhealthy(output: &str) -> bool {
    UNHEALTHY.is_match(output)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Open,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub service: String,
    pub status: IncidentStatus,
    /// Consecutive unhealthy observations that opened it
    pub failures: u32,
    pub detail: String,
    pub opened_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Tracks unhealthy streaks per service and opens incidents at the threshold
#[derive(Debug)]
pub struct ServiceMonitor {
    threshold: u32,
    streaks: RwLock<HashMap<String, u32>>,
    incidents: RwLock<Vec<Incident>>,
    events: EventSink,
}

impl ServiceMonitor {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            streaks: RwLock::new(HashMap::new()),
            incidents: RwLock::new(Vec::new()),
            events: EventSink::disabled(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Record one observation. Returns the incident if this one opened it.
    pub fn observe(&self, service: &str, healthy: bool, detail: &str) -> Option<Incident> {
        if healthy {
            self.streaks.write().remove(service);
            return None;
        }

        let streak = {
            let mut streaks = self.streaks.write();
            let streak = streaks.entry(service.to_string()).or_insert(0);
            *streak += 1;
            *streak
        };
        if streak < self.threshold || self.open_incident(service).is_some() {
            return None;
        }

        let incident = Incident {
            id: IncidentId::new(),
            service: service.to_string(),
            status: IncidentStatus::Open,
            failures: streak,
            detail: detail.to_string(),
            opened_at: Utc::now(),
            resolved_at: None,
        };
        warn!(service = %service, failures = streak, incident_id = %incident.id, "Incident opened");
        self.events.emit(Event::IncidentOpened {
            service: service.to_string(),
            failures: streak,
        });
        self.incidents.write().push(incident.clone());
        Some(incident)
    }

    pub fn streak(&self, service: &str) -> u32 {
        self.streaks.read().get(service).copied().unwrap_or(0)
    }

    pub fn open_incident(&self, service: &str) -> Option<Incident> {
        self.incidents
            .read()
            .iter()
            .find(|i| i.service == service && i.status == IncidentStatus::Open)
            .cloned()
    }

    /// Close the open incident for `service`, if there is one
    pub fn resolve(&self, service: &str) -> Option<Incident> {
        let resolved = {
            let mut incidents = self.incidents.write();
            let incident = incidents
                .iter_mut()
                .find(|i| i.service == service && i.status == IncidentStatus::Open)?;
            incident.status = IncidentStatus::Resolved;
            incident.resolved_at = Some(Utc::now());
            incident.clone()
        };
        self.streaks.write().remove(service);
        info!(service = %service, incident_id = %resolved.id, "Incident resolved");
        self.events.emit(Event::IncidentResolved {
            service: service.to_string(),
        });
        Some(resolved)
    }

    pub fn incidents(&self) -> Vec<Incident> {
        self.incidents.read().clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunbookStep {
    pub title: String,
    pub description: String,
}

/// Named recovery procedure for one service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Runbook {
    pub name: String,
    pub service: String,
    pub steps: Vec<RunbookStep>,
}

impl Runbook {
    pub fn new(name: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            service: service.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, title: impl Into<String>, description: impl Into<String>) -> Self {
        self.steps.push(RunbookStep {
            title: title.into(),
            description: description.into(),
        });
        self
    }
}

/// Unit behind monitor and remediate goals
pub struct OpsDesk {
    id: UnitId,
    name: String,
    operator: Arc<dyn Worker>,
    monitor: ServiceMonitor,
    runbooks: RwLock<HashMap<String, Runbook>>,
    runner: TaskRunner,
    config: OpsConfig,
    busy: Mutex<()>,
    events: EventSink,
}

impl OpsDesk {
    pub fn new(name: impl Into<String>, operator: Arc<dyn Worker>, config: &EngineConfig) -> Self {
        let id = UnitId::new();
        let name = name.into();
        info!(unit_id = %id, name = %name, "Creating operations desk");
        Self {
            id,
            name,
            operator,
            monitor: ServiceMonitor::new(config.ops.failure_threshold),
            runbooks: RwLock::new(HashMap::new()),
            runner: TaskRunner::new(config.retry),
            config: config.ops.clone(),
            busy: Mutex::new(()),
            events: EventSink::disabled(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.monitor = ServiceMonitor::new(self.config.failure_threshold).with_events(events.clone());
        self.runner = self.runner.with_events(events.clone());
        self.events = events;
        self
    }

    pub fn with_runbook(self, runbook: Runbook) -> Self {
        self.add_runbook(runbook);
        self
    }

    /// Register or replace the runbook for its service
    pub fn add_runbook(&self, runbook: Runbook) {
        info!(service = %runbook.service, runbook = %runbook.name, steps = runbook.steps.len(), "Runbook registered");
        self.runbooks.write().insert(runbook.service.clone(), runbook);
    }

    pub fn runbook(&self, service: &str) -> Option<Runbook> {
        self.runbooks.read().get(service).cloned()
    }

    pub fn monitor(&self) -> &ServiceMonitor {
        &self.monitor
    }

    /// Service named by the goal: context, then a known runbook service
    /// mentioned in the text, then "<name> service" phrasing
    fn service_for(&self, goal: &Goal) -> Option<String> {
        if let Some(service) = goal.context_value(keys::SERVICE) {
            return Some(service.to_string());
        }
        let text = goal.text.to_ascii_lowercase();
        let known = self
            .runbooks
            .read()
            .keys()
            .find(|s| text.contains(&s.to_ascii_lowercase()))
            .cloned();
        known.or_else(|| {
            SERVICE_NAME
                .captures(&goal.text)
                .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
                .map(|m| m.as_str().to_string())
                .filter(|s| !matches!(s.to_ascii_lowercase().as_str(), "the" | "a" | "this" | "that"))
        })
    }

    fn task(&self, title: String, description: String, category: TaskCategory, service: &str) -> Task {
        Task::new(TaskKind::Implement, title, description, self.operator.id())
            .with_context(keys::CATEGORY, category.as_str())
            .with_context(keys::SERVICE, service)
            .with_priority(TaskPriority::High)
            .with_max_attempts(self.config.runbook_attempts)
    }

    fn escalation(&self, goal: &Goal, reason: String) -> EscalationRecord {
        warn!(unit_id = %self.id, reason = %reason, "Operations escalating goal");
        self.events.emit(Event::Escalated {
            goal_id: goal.id,
            reason: reason.clone(),
        });
        EscalationRecord::new(goal.id, reason).from_unit(self.id)
    }

    /// Run a health check and feed the monitor. Opening an incident runs the
    /// service's runbook.
    #[instrument(skip(self, goal), fields(unit_id = %self.id, service = %service))]
    pub async fn check_health(&self, goal: &Goal, service: &str) -> Result<UnitReport, EscalationRecord> {
        let mut task = self.task(
            format!("Check health of {service}"),
            format!("Check the health of service '{service}' and read its recent logs. Report whether it is healthy.\n{}", goal.text),
            TaskCategory::Monitoring,
            service,
        );
        let outcome = self
            .runner
            .run(&mut task, self.operator.as_ref())
            .await
            .map_err(|e| self.escalation(goal, e.to_string()))?;

        let output = match outcome {
            TaskOutcome::Completed { result, .. } => result.output.unwrap_or_default(),
            TaskOutcome::Failed { reason, history } => {
                self.monitor.observe(service, false, &reason);
                return Err(self
                    .escalation(goal, format!("health check for '{service}' failed: {reason}"))
                    .for_task(task.id(), history));
            }
        };

        let healthy = !reports_unhealthy(&output);
        let opened = self.monitor.observe(service, healthy, &output);
        if healthy {
            return Ok(UnitReport::new(self.id, goal.id, format!("{service} is healthy\n{output}")));
        }

        match opened {
            Some(incident) if self.runbook(service).is_some() => {
                info!(incident_id = %incident.id, "Running runbook for new incident");
                self.remediate(goal, service).await
            }
            Some(incident) => Err(self.escalation(
                goal,
                format!(
                    "incident opened for '{service}' after {} failed checks and no runbook is registered",
                    incident.failures
                ),
            )),
            None => Ok(UnitReport::new(
                self.id,
                goal.id,
                format!(
                    "{service} is unhealthy ({}/{} consecutive failures)\n{output}",
                    self.monitor.streak(service),
                    self.monitor.threshold()
                ),
            )),
        }
    }

    /// Run the service's runbook step by step
    #[instrument(skip(self, goal), fields(unit_id = %self.id, service = %service))]
    pub async fn remediate(&self, goal: &Goal, service: &str) -> Result<UnitReport, EscalationRecord> {
        let Some(runbook) = self.runbook(service) else {
            return Err(self.escalation(goal, format!("no runbook registered for service '{service}'")));
        };

        let mut lines = Vec::with_capacity(runbook.steps.len());
        for (index, step) in runbook.steps.iter().enumerate() {
            let mut task = self.task(
                step.title.clone(),
                format!("{}\nService: {service}\nRequest: {}", step.description, goal.text),
                TaskCategory::Remediation,
                service,
            );
            let outcome = self
                .runner
                .run(&mut task, self.operator.as_ref())
                .await
                .map_err(|e| self.escalation(goal, e.to_string()))?;

            match outcome {
                TaskOutcome::Completed { .. } => {
                    lines.push(format!("[x] {}", step.title));
                }
                TaskOutcome::Failed { reason, history } => {
                    let reason = format!(
                        "runbook '{}' step {} '{}' failed: {reason}",
                        runbook.name,
                        index + 1,
                        step.title
                    );
                    return Err(self.escalation(goal, reason).for_task(task.id(), history));
                }
            }
        }

        self.monitor.resolve(service);
        Ok(UnitReport::new(
            self.id,
            goal.id,
            format!("runbook '{}' completed for {service}\n{}", runbook.name, lines.join("\n")),
        ))
    }
}

#[async_trait]
impl GoalHandler for OpsDesk {
    fn unit_id(&self) -> UnitId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> UnitKind {
        UnitKind::Operations
    }

    async fn handle(&self, goal: &Goal) -> Result<UnitReport, EscalationRecord> {
        let _guard = self.busy.lock().await;
        let Some(service) = self.service_for(goal) else {
            return Err(self.escalation(goal, "no service named in goal".to_string()));
        };
        match classify_goal(goal) {
            GoalKind::Remediate => self.remediate(goal, &service).await,
            _ => self.check_health(goal, &service).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::names;
    use crate::test_support::{acted, ScriptedWorker};
    use crate::types::{WorkerRole, CONTEXT_KIND};

    fn desk(operator: ScriptedWorker) -> (OpsDesk, Arc<ScriptedWorker>) {
        let operator = Arc::new(operator);
        let desk = OpsDesk::new("ops", operator.clone(), &EngineConfig::default())
            .with_runbook(
                Runbook::new("api-recovery", "api")
                    .step("Restart api", "Restart the api service")
                    .step("Confirm recovery", "Check health after restart"),
            );
        (desk, operator)
    }

    fn operator() -> ScriptedWorker {
        ScriptedWorker::new(WorkerRole::Operator, vec![])
    }

    // === Monitor Tests ===

    #[test]
    fn test_incident_opens_at_threshold() {
        let monitor = ServiceMonitor::new(3);
        assert!(monitor.observe("api", false, "502").is_none());
        assert!(monitor.observe("api", false, "502").is_none());
        let incident = monitor.observe("api", false, "502").unwrap();
        assert_eq!(incident.failures, 3);
        assert!(monitor.observe("api", false, "502").is_none());
        assert_eq!(monitor.incidents().len(), 1);
    }

    #[test]
    fn test_healthy_resets_streak() {
        let monitor = ServiceMonitor::new(2);
        monitor.observe("db", false, "timeout");
        monitor.observe("db", true, "ok");
        assert_eq!(monitor.streak("db"), 0);
        assert!(monitor.observe("db", false, "timeout").is_none());
    }

    #[test]
    fn test_resolve() {
        let monitor = ServiceMonitor::new(1);
        monitor.observe("db", false, "down");
        let resolved = monitor.resolve("db").unwrap();
        assert_eq!(resolved.status, IncidentStatus::Resolved);
        assert!(monitor.open_incident("db").is_none());
        assert!(monitor.resolve("db").is_none());
    }

    #[test]
    fn test_unhealthy_detection() {
        assert!(reports_unhealthy("checkout returned 503 Service Unavailable"));
        assert!(reports_unhealthy("service is DOWN"));
        assert!(!reports_unhealthy("all endpoints healthy, p99 40ms"));
    }

    // === Desk Tests ===

    #[tokio::test]
    async fn test_healthy_check() {
        let (desk, operator) = desk(operator().with_fallback(acted("api is healthy", names::CHECK_HEALTH)));
        let goal = Goal::new("Check the health of the api service");

        let report = desk.handle(&goal).await.unwrap();

        assert!(report.output.starts_with("api is healthy"));
        assert_eq!(operator.requests()[0].forced_capability.as_deref(), Some(names::CHECK_HEALTH));
    }

    #[tokio::test]
    async fn test_unhealthy_below_threshold() {
        let (desk, _) = desk(operator().with_fallback(acted("api is down, /health returns 503", names::CHECK_HEALTH)));
        let goal = Goal::new("Monitor the api").with_context(keys::SERVICE, "api");

        let report = desk.handle(&goal).await.unwrap();

        assert!(report.output.contains("unhealthy (1/3 consecutive failures)"));
        assert!(desk.monitor().open_incident("api").is_none());
    }

    #[tokio::test]
    async fn test_incident_triggers_runbook() {
        let operator = Arc::new(ScriptedWorker::new(
            WorkerRole::Operator,
            vec![
                acted("api is down, 503 from /health", names::CHECK_HEALTH),
                acted("restarted the api, it responds 200", names::RESTART_SERVICE),
            ],
        ));
        let desk = OpsDesk::new("ops", operator.clone(), &EngineConfig::default())
            .with_runbook(Runbook::new("api-recovery", "api").step("Restart api", "Restart the api service"));
        desk.monitor().observe("api", false, "503");
        desk.monitor().observe("api", false, "503");

        let report = desk.check_health(&Goal::new("watch api"), "api").await.unwrap();

        assert!(report.output.contains("runbook 'api-recovery' completed"));
        assert_eq!(operator.invocations(), 2);
        let incidents = desk.monitor().incidents();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].status, IncidentStatus::Resolved);
    }

    #[tokio::test]
    async fn test_incident_without_runbook_escalates() {
        let operator = Arc::new(ScriptedWorker::new(
            WorkerRole::Operator,
            vec![acted("db unreachable", names::CHECK_HEALTH)],
        ));
        let desk = OpsDesk::new("ops", operator, &EngineConfig::default());
        desk.monitor().observe("db", false, "timeout");
        desk.monitor().observe("db", false, "timeout");

        let escalation = desk.check_health(&Goal::new("watch db"), "db").await.unwrap_err();

        assert!(escalation.reason.contains("no runbook is registered"));
        assert!(desk.monitor().open_incident("db").is_some());
    }

    #[tokio::test]
    async fn test_remediation_runs_all_steps() {
        let (desk, operator) =
            desk(operator().with_fallback(acted("restarted api; health check passes", names::RESTART_SERVICE)));
        desk.monitor().observe("api", false, "down");
        desk.monitor().observe("api", false, "down");
        desk.monitor().observe("api", false, "down");
        assert!(desk.monitor().open_incident("api").is_some());

        let goal = Goal::new("The api is down, restart it");
        let report = desk.handle(&goal).await.unwrap();

        assert!(report.output.contains("[x] Restart api"));
        assert!(report.output.contains("[x] Confirm recovery"));
        assert_eq!(operator.invocations(), 2);
        assert!(desk.monitor().open_incident("api").is_none());
    }

    #[tokio::test]
    async fn test_exhausted_runbook_step_escalates() {
        let (desk, operator) = desk(operator().with_fallback(crate::test_support::narrated(
            "I would restart the api now.",
        )));
        let goal = Goal::new("Restart the api").with_context(CONTEXT_KIND, "remediate");

        let escalation = desk.handle(&goal).await.unwrap_err();

        assert!(escalation.reason.contains("runbook 'api-recovery' step 1 'Restart api' failed"));
        assert_eq!(escalation.history.len(), 3);
        assert_eq!(operator.invocations(), 3);
    }

    #[tokio::test]
    async fn test_unknown_service_escalates() {
        let (desk, operator) = desk(operator());
        let escalation = desk.handle(&Goal::new("Restart everything")).await.unwrap_err();
        assert_eq!(escalation.reason, "no service named in goal");
        assert_eq!(operator.invocations(), 0);
    }
}
