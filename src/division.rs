//! Division - classifies goals by kind and dispatches them to the unit it
//! owns for that kind.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::category::DeployTarget;
use crate::channel::{Event, EventSink};
use crate::escalation::EscalationRecord;
use crate::hierarchy::UnitKind;
use crate::task::keys;
use crate::team::{Team, TeamReport};
use crate::types::{Goal, GoalId, UnitId, CONTEXT_KIND};

static REMEDIATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(restart\w*|remediat\w*|recover\w*|roll ?back|incident|outage|is down|went down|crash\w*|runbook)\b")
        .expect("remediate pattern")
});

static MONITOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(monitor\w*|health\w*|uptime|alert\w*|is (?:it )?up|status of|logs?)\b").expect("monitor pattern")
});

static DEPLOY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(deploy\w*|ship|release|host\w*|publish|go live|container\w*|docker\w*|compose|cloud)\b")
        .expect("deploy pattern")
});

static CLOUD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(aws|gcp|google cloud|azure|fly\.io|fly|vercel|heroku|netlify|render|railway|digitalocean|cloud)\b")
        .expect("cloud pattern")
});

/// What a goal asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalKind {
    Build,
    Deploy,
    Monitor,
    Remediate,
}

impl GoalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoalKind::Build => "build",
            GoalKind::Deploy => "deploy",
            GoalKind::Monitor => "monitor",
            GoalKind::Remediate => "remediate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "build" => Some(GoalKind::Build),
            "deploy" => Some(GoalKind::Deploy),
            "monitor" => Some(GoalKind::Monitor),
            "remediate" => Some(GoalKind::Remediate),
            _ => None,
        }
    }
}

impl fmt::Display for GoalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind hint from context, then keywords; remediation outranks monitoring,
/// which outranks deployment. Everything else is a build.
pub fn classify_goal(goal: &Goal) -> GoalKind {
    if let Some(kind) = goal.context_value(CONTEXT_KIND).and_then(GoalKind::parse) {
        return kind;
    }
    if REMEDIATE.is_match(&goal.text) {
        GoalKind::Remediate
    } else if MONITOR.is_match(&goal.text) {
        GoalKind::Monitor
    } else if DEPLOY.is_match(&goal.text) {
        GoalKind::Deploy
    } else {
        GoalKind::Build
    }
}

/// Local container runtime unless a cloud is named
pub fn classify_deploy_target(goal: &Goal) -> DeployTarget {
    if let Some(target) = goal
        .context_value(keys::DEPLOY_TARGET)
        .and_then(DeployTarget::from_context_value)
    {
        return target;
    }
    match CLOUD.find(&goal.text) {
        Some(m) => DeployTarget::Cloud(m.as_str().to_ascii_lowercase()),
        None => DeployTarget::LocalContainer,
    }
}

/// What a unit hands back for a goal it resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitReport {
    pub unit_id: UnitId,
    pub goal_id: GoalId,
    pub output: String,
    pub iterations: u32,
    pub artifacts: Vec<String>,
}

impl UnitReport {
    pub fn new(unit_id: UnitId, goal_id: GoalId, output: impl Into<String>) -> Self {
        Self {
            unit_id,
            goal_id,
            output: output.into(),
            iterations: 0,
            artifacts: Vec::new(),
        }
    }

    fn from_team(unit_id: UnitId, report: TeamReport) -> Self {
        let mut output = report.summary;
        if let Some(path) = &report.project_path {
            output.push_str(&format!("\nProject location: {path}"));
        }
        Self {
            unit_id,
            goal_id: report.goal_id,
            output,
            iterations: report.iterations,
            artifacts: report.artifacts,
        }
    }
}

/// A unit that can take a goal
#[async_trait]
pub trait GoalHandler: Send + Sync {
    fn unit_id(&self) -> UnitId;

    fn name(&self) -> &str;

    fn kind(&self) -> UnitKind {
        UnitKind::Team
    }

    /// Units owned by this one
    fn units(&self) -> Vec<Arc<dyn GoalHandler>> {
        Vec::new()
    }

    async fn handle(&self, goal: &Goal) -> Result<UnitReport, EscalationRecord>;
}

/// A team behind a mutex so it runs one goal to completion at a time
pub struct TeamUnit {
    id: UnitId,
    name: String,
    team: Mutex<Team>,
}

impl TeamUnit {
    pub fn new(team: Team) -> Self {
        Self {
            id: team.id,
            name: team.name.clone(),
            team: Mutex::new(team),
        }
    }
}

#[async_trait]
impl GoalHandler for TeamUnit {
    fn unit_id(&self) -> UnitId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, goal: &Goal) -> Result<UnitReport, EscalationRecord> {
        let mut team = self.team.lock().await;
        let report = team.execute(goal).await?;
        Ok(UnitReport::from_team(self.id, report))
    }
}

/// Owns one unit per goal kind
pub struct Division {
    pub id: UnitId,
    pub name: String,
    build: Arc<dyn GoalHandler>,
    deploy: Option<Arc<dyn GoalHandler>>,
    operations: Option<Arc<dyn GoalHandler>>,
    events: EventSink,
}

impl Division {
    /// Division whose build unit also takes anything no other unit covers
    pub fn new(name: impl Into<String>, build: Arc<dyn GoalHandler>) -> Self {
        let id = UnitId::new();
        let name = name.into();
        info!(unit_id = %id, name = %name, "Creating division");
        Self {
            id,
            name,
            build,
            deploy: None,
            operations: None,
            events: EventSink::disabled(),
        }
    }

    pub fn with_deploy(mut self, unit: Arc<dyn GoalHandler>) -> Self {
        self.deploy = Some(unit);
        self
    }

    /// Unit for monitor and remediate goals
    pub fn with_operations(mut self, unit: Arc<dyn GoalHandler>) -> Self {
        self.operations = Some(unit);
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    fn unit_for(&self, kind: GoalKind) -> Option<&Arc<dyn GoalHandler>> {
        match kind {
            GoalKind::Build => Some(&self.build),
            GoalKind::Deploy => self.deploy.as_ref().or(Some(&self.build)),
            GoalKind::Monitor | GoalKind::Remediate => self.operations.as_ref(),
        }
    }
}

#[async_trait]
impl GoalHandler for Division {
    fn unit_id(&self) -> UnitId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> UnitKind {
        UnitKind::Division
    }

    /// Build unit first
    fn units(&self) -> Vec<Arc<dyn GoalHandler>> {
        let mut units = vec![self.build.clone()];
        units.extend(self.deploy.clone());
        units.extend(self.operations.clone());
        units
    }

    #[instrument(skip(self, goal), fields(unit_id = %self.id, goal_id = %goal.id))]
    async fn handle(&self, goal: &Goal) -> Result<UnitReport, EscalationRecord> {
        let kind = classify_goal(goal);
        let mut goal = goal.clone();
        goal.context
            .entry(CONTEXT_KIND.to_string())
            .or_insert_with(|| kind.as_str().to_string());
        if kind == GoalKind::Deploy {
            let target = classify_deploy_target(&goal);
            debug!(target = %target.as_context_value(), "Deploy target selected");
            goal.context
                .insert(keys::DEPLOY_TARGET.to_string(), target.as_context_value());
        }

        let Some(unit) = self.unit_for(kind) else {
            let reason = format!("division '{}' has no unit for {kind} goals", self.name);
            warn!(reason = %reason, "Cannot dispatch goal");
            self.events.emit(Event::Escalated {
                goal_id: goal.id,
                reason: reason.clone(),
            });
            return Err(EscalationRecord::new(goal.id, reason).from_unit(self.id));
        };

        info!(%kind, unit = %unit.name(), "Dispatching goal");
        unit.handle(&goal).await.map_err(|record| {
            record
                .wrap(format!("division '{}' could not resolve {kind} goal", self.name))
                .from_unit(self.id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;

    /// Records the goals it sees
    struct Probe {
        id: UnitId,
        name: String,
        seen: SyncMutex<Vec<Goal>>,
        fail: bool,
    }

    impl Probe {
        fn new(name: &str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                id: UnitId::new(),
                name: name.to_string(),
                seen: SyncMutex::new(Vec::new()),
                fail,
            })
        }
    }

    #[async_trait]
    impl GoalHandler for Probe {
        fn unit_id(&self) -> UnitId {
            self.id
        }

        fn name(&self) -> &str {
            &self.name
        }

        async fn handle(&self, goal: &Goal) -> Result<UnitReport, EscalationRecord> {
            self.seen.lock().push(goal.clone());
            if self.fail {
                return Err(EscalationRecord::new(goal.id, "task 'x' failed after 3 attempt(s)"));
            }
            Ok(UnitReport::new(self.id, goal.id, format!("{} handled it", self.name)))
        }
    }

    // === Classification Tests ===

    #[test]
    fn test_goal_kinds() {
        assert_eq!(classify_goal(&Goal::new("Add a login form")), GoalKind::Build);
        assert_eq!(classify_goal(&Goal::new("Deploy the api to fly.io")), GoalKind::Deploy);
        assert_eq!(classify_goal(&Goal::new("Monitor the health of checkout")), GoalKind::Monitor);
        assert_eq!(classify_goal(&Goal::new("The api is down, restart it")), GoalKind::Remediate);
        assert_eq!(
            classify_goal(&Goal::new("Add a login form").with_context(CONTEXT_KIND, "deploy")),
            GoalKind::Deploy
        );
    }

    #[test]
    fn test_deploy_targets() {
        assert_eq!(
            classify_deploy_target(&Goal::new("Run it in a docker container")),
            DeployTarget::LocalContainer
        );
        assert_eq!(
            classify_deploy_target(&Goal::new("Deploy to Vercel")),
            DeployTarget::Cloud("vercel".into())
        );
        assert_eq!(
            classify_deploy_target(&Goal::new("Deploy to AWS").with_context(keys::DEPLOY_TARGET, "container")),
            DeployTarget::LocalContainer
        );
    }

    // === Dispatch Tests ===

    #[tokio::test]
    async fn test_dispatch_by_kind() {
        let build = Probe::new("build", false);
        let deploy = Probe::new("deploy", false);
        let ops = Probe::new("ops", false);
        let division = Division::new("delivery", build.clone())
            .with_deploy(deploy.clone())
            .with_operations(ops.clone());

        let report = division.handle(&Goal::new("Ship the api to heroku")).await.unwrap();
        assert_eq!(report.unit_id, deploy.id);
        let seen = deploy.seen.lock()[0].clone();
        assert_eq!(seen.context_value(keys::DEPLOY_TARGET), Some("cloud:heroku"));
        assert_eq!(seen.context_value(CONTEXT_KIND), Some("deploy"));

        division.handle(&Goal::new("Restart the worker service")).await.unwrap();
        assert_eq!(ops.seen.lock().len(), 1);

        division.handle(&Goal::new("Add pagination")).await.unwrap();
        assert_eq!(build.seen.lock().len(), 1);
        assert_eq!(division.units().len(), 3);
    }

    #[tokio::test]
    async fn test_deploy_falls_back_to_build_unit() {
        let build = Probe::new("build", false);
        let division = Division::new("delivery", build.clone());
        division.handle(&Goal::new("Deploy it in a container")).await.unwrap();
        assert_eq!(
            build.seen.lock()[0].context_value(keys::DEPLOY_TARGET),
            Some("container")
        );
    }

    #[tokio::test]
    async fn test_missing_operations_unit_escalates() {
        let division = Division::new("delivery", Probe::new("build", false));
        let record = division.handle(&Goal::new("Check the health of api")).await.unwrap_err();
        assert!(record.reason.contains("no unit for monitor goals"));
        assert_eq!(record.unit_id, Some(division.id));
    }

    #[tokio::test]
    async fn test_unit_escalation_is_wrapped() {
        let division = Division::new("delivery", Probe::new("build", true));
        let record = division.handle(&Goal::new("Add pagination")).await.unwrap_err();
        assert!(record.reason.contains("could not resolve build goal"));
        assert_eq!(record.root_cause().reason, "task 'x' failed after 3 attempt(s)");
        assert_eq!(record.depth(), 2);
    }
}
