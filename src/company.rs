//! Company management - the units serving one business domain

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::channel::{Event, EventSink};
use crate::division::{GoalHandler, UnitReport};
use crate::error::{ConclaveError, Result};
use crate::escalation::EscalationRecord;
use crate::hierarchy::{OrgHierarchy, OrgTree, UnitKind, UnitStatus};
use crate::types::{Goal, GoalId, UnitId};

/// How one goal ended at company level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalStatus {
    pub goal_id: GoalId,
    pub text: String,
    pub success: bool,
    pub unit_id: Option<UnitId>,
    pub detail: String,
    pub finished_at: DateTime<Utc>,
}

/// Aggregate of every goal the company has handled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyReport {
    pub company_id: UnitId,
    pub domain: String,
    pub succeeded: usize,
    pub failed: usize,
    pub goals: Vec<GoalStatus>,
}

/// A company owning divisions and teams for one domain
pub struct Company {
    /// Company ID
    pub id: UnitId,
    /// Business domain served
    pub domain: String,
    /// Directly owned units, in registration order
    units: RwLock<Vec<Arc<dyn GoalHandler>>>,
    /// Ownership tree rooted at this company
    org: RwLock<OrgHierarchy>,
    /// Held for the whole of a goal
    busy: Mutex<()>,
    goals: RwLock<Vec<GoalStatus>>,
    events: EventSink,
}

impl Company {
    /// Create a new company
    pub fn new(domain: impl Into<String>) -> Self {
        let id = UnitId::new();
        let domain = domain.into();
        let mut org = OrgHierarchy::new();
        // Fresh id on an empty tree
        let _ = org.add_unit(id, UnitKind::Company, domain.clone(), None);

        info!(company_id = %id, domain = %domain, "Creating new company");

        Self {
            id,
            domain,
            units: RwLock::new(Vec::new()),
            org: RwLock::new(org),
            busy: Mutex::new(()),
            goals: RwLock::new(Vec::new()),
            events: EventSink::disabled(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Take ownership of a unit and everything it owns
    pub fn add_unit(&self, unit: Arc<dyn GoalHandler>) -> Result<UnitId> {
        let unit_id = unit.unit_id();
        {
            let mut org = self.org.write();
            register(&mut org, &unit, self.id)?;
        }
        self.units.write().push(unit.clone());

        info!(
            company_id = %self.id,
            unit_id = %unit_id,
            kind = %unit.kind(),
            name = %unit.name(),
            "Unit added"
        );
        Ok(unit_id)
    }

    pub fn unit_ids(&self) -> Vec<UnitId> {
        self.units.read().iter().map(|u| u.unit_id()).collect()
    }

    pub fn unit_count(&self) -> usize {
        self.units.read().len()
    }

    pub fn set_status(&self, unit_id: &UnitId, status: UnitStatus) -> Result<()> {
        self.org.write().set_status(unit_id, status)?;
        info!(company_id = %self.id, unit_id = %unit_id, %status, "Unit status changed");
        Ok(())
    }

    pub fn pause(&self, unit_id: &UnitId) -> Result<()> {
        self.set_status(unit_id, UnitStatus::Paused)
    }

    pub fn resume(&self, unit_id: &UnitId) -> Result<()> {
        self.set_status(unit_id, UnitStatus::Active)
    }

    pub fn archive(&self, unit_id: &UnitId) -> Result<()> {
        self.set_status(unit_id, UnitStatus::Archived)
    }

    pub fn status(&self, unit_id: &UnitId) -> Option<UnitStatus> {
        self.org.read().status(unit_id)
    }

    pub fn is_active(&self) -> bool {
        self.status(&self.id) == Some(UnitStatus::Active)
    }

    pub fn org_tree(&self) -> Option<OrgTree> {
        self.org.read().to_tree()
    }

    pub fn report(&self) -> CompanyReport {
        let goals = self.goals.read().clone();
        let succeeded = goals.iter().filter(|g| g.success).count();
        CompanyReport {
            company_id: self.id,
            domain: self.domain.clone(),
            succeeded,
            failed: goals.len() - succeeded,
            goals,
        }
    }

    fn first_active_unit(&self) -> Option<Arc<dyn GoalHandler>> {
        let org = self.org.read();
        self.units
            .read()
            .iter()
            .find(|u| org.status(&u.unit_id()) == Some(UnitStatus::Active))
            .cloned()
    }

    fn record(&self, goal: &Goal, unit_id: Option<UnitId>, outcome: &Result<UnitReport, EscalationRecord>) {
        let (success, detail) = match outcome {
            Ok(report) => (true, report.output.clone()),
            Err(record) => (false, record.to_string()),
        };
        self.goals.write().push(GoalStatus {
            goal_id: goal.id,
            text: goal.text.clone(),
            success,
            unit_id,
            detail,
            finished_at: Utc::now(),
        });
    }

    fn refuse(&self, goal: &Goal, reason: String) -> EscalationRecord {
        warn!(company_id = %self.id, reason = %reason, "Company refusing goal");
        self.events.emit(Event::Escalated {
            goal_id: goal.id,
            reason: reason.clone(),
        });
        EscalationRecord::new(goal.id, reason).from_unit(self.id)
    }
}

/// Flatten `unit` and everything it owns into `(unit, owner)` pairs, parents first
fn collect(unit: &Arc<dyn GoalHandler>, owner: UnitId, out: &mut Vec<(Arc<dyn GoalHandler>, UnitId)>) {
    out.push((unit.clone(), owner));
    for child in unit.units() {
        collect(&child, unit.unit_id(), out);
    }
}

/// Add a unit subtree to `org`, all or nothing
fn register(org: &mut OrgHierarchy, unit: &Arc<dyn GoalHandler>, owner: UnitId) -> Result<()> {
    let mut pending = Vec::new();
    collect(unit, owner, &mut pending);

    let mut seen = HashSet::new();
    for (unit, _) in &pending {
        let id = unit.unit_id();
        if org.contains(&id) || !seen.insert(id) {
            return Err(ConclaveError::AlreadyOwned(id));
        }
    }
    for (unit, owner) in pending {
        org.add_unit(unit.unit_id(), unit.kind(), unit.name(), Some(owner))?;
    }
    Ok(())
}

#[async_trait]
impl GoalHandler for Company {
    fn unit_id(&self) -> UnitId {
        self.id
    }

    fn name(&self) -> &str {
        &self.domain
    }

    fn kind(&self) -> UnitKind {
        UnitKind::Company
    }

    fn units(&self) -> Vec<Arc<dyn GoalHandler>> {
        self.units.read().clone()
    }

    #[instrument(skip(self, goal), fields(company_id = %self.id, goal_id = %goal.id))]
    async fn handle(&self, goal: &Goal) -> Result<UnitReport, EscalationRecord> {
        let _guard = self.busy.lock().await;

        if !self.is_active() {
            let reason = format!("company '{}' is not active", self.domain);
            let outcome = Err(self.refuse(goal, reason));
            self.record(goal, None, &outcome);
            return outcome;
        }
        let Some(unit) = self.first_active_unit() else {
            let reason = format!("company '{}' has no active unit", self.domain);
            let outcome = Err(self.refuse(goal, reason));
            self.record(goal, None, &outcome);
            return outcome;
        };

        info!(unit = %unit.name(), "Handing goal to unit");
        let outcome = unit.handle(goal).await.map_err(|record| {
            record
                .wrap(format!("company '{}' could not resolve goal", self.domain))
                .from_unit(self.id)
        });
        self.record(goal, Some(unit.unit_id()), &outcome);
        outcome
    }
}

/// Handle to a company for shared access
#[derive(Clone)]
pub struct CompanyHandle {
    inner: Arc<Company>,
}

impl CompanyHandle {
    pub fn new(company: Company) -> Self {
        Self {
            inner: Arc::new(company),
        }
    }

    pub fn id(&self) -> UnitId {
        self.inner.id
    }

    /// The company as a goal handler
    pub fn as_handler(&self) -> Arc<dyn GoalHandler> {
        self.inner.clone()
    }
}

impl std::fmt::Debug for CompanyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompanyHandle")
            .field("id", &self.inner.id)
            .field("domain", &self.inner.domain)
            .finish()
    }
}

impl std::ops::Deref for CompanyHandle {
    type Target = Company;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
