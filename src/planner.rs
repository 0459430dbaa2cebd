//! Planner - decomposes a goal into ordered implementation and verification
//! tasks.
//!
//! The model reply is decoded best-effort: each section has its own fallback
//! and a malformed reply never aborts the pipeline, except a reply with no
//! content at all.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::category::TaskCategory;
use crate::docs::{slugify, DocumentStore, PageWrite};
use crate::error::{ConclaveError, Result};
use crate::prompt::{self, markers};
use crate::task::{keys, Task, TaskKind, TaskPriority, DEFAULT_MAX_ATTEMPTS};
use crate::types::{AgentId, Goal, TaskId};
use crate::worker::{Worker, WorkerRequest};

static BOOTSTRAP_VERB: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:bootstrap|scaffold)\w*\b").expect("bootstrap verb pattern"));

static BOOTSTRAP_NEW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:create|start|set ?up|initiali[sz]e|generate|make|spin up)\s+(?:a\s+|an\s+)?(?:brand\s+)?new\s+(?:[\w.+-]+\s+){0,3}(?:project|app|application|repo|repository|website|site|service)\b",
    )
    .expect("bootstrap pattern")
});

static LIST_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:\d+\s*[.)]|[-*•])\s+(.+?)\s*$").expect("list item pattern"));

static PRIORITY_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[\[(]\s*(?:priority\s*:\s*)?(low|medium|normal|high|critical|urgent)\s*[\])]")
        .expect("priority pattern")
});

static ORDER_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(i|v|impl(?:ement(?:ation)?)?|verif(?:y|ication))\s*#?\s*(\d+)\b")
        .expect("order pattern")
});

/// Whether the goal is a "bootstrap a new project" request
pub fn is_bootstrap(goal_text: &str) -> bool {
    BOOTSTRAP_VERB.is_match(goal_text) || BOOTSTRAP_NEW.is_match(goal_text)
}

/// Which worker a plan step runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepRole {
    Implement,
    Verify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub role: StepRole,
    pub task_id: TaskId,
}

/// Short design record produced before decomposition
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DesignRecord {
    pub overview: String,
    pub requirements: Vec<String>,
    pub approach: String,
    pub acceptance_criteria: Vec<String>,
}

impl DesignRecord {
    /// Decode the sections; each missing field falls back on its own
    pub fn parse(text: &str, goal: &Goal) -> Self {
        let sections = split_sections(
            text,
            &[
                markers::OVERVIEW,
                markers::REQUIREMENTS,
                markers::APPROACH,
                markers::ACCEPTANCE,
            ],
        );
        let prose = |marker: &str| {
            sections
                .get(marker)
                .map(|lines| lines.join("\n").trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let items = |marker: &str| -> Vec<String> {
            sections
                .get(marker)
                .map(|lines| {
                    lines
                        .iter()
                        .map(|line| match LIST_ITEM.captures(line) {
                            Some(caps) => caps[1].to_string(),
                            None => line.trim().to_string(),
                        })
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default()
        };

        let overview = prose(markers::OVERVIEW).unwrap_or_else(|| {
            if sections.is_empty() && !text.trim().is_empty() {
                text.trim().to_string()
            } else {
                goal.text.clone()
            }
        });
        let mut requirements = items(markers::REQUIREMENTS);
        if requirements.is_empty() {
            requirements.push(goal.text.clone());
        }
        let approach = prose(markers::APPROACH).unwrap_or_else(|| "Not specified".to_string());
        let mut acceptance_criteria = items(markers::ACCEPTANCE);
        if acceptance_criteria.is_empty() {
            acceptance_criteria.push("The goal is met and verified".to_string());
        }

        Self {
            overview,
            requirements,
            approach,
            acceptance_criteria,
        }
    }

    pub fn to_markdown(&self) -> String {
        let bullets = |items: &[String]| {
            items
                .iter()
                .map(|i| format!("- {i}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        format!(
            "## Overview\n{}\n\n## Requirements\n{}\n\n## Approach\n{}\n\n## Acceptance Criteria\n{}\n",
            self.overview,
            bullets(&self.requirements),
            self.approach,
            bullets(&self.acceptance_criteria)
        )
    }
}

/// Output of planning
#[derive(Debug, Clone)]
pub struct PlanBreakdown {
    pub implementation: Vec<Task>,
    pub verification: Vec<Task>,
    pub order: Vec<PlanStep>,
    pub design: Option<DesignRecord>,
    /// Synthesized by the bootstrap fast path
    pub bootstrap: bool,
}

impl PlanBreakdown {
    /// All implementation tasks, then all verification tasks
    pub fn default_order(implementation: &[Task], verification: &[Task]) -> Vec<PlanStep> {
        implementation
            .iter()
            .map(|t| PlanStep {
                role: StepRole::Implement,
                task_id: t.id(),
            })
            .chain(verification.iter().map(|t| PlanStep {
                role: StepRole::Verify,
                task_id: t.id(),
            }))
            .collect()
    }

    /// Every step must reference a task in the list for its role
    pub fn validate(&self) -> Result<()> {
        for step in &self.order {
            let list = match step.role {
                StepRole::Implement => &self.implementation,
                StepRole::Verify => &self.verification,
            };
            if !list.iter().any(|t| t.id() == step.task_id) {
                return Err(ConclaveError::Planning(format!(
                    "execution order references unknown task {}",
                    step.task_id
                )));
            }
        }
        Ok(())
    }

    pub fn task_count(&self) -> usize {
        self.implementation.len() + self.verification.len()
    }
}

impl fmt::Display for PlanBreakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.order {
            let (tag, list) = match step.role {
                StepRole::Implement => ("I", &self.implementation),
                StepRole::Verify => ("V", &self.verification),
            };
            if let Some(task) = list.iter().find(|t| t.id() == step.task_id) {
                writeln!(f, "[{tag}] {}", task.title())?;
            }
        }
        Ok(())
    }
}

/// Decomposes goals using a planner worker
pub struct Planner {
    worker: Arc<dyn Worker>,
    docs: Option<Arc<dyn DocumentStore>>,
    design_records: bool,
    max_attempts: u32,
}

impl Planner {
    pub fn new(worker: Arc<dyn Worker>) -> Self {
        Self {
            worker,
            docs: None,
            design_records: false,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Persist design records to `docs`
    pub fn with_docs(mut self, docs: Arc<dyn DocumentStore>) -> Self {
        self.docs = Some(docs);
        self
    }

    pub fn with_design_records(mut self, enabled: bool) -> Self {
        self.design_records = enabled;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn id(&self) -> AgentId {
        self.worker.id()
    }

    #[instrument(skip(self, goal), fields(goal_id = %goal.id))]
    pub async fn plan(&self, goal: &Goal) -> Result<PlanBreakdown> {
        if is_bootstrap(&goal.text) {
            info!("Bootstrap goal, using fixed scaffold plan");
            return Ok(self.bootstrap_plan(goal));
        }

        let design = if self.design_records {
            Some(self.design(goal).await?)
        } else {
            None
        };

        let reply = self
            .worker
            .invoke(WorkerRequest::new(prompt::decomposition_prompt(goal, design.as_ref())))
            .await
            .map_err(|e| ConclaveError::Planning(e.to_string()))?;

        if reply.output.trim().is_empty() {
            return Err(ConclaveError::Planning("planner returned an empty reply".into()));
        }

        let mut plan = self.decode(&reply.output, goal);
        plan.design = design;
        plan.validate()?;

        info!(
            implementation = plan.implementation.len(),
            verification = plan.verification.len(),
            "Plan ready"
        );
        Ok(plan)
    }

    async fn design(&self, goal: &Goal) -> Result<DesignRecord> {
        let reply = self
            .worker
            .invoke(WorkerRequest::new(prompt::design_prompt(goal)))
            .await
            .map_err(|e| ConclaveError::Planning(format!("design record: {e}")))?;
        let record = DesignRecord::parse(&reply.output, goal);

        if let Some(docs) = &self.docs {
            let path = format!("designs/{}", slugify(&goal.text));
            let page = PageWrite::new(record.to_markdown()).titled(goal.text.clone());
            if let Err(e) = docs.write_page(&path, page).await {
                warn!(path = %path, error = %e, "Could not persist design record");
            } else {
                debug!(path = %path, "Design record persisted");
            }
        }
        Ok(record)
    }

    fn new_task(&self, kind: TaskKind, title: &str, description: &str) -> Task {
        Task::new(kind, title, description, self.worker.id()).with_max_attempts(self.max_attempts)
    }

    fn bootstrap_plan(&self, goal: &Goal) -> PlanBreakdown {
        let mut scaffold = self.new_task(
            TaskKind::Implement,
            "Scaffold the project",
            &format!(
                "Generate the project skeleton for: {}\nWhen done, report the location as 'Project created at: <path>'.",
                goal.text
            ),
        )
        .with_context(keys::CATEGORY, TaskCategory::Scaffold.as_str())
        .with_priority(TaskPriority::High);
        let mut customize = self
            .new_task(
                TaskKind::Implement,
                "Customize the generated project",
                &format!("Adapt the generated project to the request: {}", goal.text),
            )
            .with_context(keys::CATEGORY, TaskCategory::Code.as_str());

        for (key, value) in &goal.context {
            scaffold.set_context(key.clone(), value.clone());
            customize.set_context(key.clone(), value.clone());
        }

        let implementation = vec![scaffold, customize];
        let order = PlanBreakdown::default_order(&implementation, &[]);
        PlanBreakdown {
            implementation,
            verification: Vec::new(),
            order,
            design: None,
            bootstrap: true,
        }
    }

    /// Best-effort decode of a decomposition reply
    fn decode(&self, text: &str, goal: &Goal) -> PlanBreakdown {
        let sections = split_sections(
            text,
            &[markers::IMPLEMENTATION, markers::VERIFICATION, markers::ORDER],
        );

        let mut implementation = self.decode_tasks(sections.get(markers::IMPLEMENTATION), TaskKind::Implement);
        if implementation.is_empty() {
            warn!("No implementation tasks parsed, falling back to a single task");
            implementation.push(self.new_task(TaskKind::Implement, "Implement the goal", &goal.text));
        }
        let mut verification = self.decode_tasks(sections.get(markers::VERIFICATION), TaskKind::Verify);

        for task in implementation.iter_mut().chain(verification.iter_mut()) {
            for (key, value) in &goal.context {
                if task.context_value(key).is_none() {
                    task.set_context(key.clone(), value.clone());
                }
            }
        }

        let order = decode_order(sections.get(markers::ORDER), &implementation, &verification);

        // Link each verification task to the implementation step it follows
        let last_impl = implementation.last().map(Task::id);
        let mut targets: BTreeMap<TaskId, TaskId> = BTreeMap::new();
        let mut seen_impl = None;
        for step in &order {
            match step.role {
                StepRole::Implement => seen_impl = Some(step.task_id),
                StepRole::Verify => {
                    if let Some(target) = seen_impl.or(last_impl) {
                        targets.insert(step.task_id, target);
                    }
                }
            }
        }
        for task in verification.iter_mut() {
            if let Some(target) = targets.get(&task.id()) {
                task.set_context(keys::VERIFIES, target.to_string());
            }
        }

        PlanBreakdown {
            implementation,
            verification,
            order,
            design: None,
            bootstrap: false,
        }
    }

    fn decode_tasks(&self, lines: Option<&Vec<String>>, kind: TaskKind) -> Vec<Task> {
        let Some(lines) = lines else {
            return Vec::new();
        };
        let mut tasks: Vec<Task> = Vec::new();
        for line in lines {
            match LIST_ITEM.captures(line) {
                Some(caps) => {
                    let (title, description, priority) = split_item(&caps[1]);
                    if title.is_empty() {
                        continue;
                    }
                    tasks.push(self.new_task(kind, &title, &description).with_priority(priority));
                }
                // Continuation lines extend the previous description
                None => {
                    let extra = line.trim();
                    if extra.is_empty() {
                        continue;
                    }
                    if let Some(last) = tasks.pop() {
                        let description = if last.description().is_empty() {
                            extra.to_string()
                        } else {
                            format!("{}\n{extra}", last.description())
                        };
                        tasks.push(
                            self.new_task(kind, last.title(), &description)
                                .with_priority(last.priority()),
                        );
                    }
                }
            }
        }
        tasks
    }
}

/// Split `title - description [priority]` into its parts
fn split_item(raw: &str) -> (String, String, TaskPriority) {
    let mut priority = TaskPriority::default();
    let mut text = raw.to_string();
    if let Some(caps) = PRIORITY_TAG.captures(raw) {
        priority = TaskPriority::parse(&caps[1]).unwrap_or_default();
        text = PRIORITY_TAG.replace(raw, "").trim().to_string();
    }
    let text = text.trim_matches(|c| c == '*' || c == '`').trim().to_string();
    for sep in [" - ", " — ", ": "] {
        if let Some((title, description)) = text.split_once(sep) {
            return (
                title.trim().trim_matches('*').trim().to_string(),
                description.trim().to_string(),
                priority,
            );
        }
    }
    (text, String::new(), priority)
}

/// Lines under each marker, keyed by marker. Marker matching ignores case
/// and leading markdown decoration.
fn split_sections(text: &str, section_markers: &[&'static str]) -> BTreeMap<&'static str, Vec<String>> {
    let mut out: BTreeMap<&'static str, Vec<String>> = BTreeMap::new();
    let mut current: Option<&'static str> = None;
    for line in text.lines() {
        let bare = line
            .trim()
            .trim_start_matches(|c: char| c == '#' || c == '*' || c.is_whitespace())
            .replace("**", "");
        let upper = bare.to_ascii_uppercase();
        if let Some(&marker) = section_markers.iter().find(|m| upper.starts_with(**m)) {
            current = Some(marker);
            let rest = bare[marker.len().min(bare.len())..].trim();
            let entry = out.entry(marker).or_default();
            if !rest.is_empty() {
                entry.push(rest.to_string());
            }
            continue;
        }
        if let Some(marker) = current {
            if !line.trim().is_empty() {
                out.entry(marker).or_default().push(line.to_string());
            }
        }
    }
    out
}

fn decode_order(lines: Option<&Vec<String>>, implementation: &[Task], verification: &[Task]) -> Vec<PlanStep> {
    let mut order = Vec::new();
    let mut seen = HashSet::new();

    if let Some(lines) = lines {
        for line in lines {
            for caps in ORDER_TOKEN.captures_iter(line) {
                let role = if caps[1].to_ascii_lowercase().starts_with('v') {
                    StepRole::Verify
                } else {
                    StepRole::Implement
                };
                let Ok(index) = caps[2].parse::<usize>() else {
                    continue;
                };
                let list = match role {
                    StepRole::Implement => implementation,
                    StepRole::Verify => verification,
                };
                let Some(task) = index.checked_sub(1).and_then(|i| list.get(i)) else {
                    debug!(index, ?role, "Order references a missing task, skipping");
                    continue;
                };
                if seen.insert(task.id()) {
                    order.push(PlanStep {
                        role,
                        task_id: task.id(),
                    });
                }
            }
        }
    }

    if order.is_empty() {
        return PlanBreakdown::default_order(implementation, verification);
    }

    // Anything the order left out still runs, in list order
    for step in PlanBreakdown::default_order(implementation, verification) {
        if seen.insert(step.task_id) {
            order.push(step);
        }
    }
    order
}
