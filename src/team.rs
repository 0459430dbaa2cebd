//! Team - runs plan, implement, verify, iterate for one goal at a time.
//!
//! Implementation tasks run strictly in execution order. Verification runs
//! after implementation within an iteration unless interleaving is enabled.
//! A failed verification yields a fix task parented to the implementation
//! task it covers, and the loop goes round again until every verification
//! passes or the iteration ceiling is reached.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::channel::{Event, EventSink};
use crate::config::{EngineConfig, TeamConfig};
use crate::docs::DocumentStore;
use crate::error::ConclaveError;
use crate::escalation::EscalationRecord;
use crate::planner::{PlanBreakdown, Planner, StepRole};
use crate::retry::{AttemptRecord, TaskOutcome, TaskRunner};
use crate::routing::Implementers;
use crate::task::{keys, Task, TaskKind, TaskResult, TaskStatus, TaskTree};
use crate::types::{Goal, GoalId, TaskId, UnitId};
use crate::worker::Worker;

static PROJECT_CREATED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)project created at:?\s*[`'"]?([^\s`'"]+)"#).expect("project location pattern")
});

/// Location reported by a scaffolding step, if any
pub fn reported_project_path(output: &str) -> Option<String> {
    PROJECT_CREATED
        .captures(output)
        .map(|caps| caps[1].trim_end_matches(['.', ',', ';', ')']).to_string())
        .filter(|p| !p.is_empty())
}

/// Outcome of a goal the team resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamReport {
    pub goal_id: GoalId,
    pub iterations: u32,
    pub tasks_completed: usize,
    pub fix_tasks: usize,
    pub artifacts: Vec<String>,
    pub project_path: Option<String>,
    pub summary: String,
}

/// A planner, implementers and a verifier sharing one task tree
pub struct Team {
    pub id: UnitId,
    pub name: String,
    planner: Planner,
    implementers: Implementers,
    verifier: Arc<dyn Worker>,
    config: TeamConfig,
    runner: TaskRunner,
    events: EventSink,
    tasks: TaskTree,
}

impl Team {
    pub fn new(
        name: impl Into<String>,
        planner: Arc<dyn Worker>,
        implementers: Implementers,
        verifier: Arc<dyn Worker>,
        config: &EngineConfig,
    ) -> Self {
        let id = UnitId::new();
        let name = name.into();
        info!(unit_id = %id, name = %name, implementers = implementers.len(), "Creating team");

        Self {
            id,
            name,
            planner: Planner::new(planner)
                .with_design_records(config.team.design_records)
                .with_max_attempts(config.retry.max_attempts),
            implementers,
            verifier,
            config: config.team.clone(),
            runner: TaskRunner::new(config.retry),
            events: EventSink::disabled(),
            tasks: TaskTree::new(),
        }
    }

    /// Persist design records to `docs`
    pub fn with_docs(mut self, docs: Arc<dyn DocumentStore>) -> Self {
        self.planner = self.planner.with_docs(docs);
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.runner = self.runner.with_events(events.clone());
        self.events = events;
        self
    }

    /// Tasks of the most recent goal
    pub fn tasks(&self) -> &TaskTree {
        &self.tasks
    }

    #[instrument(skip(self, goal), fields(unit_id = %self.id, goal_id = %goal.id))]
    pub async fn execute(&mut self, goal: &Goal) -> Result<TeamReport, EscalationRecord> {
        self.tasks = TaskTree::new();

        let mut root = Task::new(TaskKind::Plan, headline(&goal.text), goal.text.clone(), self.planner.id())
            .with_max_attempts(1);
        for (key, value) in &goal.context {
            root.set_context(key.clone(), value.clone());
        }
        let root_id = root.id();
        self.insert(goal, root)?;
        self.with_task(goal, root_id, |t| t.begin_attempt().map(|_| ()))?;

        let plan = match self.planner.plan(goal).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!(error = %e, "Planning failed");
                let reason = format!("failed to plan task: {e}");
                self.settle_root(root_id, |t| t.fail(TaskResult::failure(reason.clone())));
                return Err(self.escalate(goal, reason, None, Vec::new()));
            }
        };

        self.events.emit(Event::PlanReady {
            goal_id: goal.id,
            implementation: plan.implementation.len(),
            verification: plan.verification.len(),
        });
        debug!(plan = %plan, "Plan ready");

        let steps = self.schedule(&plan);
        let verification_ids: Vec<TaskId> = plan.verification.iter().map(Task::id).collect();
        let last_impl = plan.implementation.last().map(Task::id);
        for task in plan.implementation.into_iter().chain(plan.verification) {
            self.insert(goal, task.with_parent(root_id))?;
        }

        let mut project_path = goal.context_value(keys::PROJECT_PATH).map(str::to_string);
        let mut steps = steps;
        let mut fix_tasks = 0usize;
        let mut artifacts: Vec<String> = Vec::new();
        let mut last_failure: Option<(TaskId, String, Vec<AttemptRecord>)> = None;

        for iteration in 1..=self.config.max_iterations {
            info!(iteration, steps = steps.len(), "Starting iteration");
            self.events.emit(Event::IterationStarted {
                goal_id: goal.id,
                iteration,
            });

            let mut failed_checks: Vec<(TaskId, String, Vec<AttemptRecord>)> = Vec::new();

            for (role, task_id) in &steps {
                if let Some(path) = &project_path {
                    let path = path.clone();
                    self.with_task(goal, *task_id, |t| {
                        if t.context_value(keys::PROJECT_PATH).is_none() {
                            t.set_context(keys::PROJECT_PATH, path);
                        }
                        Ok(())
                    })?;
                }

                let outcome = self.run_step(goal, *role, *task_id).await?;
                match outcome {
                    TaskOutcome::Completed { result, .. } => {
                        for artifact in result.artifacts.iter().flatten() {
                            if !artifacts.contains(artifact) {
                                artifacts.push(artifact.clone());
                            }
                        }
                        if let Some(path) = result.output.as_deref().and_then(reported_project_path) {
                            info!(project_path = %path, "Project location reported");
                            project_path = Some(path);
                        }
                    }
                    TaskOutcome::Failed { reason, history } => match role {
                        StepRole::Implement => {
                            self.block_pending();
                            self.settle_root(root_id, |t| t.fail(TaskResult::failure(reason.clone())));
                            return Err(self.escalate(goal, reason, Some(*task_id), history));
                        }
                        StepRole::Verify => {
                            warn!(task_id = %task_id, reason = %reason, "Verification failed");
                            failed_checks.push((*task_id, reason, history));
                        }
                    },
                }
            }

            if failed_checks.is_empty() {
                self.settle_root(root_id, |t| {
                    t.complete(TaskResult::success(format!("resolved in {iteration} iteration(s)")))
                });
                info!(iteration, "Goal verified");
                self.events.emit(Event::GoalCompleted {
                    goal_id: goal.id,
                    iterations: iteration,
                });
                return Ok(TeamReport {
                    goal_id: goal.id,
                    iterations: iteration,
                    tasks_completed: self.tasks.count_with_status(TaskStatus::Completed),
                    fix_tasks,
                    artifacts,
                    summary: self.summary(),
                    project_path,
                });
            }

            if iteration == self.config.max_iterations {
                last_failure = failed_checks.pop();
                break;
            }

            // Next round: fixes for every failed check, then fresh verification
            let mut next = Vec::new();
            for (check_id, reason, _) in &failed_checks {
                let fix = self.fix_task(goal, *check_id, reason, last_impl)?;
                fix_tasks += 1;
                next.push((StepRole::Implement, fix));
            }
            for original in &verification_ids {
                let recheck = self.recheck_task(goal, *original)?;
                next.push((StepRole::Verify, recheck));
            }
            steps = next;
        }

        self.block_pending();
        let (task_id, detail, history) = match last_failure {
            Some((id, reason, history)) => (Some(id), reason, history),
            None => (None, "no verification passed".to_string(), Vec::new()),
        };
        let reason = format!(
            "max iterations exceeded: verification still failing after {} iteration(s): {detail}",
            self.config.max_iterations
        );
        self.settle_root(root_id, |t| t.fail(TaskResult::failure(reason.clone())));
        Err(self.escalate(goal, reason, task_id, history))
    }

    /// Steps for the first iteration
    fn schedule(&self, plan: &PlanBreakdown) -> Vec<(StepRole, TaskId)> {
        let ordered = plan.order.iter().map(|s| (s.role, s.task_id));
        if self.config.interleave_verification {
            return ordered.collect();
        }
        let (mut steps, verify): (Vec<_>, Vec<_>) = ordered.partition(|(role, _)| *role == StepRole::Implement);
        steps.extend(verify);
        steps
    }

    async fn run_step(
        &mut self,
        goal: &Goal,
        role: StepRole,
        task_id: TaskId,
    ) -> Result<TaskOutcome, EscalationRecord> {
        let Some(task) = self.tasks.get_mut(&task_id) else {
            let reason = format!("task {task_id} missing from the task tree");
            return Err(self.escalate(goal, reason, Some(task_id), Vec::new()));
        };
        let worker = match role {
            StepRole::Verify => self.verifier.clone(),
            StepRole::Implement => {
                let (domain, worker) = self.implementers.select(task);
                debug!(task_id = %task_id, %domain, "Routing implementation task");
                worker.clone()
            }
        };

        let outcome = self.runner.run(task, worker.as_ref()).await;
        outcome.map_err(|e| self.escalate(goal, e.to_string(), Some(task_id), Vec::new()))
    }

    fn fix_task(
        &mut self,
        goal: &Goal,
        check_id: TaskId,
        reason: &str,
        fallback_parent: Option<TaskId>,
    ) -> Result<TaskId, EscalationRecord> {
        let Some(check) = self.tasks.get(&check_id) else {
            return Err(self.escalate(goal, format!("task {check_id} missing from the task tree"), None, Vec::new()));
        };
        // Rechecks hang off the original verification task
        let original = match check.parent_id() {
            Some(parent) if self.tasks.get(&parent).is_some_and(|p| p.kind() == TaskKind::Verify) => {
                self.tasks.get(&parent).unwrap_or(check)
            }
            _ => check,
        };
        let parent = original
            .context_value(keys::VERIFIES)
            .and_then(|id| self.tasks.iter().find(|t| t.id().to_string() == id).map(Task::id))
            .or(fallback_parent);

        let mut fix = Task::new(
            TaskKind::Fix,
            format!("Fix: {}", original.title()),
            format!("Verification '{}' failed. Correct the implementation.\n{}", original.title(), reason),
            self.planner.id(),
        )
        .with_priority(original.priority())
        .with_max_attempts(self.runner.budget().max_attempts);
        for (key, value) in original.context() {
            if key != keys::VERIFIES {
                fix.set_context(key.clone(), value.clone());
            }
        }
        fix.set_context(keys::VERIFICATION_FAILURE, reason.to_string());
        if let Some(parent) = parent {
            fix = fix.with_parent(parent);
        }

        info!(fix = %fix.id(), parent = ?parent, "Fix task created");
        self.insert(goal, fix)
    }

    fn recheck_task(&mut self, goal: &Goal, original_id: TaskId) -> Result<TaskId, EscalationRecord> {
        let Some(original) = self.tasks.get(&original_id) else {
            return Err(self.escalate(goal, format!("task {original_id} missing from the task tree"), None, Vec::new()));
        };
        let mut recheck = Task::new(
            TaskKind::Verify,
            original.title(),
            original.description(),
            original.created_by(),
        )
        .with_priority(original.priority())
        .with_max_attempts(original.max_attempts())
        .with_parent(original_id);
        for (key, value) in original.context() {
            recheck.set_context(key.clone(), value.clone());
        }
        self.insert(goal, recheck)
    }

    fn insert(&mut self, goal: &Goal, task: Task) -> Result<TaskId, EscalationRecord> {
        let id = task.id();
        self.tasks
            .insert(task)
            .map_err(|e| self.escalate(goal, e.to_string(), Some(id), Vec::new()))
    }

    fn with_task<F>(&mut self, goal: &Goal, id: TaskId, f: F) -> Result<(), EscalationRecord>
    where
        F: FnOnce(&mut Task) -> crate::error::Result<()>,
    {
        let result = match self.tasks.get_mut(&id) {
            Some(task) => f(task).map_err(|e| e.to_string()),
            None => Err(format!("task {id} missing from the task tree")),
        };
        result.map_err(|reason| self.escalate(goal, reason, Some(id), Vec::new()))
    }

    /// Final transition of the goal task; the goal outcome is already decided,
    /// so a refused transition is logged rather than escalated
    fn settle_root<F>(&mut self, root_id: TaskId, f: F)
    where
        F: FnOnce(&mut Task) -> crate::error::Result<()>,
    {
        let outcome = match self.tasks.get_mut(&root_id) {
            Some(task) => f(task),
            None => Err(ConclaveError::TaskTree(format!("task {root_id} missing from the task tree"))),
        };
        if let Err(e) = outcome {
            warn!(unit_id = %self.id, task_id = %root_id, error = %e, "Could not settle goal task");
        }
    }

    /// Mark every task that never started as blocked
    fn block_pending(&mut self) {
        let pending: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|t| t.status() == TaskStatus::Pending)
            .map(Task::id)
            .collect();
        for id in pending {
            if let Some(Err(e)) = self.tasks.get_mut(&id).map(Task::block) {
                warn!(task_id = %id, error = %e, "Could not block pending task");
            }
        }
    }

    fn escalate(
        &self,
        goal: &Goal,
        reason: String,
        task_id: Option<TaskId>,
        history: Vec<AttemptRecord>,
    ) -> EscalationRecord {
        warn!(goal_id = %goal.id, reason = %reason, "Team escalating goal");
        self.events.emit(Event::Escalated {
            goal_id: goal.id,
            reason: reason.clone(),
        });
        let record = EscalationRecord::new(goal.id, reason).from_unit(self.id);
        match task_id {
            Some(id) => record.for_task(id, history),
            None => record,
        }
    }

    fn summary(&self) -> String {
        self.tasks
            .iter()
            .filter(|t| t.kind() != TaskKind::Plan)
            .map(|t| {
                let mark = match t.status() {
                    TaskStatus::Completed => "x",
                    TaskStatus::Failed => "!",
                    _ => " ",
                };
                format!("[{mark}] {}", t.title())
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Debug for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Team")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("implementers", &self.implementers)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

fn headline(text: &str) -> String {
    let line = text.lines().next().unwrap_or(text).trim();
    if line.chars().count() > 80 {
        format!("{}...", line.chars().take(77).collect::<String>())
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::names;
    use crate::channel::EventChannel;
    use crate::retry::AttemptOutcome;
    use crate::routing::Domain;
    use crate::test_support::{acted, narrated, wrote, ScriptedWorker};
    use crate::types::WorkerRole;
    use crate::worker::WorkerResponse;

    const GREETING_PLAN: &str = "IMPLEMENTATION TASKS:\n\
1. Create greeting module - Add src/greeting.rs exposing greet(name)\n\
VERIFICATION TASKS:\n\
1. Run unit tests - cargo test for the greeting module\n\
EXECUTION ORDER:\nI1, V1\n";

    fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.team.design_records = false;
        config
    }

    struct Crew {
        planner: Arc<ScriptedWorker>,
        implementer: Arc<ScriptedWorker>,
        verifier: Arc<ScriptedWorker>,
    }

    impl Crew {
        fn new(plan: Vec<WorkerResponse>, implementer: ScriptedWorker, verifier: ScriptedWorker) -> Self {
            Self {
                planner: Arc::new(ScriptedWorker::new(WorkerRole::Planner, plan)),
                implementer: Arc::new(implementer),
                verifier: Arc::new(verifier),
            }
        }

        fn team(&self, config: &EngineConfig) -> Team {
            Team::new(
                "core",
                self.planner.clone(),
                Implementers::new(self.implementer.clone()),
                self.verifier.clone(),
                config,
            )
        }
    }

    fn implementer(script: Vec<WorkerResponse>) -> ScriptedWorker {
        ScriptedWorker::new(WorkerRole::Implementer, script)
    }

    fn verifier(script: Vec<WorkerResponse>) -> ScriptedWorker {
        ScriptedWorker::new(WorkerRole::Verifier, script)
    }

    // === Scenario Tests ===

    #[tokio::test]
    async fn test_greeting_module_scenario() {
        let crew = Crew::new(
            vec![narrated(GREETING_PLAN)],
            implementer(vec![
                narrated("I'll create the greeting module with a greet function."),
                wrote("Wrote src/greeting.rs with greet(name)"),
            ]),
            verifier(vec![narrated("Ran cargo test: 3 passed, 0 failed")]),
        );
        let (mut channel, sink) = EventChannel::new();
        let mut team = crew.team(&config()).with_events(sink);

        let report = team.execute(&Goal::new("Create a greeting module")).await.unwrap();

        assert_eq!(report.iterations, 1);
        assert_eq!(report.fix_tasks, 0);
        assert_eq!(report.artifacts, vec!["src/greeting.rs"]);
        assert_eq!(crew.implementer.invocations(), 2);
        assert_eq!(crew.verifier.invocations(), 1);
        assert!(report.summary.contains("[x] Create greeting module"));

        let implementation = team
            .tasks()
            .iter()
            .find(|t| t.kind() == TaskKind::Implement)
            .unwrap();
        assert_eq!(implementation.attempts(), 2);
        assert_eq!(implementation.status(), TaskStatus::Completed);

        let events = channel.drain();
        assert!(events.iter().any(|e| matches!(e, Event::GoalCompleted { iterations: 1, .. })));
    }

    #[tokio::test]
    async fn test_planning_failure_escalates_without_implementation() {
        let crew = Crew::new(vec![], implementer(vec![]), verifier(vec![]));
        let planner = Arc::new(ScriptedWorker::new(WorkerRole::Planner, vec![]).then_error("model unavailable"));
        let mut team = Team::new(
            "core",
            planner,
            Implementers::new(crew.implementer.clone()),
            crew.verifier.clone(),
            &config(),
        );

        let escalation = team.execute(&Goal::new("Create a greeting module")).await.unwrap_err();

        assert!(escalation.reason.contains("plan task"));
        assert_eq!(escalation.unit_id, Some(team.id));
        assert_eq!(crew.implementer.invocations(), 0);
        let root = team.tasks().iter().find(|t| t.kind() == TaskKind::Plan).unwrap();
        assert_eq!(root.status(), TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_settling_unknown_task_does_not_escalate() {
        let crew = Crew::new(vec![], implementer(vec![]), verifier(vec![]));
        let (mut channel, sink) = EventChannel::new();
        let mut team = crew.team(&config()).with_events(sink);

        team.settle_root(TaskId::new(), |t| t.complete(TaskResult::success("done")));

        assert!(channel.drain().is_empty());
        assert!(team.tasks().is_empty());
    }

    #[tokio::test]
    async fn test_iteration_ceiling_escalates() {
        let mut config = config();
        config.team.max_iterations = 2;
        config.retry.max_attempts = 1;
        let crew = Crew::new(
            vec![narrated(GREETING_PLAN)],
            implementer(vec![]).with_fallback(wrote("Wrote src/greeting.rs")),
            verifier(vec![]).with_fallback(narrated("error: 2 tests failed")),
        );
        let mut team = crew.team(&config);

        let escalation = team.execute(&Goal::new("Create a greeting module")).await.unwrap_err();

        assert!(escalation.reason.contains("iteration"));
        assert!(escalation.task_id.is_some());
        assert_eq!(escalation.history.len(), 1);
        assert_eq!(crew.verifier.invocations(), 2);
        // original implementation plus one fix
        assert_eq!(crew.implementer.invocations(), 2);
    }

    #[tokio::test]
    async fn test_failed_verification_spawns_fix_task() {
        let mut config = config();
        config.retry.max_attempts = 1;
        let crew = Crew::new(
            vec![narrated(GREETING_PLAN)],
            implementer(vec![]).with_fallback(wrote("Wrote src/greeting.rs")),
            verifier(vec![
                narrated("error: greet returned the wrong string, 1 test failed"),
                narrated("Ran cargo test: 1 passed"),
            ]),
        );
        let mut team = crew.team(&config);

        let report = team.execute(&Goal::new("Create a greeting module")).await.unwrap();

        assert_eq!(report.iterations, 2);
        assert_eq!(report.fix_tasks, 1);

        let tree = team.tasks();
        let implementation = tree.iter().find(|t| t.kind() == TaskKind::Implement).unwrap();
        let fix = tree.iter().find(|t| t.kind() == TaskKind::Fix).unwrap();
        assert_eq!(fix.parent_id(), Some(implementation.id()));
        assert!(fix
            .context_value(keys::VERIFICATION_FAILURE)
            .unwrap()
            .contains("hard failure"));
        assert_eq!(fix.status(), TaskStatus::Completed);

        let rechecks = tree
            .iter()
            .filter(|t| t.kind() == TaskKind::Verify && t.status() == TaskStatus::Completed)
            .count();
        assert_eq!(rechecks, 1);
        assert!(crew.implementer.requests()[1].prompt.contains("Fix: Run unit tests"));
    }

    #[tokio::test]
    async fn test_container_deploy_insufficiency() {
        let plan = "IMPLEMENTATION TASKS:\n1. Package the api - prepare it for the local runtime\n";
        let crew = Crew::new(
            vec![narrated(plan)],
            implementer(vec![
                narrated("Deployment completed successfully! The api is live."),
                acted("Generated Dockerfile and ran docker build", names::GENERATE_DOCKERFILE),
            ]),
            verifier(vec![]),
        );
        let mut team = crew.team(&config());
        let goal = Goal::new("Deploy the api in a docker container").with_context(keys::DEPLOY_TARGET, "container");

        let report = team.execute(&goal).await.unwrap();
        assert_eq!(report.iterations, 1);

        let requests = crew.implementer.requests();
        assert_eq!(requests[0].forced_capability.as_deref(), Some(names::GENERATE_DOCKERFILE));
        assert_eq!(requests[0].max_rounds, 4);
        assert!(requests[1].prompt.contains("was discarded"));
        assert!(requests[1].prompt.contains("IMPORTANT"));

        let task = team.tasks().iter().find(|t| t.kind() == TaskKind::Implement).unwrap();
        assert_eq!(task.attempts(), 2);
    }

    #[tokio::test]
    async fn test_implementation_failure_escalates_with_history() {
        let plan = "IMPLEMENTATION TASKS:\n1. Add parser - parse input\n2. Add printer - print output\n";
        let crew = Crew::new(
            vec![narrated(plan)],
            implementer(vec![]).with_fallback(narrated("I am unable to access the repository")),
            verifier(vec![]),
        );
        let mut team = crew.team(&config());

        let escalation = team.execute(&Goal::new("Build a parser")).await.unwrap_err();

        assert!(escalation.reason.contains("Add parser"));
        assert_eq!(escalation.history.len(), 3);
        assert!(matches!(escalation.history[0].outcome, AttemptOutcome::Insufficient(_)));
        assert_eq!(crew.implementer.invocations(), 3);

        let printer = team.tasks().iter().find(|t| t.title() == "Add printer").unwrap();
        assert_eq!(printer.status(), TaskStatus::Blocked);
    }

    // === Routing & Side Channel Tests ===

    #[tokio::test]
    async fn test_domain_specialist_routing() {
        let plan = "IMPLEMENTATION TASKS:\n1. Build the signup page - react form component\n2. Add signup endpoint - api handler writing to postgres\n";
        let planner = Arc::new(ScriptedWorker::new(WorkerRole::Planner, vec![narrated(plan)]));
        let generalist = Arc::new(implementer(vec![]).with_fallback(wrote("Wrote src/api/signup.rs")));
        let frontend = Arc::new(implementer(vec![]).with_fallback(wrote("Wrote web/Signup.tsx")));
        let verifier = Arc::new(verifier(vec![]));

        let mut team = Team::new(
            "core",
            planner,
            Implementers::new(generalist.clone()).with_specialist(Domain::Frontend, frontend.clone()),
            verifier,
            &config(),
        );
        team.execute(&Goal::new("Add user signup")).await.unwrap();

        assert_eq!(frontend.invocations(), 1);
        assert!(frontend.requests()[0].prompt.contains("signup page"));
        assert_eq!(generalist.invocations(), 1);
        assert!(generalist.requests()[0].prompt.contains("signup endpoint"));
    }

    #[tokio::test]
    async fn test_bootstrap_project_path_propagates() {
        let crew = Crew::new(
            vec![],
            implementer(vec![
                acted("Scaffolded. Project created at: /work/todo-app", names::SCAFFOLD_PROJECT),
                wrote("Wrote src/App.tsx with the todo list"),
            ]),
            verifier(vec![]),
        );
        let mut team = crew.team(&EngineConfig::default());

        let report = team.execute(&Goal::new("Bootstrap a new todo app")).await.unwrap();

        assert_eq!(report.project_path.as_deref(), Some("/work/todo-app"));
        assert_eq!(crew.planner.invocations(), 0);
        let requests = crew.implementer.requests();
        assert!(requests[1].prompt.contains("project_path: /work/todo-app"));
    }

    #[test]
    fn test_reported_project_path() {
        assert_eq!(
            reported_project_path("Done. Project created at: `/tmp/app`."),
            Some("/tmp/app".to_string())
        );
        assert_eq!(reported_project_path("nothing here"), None);
    }
}
