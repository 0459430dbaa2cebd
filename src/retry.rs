//! Retry engine - drives one task to a terminal state.
//!
//! Each attempt classifies the task, builds a prompt (amplified after a
//! discarded or failed attempt), forces the category's first action on the
//! first attempt only, checks sufficiency, then runs the response verifier.
//! Insufficient attempts never complete a task, whatever the text claims.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::category::{classify_task, Sufficiency, TaskCategory};
use crate::channel::{Event, EventSink};
use crate::config::RetryConfig;
use crate::error::Result;
use crate::prompt::{task_prompt, PriorOutcome};
use crate::task::{Task, TaskResult};
use crate::types::TaskId;
use crate::verifier::ResponseVerifier;
use crate::worker::{Worker, WorkerRequest};

/// How one attempt ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    /// Required capabilities were not used; output discarded
    Insufficient(String),
    /// Verifier rejected the output
    Failed(String),
    /// Worker invocation itself failed
    Errored(String),
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Succeeded)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            AttemptOutcome::Succeeded => None,
            AttemptOutcome::Insufficient(r) | AttemptOutcome::Failed(r) | AttemptOutcome::Errored(r) => Some(r),
        }
    }

    fn prior(&self) -> Option<(PriorOutcome, &str)> {
        match self {
            AttemptOutcome::Succeeded => None,
            AttemptOutcome::Insufficient(r) => Some((PriorOutcome::Insufficient, r)),
            AttemptOutcome::Failed(r) => Some((PriorOutcome::Failed, r)),
            AttemptOutcome::Errored(r) => Some((PriorOutcome::Errored, r)),
        }
    }
}

/// History entry for one attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub task_id: TaskId,
    pub task_title: String,
    pub attempt: u32,
    pub category: TaskCategory,
    pub forced: Option<String>,
    pub invocations: u32,
    pub outcome: AttemptOutcome,
    pub finished_at: DateTime<Utc>,
}

/// Terminal result of running a task
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed {
        result: TaskResult,
        history: Vec<AttemptRecord>,
    },
    Failed {
        reason: String,
        history: Vec<AttemptRecord>,
    },
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Completed { .. })
    }

    pub fn history(&self) -> &[AttemptRecord] {
        match self {
            TaskOutcome::Completed { history, .. } | TaskOutcome::Failed { history, .. } => history,
        }
    }

    pub fn into_history(self) -> Vec<AttemptRecord> {
        match self {
            TaskOutcome::Completed { history, .. } | TaskOutcome::Failed { history, .. } => history,
        }
    }

    /// Output of the successful attempt
    pub fn output(&self) -> Option<&str> {
        match self {
            TaskOutcome::Completed { result, .. } => result.output.as_deref(),
            TaskOutcome::Failed { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            TaskOutcome::Completed { .. } => None,
            TaskOutcome::Failed { reason, .. } => Some(reason),
        }
    }
}

/// Runs tasks against workers under a retry budget
#[derive(Debug, Clone, Default)]
pub struct TaskRunner {
    budget: RetryConfig,
    verifier: ResponseVerifier,
    events: EventSink,
}

impl TaskRunner {
    pub fn new(budget: RetryConfig) -> Self {
        Self {
            budget,
            verifier: ResponseVerifier::new(),
            events: EventSink::disabled(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn budget(&self) -> RetryConfig {
        self.budget
    }

    /// Run `task` on `worker` until it completes or exhausts its attempts.
    ///
    /// Errors are reserved for task state violations; worker failures are
    /// recorded as attempts.
    #[instrument(skip(self, task, worker), fields(task_id = %task.id(), title = %task.title()))]
    pub async fn run(&self, task: &mut Task, worker: &dyn Worker) -> Result<TaskOutcome> {
        let category = classify_task(task);
        let profile = category.profile();
        let rounds = profile.exchange_rounds(&self.budget);
        let mut history: Vec<AttemptRecord> = Vec::new();

        info!(%category, role = %worker.role(), "Starting task");
        self.events.emit(Event::TaskStarted {
            task_id: task.id(),
            kind: task.kind(),
            title: task.title().to_string(),
        });

        while task.can_attempt() {
            let attempt = task.begin_attempt()?;
            let prompt = task_prompt(task, category, attempt, history.last().and_then(|h| h.outcome.prior()));
            let forced = if attempt == 1 { profile.forced_first } else { None };

            let mut request = WorkerRequest::new(prompt).with_rounds(rounds);
            if let Some(name) = forced {
                request = request.forcing(name);
            }

            let (outcome, result, invocations) = match worker.invoke(request).await {
                Err(e) => {
                    warn!(attempt, error = %e, "Worker invocation failed");
                    let reason = e.to_string();
                    (AttemptOutcome::Errored(reason.clone()), TaskResult::failure(reason), 0)
                }
                Ok(response) => {
                    let invocations = response.record.total();
                    match profile.check(category, &response.record) {
                        Sufficiency::Insufficient(reason) => {
                            debug!(attempt, reason = %reason, "Attempt discarded as insufficient");
                            let result = TaskResult::failure(reason.clone()).with_output(response.output);
                            (AttemptOutcome::Insufficient(reason), result, invocations)
                        }
                        Sufficiency::Sufficient => {
                            let verdict = self.verifier.verify(&response.output, Some(&response.record));
                            let result = verdict.to_result(&response.output);
                            let outcome = if verdict.success {
                                AttemptOutcome::Succeeded
                            } else {
                                AttemptOutcome::Failed(verdict.reason)
                            };
                            (outcome, result, invocations)
                        }
                    }
                }
            };

            self.events.emit(Event::AttemptFinished {
                task_id: task.id(),
                attempt,
                success: outcome.is_success(),
                reason: outcome.reason().unwrap_or("verified").to_string(),
            });
            history.push(AttemptRecord {
                task_id: task.id(),
                task_title: task.title().to_string(),
                attempt,
                category,
                forced: forced.map(str::to_string),
                invocations,
                outcome: outcome.clone(),
                finished_at: Utc::now(),
            });

            if outcome.is_success() {
                task.complete(result.clone())?;
                info!(attempt, "Task completed");
                self.events.emit(Event::TaskFinished {
                    task_id: task.id(),
                    status: task.status(),
                });
                return Ok(TaskOutcome::Completed { result, history });
            }

            if task.attempts() >= task.max_attempts() {
                task.fail(result)?;
                let reason = format!(
                    "task '{}' failed after {} attempt(s): {}",
                    task.title(),
                    task.attempts(),
                    outcome.reason().unwrap_or("unknown")
                );
                warn!(attempts = task.attempts(), "Task failed");
                self.events.emit(Event::TaskFinished {
                    task_id: task.id(),
                    status: task.status(),
                });
                return Ok(TaskOutcome::Failed { reason, history });
            }

            task.record_attempt(result);
        }

        Ok(TaskOutcome::Failed {
            reason: format!("task '{}' has no attempts remaining", task.title()),
            history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::names;
    use crate::channel::EventChannel;
    use crate::prompt::CORRECTIVE_INSTRUCTION;
    use crate::task::{keys, TaskKind, TaskStatus};
    use crate::test_support::{acted, narrated, wrote, ScriptedWorker};
    use crate::types::{AgentId, WorkerRole};

    fn task(title: &str) -> Task {
        Task::new(TaskKind::Implement, title, "", AgentId::new())
    }

    fn implementer(script: Vec<crate::worker::WorkerResponse>) -> ScriptedWorker {
        ScriptedWorker::new(WorkerRole::Implementer, script)
    }

    // === Attempt Loop Tests ===

    #[tokio::test]
    async fn test_first_attempt_success() {
        let mut task = task("Create greeting module");
        let worker = implementer(vec![wrote("Wrote src/greeting.rs")]);

        let outcome = TaskRunner::default().run(&mut task, &worker).await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.history().len(), 1);
        assert_eq!(task.status(), TaskStatus::Completed);
        assert_eq!(task.attempts(), 1);
        assert_eq!(
            task.result().unwrap().artifacts,
            Some(vec!["src/greeting.rs".to_string()])
        );
    }

    #[tokio::test]
    async fn test_forced_only_on_first_attempt() {
        let mut task = task("Set up the skeleton").with_context(keys::CATEGORY, "scaffold");
        let worker = implementer(vec![
            narrated("I will scaffold the project next."),
            acted("Project created at: /tmp/app", names::SCAFFOLD_PROJECT),
        ]);

        let outcome = TaskRunner::default().run(&mut task, &worker).await.unwrap();
        assert!(outcome.is_success());

        let requests = worker.requests();
        assert_eq!(requests[0].forced_capability.as_deref(), Some(names::SCAFFOLD_PROJECT));
        assert_eq!(requests[1].forced_capability, None);
        assert!(requests[1].prompt.contains(CORRECTIVE_INSTRUCTION));
        assert!(requests[1].prompt.contains("IMPORTANT"));
        assert!(matches!(outcome.history()[0].outcome, AttemptOutcome::Insufficient(_)));
    }

    #[tokio::test]
    async fn test_narration_never_completes() {
        let mut task = task("Deploy the api").with_context(keys::DEPLOY_TARGET, "container");
        let worker = implementer(vec![]).with_fallback(narrated("Deployment completed successfully!"));

        let outcome = TaskRunner::default().run(&mut task, &worker).await.unwrap();

        assert!(!outcome.is_success());
        assert_eq!(worker.invocations(), 3);
        assert!(outcome
            .history()
            .iter()
            .all(|h| matches!(h.outcome, AttemptOutcome::Insufficient(_))));
        assert_eq!(task.status(), TaskStatus::Failed);
        assert!(task.is_terminal());
        assert!(outcome.failure_reason().unwrap().contains("generate_dockerfile"));
    }

    #[tokio::test]
    async fn test_expensive_category_gets_fewer_rounds() {
        let mut task = task("Ship it").with_context(keys::DEPLOY_TARGET, "container");
        let worker = implementer(vec![acted("Generated Dockerfile", names::GENERATE_DOCKERFILE)]);
        TaskRunner::default().run(&mut task, &worker).await.unwrap();
        assert_eq!(worker.requests()[0].max_rounds, 4);

        let mut task = self::task("Add a handler");
        let worker = implementer(vec![wrote("Wrote src/handler.rs")]);
        TaskRunner::default().run(&mut task, &worker).await.unwrap();
        assert_eq!(worker.requests()[0].max_rounds, 8);
    }

    #[tokio::test]
    async fn test_worker_error_counts_as_attempt() {
        let mut task = task("Add a handler");
        let worker = implementer(vec![])
            .then_error("connection reset")
            .with_fallback(wrote("Wrote src/handler.rs"));

        let outcome = TaskRunner::default().run(&mut task, &worker).await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(task.attempts(), 2);
        assert!(matches!(outcome.history()[0].outcome, AttemptOutcome::Errored(_)));
        assert!(worker.requests()[1].prompt.contains("errored"));
    }

    #[tokio::test]
    async fn test_hard_failure_overrides_invocations() {
        let mut task = task("Implement parser");
        let worker = implementer(vec![
            acted("error: build failed", names::RUN_COMMAND),
            wrote("Wrote src/parser.rs"),
        ]);

        let outcome = TaskRunner::default().run(&mut task, &worker).await.unwrap();

        assert!(outcome.is_success());
        assert!(matches!(outcome.history()[0].outcome, AttemptOutcome::Failed(_)));
        assert!(worker.requests()[1].prompt.contains("failed: hard failure"));
    }

    #[tokio::test]
    async fn test_attempt_ceiling_respected() {
        let mut task = task("Implement parser").with_max_attempts(2);
        let worker = implementer(vec![]).with_fallback(narrated("I could not find the file"));

        let outcome = TaskRunner::default().run(&mut task, &worker).await.unwrap();

        assert!(!outcome.is_success());
        assert_eq!(worker.invocations(), 2);
        assert!(!task.can_attempt());
    }

    #[tokio::test]
    async fn test_verification_task_judged_on_text() {
        let mut task = Task::new(TaskKind::Verify, "Run tests", "", AgentId::new());
        let worker = ScriptedWorker::new(WorkerRole::Verifier, vec![narrated("Ran cargo test: 4 passed")]);

        let outcome = TaskRunner::default().run(&mut task, &worker).await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(task.result().unwrap().checks_passed, Some(4));
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let (mut channel, sink) = EventChannel::new();
        let mut task = task("Add a handler");
        let worker = implementer(vec![narrated("thinking"), wrote("Wrote a.rs")]);

        TaskRunner::default()
            .with_events(sink)
            .run(&mut task, &worker)
            .await
            .unwrap();

        let events = channel.drain();
        assert!(matches!(events.first(), Some(Event::TaskStarted { .. })));
        let attempts = events
            .iter()
            .filter(|e| matches!(e, Event::AttemptFinished { .. }))
            .count();
        assert_eq!(attempts, 2);
        assert!(matches!(
            events.last(),
            Some(Event::TaskFinished {
                status: TaskStatus::Completed,
                ..
            })
        ));
    }
}
