//! Domain routing of implementation work to specialized implementers

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::task::{keys, Task};
use crate::worker::Worker;

static FRONTEND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(ui|ux|frontend|front-end|react|vue|svelte|angular|css|html|tailwind|page|component|button|form|layout|styl\w*|view|screen|browser)\b",
    )
    .expect("frontend pattern")
});

static BACKEND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(api|backend|back-end|server|database|db|sql|postgres\w*|redis|endpoint|handler|auth\w*|queue|schema|migration|rest|graphql|grpc)\b",
    )
    .expect("backend pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Frontend,
    Backend,
    General,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Frontend => "frontend",
            Domain::Backend => "backend",
            Domain::General => "general",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "frontend" | "front-end" | "ui" => Some(Domain::Frontend),
            "backend" | "back-end" | "server" => Some(Domain::Backend),
            "general" | "generalist" => Some(Domain::General),
            _ => None,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context keys that carry identifiers or locations rather than wording
const OPAQUE_KEYS: [&str; 3] = [keys::DOMAIN, keys::VERIFIES, keys::PROJECT_PATH];

/// Domain of a task: explicit hint first, then vocabulary of the title,
/// description and context. Mixed vocabulary goes to whichever side has
/// more hits.
pub fn detect_domain(task: &Task) -> Domain {
    if let Some(hint) = task.context_value(keys::DOMAIN).and_then(Domain::parse) {
        return hint;
    }
    let mut text = format!("{}\n{}", task.title(), task.description());
    for (key, value) in task.context() {
        if !OPAQUE_KEYS.contains(&key.as_str()) {
            text.push('\n');
            text.push_str(value);
        }
    }
    let front = FRONTEND.find_iter(&text).count();
    let back = BACKEND.find_iter(&text).count();
    match (front, back) {
        (0, 0) => Domain::General,
        (f, b) if f > b => Domain::Frontend,
        (f, b) if b > f => Domain::Backend,
        _ => Domain::General,
    }
}

/// Implementers of a team: a generalist plus optional specialists
#[derive(Clone)]
pub struct Implementers {
    generalist: Arc<dyn Worker>,
    specialists: HashMap<Domain, Arc<dyn Worker>>,
}

impl Implementers {
    pub fn new(generalist: Arc<dyn Worker>) -> Self {
        Self {
            generalist,
            specialists: HashMap::new(),
        }
    }

    pub fn with_specialist(mut self, domain: Domain, worker: Arc<dyn Worker>) -> Self {
        self.specialists.insert(domain, worker);
        self
    }

    /// Worker for a task; falls back to the generalist
    pub fn select(&self, task: &Task) -> (Domain, &Arc<dyn Worker>) {
        let domain = detect_domain(task);
        match self.specialists.get(&domain) {
            Some(worker) => (domain, worker),
            None => (domain, &self.generalist),
        }
    }

    pub fn generalist(&self) -> &Arc<dyn Worker> {
        &self.generalist
    }

    pub fn len(&self) -> usize {
        1 + self.specialists.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

impl fmt::Debug for Implementers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Implementers")
            .field("generalist", &self.generalist.id())
            .field("specialists", &self.specialists.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskKind;
    use crate::test_support::ScriptedWorker;
    use crate::types::{AgentId, WorkerRole};

    fn task(title: &str) -> Task {
        Task::new(TaskKind::Implement, title, "", AgentId::new())
    }

    #[test]
    fn test_vocabulary_detection() {
        assert_eq!(detect_domain(&task("Build the login page component")), Domain::Frontend);
        assert_eq!(detect_domain(&task("Add a users endpoint backed by postgres")), Domain::Backend);
        assert_eq!(detect_domain(&task("Rename a variable")), Domain::General);
    }

    #[test]
    fn test_hint_wins() {
        let t = task("Build the login page component").with_context(keys::DOMAIN, "backend");
        assert_eq!(detect_domain(&t), Domain::Backend);
    }

    #[test]
    fn test_context_wording_counts() {
        let fix = task("Fix the failing check")
            .with_context(keys::VERIFICATION_FAILURE, "POST /users endpoint returned 500 from the api handler");
        assert_eq!(detect_domain(&fix), Domain::Backend);

        let located = task("Rename a variable").with_context(keys::PROJECT_PATH, "/work/web-ui");
        assert_eq!(detect_domain(&located), Domain::General);
    }

    #[test]
    fn test_select_falls_back_to_generalist() {
        let generalist: Arc<dyn Worker> = Arc::new(ScriptedWorker::new(WorkerRole::Implementer, vec![]));
        let frontend: Arc<dyn Worker> = Arc::new(ScriptedWorker::new(WorkerRole::Implementer, vec![]));
        let implementers =
            Implementers::new(generalist.clone()).with_specialist(Domain::Frontend, frontend.clone());

        let (domain, worker) = implementers.select(&task("Style the button"));
        assert_eq!(domain, Domain::Frontend);
        assert_eq!(worker.id(), frontend.id());

        let (domain, worker) = implementers.select(&task("Add an api handler"));
        assert_eq!(domain, Domain::Backend);
        assert_eq!(worker.id(), generalist.id());
        assert_eq!(implementers.len(), 2);
    }
}
