//! Task categories: a closed set of tags produced by a pure classifier,
//! mapped to sufficiency requirements, forced first actions and round budgets.

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::capability::{names, InvocationRecord};
use crate::config::RetryConfig;
use crate::task::{keys, Task, TaskKind};

/// Where a deployment is headed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeployTarget {
    LocalContainer,
    Cloud(String),
}

impl DeployTarget {
    /// Encoding used in task and goal context
    pub fn as_context_value(&self) -> String {
        match self {
            DeployTarget::LocalContainer => "container".to_string(),
            DeployTarget::Cloud(name) => format!("cloud:{name}"),
        }
    }

    pub fn from_context_value(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("container") {
            return Some(DeployTarget::LocalContainer);
        }
        value
            .strip_prefix("cloud:")
            .map(|name| DeployTarget::Cloud(name.trim().to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    Scaffold,
    Container,
    CloudDeploy,
    Code,
    Testing,
    Documentation,
    Monitoring,
    Remediation,
    Verification,
    General,
}

impl TaskCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskCategory::Scaffold => "scaffold",
            TaskCategory::Container => "container",
            TaskCategory::CloudDeploy => "cloud_deploy",
            TaskCategory::Code => "code",
            TaskCategory::Testing => "testing",
            TaskCategory::Documentation => "documentation",
            TaskCategory::Monitoring => "monitoring",
            TaskCategory::Remediation => "remediation",
            TaskCategory::Verification => "verification",
            TaskCategory::General => "general",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let all = [
            TaskCategory::Scaffold,
            TaskCategory::Container,
            TaskCategory::CloudDeploy,
            TaskCategory::Code,
            TaskCategory::Testing,
            TaskCategory::Documentation,
            TaskCategory::Monitoring,
            TaskCategory::Remediation,
            TaskCategory::Verification,
            TaskCategory::General,
        ];
        let s = s.trim().to_ascii_lowercase();
        all.into_iter().find(|c| c.as_str() == s)
    }

    /// Behavior for this category
    pub fn profile(&self) -> &'static CategoryProfile {
        match self {
            TaskCategory::Scaffold => &SCAFFOLD,
            TaskCategory::Container => &CONTAINER,
            TaskCategory::CloudDeploy => &CLOUD_DEPLOY,
            TaskCategory::Code => &CODE,
            TaskCategory::Testing => &TESTING,
            TaskCategory::Documentation => &DOCUMENTATION,
            TaskCategory::Monitoring => &MONITORING,
            TaskCategory::Remediation => &REMEDIATION,
            TaskCategory::Verification => &VERIFICATION,
            TaskCategory::General => &GENERAL,
        }
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What counts as having worked a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Text verdict alone decides
    Nothing,
    /// At least one capability call of any kind
    AnyCapability,
    /// At least one call to a capability in the set
    OneOf(&'static [&'static str]),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sufficiency {
    Sufficient,
    Insufficient(String),
}

impl Sufficiency {
    pub fn is_sufficient(&self) -> bool {
        matches!(self, Sufficiency::Sufficient)
    }
}

#[derive(Debug)]
pub struct CategoryProfile {
    pub requirement: Requirement,
    /// Capability forced as the first action of the first attempt
    pub forced_first: Option<&'static str>,
    /// Operationally expensive: fewer exchange rounds per attempt
    pub expensive: bool,
}

impl CategoryProfile {
    pub fn check(&self, category: TaskCategory, record: &InvocationRecord) -> Sufficiency {
        match self.requirement {
            Requirement::Nothing => Sufficiency::Sufficient,
            Requirement::AnyCapability if record.total() > 0 => Sufficiency::Sufficient,
            Requirement::AnyCapability => Sufficiency::Insufficient(format!(
                "no capability was invoked for {category} task; the work was described, not performed"
            )),
            Requirement::OneOf(required) if record.invoked_any(required) => Sufficiency::Sufficient,
            Requirement::OneOf(required) => Sufficiency::Insufficient(format!(
                "{category} task requires one of [{}] but none was invoked",
                required.join(", ")
            )),
        }
    }

    pub fn exchange_rounds(&self, config: &RetryConfig) -> usize {
        if self.expensive {
            config.expensive_exchange_rounds
        } else {
            config.exchange_rounds
        }
    }
}

static SCAFFOLD: CategoryProfile = CategoryProfile {
    requirement: Requirement::OneOf(&[names::SCAFFOLD_PROJECT, names::RUN_COMMAND, names::WRITE_FILE]),
    forced_first: Some(names::SCAFFOLD_PROJECT),
    expensive: false,
};
static CONTAINER: CategoryProfile = CategoryProfile {
    requirement: Requirement::OneOf(&[
        names::WRITE_FILE,
        names::GENERATE_DOCKERFILE,
        names::GENERATE_COMPOSE,
        names::DOCKER_BUILD,
    ]),
    forced_first: Some(names::GENERATE_DOCKERFILE),
    expensive: true,
};
static CLOUD_DEPLOY: CategoryProfile = CategoryProfile {
    requirement: Requirement::OneOf(&[names::CREATE_DEPLOYMENT]),
    forced_first: Some(names::CREATE_DEPLOYMENT),
    expensive: true,
};
static CODE: CategoryProfile = CategoryProfile {
    requirement: Requirement::OneOf(&[names::WRITE_FILE, names::RUN_COMMAND, names::GIT, names::SCAFFOLD_PROJECT]),
    forced_first: None,
    expensive: false,
};
static TESTING: CategoryProfile = CategoryProfile {
    requirement: Requirement::OneOf(&[names::RUN_TESTS, names::RUN_COMMAND, names::WRITE_FILE]),
    forced_first: None,
    expensive: false,
};
static DOCUMENTATION: CategoryProfile = CategoryProfile {
    requirement: Requirement::OneOf(&[names::WRITE_DOC, names::WRITE_FILE]),
    forced_first: Some(names::WRITE_DOC),
    expensive: false,
};
static MONITORING: CategoryProfile = CategoryProfile {
    requirement: Requirement::OneOf(&[names::CHECK_HEALTH, names::READ_LOGS, names::DEPLOYMENT_STATUS]),
    forced_first: Some(names::CHECK_HEALTH),
    expensive: true,
};
static REMEDIATION: CategoryProfile = CategoryProfile {
    requirement: Requirement::OneOf(&[names::RESTART_SERVICE, names::RUN_COMMAND, names::CREATE_DEPLOYMENT]),
    forced_first: None,
    expensive: true,
};
static VERIFICATION: CategoryProfile = CategoryProfile {
    requirement: Requirement::Nothing,
    forced_first: None,
    expensive: false,
};
static GENERAL: CategoryProfile = CategoryProfile {
    requirement: Requirement::AnyCapability,
    forced_first: None,
    expensive: false,
};

/// Keyword rules in priority order
static RULES: Lazy<Vec<(TaskCategory, Regex)>> = Lazy::new(|| {
    let rule = |category, pattern: &str| {
        (
            category,
            Regex::new(&format!(r"(?i)\b(?:{pattern})\b")).expect("category pattern"),
        )
    };
    vec![
        rule(
            TaskCategory::Scaffold,
            r"scaffold\w*|bootstrap\w*|new project|create-react-app|cargo new|npx create|npm init|project skeleton|boilerplate",
        ),
        rule(
            TaskCategory::Container,
            r"docker\w*|container\w*|compose|podman|image build",
        ),
        rule(
            TaskCategory::CloudDeploy,
            r"deploy\w*|aws|gcp|azure|fly\.io|vercel|heroku|netlify|cloud run|lambda|kubernetes|k8s",
        ),
        rule(
            TaskCategory::Monitoring,
            r"monitor\w*|health ?checks?|uptime|alert\w*|metrics|latency",
        ),
        rule(
            TaskCategory::Remediation,
            r"restart\w*|remediat\w*|roll ?back|recover\w*|incident|outage|runbook",
        ),
        rule(
            TaskCategory::Testing,
            r"tests?|testing|unit tests?|coverage|test suite|assertions?",
        ),
        rule(
            TaskCategory::Documentation,
            r"document\w*|readme|docs|changelog|design record",
        ),
        rule(
            TaskCategory::Code,
            r"implement\w*|module|function|class|endpoint|component|refactor\w*|fix\w*|add|create|write|build|code|api|handler|page|service",
        ),
    ]
});

/// Classify a task from its kind, text and context. Pure.
pub fn classify(
    kind: TaskKind,
    title: &str,
    description: &str,
    context: &BTreeMap<String, String>,
) -> TaskCategory {
    if let Some(explicit) = context.get(keys::CATEGORY).and_then(|c| TaskCategory::parse(c)) {
        return explicit;
    }
    if kind == TaskKind::Verify {
        return TaskCategory::Verification;
    }
    if let Some(target) = context
        .get(keys::DEPLOY_TARGET)
        .and_then(|t| DeployTarget::from_context_value(t))
    {
        return match target {
            DeployTarget::LocalContainer => TaskCategory::Container,
            DeployTarget::Cloud(_) => TaskCategory::CloudDeploy,
        };
    }

    let text = format!("{title}\n{description}");
    RULES
        .iter()
        .find(|(_, re)| re.is_match(&text))
        .map(|(category, _)| *category)
        .unwrap_or(TaskCategory::General)
}

pub fn classify_task(task: &Task) -> TaskCategory {
    classify(task.kind(), task.title(), task.description(), task.context())
}
