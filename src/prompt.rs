//! Prompt builders for planning and task attempts.

use std::fmt::Write;

use crate::category::{Requirement, TaskCategory};
use crate::planner::DesignRecord;
use crate::task::{Task, TaskKind};
use crate::types::Goal;

/// Section markers the planner parses back out of the reply
pub mod markers {
    pub const IMPLEMENTATION: &str = "IMPLEMENTATION TASKS:";
    pub const VERIFICATION: &str = "VERIFICATION TASKS:";
    pub const ORDER: &str = "EXECUTION ORDER:";
    pub const OVERVIEW: &str = "OVERVIEW:";
    pub const REQUIREMENTS: &str = "REQUIREMENTS:";
    pub const APPROACH: &str = "APPROACH:";
    pub const ACCEPTANCE: &str = "ACCEPTANCE CRITERIA:";
}

pub const CORRECTIVE_INSTRUCTION: &str = "You described the work instead of performing it. \
Do not narrate a plan. Emit a structured capability call that performs the action, \
then report what was actually done.";

/// Why the previous attempt did not count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorOutcome {
    Insufficient,
    Failed,
    Errored,
}

/// Prompt for one attempt at a task
pub fn task_prompt(
    task: &Task,
    category: TaskCategory,
    attempt: u32,
    previous: Option<(PriorOutcome, &str)>,
) -> String {
    let mut out = String::new();
    let verb = match task.kind() {
        TaskKind::Verify => "Verify",
        TaskKind::Fix => "Fix",
        TaskKind::Review => "Review",
        TaskKind::Plan => "Plan",
        TaskKind::Implement => "Implement",
    };
    let _ = writeln!(out, "{verb}: {}", task.title());
    if !task.description().is_empty() {
        let _ = writeln!(out, "\n{}", task.description());
    }
    if !task.context().is_empty() {
        let _ = writeln!(out, "\nContext:");
        for (key, value) in task.context() {
            let _ = writeln!(out, "- {key}: {value}");
        }
    }

    if task.kind() == TaskKind::Verify {
        let _ = writeln!(
            out,
            "\nRun the checks that prove the work is correct and report the concrete results."
        );
    }

    if attempt > 1 {
        if let Some((outcome, reason)) = previous {
            let _ = writeln!(out, "\nAttempt {attempt} of {}.", task.max_attempts());
            let label = match outcome {
                PriorOutcome::Insufficient => "was discarded",
                PriorOutcome::Failed => "failed",
                PriorOutcome::Errored => "errored",
            };
            let _ = writeln!(out, "The previous attempt {label}: {reason}");
            let _ = writeln!(out, "{CORRECTIVE_INSTRUCTION}");
            if outcome == PriorOutcome::Insufficient {
                if let Requirement::OneOf(required) = category.profile().requirement {
                    let _ = writeln!(
                        out,
                        "IMPORTANT: this {category} task is only complete once you call one of: {}.",
                        required.join(", ")
                    );
                }
            }
        }
    }
    out
}

/// Prompt asking for a short design record
pub fn design_prompt(goal: &Goal) -> String {
    format!(
        "Write a short design record for this goal.\n\nGoal: {}\n\n\
Use exactly these sections:\n{}\n{}\n{}\n{}",
        goal.text,
        markers::OVERVIEW,
        markers::REQUIREMENTS,
        markers::APPROACH,
        markers::ACCEPTANCE
    )
}

/// Prompt asking for a structured decomposition
pub fn decomposition_prompt(goal: &Goal, design: Option<&DesignRecord>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Break this goal into ordered sub-tasks.\n\nGoal: {}", goal.text);
    for (key, value) in &goal.context {
        let _ = writeln!(out, "- {key}: {value}");
    }
    if let Some(design) = design {
        let _ = writeln!(out, "\nStay consistent with the design record:\n{}", design.to_markdown());
    }
    let _ = write!(
        out,
        "\nReply with these sections:\n{}\n1. <title> - <description>\n{}\n1. <title> - <description>\n{}\nI1, I2, V1",
        markers::IMPLEMENTATION,
        markers::VERIFICATION,
        markers::ORDER
    );
    out
}
