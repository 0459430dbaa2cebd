//! Response verifier - judges whether a worker did the work or only described it.
//!
//! Checks run in priority order:
//! 1. successful capability invocations and no hard-failure phrase: success
//! 2. hard-failure phrase: failure
//! 3. soft-failure phrase: failure
//! 4. tool-usage evidence in the text, phrased as done: success
//! 5. anything else, success language included: failure, no evidence of work

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::capability::InvocationRecord;
use crate::task::TaskResult;

/// Reason used when nothing in the output shows work was performed
pub const NO_EVIDENCE_REASON: &str = "no evidence of actual work";

static HARD_FAILURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(\berror:|\bexception\b|permission denied|build failed|compilation failed|failed to compile|traceback \(most recent call last\)|\bfatal:|command not found|no such file or directory|\bpanicked\b|an error occurred|segmentation fault)",
    )
    .expect("hard failure pattern")
});

/// "tests failed" with an optional count; only a nonzero or missing count is a failure
static TESTS_FAILED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\b(\d+|no|zero)\s+)?\btests?\s+failed\b").expect("tests failed pattern")
});

static SOFT_FAILURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(could not|couldn't|unable to|blocked by|not able to|do not have access|don't have access|i would need to)",
    )
    .expect("soft failure pattern")
});

static TOOL_EVIDENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(wrote|written|created|generated|saved|modified|updated|edited|scaffolded|deployed|executed|ran|committed|installed|built)\b",
    )
    .expect("tool evidence pattern")
});

/// Future, intended or negated phrasing in front of an evidence verb
static NOT_DONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(\b(?:will|shall|not|never|going to|plan(?:ning)? to|about to|needs? to|should|would|yet to|intend to|want to)\b|n't\b)",
    )
    .expect("not done pattern")
});

static CLAUSE_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?;:]\s+|\n").expect("clause break pattern"));

static SUCCESS_LANGUAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(completed?|done|success|successful|successfully|passed|finished|implemented)\b")
        .expect("success language pattern")
});

static ARTIFACT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:wrote|written|created|generated|saved|modified|updated|edited)\b(?:\s+(?:to|file|the file|in|at))?\s+`?((?:[\w.-]+/)*[\w-]+\.[A-Za-z0-9]+)",
    )
    .expect("artifact pattern")
});

static PASSED_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+)\s+(?:tests?\s+)?passed").expect("passed pattern"));

static FAILED_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+)\s+(?:tests?\s+)?failed").expect("failed pattern"));

/// Outcome of verifying one worker response. Recomputed per attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationVerdict {
    pub success: bool,
    pub reason: String,
    pub has_hard_failure: bool,
    pub has_soft_failure: bool,
    pub has_tool_evidence: bool,
    pub has_success_language: bool,
}

impl VerificationVerdict {
    /// Turn the verdict into the attempt's result
    pub fn to_result(&self, output: &str) -> TaskResult {
        let base = if self.success {
            TaskResult::success(output)
        } else {
            TaskResult::failure(self.reason.clone()).with_output(output)
        };
        let base = base.with_artifacts(extract_artifacts(output));
        match extract_check_counts(output) {
            Some((run, passed)) => base.with_checks(run, passed),
            None => base,
        }
    }
}

/// Stateless verifier over worker output
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseVerifier;

impl ResponseVerifier {
    pub fn new() -> Self {
        Self
    }

    pub fn verify(&self, output: &str, record: Option<&InvocationRecord>) -> VerificationVerdict {
        verify(output, record)
    }
}

fn first_match(re: &Regex, text: &str) -> Option<String> {
    re.find(text).map(|m| m.as_str().to_lowercase())
}

/// First hard-failure phrase; "0 tests failed" is a clean run
fn hard_failure(text: &str) -> Option<String> {
    if let Some(phrase) = first_match(&HARD_FAILURE, text) {
        return Some(phrase);
    }
    TESTS_FAILED
        .captures_iter(text)
        .find(|caps| match caps.get(1).map(|m| m.as_str().to_ascii_lowercase()) {
            None => true,
            Some(count) => !matches!(count.as_str(), "no" | "zero") && !count.trim_start_matches('0').is_empty(),
        })
        .and_then(|caps| caps.get(0))
        .map(|m| m.as_str().to_lowercase())
}

/// Whether the few words before `start`, within the same clause, say the
/// action has not happened yet
fn not_done_before(text: &str, start: usize) -> bool {
    let prefix = &text[..start];
    let clause = CLAUSE_BREAK
        .find_iter(prefix)
        .last()
        .map_or(prefix, |m| &prefix[m.end()..]);
    let words: Vec<&str> = clause.split_whitespace().collect();
    let window = words[words.len().saturating_sub(8)..].join(" ");
    NOT_DONE.is_match(&window)
}

/// First evidence verb reported as a completed action
fn completed_evidence(text: &str) -> Option<String> {
    TOOL_EVIDENCE
        .find_iter(text)
        .find(|m| !not_done_before(text, m.start()))
        .map(|m| m.as_str().to_lowercase())
}

/// Classify a worker response
pub fn verify(output: &str, record: Option<&InvocationRecord>) -> VerificationVerdict {
    let hard = hard_failure(output);
    let soft = first_match(&SOFT_FAILURE, output);
    let evidence = completed_evidence(output);
    let success_language = SUCCESS_LANGUAGE.is_match(output);
    let successes = record.map(InvocationRecord::successes).unwrap_or(0);

    let mut verdict = VerificationVerdict {
        success: false,
        reason: String::new(),
        has_hard_failure: hard.is_some(),
        has_soft_failure: soft.is_some(),
        has_tool_evidence: evidence.is_some() || successes > 0,
        has_success_language: success_language,
    };

    if successes > 0 && hard.is_none() {
        verdict.success = true;
        verdict.reason = format!("{successes} capability invocation(s) succeeded");
    } else if let Some(phrase) = hard {
        verdict.reason = format!("hard failure detected: '{phrase}'");
    } else if let Some(phrase) = soft {
        verdict.reason = format!("soft failure detected: '{phrase}'");
    } else if let Some(phrase) = evidence {
        verdict.success = true;
        verdict.reason = format!("evidence of work: '{phrase}'");
    } else if success_language {
        verdict.reason = format!("{NO_EVIDENCE_REASON} (success claimed without tool use)");
    } else {
        verdict.reason = NO_EVIDENCE_REASON.to_string();
    }

    verdict
}

/// Paths the output says were written or created, deduplicated in order
pub fn extract_artifacts(output: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for caps in ARTIFACT.captures_iter(output) {
        let claimed = caps.get(0).is_some_and(|m| !not_done_before(output, m.start()));
        if let (true, Some(path)) = (claimed, caps.get(1)) {
            let path = path.as_str().to_string();
            if !out.contains(&path) {
                out.push(path);
            }
        }
    }
    out
}

/// `(run, passed)` when the output reports test counts
pub fn extract_check_counts(output: &str) -> Option<(u32, u32)> {
    let sum = |re: &Regex| -> Option<u32> {
        let mut total = None;
        for caps in re.captures_iter(output) {
            if let Some(n) = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) {
                total = Some(total.unwrap_or(0u32).saturating_add(n));
            }
        }
        total
    };
    let passed = sum(&PASSED_COUNT);
    let failed = sum(&FAILED_COUNT);
    if passed.is_none() && failed.is_none() {
        return None;
    }
    let passed = passed.unwrap_or(0);
    Some((passed.saturating_add(failed.unwrap_or(0)), passed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityOutcome;

    fn record_with(successes: usize, failures: usize) -> InvocationRecord {
        let mut record = InvocationRecord::new();
        for _ in 0..successes {
            record.record("write_file", &CapabilityOutcome::ok("ok"));
        }
        for _ in 0..failures {
            record.record("write_file", &CapabilityOutcome::err("denied"));
        }
        record
    }

    // === Priority Tests ===

    #[test]
    fn test_hard_failure_beats_success_language() {
        let v = verify("Task completed successfully. Error: cannot find module 'x'", None);
        assert!(!v.success);
        assert!(v.has_hard_failure);
        assert!(v.has_success_language);
    }

    #[test]
    fn test_hard_failure_beats_successful_invocation() {
        let record = record_with(2, 0);
        let v = verify("wrote src/app.ts but build failed", Some(&record));
        assert!(!v.success);
        assert!(v.has_hard_failure);
    }

    #[test]
    fn test_successful_invocation_wins_over_soft_failure() {
        let record = record_with(1, 0);
        let v = verify("I could not run the linter, but the file is in place", Some(&record));
        assert!(v.success);
        assert!(v.has_soft_failure);
    }

    #[test]
    fn test_soft_failure() {
        let v = verify("I was unable to locate the config file.", None);
        assert!(!v.success);
        assert!(v.has_soft_failure);
        assert!(!v.has_hard_failure);
        assert!(v.reason.contains("unable to"));
    }

    #[test]
    fn test_success_language_alone_is_not_enough() {
        let v = verify("Task completed", None);
        assert!(!v.success);
        assert!(v.reason.contains(NO_EVIDENCE_REASON));
        assert!(v.has_success_language);
    }

    #[test]
    fn test_plain_narration_fails_without_evidence() {
        let v = verify("I will write the module next and then add tests.", None);
        assert!(!v.success);
        assert_eq!(v.reason, NO_EVIDENCE_REASON);
    }

    #[test]
    fn test_tool_evidence_alone_succeeds() {
        let v = verify("wrote to src/app.ts", None);
        assert!(v.success);
        assert!(v.has_tool_evidence);
        assert!(!v.has_success_language);
    }

    #[test]
    fn test_failed_invocations_only_fall_through_to_text() {
        let record = record_with(0, 2);
        let v = verify("Task completed", Some(&record));
        assert!(!v.success);
        assert!(v.reason.contains(NO_EVIDENCE_REASON));
    }

    #[test]
    fn test_verifier_struct_delegates() {
        let v = ResponseVerifier::new().verify("Ran the test suite: All tests passed", None);
        assert!(v.success);
    }

    #[test]
    fn test_zero_failed_tests_is_clean() {
        let v = verify("Ran cargo test: 5 tests passed, 0 tests failed", None);
        assert!(v.success);
        assert!(!v.has_hard_failure);
        assert!(!verify("Executed the suite, no tests failed", None).has_hard_failure);
    }

    #[test]
    fn test_nonzero_failed_tests_is_hard_failure() {
        let v = verify("Ran cargo test: 3 tests passed, 2 tests failed", None);
        assert!(!v.success);
        assert!(v.has_hard_failure);
        assert!(v.reason.contains("2 tests failed"));
        assert!(verify("Wrote src/a.rs but the tests failed", None).has_hard_failure);
    }

    #[test]
    fn test_future_tense_is_not_evidence() {
        let v = verify("Next I will make sure src/app.rs is created and then run the tests.", None);
        assert!(!v.success);
        assert!(!v.has_tool_evidence);
        assert_eq!(v.reason, NO_EVIDENCE_REASON);
        assert!(!verify("I'm going to have the config updated shortly", None).success);
    }

    #[test]
    fn test_negated_action_is_not_evidence() {
        let v = verify("I have not written any files yet.", None);
        assert!(!v.success);
        assert!(!v.has_tool_evidence);
        assert!(!verify("The module hasn't been created", None).success);
    }

    #[test]
    fn test_negation_in_earlier_clause_does_not_hide_evidence() {
        let v = verify("The old file was not needed. Wrote src/app.rs instead.", None);
        assert!(v.success);
        assert_eq!(v.reason, "evidence of work: 'wrote'");
    }

    // === Extraction Tests ===

    #[test]
    fn test_extract_artifacts() {
        let text = "Wrote to src/greeting.rs and created file tests/greeting_test.rs. Updated `Cargo.toml`. wrote to src/greeting.rs";
        assert_eq!(
            extract_artifacts(text),
            vec!["src/greeting.rs", "tests/greeting_test.rs", "Cargo.toml"]
        );
    }

    #[test]
    fn test_extract_check_counts() {
        assert_eq!(extract_check_counts("12 passed, 2 failed"), Some((14, 12)));
        assert_eq!(extract_check_counts("5 tests passed"), Some((5, 5)));
        assert_eq!(extract_check_counts("no numbers here"), None);
    }

    #[test]
    fn test_huge_counts_saturate() {
        let output = "Wrote src/a.rs. 4294967295 passed, 1 passed, 7 failed";
        assert_eq!(extract_check_counts(output), Some((u32::MAX, u32::MAX)));
        let result = verify(output, None).to_result(output);
        assert_eq!(result.checks_passed, Some(u32::MAX));
    }

    #[test]
    fn test_planned_paths_are_not_artifacts() {
        let text = "Wrote to src/lib.rs. I have not yet created file src/later.rs.";
        assert_eq!(extract_artifacts(text), vec!["src/lib.rs"]);
    }

    #[test]
    fn test_verdict_to_result() {
        let output = "Wrote to src/lib.rs; ran tests: 4 passed";
        let v = verify(output, None);
        let result = v.to_result(output);
        assert!(result.success);
        assert_eq!(result.artifacts, Some(vec!["src/lib.rs".to_string()]));
        assert_eq!(result.checks_run, Some(4));

        let failed = verify("Task completed", None).to_result("Task completed");
        assert!(!failed.success);
        assert!(failed.error.unwrap().contains(NO_EVIDENCE_REASON));
    }
}
