// File: testing-framework/src/scenarios/report.rs
//
// Per-scenario outcomes of one run and the process exit code derived from them.

use crate::error::FailureKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Exit code when every scenario passed
pub const EXIT_PASSED: i32 = 0;
/// Exit code when at least one scenario did not pass
pub const EXIT_FAILED: i32 = 1;
/// Exit code for setup failures and usage errors
pub const EXIT_SETUP: i32 = 2;

/// How one scenario ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScenarioOutcome {
    Passed,
    Failed { kind: FailureKind, message: String },
    Panicked { message: String },
    /// Not run because an earlier scenario panicked
    Skipped { reason: String },
}

impl ScenarioOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Passed => "PASS",
            Self::Failed { .. } => "FAIL",
            Self::Panicked { .. } => "PANIC",
            Self::Skipped { .. } => "SKIP",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub outcome: ScenarioOutcome,
    pub duration_ms: u64,
    /// Harness journal recorded while the scenario ran
    pub journal: Vec<String>,
    /// Failure artifact written for this scenario
    pub artifact: Option<PathBuf>,
}

/// Result of a whole run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// RFC 3339 start time
    pub started_at: String,
    pub seed: u64,
    /// Set when the harness could not be built; no scenario ran
    pub setup_error: Option<String>,
    /// Journal of harness setup
    pub setup_journal: Vec<String>,
    pub results: Vec<ScenarioResult>,
}

impl RunReport {
    pub fn new(seed: u64) -> Self {
        Self {
            started_at: chrono::Utc::now().to_rfc3339(),
            seed,
            setup_error: None,
            setup_journal: Vec::new(),
            results: Vec::new(),
        }
    }

    pub fn passed(&self) -> usize {
        self.count(|o| o.is_passed())
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ScenarioOutcome::Failed { .. } | ScenarioOutcome::Panicked { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ScenarioOutcome::Skipped { .. }))
    }

    fn count(&self, pred: impl Fn(&ScenarioOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn outcome_of(&self, name: &str) -> Option<&ScenarioOutcome> {
        self.results.iter().find(|r| r.name == name).map(|r| &r.outcome)
    }

    pub fn all_passed(&self) -> bool {
        self.setup_error.is_none() && self.results.iter().all(|r| r.outcome.is_passed())
    }

    /// 0 when everything passed, 1 when a scenario did not, 2 on setup failure
    pub fn exit_code(&self) -> i32 {
        if self.setup_error.is_some() {
            EXIT_SETUP
        } else if self.all_passed() {
            EXIT_PASSED
        } else {
            EXIT_FAILED
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Print the summary box to stdout
    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║  Integration Run Report                                    ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Seed: {:<51} ║", format!("{:#018x}", self.seed));
        if let Some(err) = &self.setup_error {
            println!("║  Setup: {:<50} ║", "FAILED ✗");
            println!("╚════════════════════════════════════════════════════════════╝\n");
            println!("{}", err);
            return;
        }
        println!(
            "║  Passed: {:<3} Failed: {:<3} Skipped: {:<27} ║",
            self.passed(),
            self.failed(),
            self.skipped()
        );
        println!("╚════════════════════════════════════════════════════════════╝\n");

        for result in &self.results {
            println!("[{:<5}] {} ({} ms)", result.outcome.label(), result.name, result.duration_ms);
            match &result.outcome {
                ScenarioOutcome::Failed { kind, message } => println!("        {:?}: {}", kind, message),
                ScenarioOutcome::Panicked { message } => println!("        {}", message),
                ScenarioOutcome::Skipped { reason } => println!("        {}", reason),
                ScenarioOutcome::Passed => {}
            }
            if let Some(path) = &result.artifact {
                println!("        artifact: {}", path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, outcome: ScenarioOutcome) -> ScenarioResult {
        ScenarioResult {
            name: name.to_string(),
            outcome,
            duration_ms: 10,
            journal: vec![],
            artifact: None,
        }
    }

    #[test]
    fn test_exit_codes() {
        let mut report = RunReport::new(1);
        assert_eq!(report.exit_code(), EXIT_PASSED);

        report.results.push(result("a", ScenarioOutcome::Passed));
        assert_eq!(report.exit_code(), EXIT_PASSED);

        report.results.push(result(
            "b",
            ScenarioOutcome::Failed {
                kind: FailureKind::Timeout,
                message: "no update".into(),
            },
        ));
        assert_eq!(report.exit_code(), EXIT_FAILED);
        assert_eq!((report.passed(), report.failed(), report.skipped()), (1, 1, 0));

        report.setup_error = Some("chain refused".into());
        assert_eq!(report.exit_code(), EXIT_SETUP);
    }

    #[test]
    fn test_outcome_json_is_tagged() {
        let json = serde_json::to_value(ScenarioOutcome::Failed {
            kind: FailureKind::Rpc,
            message: "boom".into(),
        })
        .unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["kind"], "rpc");

        let report = RunReport {
            results: vec![result("a", ScenarioOutcome::Skipped { reason: "x".into() })],
            ..RunReport::new(7)
        };
        let parsed: RunReport = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(parsed.outcome_of("a"), Some(&ScenarioOutcome::Skipped { reason: "x".into() }));
    }
}
