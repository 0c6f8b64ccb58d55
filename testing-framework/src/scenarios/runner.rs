// File: testing-framework/src/scenarios/runner.rs
//
// Runs selected scenarios one after the other against a single harness.
//
// An error fails its scenario only: the failure is recorded, the mempool is
// flushed and the next scenario runs. A panic is caught at this boundary, the
// harness is torn down and every remaining scenario is skipped. Each scenario
// is bounded by `scenario_timeout`.

use super::report::{RunReport, ScenarioOutcome, ScenarioResult};
use super::{ScenarioFn, ScenarioRegistry};
use crate::config::HarnessConfig;
use crate::error::{classify, FailureKind, Result};
use crate::harness::NetworkHarness;
use crate::orchestrator::RunEnv;
use crate::utilities::ArtifactCollector;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;

pub struct ScenarioRunner {
    registry: ScenarioRegistry,
}

impl ScenarioRunner {
    pub fn new(registry: ScenarioRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ScenarioRegistry {
        &self.registry
    }

    /// Build the harness and run the scenarios named in `filter`, or all of
    /// them when it is empty.
    ///
    /// Unknown names are a usage error returned before the harness is built.
    /// A setup failure is reported, not returned.
    pub async fn run(&self, config: HarnessConfig, env: RunEnv, filter: &[String]) -> Result<RunReport> {
        let selected = self.registry.select(filter)?;
        let mut report = RunReport::new(env.seed());
        log::info!(
            "Running {} scenario(s), seed {:#018x}",
            selected.len(),
            env.seed()
        );

        let harness = match NetworkHarness::new(config, env).await {
            Ok(harness) => harness,
            Err(e) => {
                log::error!("{}", e);
                report.setup_error = Some(e.to_string());
                return Ok(report);
            }
        };
        report.setup_journal = harness.drain_journal();

        let mut panicked: Option<String> = None;
        for (name, scenario) in selected {
            if let Some(culprit) = &panicked {
                log::warn!("Skipping scenario '{}'", name);
                report.results.push(ScenarioResult {
                    outcome: ScenarioOutcome::Skipped {
                        reason: format!("harness torn down after '{}' panicked", culprit),
                    },
                    name,
                    duration_ms: 0,
                    journal: Vec::new(),
                    artifact: None,
                });
                continue;
            }

            let result = run_scenario(&harness, &name, scenario).await;
            if matches!(result.outcome, ScenarioOutcome::Panicked { .. }) {
                panicked = Some(name);
            }
            report.results.push(result);
        }

        harness.tear_down_all();
        log::info!(
            "Run finished: {} passed, {} failed, {} skipped",
            report.passed(),
            report.failed(),
            report.skipped()
        );
        Ok(report)
    }
}

async fn run_scenario(harness: &NetworkHarness, name: &str, scenario: ScenarioFn) -> ScenarioResult {
    log::info!("Running scenario '{}'", name);
    harness.note(format!("=== {} ===", name));
    let mut collector = ArtifactCollector::new(name);
    collector.set_rng_seed(harness.env().seed());

    let clock = harness.env().clock.clone();
    let started = clock.now();
    let limit = harness.config().scenario_timeout();

    let outcome = tokio::select! {
        finished = AssertUnwindSafe(scenario(harness)).catch_unwind() => match finished {
            Ok(Ok(())) => ScenarioOutcome::Passed,
            Ok(Err(err)) => ScenarioOutcome::Failed {
                kind: classify(&err),
                message: format!("{:#}", err),
            },
            Err(panic) => ScenarioOutcome::Panicked {
                message: panic_message(panic),
            },
        },
        _ = clock.sleep(limit) => ScenarioOutcome::Failed {
            kind: FailureKind::Timeout,
            message: format!("scenario did not finish within {:?}", limit),
        },
    };
    let duration_ms = clock.now().duration_since(started).as_millis() as u64;

    let mut journal = harness.drain_journal();
    let mut artifact = None;
    match &outcome {
        ScenarioOutcome::Passed => log::info!("Scenario '{}' passed in {} ms", name, duration_ms),
        ScenarioOutcome::Failed { kind, message } => {
            log::error!("Scenario '{}' failed ({:?}): {}", name, kind, message);
            collector.set_failure(*kind, message.clone());
        }
        ScenarioOutcome::Panicked { message } => {
            log::error!("Scenario '{}' panicked: {}", name, message);
            collector.set_failure(FailureKind::Panic, message.clone());
        }
        ScenarioOutcome::Skipped { .. } => {}
    }

    if !outcome.is_passed() {
        if let Some(dir) = &harness.config().artifacts_dir {
            collector.capture_journal(&journal);
            collector.attach_snapshot(harness.snapshot().await);
            artifact = save_artifact(&collector, dir).await;
        }
    }

    match &outcome {
        ScenarioOutcome::Panicked { .. } => harness.tear_down_all(),
        ScenarioOutcome::Failed { .. } => match harness.flush_mempool().await {
            Ok(flushed) if flushed > 0 => journal.extend(harness.drain_journal()),
            Ok(_) => {}
            Err(e) => log::warn!("Unable to flush mempool after '{}': {}", name, e),
        },
        _ => {}
    }

    ScenarioResult {
        name: name.to_string(),
        outcome,
        duration_ms,
        journal,
        artifact,
    }
}

async fn save_artifact(collector: &ArtifactCollector, dir: &Path) -> Option<std::path::PathBuf> {
    match collector.save(dir).await {
        Ok(path) => {
            let artifact = collector.artifact();
            log::info!("Failure artifact written to {}", path.display());
            if let Some(command) = artifact.replay_command() {
                log::info!("Replay with: {}", command);
            }
            Some(path)
        }
        Err(e) => {
            log::warn!("Unable to write failure artifact: {:#}", e);
            None
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(42u8)), "non-string panic payload");
    }
}
