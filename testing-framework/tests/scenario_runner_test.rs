// Runner behaviour over the built-in suite and over scenarios that fail,
// panic or hang.

use futures::future::{BoxFuture, FutureExt};
use ln_itest_framework::assertions::assert_mempool_len;
use ln_itest_framework::error::{FailureKind, HarnessError};
use ln_itest_framework::scenarios::report::{EXIT_FAILED, EXIT_PASSED, EXIT_SETUP};
use ln_itest_framework::scenarios::ScenarioOutcome;
use ln_itest_framework::utilities::ArtifactCollector;
use ln_itest_framework::{HarnessConfig, NetworkHarness, RunEnv, ScenarioRegistry, ScenarioRunner};
use std::time::Duration;
use tempfile::TempDir;

const SEED: u64 = 0xa3f5c8e1b2d94706;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn fast_config() -> HarnessConfig {
    HarnessConfig {
        seed_outputs: 3,
        spendable_blocks: 10,
        ..HarnessConfig::default()
    }
}

fn abandon_open(harness: &NetworkHarness) -> BoxFuture<'_, anyhow::Result<()>> {
    async move {
        harness.open_channel(harness.alice(), harness.bob(), 20_000, 1).await?;
        Err(HarnessError::assertion("abandoned open", "confirmed", "in mempool").into())
    }
    .boxed()
}

fn mempool_is_empty(harness: &NetworkHarness) -> BoxFuture<'_, anyhow::Result<()>> {
    async move {
        assert_mempool_len(harness, 0).await?;
        Ok(())
    }
    .boxed()
}

fn deliberate_panic(harness: &NetworkHarness) -> BoxFuture<'_, anyhow::Result<()>> {
    async move {
        assert_eq!(harness.nodes().len(), 0, "deliberate panic");
        Ok(())
    }
    .boxed()
}

fn never_finishes(harness: &NetworkHarness) -> BoxFuture<'_, anyhow::Result<()>> {
    async move {
        harness.env().clock.sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
    .boxed()
}

#[tokio::test(start_paused = true)]
async fn test_default_suite_passes() {
    init_logging();
    let runner = ScenarioRunner::new(ScenarioRegistry::with_defaults());
    let report = runner.run(fast_config(), RunEnv::paused(SEED), &[]).await.unwrap();

    for result in &report.results {
        assert_eq!(result.outcome, ScenarioOutcome::Passed, "{}", result.name);
    }
    assert_eq!(report.results.len(), 5);
    assert_eq!(report.exit_code(), EXIT_PASSED);
    assert!(!report.setup_journal.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_default_suite_on_multi_thread_runtime() {
    init_logging();
    let config = HarnessConfig {
        hop_latency_ms: 1,
        poll_interval_ms: 5,
        ..fast_config()
    };
    let runner = ScenarioRunner::new(ScenarioRegistry::with_defaults());
    let report = runner.run(config, RunEnv::system(SEED), &[]).await.unwrap();
    assert!(report.all_passed(), "{}", report.to_json().unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_filter_runs_selected_scenarios_only() {
    let runner = ScenarioRunner::new(ScenarioRegistry::with_defaults());
    let filter = vec!["single hop invoice".to_string()];
    let report = runner.run(fast_config(), RunEnv::paused(SEED), &filter).await.unwrap();

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.outcome_of("single hop invoice"), Some(&ScenarioOutcome::Passed));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_scenario_is_usage_error() {
    let runner = ScenarioRunner::new(ScenarioRegistry::with_defaults());
    let err = runner
        .run(fast_config(), RunEnv::paused(SEED), &["teleport".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::Config(_)));
}

#[tokio::test(start_paused = true)]
async fn test_setup_failure_runs_nothing() {
    let config = HarnessConfig {
        poll_interval_ms: 10_000,
        poll_timeout_ms: 1_000,
        ..fast_config()
    };
    let runner = ScenarioRunner::new(ScenarioRegistry::with_defaults());
    let report = runner.run(config, RunEnv::paused(SEED), &[]).await.unwrap();

    assert!(report.setup_error.is_some());
    assert!(report.results.is_empty());
    assert_eq!(report.exit_code(), EXIT_SETUP);
}

#[tokio::test(start_paused = true)]
async fn test_failure_is_isolated_and_mempool_flushed() {
    init_logging();
    let artifacts = TempDir::new().unwrap();
    let config = HarnessConfig {
        artifacts_dir: Some(artifacts.path().to_path_buf()),
        ..fast_config()
    };

    let mut registry = ScenarioRegistry::new();
    registry.register("abandon open", abandon_open).unwrap();
    registry.register("mempool is empty", mempool_is_empty).unwrap();
    let report = ScenarioRunner::new(registry)
        .run(config, RunEnv::paused(SEED), &[])
        .await
        .unwrap();

    match report.outcome_of("abandon open") {
        Some(ScenarioOutcome::Failed { kind, message }) => {
            assert_eq!(*kind, FailureKind::Assertion);
            assert!(message.contains("abandoned open"));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(report.outcome_of("mempool is empty"), Some(&ScenarioOutcome::Passed));
    assert_eq!(report.exit_code(), EXIT_FAILED);

    let failed = &report.results[0];
    assert!(failed.journal.iter().any(|line| line.contains("generated 1 block")));
    let artifact = ArtifactCollector::load(failed.artifact.as_ref().unwrap()).await.unwrap();
    assert_eq!(artifact.metadata.rng_seed, Some(SEED));
    assert_eq!(artifact.metadata.failure_kind, Some(FailureKind::Assertion));
    let snapshot = artifact.snapshot.unwrap();
    assert_eq!(snapshot.mempool.len(), 1);
    assert_eq!(snapshot.nodes.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_panic_tears_down_and_skips_the_rest() {
    let mut registry = ScenarioRegistry::new();
    registry.register("mempool is empty", mempool_is_empty).unwrap();
    registry.register("deliberate panic", deliberate_panic).unwrap();
    registry.register("never reached", mempool_is_empty).unwrap();

    let report = ScenarioRunner::new(registry)
        .run(fast_config(), RunEnv::paused(SEED), &[])
        .await
        .unwrap();

    assert_eq!(report.outcome_of("mempool is empty"), Some(&ScenarioOutcome::Passed));
    match report.outcome_of("deliberate panic") {
        Some(ScenarioOutcome::Panicked { message }) => assert!(message.contains("deliberate panic")),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(matches!(
        report.outcome_of("never reached"),
        Some(ScenarioOutcome::Skipped { .. })
    ));
    assert_eq!((report.passed(), report.failed(), report.skipped()), (1, 1, 1));
}

#[tokio::test(start_paused = true)]
async fn test_scenario_timeout_fails_and_continues() {
    let config = HarnessConfig {
        scenario_timeout_ms: 1_000,
        ..fast_config()
    };
    let mut registry = ScenarioRegistry::new();
    registry.register("never finishes", never_finishes).unwrap();
    registry.register("mempool is empty", mempool_is_empty).unwrap();

    let report = ScenarioRunner::new(registry)
        .run(config, RunEnv::paused(SEED), &[])
        .await
        .unwrap();

    assert!(matches!(
        report.outcome_of("never finishes"),
        Some(ScenarioOutcome::Failed { kind: FailureKind::Timeout, .. })
    ));
    assert_eq!(report.outcome_of("mempool is empty"), Some(&ScenarioOutcome::Passed));
}
