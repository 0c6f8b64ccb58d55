// File: testing-framework/src/utilities/artifacts.rs
//
// Failure Artifact Collection
//
// When a scenario fails the runner writes one JSON file holding the failure,
// the RNG seed, the run journal and a snapshot of chain and nodes, enough to
// replay the run with the same identities and preimages.

use crate::error::FailureKind;
use crate::harness::HarnessSnapshot;
use crate::orchestrator::rng::SEED_ENV_VAR;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Metadata needed to reproduce a failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Scenario name
    pub scenario: String,
    /// RNG seed of the run
    pub rng_seed: Option<u64>,
    /// When the artifact was written (RFC 3339)
    pub timestamp: String,
    /// Time spent in the scenario
    pub duration_ms: u64,
    /// Failure category
    pub failure_kind: Option<FailureKind>,
    /// Failure message with its context chain
    pub failure_reason: Option<String>,
}

/// Complete failure artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureArtifact {
    pub metadata: ArtifactMetadata,
    /// Chain and node state right after the failure, when it could be taken
    pub snapshot: Option<HarnessSnapshot>,
    /// Harness journal of the scenario
    pub journal: Vec<String>,
}

impl FailureArtifact {
    /// Command line that replays the run with the same seed
    pub fn replay_command(&self) -> Option<String> {
        self.metadata.rng_seed.map(|seed| {
            format!(
                "{}={:#018x} ln-itest --scenario '{}'",
                SEED_ENV_VAR, seed, self.metadata.scenario
            )
        })
    }
}

/// Collects failure state for one scenario.
///
/// ```rust,ignore
/// let mut collector = ArtifactCollector::new("channel force closure");
/// collector.set_rng_seed(harness.env().seed());
/// collector.set_failure(FailureKind::Timeout, format!("{:#}", err));
/// collector.attach_snapshot(harness.snapshot().await);
/// let path = collector.save("./artifacts").await?;
/// ```
pub struct ArtifactCollector {
    metadata: ArtifactMetadata,
    snapshot: Option<HarnessSnapshot>,
    journal: Vec<String>,
    start_time: std::time::Instant,
}

impl ArtifactCollector {
    pub fn new(scenario: impl Into<String>) -> Self {
        Self {
            metadata: ArtifactMetadata {
                scenario: scenario.into(),
                rng_seed: None,
                timestamp: chrono::Utc::now().to_rfc3339(),
                duration_ms: 0,
                failure_kind: None,
                failure_reason: None,
            },
            snapshot: None,
            journal: Vec::new(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn set_rng_seed(&mut self, seed: u64) {
        self.metadata.rng_seed = Some(seed);
    }

    pub fn set_failure(&mut self, kind: FailureKind, reason: impl Into<String>) {
        self.metadata.failure_kind = Some(kind);
        self.metadata.failure_reason = Some(reason.into());
    }

    pub fn attach_snapshot(&mut self, snapshot: HarnessSnapshot) {
        self.snapshot = Some(snapshot);
    }

    pub fn capture_journal(&mut self, lines: &[String]) {
        self.journal.extend_from_slice(lines);
    }

    /// Artifact as collected so far
    pub fn artifact(&self) -> FailureArtifact {
        let mut metadata = self.metadata.clone();
        metadata.duration_ms = self.start_time.elapsed().as_millis() as u64;
        FailureArtifact {
            metadata,
            snapshot: self.snapshot.clone(),
            journal: self.journal.clone(),
        }
    }

    /// Write the artifact as pretty JSON under `output_dir` and return its path
    pub async fn save(&self, output_dir: impl AsRef<Path>) -> Result<PathBuf> {
        let artifact = self.artifact();

        let output_dir = output_dir.as_ref();
        fs::create_dir_all(output_dir)
            .await
            .context("Failed to create artifact directory")?;

        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S%3f");
        let filename = format!("{}_{}.json", file_stem(&artifact.metadata.scenario), timestamp);
        let filepath = output_dir.join(filename);

        let json = serde_json::to_string_pretty(&artifact).context("Failed to serialize artifact")?;
        let mut file = fs::File::create(&filepath)
            .await
            .context("Failed to create artifact file")?;
        file.write_all(json.as_bytes())
            .await
            .context("Failed to write artifact data")?;
        file.flush().await.context("Failed to flush artifact file")?;

        Ok(filepath)
    }

    /// Read an artifact back
    pub async fn load(filepath: impl AsRef<Path>) -> Result<FailureArtifact> {
        let filepath = filepath.as_ref();
        let content = fs::read_to_string(filepath)
            .await
            .with_context(|| format!("Failed to read artifact {}", filepath.display()))?;
        serde_json::from_str(&content).context("Failed to parse artifact JSON")
    }
}

// Scenario names have spaces, keep file names shell friendly
fn file_stem(scenario: &str) -> String {
    scenario
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}
