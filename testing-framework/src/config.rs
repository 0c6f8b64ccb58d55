// File: testing-framework/src/config.rs
//
// Run configuration. Defaults are the compiled-in regtest parameters, so a
// plain `ln-itest` needs no file at all.

use crate::error::{HarnessError, Result};
use crate::orchestrator::rng::seed_from_env;
use ln_itest_common::{
    config::{
        DEFAULT_CLOSING_FEE, DEFAULT_CSV_DELAY, DEFAULT_FUNDING_FEE, DEFAULT_SWEEP_FEE,
        SATOSHI_PER_BITCOIN,
    },
    Amount,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Harness configuration. Durations are stored in milliseconds so a YAML
/// override stays readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Deadline for an open update after the funding block is mined
    pub channel_open_timeout_ms: u64,
    /// Deadline for a close update after the closing block is mined
    pub channel_close_timeout_ms: u64,
    /// Deadline for the generic bounded polls (channel listing, mempool, balances)
    pub poll_timeout_ms: u64,
    /// Interval between two probes of a bounded poll
    pub poll_interval_ms: u64,
    /// Overall deadline of a concurrent payment batch
    pub payment_deadline_ms: u64,
    /// Simulated forwarding latency of a single hop
    pub hop_latency_ms: u64,
    /// Upper bound on one scenario, setup excluded
    pub scenario_timeout_ms: u64,
    /// Relative timelock on force-close outputs
    pub csv_delay: u32,
    /// Number of confirmed 1 BTC outputs given to each seed node
    pub seed_outputs: u32,
    /// Value of each seed output
    pub seed_output_value: Amount,
    /// Mature coinbases available to the miner wallet after setup
    pub spendable_blocks: u64,
    /// Flat fee of a funding transaction
    pub funding_fee: Amount,
    /// Flat fee of a cooperative closing transaction, paid by the funder
    pub closing_fee: Amount,
    /// Flat fee of a timelocked sweep
    pub sweep_fee: Amount,
    /// Where failure artifacts are written, none when unset
    pub artifacts_dir: Option<PathBuf>,
    /// RNG seed, random when unset
    pub rng_seed: Option<u64>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            channel_open_timeout_ms: 5_000,
            channel_close_timeout_ms: 5_000,
            poll_timeout_ms: 5_000,
            poll_interval_ms: 20,
            payment_deadline_ms: 10_000,
            hop_latency_ms: 5,
            scenario_timeout_ms: 120_000,
            csv_delay: DEFAULT_CSV_DELAY,
            seed_outputs: 10,
            seed_output_value: SATOSHI_PER_BITCOIN,
            spendable_blocks: 50,
            funding_fee: DEFAULT_FUNDING_FEE,
            closing_fee: DEFAULT_CLOSING_FEE,
            sweep_fee: DEFAULT_SWEEP_FEE,
            artifacts_dir: None,
            rng_seed: None,
        }
    }
}

impl HarnessConfig {
    /// Load a YAML file. Missing keys keep their defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml_str(&text)
    }

    /// Parse a YAML document. Missing keys keep their defaults.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(text).map_err(|e| HarnessError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `LN_ITEST_SEED` on top of the file value
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(seed) = seed_from_env() {
            self.rng_seed = Some(seed);
        }
        self
    }

    /// Reject values that would make bounded waits meaningless
    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("channel_open_timeout_ms", self.channel_open_timeout_ms),
            ("channel_close_timeout_ms", self.channel_close_timeout_ms),
            ("poll_timeout_ms", self.poll_timeout_ms),
            ("poll_interval_ms", self.poll_interval_ms),
            ("payment_deadline_ms", self.payment_deadline_ms),
            ("scenario_timeout_ms", self.scenario_timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(HarnessError::Config(format!("{} must be non zero", name)));
            }
        }
        if self.poll_interval_ms > self.poll_timeout_ms {
            return Err(HarnessError::Config(
                "poll_interval_ms must not exceed poll_timeout_ms".to_string(),
            ));
        }
        if self.seed_outputs == 0 || self.seed_output_value == 0 {
            return Err(HarnessError::Config(
                "seed nodes need at least one funded output".to_string(),
            ));
        }
        if self.spendable_blocks == 0 {
            return Err(HarnessError::Config(
                "spendable_blocks must be non zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Deadline for the open update
    pub fn channel_open_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_open_timeout_ms)
    }

    /// Deadline for the close update
    pub fn channel_close_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_close_timeout_ms)
    }

    /// Deadline for generic polls
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Interval between probes
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Deadline of a payment batch
    pub fn payment_deadline(&self) -> Duration {
        Duration::from_millis(self.payment_deadline_ms)
    }

    /// Per-hop forwarding latency
    pub fn hop_latency(&self) -> Duration {
        Duration::from_millis(self.hop_latency_ms)
    }

    /// Upper bound of a scenario
    pub fn scenario_timeout(&self) -> Duration {
        Duration::from_millis(self.scenario_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_is_valid() {
        let config = HarnessConfig::default();
        config.validate().unwrap();
        assert_eq!(config.csv_delay, 4);
        assert_eq!(config.poll_interval(), Duration::from_millis(20));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = HarnessConfig::from_yaml_str("hop_latency_ms: 0\ncsv_delay: 6\n").unwrap();
        assert_eq!(config.hop_latency_ms, 0);
        assert_eq!(config.csv_delay, 6);
        assert_eq!(config.seed_outputs, HarnessConfig::default().seed_outputs);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = HarnessConfig::from_yaml_str("poll_timeout_ms: 0\n").unwrap_err();
        assert!(err.to_string().contains("poll_timeout_ms"));
    }

    #[test]
    fn test_unknown_yaml_type_rejected() {
        assert!(HarnessConfig::from_yaml_str("csv_delay: four\n").is_err());
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "rng_seed: 42").unwrap();
        writeln!(file, "artifacts_dir: /tmp/ln-itest").unwrap();

        let config = HarnessConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.rng_seed, Some(42));
        assert_eq!(config.artifacts_dir, Some(PathBuf::from("/tmp/ln-itest")));

        let missing = HarnessConfig::from_yaml_file(Path::new("/nonexistent/ln-itest.yaml"));
        assert!(matches!(missing, Err(HarnessError::Config(_))));
    }
}
