// File: testing-framework/src/scenarios/mod.rs
//
// Named, ordered scenario registry and the runner that executes it.
//
// A scenario is a plain function taking the harness by reference and
// returning a boxed future. Registration order is execution order.

/// Channel funding and balance scenarios
pub mod funding;
/// Unilateral close and timelocked sweep
pub mod force_close;
/// Shared open and close flows
pub mod helpers;
/// Invoice payments, direct and routed
pub mod payments;
/// Run report and exit codes
pub mod report;
/// Sequential execution with failure isolation
pub mod runner;

use crate::error::{HarnessError, Result};
use crate::harness::NetworkHarness;
use futures::future::BoxFuture;
use indexmap::IndexMap;

pub use report::{RunReport, ScenarioOutcome, ScenarioResult};
pub use runner::ScenarioRunner;

/// Body of a scenario
pub type ScenarioFn = for<'a> fn(&'a NetworkHarness) -> BoxFuture<'a, anyhow::Result<()>>;

/// Scenarios by name, in registration order
#[derive(Clone, Default)]
pub struct ScenarioRegistry {
    scenarios: IndexMap<String, ScenarioFn>,
}

impl ScenarioRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in suite, in the order it runs
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let defaults: [(&str, ScenarioFn); 5] = [
            ("basic funding flow", funding::basic_channel_funding),
            ("channel force closure", force_close::channel_force_closure),
            ("channel balance", funding::channel_balance),
            ("single hop invoice", payments::single_hop_invoice),
            ("multi-hop payments", payments::multi_hop_payments),
        ];
        for (name, scenario) in defaults {
            registry.scenarios.insert(name.to_string(), scenario);
        }
        registry
    }

    /// Append a scenario. Names are unique.
    pub fn register(&mut self, name: impl Into<String>, scenario: ScenarioFn) -> Result<()> {
        let name = name.into();
        if self.scenarios.contains_key(&name) {
            return Err(HarnessError::Config(format!("scenario '{}' registered twice", name)));
        }
        self.scenarios.insert(name, scenario);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<ScenarioFn> {
        self.scenarios.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.scenarios.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    /// Scenarios to run, in registration order.
    ///
    /// An empty `filter` selects everything. Unknown names are rejected before
    /// anything is started.
    pub fn select(&self, filter: &[String]) -> Result<Vec<(String, ScenarioFn)>> {
        let unknown: Vec<&str> = filter
            .iter()
            .filter(|name| !self.scenarios.contains_key(name.as_str()))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(HarnessError::Config(format!(
                "unknown scenario(s): {}",
                unknown.join(", ")
            )));
        }

        Ok(self
            .scenarios
            .iter()
            .filter(|(name, _)| filter.is_empty() || filter.contains(name))
            .map(|(name, scenario)| (name.clone(), *scenario))
            .collect())
    }
}
