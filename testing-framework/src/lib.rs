//! # Lightning Network Integration Harness
//!
//! Brings up a regtest chain and a small network of payment-channel nodes,
//! then runs named end-to-end scenarios against them: channel funding,
//! cooperative and forced closes, and invoice payments over one or more hops.
//!
//! ## Layout
//!
//! - **chain**: regtest chain backend and the driver scenarios mine with
//! - **node**: RPC surface of a payment node and the in-process nodes serving it
//! - **harness**: the run context owning chain, nodes and their channels
//! - **assertions**: bounded polling and state checks, never mutating
//! - **scenarios**: the registry, the built-in suite and the runner
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ln_itest_framework::prelude::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_default_suite() {
//!     let runner = ScenarioRunner::new(ScenarioRegistry::with_defaults());
//!     let report = runner
//!         .run(HarnessConfig::default(), RunEnv::paused(0xa3f5c8e1b2d94706), &[])
//!         .await
//!         .unwrap();
//!     assert!(report.all_passed());
//! }
//! ```
//!
//! ## Determinism
//!
//! Every bounded wait goes through a [`Clock`], and node identities and
//! preimages come from a seeded [`TestRng`]. A failing run prints its seed;
//! `LN_ITEST_SEED` replays it.

#![warn(clippy::all)]

/// Bounded polling and state checks
pub mod assertions;

/// Regtest chain backend and driver
pub mod chain;

/// Harness configuration
pub mod config;

/// Failure taxonomy
pub mod error;

/// Run context shared by scenarios
pub mod harness;

/// Pure checks over channel and chain state
pub mod invariants;

/// Payment node RPC and in-process nodes
pub mod node;

/// Clock and seeded RNG
pub mod orchestrator;

/// Scenario registry, built-in suite and runner
pub mod scenarios;

/// Failure artifacts
pub mod utilities;

/// Convenient re-exports for common usage
pub mod prelude;

pub use config::HarnessConfig;
pub use error::{HarnessError, Result};
pub use harness::NetworkHarness;
pub use orchestrator::{Clock, PausedClock, RunEnv, SystemClock, TestRng};
pub use scenarios::{RunReport, ScenarioRegistry, ScenarioRunner};

/// Framework version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
