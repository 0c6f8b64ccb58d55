// File: testing-framework/src/error.rs
//
// Failure taxonomy of the harness. Scenarios return anyhow errors; the runner
// walks the chain and classifies by the first HarnessError it finds.

use ln_itest_common::RpcError;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the harness, the assertion library and the runner.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Fatal to the whole run, no scenario is executed
    #[error("Harness setup failed: {0}")]
    Setup(String),

    /// A node or chain call returned an error. Never retried when mutating.
    #[error("RPC {call} failed: {source}")]
    Rpc {
        /// Name of the failing call
        call: String,
        /// Error returned by the node or chain
        #[source]
        source: RpcError,
    },

    /// A bounded wait ran out of time
    #[error("Timeout waiting for {what} after {after:?} (expected: {expected}, observed: {observed})")]
    Timeout {
        /// What was awaited
        what: String,
        /// Deadline that expired
        after: Duration,
        /// Expected state
        expected: String,
        /// Last observed state
        observed: String,
    },

    /// A check did not hold
    #[error("Assertion failed: {message} (expected: {expected}, observed: {observed})")]
    Assertion {
        /// What was checked
        message: String,
        /// Expected state
        expected: String,
        /// Observed state
        observed: String,
    },

    /// A scenario panicked and was caught at the runner boundary
    #[error("Scenario panicked: {0}")]
    Panic(String),

    /// Rejected configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result alias used across the harness
pub type Result<T> = std::result::Result<T, HarnessError>;

impl HarnessError {
    /// Setup failure with a message
    pub fn setup(message: impl Display) -> Self {
        Self::Setup(message.to_string())
    }

    /// Wrap an RPC error with the name of the call
    pub fn rpc(call: impl Into<String>, source: RpcError) -> Self {
        Self::Rpc {
            call: call.into(),
            source,
        }
    }

    /// Assertion failure with an expected/observed dump
    pub fn assertion(message: impl Into<String>, expected: impl Display, observed: impl Display) -> Self {
        Self::Assertion {
            message: message.into(),
            expected: expected.to_string(),
            observed: observed.to_string(),
        }
    }

    /// Timeout with an expected/observed dump
    pub fn timeout(what: impl Into<String>, after: Duration, expected: impl Display, observed: impl Display) -> Self {
        Self::Timeout {
            what: what.into(),
            after,
            expected: expected.to_string(),
            observed: observed.to_string(),
        }
    }

    /// Category reported for this error
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Setup(_) | Self::Config(_) => FailureKind::Setup,
            Self::Rpc { .. } => FailureKind::Rpc,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Assertion { .. } => FailureKind::Assertion,
            Self::Panic(_) => FailureKind::Panic,
        }
    }
}

/// Category of a scenario failure in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Harness could not be built
    Setup,
    /// RPC call failed
    Rpc,
    /// Bounded wait expired
    Timeout,
    /// Check did not hold
    Assertion,
    /// Scenario panicked
    Panic,
    /// Anything not raised by the harness
    Other,
}

/// Classify an anyhow chain by the first HarnessError in it
pub fn classify(err: &anyhow::Error) -> FailureKind {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<HarnessError>())
        .map(HarnessError::kind)
        .unwrap_or(FailureKind::Other)
}

/// Attach the call name to an RPC result
pub trait RpcResultExt<T> {
    /// Convert `RpcError` into `HarnessError::Rpc { call, .. }`
    fn rpc(self, call: &str) -> Result<T>;
}

impl<T> RpcResultExt<T> for std::result::Result<T, RpcError> {
    fn rpc(self, call: &str) -> Result<T> {
        self.map_err(|source| HarnessError::rpc(call, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_classify_through_context() {
        let err: anyhow::Result<()> = Err(HarnessError::timeout(
            "channel open",
            Duration::from_secs(5),
            "open update",
            "no update",
        ))
        .context("opening alice -> bob");

        let err = err.unwrap_err();
        assert_eq!(classify(&err), FailureKind::Timeout);
        assert!(format!("{:#}", err).contains("channel open"));
    }

    #[test]
    fn test_classify_foreign_error() {
        let err = anyhow::anyhow!("something else");
        assert_eq!(classify(&err), FailureKind::Other);
    }

    #[test]
    fn test_rpc_ext_names_call() {
        let res: std::result::Result<(), RpcError> = Err(RpcError::StreamClosed);
        let err = res.rpc("SendPayment").unwrap_err();
        assert_eq!(err.kind(), FailureKind::Rpc);
        assert_eq!(err.to_string(), "RPC SendPayment failed: Stream was closed");
    }

    #[test]
    fn test_assertion_dump() {
        let err = HarnessError::assertion("channel balance", 50_000_000u64, 0u64);
        assert_eq!(
            err.to_string(),
            "Assertion failed: channel balance (expected: 50000000, observed: 0)"
        );
    }
}
