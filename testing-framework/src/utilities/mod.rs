// File: testing-framework/src/utilities/mod.rs
//
// Testing Utilities

/// Failure artifact collection for debugging and replay
pub mod artifacts;

pub use artifacts::{ArtifactCollector, FailureArtifact};
