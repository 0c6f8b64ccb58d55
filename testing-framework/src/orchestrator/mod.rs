// File: testing-framework/src/orchestrator/mod.rs
//
// Orchestrator Module
//
// Time and randomness for one harness run. Every source of non-determinism in
// the harness flows through the pair held by `RunEnv`.

/// Clock abstractions for bounded waits
pub mod clock;
/// Seeded random number generation for keys and preimages
pub mod rng;

use std::sync::Arc;

pub use clock::{Clock, PausedClock, SystemClock};
pub use rng::TestRng;

/// Clock and RNG shared by the harness, its nodes and the assertion helpers.
///
/// Built once per run. Cloning is cheap and every clone sees the same clock
/// and the same random stream.
///
/// ```rust,ignore
/// #[tokio::test(start_paused = true)]
/// async fn replayable() {
///     let env = RunEnv::paused(0xa3f5c8e1b2d94706);
///     let preimage = env.rng.gen_preimage();
/// }
/// ```
#[derive(Clone)]
pub struct RunEnv {
    /// Time source (SystemClock for real runs, PausedClock in tests)
    pub clock: Arc<dyn Clock>,
    /// Seeded RNG
    pub rng: Arc<TestRng>,
}

impl RunEnv {
    /// Wall clock time with the given seed
    pub fn system(seed: u64) -> Self {
        Self {
            clock: Arc::new(SystemClock),
            rng: Arc::new(TestRng::with_seed(seed)),
        }
    }

    /// Wall clock time, seed from `LN_ITEST_SEED` or random
    pub fn system_from_env() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            rng: Arc::new(TestRng::new_from_env_or_random()),
        }
    }

    /// Paused tokio time with the given seed. The runtime must already be paused.
    pub fn paused(seed: u64) -> Self {
        Self {
            clock: Arc::new(PausedClock::new()),
            rng: Arc::new(TestRng::with_seed(seed)),
        }
    }

    /// Seed to print for replay
    pub fn seed(&self) -> u64 {
        self.rng.seed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_paused_env_is_deterministic() {
        let a = RunEnv::paused(99);
        let b = RunEnv::paused(99);
        assert_eq!(a.seed(), 99);
        assert_eq!(a.rng.gen_preimage(), b.rng.gen_preimage());

        let start = a.clock.now();
        a.clock.sleep(Duration::from_secs(3600)).await;
        assert!(a.clock.now() - start >= Duration::from_secs(3600));
    }

    #[test]
    fn test_clones_share_rng() {
        let env = RunEnv::system(5);
        let clone = env.clone();
        let fresh = TestRng::with_seed(5);
        assert_eq!(env.rng.gen::<u64>(), fresh.gen::<u64>());
        // The clone continues the same stream
        assert_eq!(clone.rng.gen::<u64>(), fresh.gen::<u64>());
    }
}
