// File: testing-framework/src/orchestrator/clock.rs
//
// Time source for every bounded wait in the harness.
//
// Polling loops, hop latency and deadlines all go through a Clock so tests can
// run against tokio's paused time and finish instantly.

use std::future::Future;
use std::pin::Pin;
use tokio::time::{self, Duration, Instant};

/// Source of "now" and of sleeps for the harness.
pub trait Clock: Send + Sync {
    /// Current instant (real or simulated)
    fn now(&self) -> Instant;

    /// Sleep for `d` on this clock
    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Wall clock, used by the `ln-itest` binary.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        time::Instant::now()
    }

    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(time::sleep(d))
    }
}

/// Clock backed by tokio's paused time.
///
/// The runtime must already be paused (`#[tokio::test(start_paused = true)]`)
/// or be paused through [`PausedClock::pause`]. While paused, tokio
/// auto-advances to the next timer whenever every task is idle, so polling
/// loops complete without real delay.
pub struct PausedClock;

impl PausedClock {
    /// Wrap an already paused runtime
    pub fn new() -> Self {
        Self
    }

    /// Pause a current-thread runtime and wrap it.
    ///
    /// Panics if time is already paused.
    pub fn pause() -> Self {
        time::pause();
        Self
    }

    /// Move simulated time forward by `d`
    pub async fn advance(&self, d: Duration) {
        time::advance(d).await
    }
}

impl Clock for PausedClock {
    fn now(&self) -> Instant {
        time::Instant::now()
    }

    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(time::sleep(d))
    }
}

impl Default for PausedClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_paused_clock_advancement() {
        let clock = Arc::new(PausedClock::pause());
        let start = clock.now();

        clock.advance(Duration::from_secs(1)).await;
        assert_eq!(clock.now() - start, Duration::from_secs(1));

        clock.advance(Duration::from_secs(2)).await;
        assert_eq!(clock.now() - start, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_clock_sleep_auto_advances() {
        let clock: Arc<dyn Clock> = Arc::new(PausedClock::new());
        let start = clock.now();

        // A full minute of polling interval elapses instantly in paused time
        clock.sleep(Duration::from_secs(60)).await;

        assert!(clock.now() - start >= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_system_clock() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let start = clock.now();

        clock.sleep(Duration::from_millis(10)).await;

        assert!(clock.now() - start >= Duration::from_millis(10));
    }
}
