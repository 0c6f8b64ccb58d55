// File: testing-framework/src/assertions/poll.rs
//
// Bounded waiting primitives. Nothing in the harness sleeps for a fixed time
// waiting on a node: it polls a probe until it holds or a deadline expires,
// and reports the last observed state on expiry.

use crate::error::{HarnessError, Result};
use crate::orchestrator::Clock;
use ln_itest_common::RpcError;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Result of one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    /// Condition holds, stop polling
    Ready(T),
    /// Not yet. Carries a description of what was observed.
    Pending(String),
}

impl<T> Probe<T> {
    /// `Ready(value)` when `cond` holds, else `Pending(observed)`
    pub fn when(cond: bool, value: T, observed: impl Display) -> Self {
        if cond {
            Probe::Ready(value)
        } else {
            Probe::Pending(observed.to_string())
        }
    }
}

/// Read-only probes treat RPC errors as "not yet"
impl<T> From<std::result::Result<T, RpcError>> for Probe<T> {
    fn from(result: std::result::Result<T, RpcError>) -> Self {
        match result {
            Ok(value) => Probe::Ready(value),
            Err(e) => Probe::Pending(format!("rpc error: {}", e)),
        }
    }
}

/// Timeout and interval of a bounded poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub timeout: Duration,
    pub interval: Duration,
}

/// Polls probes on a [`Clock`] until they hold or time runs out.
#[derive(Clone)]
pub struct Poller {
    clock: Arc<dyn Clock>,
    config: PollConfig,
}

impl Poller {
    pub fn new(clock: Arc<dyn Clock>, config: PollConfig) -> Self {
        Self { clock, config }
    }

    pub fn config(&self) -> PollConfig {
        self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Same poller with another overall timeout
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            clock: self.clock.clone(),
            config: PollConfig {
                timeout,
                interval: self.config.interval,
            },
        }
    }

    /// Run `probe` every interval until it is ready.
    ///
    /// The probe always runs at least once, even with a zero timeout. On
    /// expiry the error carries `expected` and the last observation.
    pub async fn wait_until<T, F, Fut>(&self, what: &str, expected: impl Display, mut probe: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Probe<T>>,
    {
        let deadline = self.clock.now() + self.config.timeout;
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let observed = match probe().await {
                Probe::Ready(value) => {
                    if log::log_enabled!(log::Level::Debug) && attempts > 1 {
                        log::debug!("{} held after {} probes", what, attempts);
                    }
                    return Ok(value);
                }
                Probe::Pending(observed) => observed,
            };

            let now = self.clock.now();
            if now >= deadline {
                return Err(HarnessError::timeout(what, self.config.timeout, expected, observed));
            }
            self.clock
                .sleep(self.config.interval.min(deadline - now))
                .await;
        }
    }
}

/// Next message of an update stream, bounded by `deadline`.
///
/// A closed stream is reported as an RPC failure of `call`.
pub async fn recv_within<T>(
    clock: &dyn Clock,
    updates: &mut mpsc::Receiver<T>,
    call: &str,
    deadline: Duration,
) -> Result<T> {
    tokio::select! {
        update = updates.recv() => update.ok_or_else(|| HarnessError::rpc(call, RpcError::StreamClosed)),
        _ = clock.sleep(deadline) => Err(HarnessError::timeout(
            format!("{} update", call),
            deadline,
            "a status update",
            "no update",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::orchestrator::PausedClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn poller(timeout_ms: u64) -> Poller {
        Poller::new(
            Arc::new(PausedClock::new()),
            PollConfig {
                timeout: Duration::from_millis(timeout_ms),
                interval: Duration::from_millis(10),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_ready_after_some_probes() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let value = poller(1_000)
            .wait_until("counter", 3, move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Probe::when(n >= 3, n, n)
            })
            .await
            .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_times_out_with_dump() {
        let start = tokio::time::Instant::now();
        let err = poller(100)
            .wait_until("mempool size", "1 tx", || async { Probe::<()>::Pending("0 tx".into()) })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), FailureKind::Timeout);
        let text = err.to_string();
        assert!(text.contains("mempool size"));
        assert!(text.contains("expected: 1 tx"));
        assert!(text.contains("observed: 0 tx"));
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(start.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_still_probes_once() {
        let value = poller(0)
            .wait_until("ready", "ready", || async { Probe::Ready(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_rpc_errors_are_pending() {
        let probe: Probe<u32> = Err(RpcError::Unavailable("down".into())).into();
        assert!(matches!(probe, Probe::Pending(ref s) if s.contains("down")));
        let probe: Probe<u32> = Ok(1).into();
        assert_eq!(probe, Probe::Ready(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_within() {
        let clock = PausedClock::new();
        let (tx, mut rx) = mpsc::channel::<u8>(1);

        let err = recv_within(&clock, &mut rx, "OpenChannel", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Timeout);

        tx.send(5).await.unwrap();
        assert_eq!(
            recv_within(&clock, &mut rx, "OpenChannel", Duration::from_secs(1))
                .await
                .unwrap(),
            5
        );

        drop(tx);
        let err = recv_within(&clock, &mut rx, "OpenChannel", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Rpc);
    }
}
