// File: testing-framework/src/assertions/dispatch.rs
//
// Concurrent payments over one shared SendPayment stream.
//
// Responses come back in completion order, not request order. The dispatcher
// owns the receiving half and routes each response by payment hash to the
// task waiting on it. A batch is a fixed set of tasks joined by a barrier that
// races one overall deadline; on expiry the remaining tasks are detached.

use crate::error::{HarnessError, Result};
use crate::node::{PaymentSender, PaymentStream};
use crate::orchestrator::Clock;
use ln_itest_common::{
    crypto::Hash,
    invoice::{SendRequest, SendResponse},
    RpcError,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};

type Waiters = Arc<Mutex<HashMap<Hash, oneshot::Sender<SendResponse>>>>;

/// Correlates responses of a shared payment stream with their requests.
pub struct PaymentDispatcher {
    sender: PaymentSender,
    waiters: Waiters,
    demux: JoinHandle<()>,
}

impl PaymentDispatcher {
    /// Take ownership of `stream` and start routing its responses
    pub fn new(stream: PaymentStream) -> Self {
        let (sender, receiver) = stream.into_split();
        let waiters: Waiters = Arc::new(Mutex::new(HashMap::new()));
        let demux = tokio::spawn(demultiplex(receiver, waiters.clone()));
        Self {
            sender,
            waiters,
            demux,
        }
    }

    /// Send one payment and wait for its own response
    pub async fn pay(&self, request: SendRequest) -> Result<SendResponse> {
        pay(&self.sender, &self.waiters, request).await
    }

    /// Send every request concurrently and wait for all responses within one
    /// overall `deadline`.
    ///
    /// Responses are returned in completion order. The first failed exchange
    /// fails the batch. On deadline expiry the batch fails with a timeout and
    /// unfinished payments are left running, their late responses ignored.
    pub async fn dispatch_all(
        &self,
        requests: Vec<SendRequest>,
        clock: &dyn Clock,
        deadline: Duration,
    ) -> Result<Vec<SendResponse>> {
        let total = requests.len();
        let mut tasks = JoinSet::new();
        for request in requests {
            let sender = self.sender.clone();
            let waiters = self.waiters.clone();
            tasks.spawn(async move { pay(&sender, &waiters, request).await });
        }

        let mut responses = Vec::with_capacity(total);
        let mut expiry = clock.sleep(deadline);

        while !tasks.is_empty() {
            tokio::select! {
                joined = tasks.join_next() => {
                    let Some(joined) = joined else {
                        break;
                    };
                    let outcome = joined.map_err(|e| {
                        HarnessError::Panic(format!("payment task failed: {}", e))
                    });
                    match outcome.and_then(|r| r) {
                        Ok(response) => responses.push(response),
                        Err(e) => {
                            tasks.detach_all();
                            return Err(e);
                        }
                    }
                }
                _ = &mut expiry => {
                    let pending = tasks.len();
                    tasks.detach_all();
                    return Err(HarnessError::timeout(
                        "concurrent payments",
                        deadline,
                        format!("{} response(s)", total),
                        format!("{} response(s), {} still in flight", responses.len(), pending),
                    ));
                }
            }
        }

        if log::log_enabled!(log::Level::Debug) {
            log::debug!("Payment batch of {} completed", total);
        }
        Ok(responses)
    }

    /// Number of payments still waiting for a response
    pub fn in_flight(&self) -> usize {
        self.waiters.lock().len()
    }
}

impl Drop for PaymentDispatcher {
    fn drop(&mut self) {
        self.demux.abort();
        // Detached payments still hold the map; wake them with StreamClosed
        self.waiters.lock().clear();
    }
}

async fn pay(sender: &PaymentSender, waiters: &Waiters, request: SendRequest) -> Result<SendResponse> {
    let payment_hash = request.payment_hash;
    let (tx, rx) = oneshot::channel();
    {
        // Registered before sending so the response cannot arrive first
        let mut waiters = waiters.lock();
        if waiters.contains_key(&payment_hash) {
            return Err(HarnessError::rpc(
                "SendPayment",
                RpcError::invalid(format!("payment {} already in flight", payment_hash)),
            ));
        }
        waiters.insert(payment_hash, tx);
    }

    if let Err(e) = sender.send(request).await {
        waiters.lock().remove(&payment_hash);
        return Err(HarnessError::rpc("SendPayment", e));
    }
    rx.await
        .map_err(|_| HarnessError::rpc("SendPayment", RpcError::StreamClosed))
}

async fn demultiplex(mut receiver: mpsc::Receiver<SendResponse>, waiters: Waiters) {
    while let Some(response) = receiver.recv().await {
        let waiter = waiters.lock().remove(&response.payment_hash);
        match waiter {
            Some(waiter) => {
                // The waiter may have given up already
                let _ = waiter.send(response);
            }
            None => log::warn!(
                "Dropping response for unknown payment {}",
                response.payment_hash
            ),
        }
    }
    // Stream closed: wake every waiter with an error
    waiters.lock().clear();
}
