// File: testing-framework/src/chain/driver.rs
//
// ChainDriver owns the run's chain. `generate` is the only path that moves the
// tip and it is serialized through one mining lock.

use super::{ChainBackend, RegtestChain};
use crate::error::{HarnessError, Result, RpcResultExt};
use ln_itest_common::{
    block::Block,
    config::COINBASE_MATURITY,
    crypto::Hash,
    transaction::Transaction,
    Amount,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

/// Sole writer of chain height for one harness run.
pub struct ChainDriver {
    backend: Arc<dyn ChainBackend>,
    mining_lock: Mutex<()>,
    torn_down: AtomicBool,
}

impl ChainDriver {
    /// Drive an existing backend
    pub fn new(backend: Arc<dyn ChainBackend>) -> Self {
        Self {
            backend,
            mining_lock: Mutex::new(()),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Drive a fresh in-memory regtest chain
    pub fn regtest() -> Self {
        Self::new(Arc::new(RegtestChain::new()))
    }

    /// Backend handle handed to the simulated nodes
    pub fn backend(&self) -> Arc<dyn ChainBackend> {
        self.backend.clone()
    }

    /// Mine enough blocks that `spendable_blocks` coinbases are mature.
    /// Any failure here is a setup failure.
    pub async fn set_up(&self, spendable_blocks: u64) -> Result<()> {
        if !self.backend.is_running() {
            return Err(HarnessError::setup("chain backend is not running"));
        }
        let blocks = COINBASE_MATURITY + spendable_blocks;
        let count = u32::try_from(blocks)
            .map_err(|_| HarnessError::setup(format!("cannot mine {} setup blocks", blocks)))?;

        self.generate(count)
            .await
            .map_err(|e| HarnessError::setup(format!("unable to mine setup blocks: {}", e)))?;

        log::info!(
            "Chain driver ready at height {} ({} mature coinbases)",
            blocks,
            spendable_blocks
        );
        Ok(())
    }

    /// Mine exactly `n` blocks and return their hashes
    pub async fn generate(&self, n: u32) -> Result<Vec<Hash>> {
        let _guard = self.mining_lock.lock().await;
        let hashes = self.backend.generate(n).await.rpc("Generate")?;
        if hashes.len() != n as usize {
            return Err(HarnessError::assertion(
                "Generate returned a wrong number of blocks",
                n,
                hashes.len(),
            ));
        }
        Ok(hashes)
    }

    /// Block by hash
    pub async fn get_block(&self, hash: &Hash) -> Result<Block> {
        self.backend.get_block(hash).await.rpc("GetBlock")
    }

    /// Mempool txids in arrival order
    pub async fn get_raw_mempool(&self) -> Result<Vec<Hash>> {
        self.backend.get_raw_mempool().await.rpc("GetRawMempool")
    }

    /// Transaction by id
    pub async fn get_raw_transaction(&self, txid: &Hash) -> Result<Transaction> {
        self.backend
            .get_raw_transaction(txid)
            .await
            .rpc("GetRawTransaction")
    }

    /// Current tip height
    pub async fn block_count(&self) -> Result<u64> {
        self.backend.get_block_count().await.rpc("GetBlockCount")
    }

    /// Pay `address` from the miner wallet. The transaction is left in the mempool.
    pub async fn send_coins_to(&self, address: &Hash, amount: Amount) -> Result<Hash> {
        self.backend
            .send_to_address(address, amount)
            .await
            .rpc("SendToAddress")
    }

    /// Pay several addresses from the miner wallet in one transaction
    pub async fn send_many(&self, outputs: Vec<(Hash, Amount)>) -> Result<Hash> {
        self.backend.send_many(outputs).await.rpc("SendMany")
    }

    /// Block notifications
    pub fn subscribe_blocks(&self) -> broadcast::Receiver<Block> {
        self.backend.subscribe_blocks()
    }

    /// Whether `tear_down` already ran
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// Stop the backend. Idempotent.
    pub fn tear_down(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.backend.shutdown();
        log::info!("Chain driver torn down");
    }
}

impl Drop for ChainDriver {
    fn drop(&mut self) {
        self.tear_down();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    #[tokio::test]
    async fn test_set_up_matures_coinbases() {
        let driver = ChainDriver::regtest();
        driver.set_up(3).await.unwrap();
        assert_eq!(driver.block_count().await.unwrap(), COINBASE_MATURITY + 3);

        let txid = driver
            .send_coins_to(&Hash::new([1; 32]), 100_000)
            .await
            .unwrap();
        assert_eq!(driver.get_raw_mempool().await.unwrap(), vec![txid]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_generate_is_serialized() {
        let driver = Arc::new(ChainDriver::regtest());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let driver = driver.clone();
            handles.push(tokio::spawn(async move { driver.generate(5).await }));
        }

        let mut all = Vec::new();
        for handle in handles {
            let hashes = handle.await.unwrap().unwrap();
            // Each call got a contiguous run of heights
            let first = driver.get_block(&hashes[0]).await.unwrap().height;
            for (i, hash) in hashes.iter().enumerate() {
                assert_eq!(driver.get_block(hash).await.unwrap().height, first + i as u64);
            }
            all.extend(hashes);
        }
        assert_eq!(driver.block_count().await.unwrap(), 40);
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 40);
    }

    #[tokio::test]
    async fn test_tear_down_is_idempotent() {
        let driver = ChainDriver::regtest();
        driver.tear_down();
        driver.tear_down();
        assert!(driver.is_torn_down());

        let err = driver.generate(1).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Rpc);

        let err = driver.set_up(1).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Setup);
    }
}
