// File: testing-framework/src/chain/mod.rs
//
// Chain surface consumed by the harness and by the simulated nodes.

/// Serialized owner of chain height for one run
pub mod driver;
/// In-memory regtest backend
pub mod regtest;

use async_trait::async_trait;
use ln_itest_common::{
    block::Block,
    crypto::Hash,
    transaction::Transaction,
    Amount, RpcError,
};
use tokio::sync::broadcast;

pub use driver::ChainDriver;
pub use regtest::RegtestChain;

/// RPC surface of a regtest blockchain node.
///
/// Mining goes through [`ChainDriver`] so chain height has a single writer;
/// nodes only read blocks and submit transactions.
#[async_trait]
pub trait ChainBackend: Send + Sync {
    /// Mine `n` blocks. The first one takes every mempool transaction.
    async fn generate(&self, n: u32) -> Result<Vec<Hash>, RpcError>;

    /// Block by hash
    async fn get_block(&self, hash: &Hash) -> Result<Block, RpcError>;

    /// Block on the active chain at `height`
    async fn get_block_by_height(&self, height: u64) -> Result<Block, RpcError>;

    /// Txids currently in the mempool, in arrival order
    async fn get_raw_mempool(&self) -> Result<Vec<Hash>, RpcError>;

    /// Transaction from the mempool or from a block
    async fn get_raw_transaction(&self, txid: &Hash) -> Result<Transaction, RpcError>;

    /// Validate and add a transaction to the mempool
    async fn send_raw_transaction(&self, tx: Transaction) -> Result<Hash, RpcError>;

    /// Height of the tip
    async fn get_block_count(&self) -> Result<u64, RpcError>;

    /// Pay several addresses from the backend's own wallet in one transaction
    async fn send_many(&self, outputs: Vec<(Hash, Amount)>) -> Result<Hash, RpcError>;

    /// Pay one address from the backend's own wallet
    async fn send_to_address(&self, address: &Hash, amount: Amount) -> Result<Hash, RpcError> {
        self.send_many(vec![(*address, amount)]).await
    }

    /// Every connected block, in height order
    fn subscribe_blocks(&self) -> broadcast::Receiver<Block>;

    /// False once shut down
    fn is_running(&self) -> bool;

    /// Stop serving. Calling it again is a no-op.
    fn shutdown(&self);
}
