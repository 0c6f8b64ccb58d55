// File: testing-framework/src/chain/regtest.rs
//
// In-memory regtest chain: UTXO set, mempool, block store and a miner wallet.
//
// Policy kept from a real regtest node:
// - inputs must be confirmed and unspent, including by the mempool
// - coinbase outputs need COINBASE_MATURITY confirmations
// - a non zero input sequence is a relative timelock in blocks
// - outputs may not exceed inputs, the difference goes to the miner

use super::ChainBackend;
use async_trait::async_trait;
use indexmap::IndexMap;
use ln_itest_common::{
    block::Block,
    config::{BLOCK_SUBSIDY, COINBASE_MATURITY},
    crypto::{Hash, KeyPair},
    transaction::{OutPoint, Script, Transaction, TxIn, TxOut},
    Amount, RpcError,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

// Fee paid by the miner wallet on each send
const MINER_FEE: Amount = 1_000;

// Regtest block spacing, also used as a deterministic timestamp source
const BLOCK_INTERVAL_MS: u64 = 600_000;
const GENESIS_TIMESTAMP_MS: u64 = 1_296_688_602_000;

const BLOCK_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct UtxoEntry {
    output: TxOut,
    height: u64,
    coinbase: bool,
}

#[derive(Debug, Clone)]
struct MempoolEntry {
    tx: Transaction,
    fee: Amount,
}

#[derive(Default)]
struct ChainState {
    blocks: Vec<Block>,
    block_index: HashMap<Hash, u64>,
    // BTreeMap keeps miner coin selection deterministic
    utxos: BTreeMap<OutPoint, UtxoEntry>,
    mempool: IndexMap<Hash, MempoolEntry>,
    mempool_spent: HashSet<OutPoint>,
    // txid -> (transaction, confirmation height)
    tx_index: HashMap<Hash, (Transaction, u64)>,
}

impl ChainState {
    fn tip_height(&self) -> u64 {
        self.blocks.len().saturating_sub(1) as u64
    }

    fn tip_hash(&self) -> Hash {
        self.blocks.last().map(|b| b.hash).unwrap_or_else(Hash::zero)
    }

    // Checks `tx` against mempool policy and returns its fee
    fn check_transaction(&self, tx: &Transaction) -> Result<Amount, RpcError> {
        if tx.is_coinbase() {
            return Err(RpcError::rejected("coinbase outside of a block"));
        }
        if tx.inputs.is_empty() || tx.outputs.is_empty() {
            return Err(RpcError::rejected("transaction has no inputs or no outputs"));
        }

        let txid = tx.txid();
        if self.mempool.contains_key(&txid) || self.tx_index.contains_key(&txid) {
            return Err(RpcError::rejected(format!("transaction {} already known", txid)));
        }

        let next_height = self.tip_height() + 1;
        let mut seen = HashSet::with_capacity(tx.inputs.len());
        let mut total_in: Amount = 0;

        for input in &tx.inputs {
            let prev = &input.previous_output;
            if !seen.insert(*prev) {
                return Err(RpcError::rejected(format!("input {} spent twice", prev)));
            }
            if self.mempool_spent.contains(prev) {
                return Err(RpcError::rejected(format!(
                    "input {} already spent by a mempool transaction",
                    prev
                )));
            }
            let entry = self
                .utxos
                .get(prev)
                .ok_or_else(|| RpcError::rejected(format!("missing or spent input {}", prev)))?;

            let confirmations = next_height - entry.height;
            if entry.coinbase && confirmations < COINBASE_MATURITY {
                return Err(RpcError::rejected(format!(
                    "immature coinbase {} ({} of {} confirmations)",
                    prev, confirmations, COINBASE_MATURITY
                )));
            }
            if let Some(delay) = entry.output.script.csv_delay() {
                if input.sequence < delay {
                    return Err(RpcError::rejected(format!(
                        "input {} sequence {} below script delay {}",
                        prev, input.sequence, delay
                    )));
                }
            }
            if input.sequence > 0 && confirmations < input.sequence as u64 {
                return Err(RpcError::NonFinal {
                    input: prev.to_string(),
                    required: input.sequence,
                    current: confirmations,
                });
            }

            total_in = total_in
                .checked_add(entry.output.value)
                .ok_or_else(|| RpcError::rejected("input value overflow"))?;
        }

        let total_out = tx
            .outputs
            .iter()
            .try_fold(0u64, |acc, o| acc.checked_add(o.value))
            .ok_or_else(|| RpcError::rejected("output value overflow"))?;
        if total_out > total_in {
            return Err(RpcError::rejected(format!(
                "outputs {} exceed inputs {}",
                total_out, total_in
            )));
        }

        Ok(total_in - total_out)
    }

    fn add_to_mempool(&mut self, tx: Transaction) -> Result<Hash, RpcError> {
        let fee = self.check_transaction(&tx)?;
        let txid = tx.txid();
        for input in &tx.inputs {
            self.mempool_spent.insert(input.previous_output);
        }
        self.mempool.insert(txid, MempoolEntry { tx, fee });
        Ok(txid)
    }

    fn connect_block(&mut self, block: Block) {
        let height = block.height;
        for tx in &block.transactions {
            let txid = tx.txid();
            let coinbase = tx.is_coinbase();
            if !coinbase {
                for input in &tx.inputs {
                    self.utxos.remove(&input.previous_output);
                }
            }
            for (index, output) in tx.outputs.iter().enumerate() {
                self.utxos.insert(
                    OutPoint::new(txid, index as u32),
                    UtxoEntry {
                        output: output.clone(),
                        height,
                        coinbase,
                    },
                );
            }
            self.tx_index.insert(txid, (tx.clone(), height));
        }
        self.block_index.insert(block.hash, height);
        self.blocks.push(block);
    }

    fn mine_block(&mut self, miner_address: &Hash, include_mempool: bool) -> Block {
        let height = self.tip_height() + 1;
        let mut transactions = Vec::new();
        let mut fees: Amount = 0;

        if include_mempool {
            for (_, entry) in self.mempool.drain(..) {
                fees += entry.fee;
                transactions.push(entry.tx);
            }
            self.mempool_spent.clear();
        }

        let coinbase = Transaction::coinbase(
            height,
            vec![TxOut::new(
                BLOCK_SUBSIDY + fees,
                Script::PayToAddress(*miner_address),
            )],
        );
        transactions.insert(0, coinbase);

        let block = Block::new(
            height,
            self.tip_hash(),
            GENESIS_TIMESTAMP_MS + height * BLOCK_INTERVAL_MS,
            transactions,
        );
        self.connect_block(block.clone());
        block
    }
}

/// Regtest chain living entirely in memory.
pub struct RegtestChain {
    state: RwLock<ChainState>,
    blocks_tx: broadcast::Sender<Block>,
    miner: KeyPair,
    running: AtomicBool,
}

impl RegtestChain {
    /// Chain holding only a genesis block
    pub fn new() -> Self {
        Self::with_miner(KeyPair::from_secret([0x4d; 32]))
    }

    /// Chain whose coinbases pay `miner`
    pub fn with_miner(miner: KeyPair) -> Self {
        let (blocks_tx, _) = broadcast::channel(BLOCK_CHANNEL_CAPACITY);
        let mut state = ChainState::default();

        // Genesis pays an address nobody owns
        let genesis = Block::new(
            0,
            Hash::zero(),
            GENESIS_TIMESTAMP_MS,
            vec![Transaction::coinbase(
                0,
                vec![TxOut::new(BLOCK_SUBSIDY, Script::PayToAddress(Hash::zero()))],
            )],
        );
        state.connect_block(genesis);

        Self {
            state: RwLock::new(state),
            blocks_tx,
            miner,
            running: AtomicBool::new(true),
        }
    }

    /// Address receiving block rewards
    pub fn miner_address(&self) -> Hash {
        self.miner.public_key().address()
    }

    /// Spendable miner balance at the next height
    pub fn miner_balance(&self) -> Amount {
        let state = self.state.read();
        let address = self.miner_address();
        let next_height = state.tip_height() + 1;
        state
            .utxos
            .iter()
            .filter(|(op, e)| {
                e.output.script == Script::PayToAddress(address)
                    && !state.mempool_spent.contains(*op)
                    && (!e.coinbase || next_height - e.height >= COINBASE_MATURITY)
            })
            .map(|(_, e)| e.output.value)
            .sum()
    }

    /// Confirmation height of `txid`, if mined
    pub fn confirmation_height(&self, txid: &Hash) -> Option<u64> {
        self.state.read().tx_index.get(txid).map(|(_, h)| *h)
    }

    fn ensure_running(&self) -> Result<(), RpcError> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RpcError::Unavailable("regtest chain is shut down".to_string()))
        }
    }
}

impl Default for RegtestChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainBackend for RegtestChain {
    async fn generate(&self, n: u32) -> Result<Vec<Hash>, RpcError> {
        self.ensure_running()?;
        let address = self.miner_address();

        let blocks: Vec<Block> = {
            let mut state = self.state.write();
            (0..n).map(|i| state.mine_block(&address, i == 0)).collect()
        };

        if log::log_enabled!(log::Level::Debug) {
            if let Some(last) = blocks.last() {
                log::debug!(
                    "Mined {} block(s), tip {} at height {}",
                    blocks.len(),
                    last.hash,
                    last.height
                );
            }
        }

        let hashes = blocks.iter().map(|b| b.hash).collect();
        for block in blocks {
            // No subscriber is not an error
            let _ = self.blocks_tx.send(block);
        }
        Ok(hashes)
    }

    async fn get_block(&self, hash: &Hash) -> Result<Block, RpcError> {
        self.ensure_running()?;
        let state = self.state.read();
        state
            .block_index
            .get(hash)
            .and_then(|h| state.blocks.get(*h as usize))
            .cloned()
            .ok_or_else(|| RpcError::not_found(format!("block {}", hash)))
    }

    async fn get_block_by_height(&self, height: u64) -> Result<Block, RpcError> {
        self.ensure_running()?;
        self.state
            .read()
            .blocks
            .get(height as usize)
            .cloned()
            .ok_or_else(|| RpcError::not_found(format!("block at height {}", height)))
    }

    async fn get_raw_mempool(&self) -> Result<Vec<Hash>, RpcError> {
        self.ensure_running()?;
        Ok(self.state.read().mempool.keys().copied().collect())
    }

    async fn get_raw_transaction(&self, txid: &Hash) -> Result<Transaction, RpcError> {
        self.ensure_running()?;
        let state = self.state.read();
        if let Some(entry) = state.mempool.get(txid) {
            return Ok(entry.tx.clone());
        }
        state
            .tx_index
            .get(txid)
            .map(|(tx, _)| tx.clone())
            .ok_or_else(|| RpcError::not_found(format!("transaction {}", txid)))
    }

    async fn send_raw_transaction(&self, tx: Transaction) -> Result<Hash, RpcError> {
        self.ensure_running()?;
        let txid = self.state.write().add_to_mempool(tx)?;
        log::debug!("Accepted transaction {} into the mempool", txid);
        Ok(txid)
    }

    async fn get_block_count(&self) -> Result<u64, RpcError> {
        self.ensure_running()?;
        Ok(self.state.read().tip_height())
    }

    async fn send_many(&self, outputs: Vec<(Hash, Amount)>) -> Result<Hash, RpcError> {
        self.ensure_running()?;
        if outputs.is_empty() || outputs.iter().any(|(_, v)| *v == 0) {
            return Err(RpcError::invalid("send_many needs non zero outputs"));
        }
        let needed = outputs
            .iter()
            .try_fold(MINER_FEE, |acc, (_, v)| acc.checked_add(*v))
            .ok_or_else(|| RpcError::invalid("amount overflow"))?;

        let address = self.miner_address();
        let mut state = self.state.write();
        let next_height = state.tip_height() + 1;

        let mut inputs = Vec::new();
        let mut selected: Amount = 0;
        for (outpoint, entry) in state.utxos.iter() {
            if selected >= needed {
                break;
            }
            let mature = !entry.coinbase || next_height - entry.height >= COINBASE_MATURITY;
            if entry.output.script == Script::PayToAddress(address)
                && mature
                && !state.mempool_spent.contains(outpoint)
            {
                inputs.push(TxIn::new(*outpoint));
                selected += entry.output.value;
            }
        }
        if selected < needed {
            return Err(RpcError::InsufficientFunds {
                needed,
                available: selected,
            });
        }

        let mut tx_outputs: Vec<TxOut> = outputs
            .into_iter()
            .map(|(addr, value)| TxOut::new(value, Script::PayToAddress(addr)))
            .collect();
        let change = selected - needed;
        if change > 0 {
            tx_outputs.push(TxOut::new(change, Script::PayToAddress(address)));
        }

        let txid = state.add_to_mempool(Transaction::new(inputs, tx_outputs))?;
        log::debug!("Miner wallet broadcast {}", txid);
        Ok(txid)
    }

    fn subscribe_blocks(&self) -> broadcast::Receiver<Block> {
        self.blocks_tx.subscribe()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn shutdown(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            log::info!("Regtest chain stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ln_itest_common::config::SATOSHI_PER_BITCOIN;

    async fn mature_chain() -> RegtestChain {
        let chain = RegtestChain::new();
        chain.generate(COINBASE_MATURITY as u32 + 5).await.unwrap();
        chain
    }

    fn owner(seed: u8) -> KeyPair {
        KeyPair::from_secret([seed; 32])
    }

    #[tokio::test]
    async fn test_generate_extends_tip() {
        let chain = RegtestChain::new();
        assert_eq!(chain.get_block_count().await.unwrap(), 0);

        let hashes = chain.generate(3).await.unwrap();
        assert_eq!(hashes.len(), 3);
        assert_eq!(chain.get_block_count().await.unwrap(), 3);

        let tip = chain.get_block(&hashes[2]).await.unwrap();
        assert_eq!(tip.height, 3);
        assert_eq!(tip.prev_hash, hashes[1]);
        assert_eq!(chain.get_block_by_height(3).await.unwrap(), tip);
    }

    #[tokio::test]
    async fn test_immature_coinbase_cannot_be_spent() {
        let chain = RegtestChain::new();
        chain.generate(10).await.unwrap();
        let err = chain
            .send_to_address(&owner(1).public_key().address(), SATOSHI_PER_BITCOIN)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::InsufficientFunds { .. }));
    }

    #[tokio::test]
    async fn test_first_block_takes_whole_mempool() {
        let chain = mature_chain().await;
        let addr = owner(1).public_key().address();
        let a = chain.send_to_address(&addr, 1_000_000).await.unwrap();
        let b = chain.send_to_address(&addr, 2_000_000).await.unwrap();
        assert_eq!(chain.get_raw_mempool().await.unwrap(), vec![a, b]);

        let hashes = chain.generate(2).await.unwrap();
        let first = chain.get_block(&hashes[0]).await.unwrap();
        let second = chain.get_block(&hashes[1]).await.unwrap();
        assert!(first.contains(&a) && first.contains(&b));
        assert_eq!(second.transactions.len(), 1);
        assert!(chain.get_raw_mempool().await.unwrap().is_empty());

        // Fees go to the miner
        let coinbase = first.coinbase().unwrap();
        assert_eq!(coinbase.total_output(), BLOCK_SUBSIDY + 2 * MINER_FEE);
    }

    #[tokio::test]
    async fn test_double_spend_rejected() {
        let chain = mature_chain().await;
        let key = owner(2);
        let funding = chain
            .send_to_address(&key.public_key().address(), 10_000)
            .await
            .unwrap();
        chain.generate(1).await.unwrap();

        let prev = OutPoint::new(funding, 0);
        let spend = |value| {
            Transaction::new(
                vec![TxIn::new(prev)],
                vec![TxOut::new(value, Script::PayToAddress(Hash::zero()))],
            )
        };
        chain.send_raw_transaction(spend(9_000)).await.unwrap();
        let err = chain.send_raw_transaction(spend(8_000)).await.unwrap_err();
        assert!(matches!(err, RpcError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_relative_timelock_enforced() {
        let chain = mature_chain().await;
        let key = owner(3);
        let delayed = Script::DelayedPayToKey {
            key: *key.public_key(),
            csv_delay: 4,
        };

        // Lock 10k sat behind a 4 block delay
        let funding = chain
            .send_to_address(&key.public_key().address(), 20_000)
            .await
            .unwrap();
        chain.generate(1).await.unwrap();
        let lock = Transaction::new(
            vec![TxIn::new(OutPoint::new(funding, 0))],
            vec![TxOut::new(10_000, delayed)],
        );
        let lock_txid = chain.send_raw_transaction(lock).await.unwrap();
        chain.generate(1).await.unwrap();

        let sweep = |sequence| {
            Transaction::new(
                vec![TxIn::with_sequence(OutPoint::new(lock_txid, 0), sequence)],
                vec![TxOut::new(9_500, Script::PayToAddress(key.public_key().address()))],
            )
        };

        // Sequence below the script delay never passes
        assert!(matches!(
            chain.send_raw_transaction(sweep(1)).await,
            Err(RpcError::Rejected(_))
        ));

        // One confirmation, the next block would be the second
        let err = chain.send_raw_transaction(sweep(4)).await.unwrap_err();
        assert_eq!(
            err,
            RpcError::NonFinal {
                input: OutPoint::new(lock_txid, 0).to_string(),
                required: 4,
                current: 1,
            }
        );

        chain.generate(2).await.unwrap();
        assert!(chain.send_raw_transaction(sweep(4)).await.is_err());
        chain.generate(1).await.unwrap();
        let txid = chain.send_raw_transaction(sweep(4)).await.unwrap();
        let hashes = chain.generate(1).await.unwrap();
        assert!(chain.get_block(&hashes[0]).await.unwrap().contains(&txid));
    }

    #[tokio::test]
    async fn test_outputs_cannot_exceed_inputs() {
        let chain = mature_chain().await;
        let key = owner(4);
        let funding = chain
            .send_to_address(&key.public_key().address(), 1_000)
            .await
            .unwrap();
        chain.generate(1).await.unwrap();
        let tx = Transaction::new(
            vec![TxIn::new(OutPoint::new(funding, 0))],
            vec![TxOut::new(1_001, Script::PayToAddress(Hash::zero()))],
        );
        assert!(matches!(
            chain.send_raw_transaction(tx).await,
            Err(RpcError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_block_subscription_and_shutdown() {
        let chain = RegtestChain::new();
        let mut blocks = chain.subscribe_blocks();
        let hashes = chain.generate(2).await.unwrap();

        assert_eq!(blocks.recv().await.unwrap().hash, hashes[0]);
        assert_eq!(blocks.recv().await.unwrap().hash, hashes[1]);

        chain.shutdown();
        chain.shutdown();
        assert!(!chain.is_running());
        assert!(matches!(
            chain.get_block_count().await,
            Err(RpcError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_raw_transaction_lookup() {
        let chain = mature_chain().await;
        let txid = chain
            .send_to_address(&owner(5).public_key().address(), 5_000)
            .await
            .unwrap();
        assert_eq!(chain.get_raw_transaction(&txid).await.unwrap().txid(), txid);
        assert_eq!(chain.confirmation_height(&txid), None);

        chain.generate(1).await.unwrap();
        assert_eq!(chain.get_raw_transaction(&txid).await.unwrap().txid(), txid);
        assert_eq!(chain.confirmation_height(&txid), Some(COINBASE_MATURITY + 6));

        assert!(matches!(
            chain.get_raw_transaction(&Hash::zero()).await,
            Err(RpcError::NotFound(_))
        ));
    }
}
