// File: testing-framework/src/assertions/chain.rs
//
// Chain-side assertions: transaction inclusion, mempool contents and sweeps.

use super::poll::Probe;
use crate::error::{HarnessError, Result};
use crate::harness::NetworkHarness;
use crate::invariants;
use ln_itest_common::{block::Block, crypto::Hash, transaction::Transaction};

/// `txid` is one of `block`'s transactions
pub fn assert_tx_in_block(block: &Block, txid: &Hash) -> Result<()> {
    if block.contains(txid) {
        return Ok(());
    }
    let listed: Vec<String> = block.txids().iter().map(Hash::to_hex).collect();
    Err(HarnessError::assertion(
        format!("transaction in block {} at height {}", block.hash, block.height),
        txid,
        format!("[{}]", listed.join(", ")),
    ))
}

/// Every input of `tx` spends an output of `parent`
pub fn assert_spends_only_from(tx: &Transaction, parent: &Hash) -> Result<()> {
    invariants::check_spends_only_from(tx, parent)
        .map_err(|v| HarnessError::assertion("sweep inputs", format!("outputs of {}", parent), v))
}

/// Single-shot mempool size check
pub async fn assert_mempool_len(harness: &NetworkHarness, expected: usize) -> Result<Vec<Hash>> {
    let mempool = harness.get_raw_mempool().await?;
    if mempool.len() != expected {
        return Err(HarnessError::assertion(
            "mempool size",
            expected,
            format!("{} {:?}", mempool.len(), mempool),
        ));
    }
    Ok(mempool)
}

/// Poll until the mempool holds at least `at_least` transactions, return them
pub async fn wait_for_mempool(harness: &NetworkHarness, at_least: usize) -> Result<Vec<Hash>> {
    let chain = harness.chain();
    harness
        .poller()
        .wait_until("mempool", format!(">= {} transaction(s)", at_least), move || async move {
            match chain.get_raw_mempool().await {
                Ok(mempool) => {
                    let size = mempool.len();
                    Probe::when(size >= at_least, mempool, format!("{} transaction(s)", size))
                }
                Err(e) => Probe::Pending(e.to_string()),
            }
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use ln_itest_common::transaction::{OutPoint, Script, TxIn, TxOut};

    fn block_with(tx: Transaction) -> Block {
        Block::new(5, Hash::zero(), 0, vec![Transaction::coinbase(5, vec![]), tx])
    }

    #[test]
    fn test_tx_in_block() {
        let tx = Transaction::new(
            vec![TxIn::new(OutPoint::new(Hash::new([1; 32]), 0))],
            vec![TxOut::new(10, Script::PayToAddress(Hash::zero()))],
        );
        let block = block_with(tx.clone());
        assert!(assert_tx_in_block(&block, &tx.txid()).is_ok());

        let err = assert_tx_in_block(&block, &Hash::new([2; 32])).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Assertion);
        assert!(err.to_string().contains(&tx.txid().to_hex()));
    }

    #[test]
    fn test_sweep_check_reports_parent() {
        let parent = Hash::new([3; 32]);
        let tx = Transaction::new(
            vec![TxIn::new(OutPoint::new(Hash::new([4; 32]), 1))],
            vec![TxOut::new(10, Script::PayToAddress(Hash::zero()))],
        );
        let err = assert_spends_only_from(&tx, &parent).unwrap_err();
        assert!(err.to_string().contains(&parent.to_hex()));
    }
}
