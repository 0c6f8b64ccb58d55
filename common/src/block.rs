use crate::{
    crypto::{hash_parts, Hash},
    transaction::Transaction,
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub hash: Hash,
    pub height: u64,
    pub prev_hash: Hash,
    // Milliseconds since the unix epoch
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(height: u64, prev_hash: Hash, timestamp: u64, transactions: Vec<Transaction>) -> Self {
        let hash = Self::compute_hash(height, &prev_hash, timestamp, &transactions);
        Self {
            hash,
            height,
            prev_hash,
            timestamp,
            transactions,
        }
    }

    fn compute_hash(height: u64, prev_hash: &Hash, timestamp: u64, transactions: &[Transaction]) -> Hash {
        let txids: Vec<u8> = transactions
            .iter()
            .flat_map(|tx| tx.txid().to_bytes())
            .collect();
        hash_parts(&[
            &height.to_le_bytes(),
            prev_hash.as_bytes(),
            &timestamp.to_le_bytes(),
            &txids,
        ])
    }

    pub fn txids(&self) -> Vec<Hash> {
        self.transactions.iter().map(Transaction::txid).collect()
    }

    pub fn contains(&self, txid: &Hash) -> bool {
        self.transactions.iter().any(|tx| tx.txid() == *txid)
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_hash_commits_to_transactions() {
        let cb1 = Transaction::coinbase(1, vec![]);
        let cb2 = Transaction::coinbase(2, vec![]);
        let a = Block::new(1, Hash::zero(), 0, vec![cb1.clone()]);
        let b = Block::new(1, Hash::zero(), 0, vec![cb2]);
        assert_ne!(a.hash, b.hash);
        assert!(a.contains(&cb1.txid()));
        assert_eq!(a.coinbase(), Some(&cb1));
        assert_eq!(a.txids(), vec![cb1.txid()]);
    }
}
