// File: testing-framework/src/node/wallet.rs
//
// Single-key on-chain wallet. It learns about coins by scanning connected
// blocks and locks the outputs it spends until they are seen in a block.

use ln_itest_common::{
    block::Block,
    crypto::{Hash, PublicKey},
    node::WalletBalance,
    transaction::{OutPoint, Script, Transaction, TxIn, TxOut},
    Amount, RpcError,
};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WalletCoin {
    value: Amount,
    confirmed: bool,
}

/// Coins paying the node's address.
#[derive(Debug)]
pub struct Wallet {
    key: PublicKey,
    address: Hash,
    coins: BTreeMap<OutPoint, WalletCoin>,
    locked: HashSet<OutPoint>,
}

impl Wallet {
    pub fn new(key: PublicKey) -> Self {
        Self {
            address: key.address(),
            key,
            coins: BTreeMap::new(),
            locked: HashSet::new(),
        }
    }

    pub fn address(&self) -> Hash {
        self.address
    }

    /// Apply a connected block: drop spent coins, add new ones paying us.
    /// Returns true when the confirmed balance changed.
    pub fn apply_block(&mut self, block: &Block) -> bool {
        let before = self.balance().confirmed_balance;
        for tx in &block.transactions {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    self.coins.remove(&input.previous_output);
                    self.locked.remove(&input.previous_output);
                }
            }
            let txid = tx.txid();
            for (index, output) in tx.outputs.iter().enumerate() {
                if output.script == Script::PayToAddress(self.address) {
                    self.coins.insert(
                        OutPoint::new(txid, index as u32),
                        WalletCoin {
                            value: output.value,
                            confirmed: true,
                        },
                    );
                }
            }
        }
        before != self.balance().confirmed_balance
    }

    /// Track our own change from a broadcast transaction until it confirms
    pub fn add_unconfirmed(&mut self, tx: &Transaction) {
        let txid = tx.txid();
        for (index, output) in tx.outputs.iter().enumerate() {
            if output.script == Script::PayToAddress(self.address) {
                self.coins
                    .entry(OutPoint::new(txid, index as u32))
                    .or_insert(WalletCoin {
                        value: output.value,
                        confirmed: false,
                    });
            }
        }
    }

    /// Pick confirmed, unlocked coins worth at least `target` and lock them
    pub fn select_coins(&mut self, target: Amount) -> Result<(Vec<TxIn>, Amount), RpcError> {
        let mut inputs = Vec::new();
        let mut total: Amount = 0;
        for (outpoint, coin) in &self.coins {
            if total >= target {
                break;
            }
            if coin.confirmed && !self.locked.contains(outpoint) {
                inputs.push(TxIn::new(*outpoint));
                total += coin.value;
            }
        }
        if total < target {
            return Err(RpcError::InsufficientFunds {
                needed: target,
                available: total,
            });
        }
        for input in &inputs {
            self.locked.insert(input.previous_output);
        }
        Ok((inputs, total))
    }

    /// Release coins of a transaction that was never broadcast
    pub fn unlock(&mut self, inputs: &[TxIn]) {
        for input in inputs {
            self.locked.remove(&input.previous_output);
        }
    }

    /// Change output for `change`, none when it is dust
    pub fn change_output(&self, change: Amount, dust_limit: Amount) -> Option<TxOut> {
        (change >= dust_limit).then(|| TxOut::new(change, Script::PayToAddress(self.address)))
    }

    pub fn balance(&self) -> WalletBalance {
        let mut balance = WalletBalance::default();
        for (outpoint, coin) in &self.coins {
            if coin.confirmed {
                if !self.locked.contains(outpoint) {
                    balance.confirmed_balance += coin.value;
                }
            } else {
                balance.unconfirmed_balance += coin.value;
            }
        }
        balance
    }

    pub fn owner(&self) -> &PublicKey {
        &self.key
    }
}
