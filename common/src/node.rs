use crate::{crypto::PublicKey, Amount};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub identity_pubkey: PublicKey,
    pub alias: String,
    pub network: String,
    pub num_peers: usize,
    pub num_active_channels: usize,
    pub num_pending_channels: usize,
    pub block_height: u64,
    pub synced_to_chain: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBalance {
    pub confirmed_balance: Amount,
    pub unconfirmed_balance: Amount,
}

impl WalletBalance {
    pub fn total(&self) -> Amount {
        self.confirmed_balance + self.unconfirmed_balance
    }
}
