use crate::Amount;

// Compiled-in regtest parameters. Nothing here is read at runtime.

pub const SATOSHI_PER_BITCOIN: Amount = 100_000_000;

// Reward paid to the miner address by every coinbase
pub const BLOCK_SUBSIDY: Amount = 50 * SATOSHI_PER_BITCOIN;

// Coinbase outputs need this many confirmations before they can be spent
pub const COINBASE_MATURITY: u64 = 100;

// Relative timelock (in blocks) on the to_local output of a commitment
pub const DEFAULT_CSV_DELAY: u32 = 4;

// Flat on-chain fees used by the simulated wallet and channel transactions
pub const DEFAULT_FUNDING_FEE: Amount = 1_000;
pub const DEFAULT_CLOSING_FEE: Amount = 1_000;
pub const DEFAULT_SWEEP_FEE: Amount = 500;

// Smallest output the simulated nodes will create, smaller ones are dropped to fees
pub const DUST_LIMIT: Amount = 546;

// Largest channel a simulated node will accept
pub const MAX_FUNDING_AMOUNT: Amount = 10 * SATOSHI_PER_BITCOIN;

// Network name embedded in node info
pub const NETWORK_NAME: &str = "regtest";
