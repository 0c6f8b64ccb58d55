// File: testing-framework/src/assertions/mod.rs
//
// Assertion library: observes harness and chain state, never mutates it.

/// Inclusion, mempool and sweep checks
pub mod chain;
/// Channel balance and invoice checks
pub mod channel;
/// Concurrent payments over a shared stream
pub mod dispatch;
/// Bounded polling
pub mod poll;
/// Routing table checks
pub mod routing;

pub use chain::{assert_mempool_len, assert_spends_only_from, assert_tx_in_block, wait_for_mempool};
pub use channel::{
    assert_asymmetric_balance, assert_balance_equals, assert_channel_invariants,
    wait_for_asymmetric_balance, wait_for_balance, wait_for_invoice_settled,
};
pub use dispatch::PaymentDispatcher;
pub use poll::{PollConfig, Poller, Probe};
pub use routing::{assert_route_table_matches, wait_for_route_table};
