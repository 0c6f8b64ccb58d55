// File: testing-framework/src/prelude.rs
//
// Everything a scenario author usually needs.

pub use crate::assertions::{
    assert_asymmetric_balance, assert_balance_equals, assert_channel_invariants, assert_mempool_len,
    assert_route_table_matches, assert_spends_only_from, assert_tx_in_block, wait_for_asymmetric_balance,
    wait_for_balance, wait_for_invoice_settled, wait_for_mempool, wait_for_route_table, PaymentDispatcher,
};
pub use crate::config::HarnessConfig;
pub use crate::error::{HarnessError, RpcResultExt};
pub use crate::harness::NetworkHarness;
pub use crate::node::{LightningNode, LightningRpc};
pub use crate::orchestrator::{Clock, PausedClock, RunEnv, SystemClock};
pub use crate::scenarios::helpers::{close_channel_and_assert, open_channel_and_assert};
pub use crate::scenarios::{RunReport, ScenarioFn, ScenarioOutcome, ScenarioRegistry, ScenarioRunner};
pub use futures::future::{BoxFuture, FutureExt};
