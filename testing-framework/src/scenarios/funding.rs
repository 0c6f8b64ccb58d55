// File: testing-framework/src/scenarios/funding.rs
//
// Funding workflow scenarios between the two seed nodes.

use super::helpers::{close_channel_and_assert, open_channel_and_assert};
use crate::assertions::{assert_balance_equals, assert_channel_invariants, wait_for_balance};
use crate::harness::NetworkHarness;
use anyhow::Context;
use futures::future::{BoxFuture, FutureExt};
use ln_itest_common::config::SATOSHI_PER_BITCOIN;

/// Open a 0.5 BTC channel Alice -> Bob, then close it right away.
pub fn basic_channel_funding(harness: &NetworkHarness) -> BoxFuture<'_, anyhow::Result<()>> {
    async move {
        let amount = SATOSHI_PER_BITCOIN / 2;
        let (alice, bob) = (harness.alice(), harness.bob());

        let channel_point = open_channel_and_assert(harness, alice, bob, amount).await?;
        assert_channel_invariants(alice).await?;

        close_channel_and_assert(harness, alice, &channel_point).await?;
        Ok(())
    }
    .boxed()
}

/// A single-funder channel starts with the whole capacity on the funder side.
pub fn channel_balance(harness: &NetworkHarness) -> BoxFuture<'_, anyhow::Result<()>> {
    async move {
        let amount = SATOSHI_PER_BITCOIN / 2;
        let (alice, bob) = (harness.alice(), harness.bob());

        let channel_point = open_channel_and_assert(harness, alice, bob, amount).await?;
        assert_balance_equals(alice, amount)
            .await
            .context("alice should hold the full capacity")?;

        // Bob learns about the channel on his own schedule
        harness
            .assert_channel_exists(bob, &channel_point)
            .await
            .context("bob never listed the channel")?;
        wait_for_balance(harness, bob, 0)
            .await
            .context("bob should have no balance in the channel")?;

        close_channel_and_assert(harness, alice, &channel_point).await?;
        Ok(())
    }
    .boxed()
}
