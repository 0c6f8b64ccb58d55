// File: testing-framework/src/scenarios/force_close.rs
//
// Unilateral close: the funder broadcasts its commitment, waits out the
// relative timelock on its own output and sweeps it back to the wallet.

use super::helpers::open_channel_and_assert;
use crate::assertions::{assert_mempool_len, assert_spends_only_from, assert_tx_in_block, wait_for_mempool};
use crate::harness::NetworkHarness;
use anyhow::{ensure, Context};
use futures::future::{BoxFuture, FutureExt};

const CHANNEL_AMOUNT: u64 = 100_000;

pub fn channel_force_closure(harness: &NetworkHarness) -> BoxFuture<'_, anyhow::Result<()>> {
    async move {
        let (alice, bob) = (harness.alice(), harness.bob());
        let channel_point = open_channel_and_assert(harness, alice, bob, CHANNEL_AMOUNT).await?;

        let closing = harness
            .close_channel(alice, &channel_point, true)
            .await
            .context("unable to force close channel")?;
        harness.generate(1).await.context("unable to generate block")?;
        let commit_txid = harness
            .wait_for_channel_close(closing, harness.config().channel_close_timeout())
            .await
            .context("error while waiting for channel close")?;

        // The commitment output is locked for the csv delay, the sweep is
        // broadcast once the last locked block is processed
        let csv_delay = harness.config().csv_delay;
        harness
            .generate(csv_delay)
            .await
            .context("unable to mine through the csv delay")?;

        wait_for_mempool(harness, 1).await.context("sweep tx never reached the mempool")?;
        let mempool = assert_mempool_len(harness, 1).await?;
        let sweep_txid = mempool[0];

        let sweep = harness
            .get_raw_transaction(&sweep_txid)
            .await
            .context("unable to fetch sweep tx")?;
        assert_spends_only_from(&sweep, &commit_txid)?;
        ensure!(
            sweep.inputs.iter().all(|input| input.sequence >= csv_delay),
            "sweep inputs do not carry the csv delay {}",
            csv_delay
        );

        let hashes = harness.generate(1).await.context("unable to generate block")?;
        let block = harness.get_block(&hashes[0]).await.context("unable to get block")?;
        assert_tx_in_block(&block, &sweep_txid).context("sweep tx was not included in block")?;
        Ok(())
    }
    .boxed()
}
