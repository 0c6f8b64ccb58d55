// File: testing-framework/src/scenarios/helpers.rs
//
// Open and close flows shared by the built-in scenarios.

use crate::assertions::assert_tx_in_block;
use crate::harness::NetworkHarness;
use crate::node::LightningNode;
use anyhow::{Context, Result};
use ln_itest_common::{crypto::Hash, transaction::OutPoint, Amount};

/// Open a channel from `initiator` to `responder` and mine one block.
///
/// Asserts that the funding transaction is in that block and that the
/// initiator lists the new channel.
pub async fn open_channel_and_assert(
    harness: &NetworkHarness,
    initiator: &LightningNode,
    responder: &LightningNode,
    amount: Amount,
) -> Result<OutPoint> {
    let opening = harness
        .open_channel(initiator, responder, amount, 1)
        .await
        .with_context(|| format!("unable to open channel {} -> {}", initiator, responder))?;

    let hashes = harness.generate(1).await.context("unable to generate block")?;
    let block = harness.get_block(&hashes[0]).await.context("unable to get block")?;

    let channel_point = harness
        .wait_for_channel_open(opening, harness.config().channel_open_timeout())
        .await
        .context("error while waiting for channel open")?;
    assert_tx_in_block(&block, &channel_point.txid).context("funding tx was not included in block")?;

    harness
        .assert_channel_exists(initiator, &channel_point)
        .await
        .context("unable to assert channel existence")?;
    Ok(channel_point)
}

/// Cooperatively close `channel_point` from `node`, mine one block and
/// assert the closing transaction is in it.
pub async fn close_channel_and_assert(
    harness: &NetworkHarness,
    node: &LightningNode,
    channel_point: &OutPoint,
) -> Result<Hash> {
    let closing = harness
        .close_channel(node, channel_point, false)
        .await
        .with_context(|| format!("unable to close channel {}", channel_point))?;

    let hashes = harness.generate(1).await.context("unable to generate block")?;
    let block = harness.get_block(&hashes[0]).await.context("unable to get block")?;

    let closing_txid = harness
        .wait_for_channel_close(closing, harness.config().channel_close_timeout())
        .await
        .context("error while waiting for channel close")?;
    assert_tx_in_block(&block, &closing_txid).context("closing tx was not included in block")?;
    Ok(closing_txid)
}
