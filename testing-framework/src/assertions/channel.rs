// File: testing-framework/src/assertions/channel.rs
//
// Channel and invoice assertions. The single-shot checks never retry; the
// `wait_for_*` variants poll until the node catches up or the deadline expires.

use super::poll::Probe;
use crate::error::{HarnessError, Result, RpcResultExt};
use crate::harness::NetworkHarness;
use crate::invariants;
use crate::node::LightningNode;
use ln_itest_common::{channel::ChannelInfo, crypto::Hash, transaction::OutPoint, Amount};

/// `ChannelBalance` of `node` equals `expected`. No retry.
pub async fn assert_balance_equals(node: &LightningNode, expected: Amount) -> Result<()> {
    let balance = node.channel_balance().await.rpc("ChannelBalance")?;
    if balance != expected {
        return Err(HarnessError::assertion(
            format!("channel balance of {}", node),
            expected,
            balance,
        ));
    }
    Ok(())
}

/// Poll until `ChannelBalance` of `node` equals `expected`
pub async fn wait_for_balance(harness: &NetworkHarness, node: &LightningNode, expected: Amount) -> Result<()> {
    harness
        .poller()
        .wait_until(
            &format!("channel balance of {}", node),
            expected,
            move || async move {
                match node.channel_balance().await {
                    Ok(balance) => Probe::when(balance == expected, (), balance),
                    Err(e) => Probe::Pending(e.to_string()),
                }
            },
        )
        .await
}

fn find_channel<'a>(channels: &'a [ChannelInfo], channel_point: &OutPoint) -> Option<&'a ChannelInfo> {
    channels.iter().find(|c| c.channel_point == *channel_point)
}

/// The channel at `channel_point`, as listed by `node`, has exactly the given
/// local and remote balances. No retry.
pub async fn assert_asymmetric_balance(
    node: &LightningNode,
    channel_point: &OutPoint,
    local: Amount,
    remote: Amount,
) -> Result<()> {
    let channels = node.list_channels().await.rpc("ListChannels")?;
    let channel = find_channel(&channels, channel_point).ok_or_else(|| {
        HarnessError::assertion(
            format!("channel {} listed by {}", channel_point, node),
            "present",
            format!("{} other channel(s)", channels.len()),
        )
    })?;
    if channel.local_balance != local || channel.remote_balance != remote {
        return Err(HarnessError::assertion(
            format!("balances of {} seen by {}", channel_point, node),
            format!("local {} remote {}", local, remote),
            format!(
                "local {} remote {} unsettled {}",
                channel.local_balance, channel.remote_balance, channel.unsettled_balance
            ),
        ));
    }
    Ok(())
}

/// Polling form of [`assert_asymmetric_balance`]
pub async fn wait_for_asymmetric_balance(
    harness: &NetworkHarness,
    node: &LightningNode,
    channel_point: &OutPoint,
    local: Amount,
    remote: Amount,
) -> Result<()> {
    let channel_point = *channel_point;
    harness
        .poller()
        .wait_until(
            &format!("balances of {} seen by {}", channel_point, node),
            format!("local {} remote {}", local, remote),
            move || async move {
                let channels = match node.list_channels().await {
                    Ok(channels) => channels,
                    Err(e) => return Probe::Pending(e.to_string()),
                };
                match find_channel(&channels, &channel_point) {
                    Some(c) => Probe::when(
                        c.local_balance == local && c.remote_balance == remote,
                        (),
                        format!("local {} remote {}", c.local_balance, c.remote_balance),
                    ),
                    None => Probe::Pending("channel not listed".to_string()),
                }
            },
        )
        .await
}

/// Conservation on every open channel of `node` with nothing in flight
pub async fn assert_channel_invariants(node: &LightningNode) -> Result<()> {
    let channels = node.list_channels().await.rpc("ListChannels")?;
    for channel in &channels {
        invariants::check_conservation(channel).map_err(|v| {
            HarnessError::assertion(
                format!("balance conservation on {}", node),
                format!("local + remote == {}", channel.capacity),
                v,
            )
        })?;
    }
    Ok(())
}

/// Poll until `node` reports the invoice for `payment_hash` as settled
pub async fn wait_for_invoice_settled(harness: &NetworkHarness, node: &LightningNode, payment_hash: &Hash) -> Result<()> {
    let payment_hash = *payment_hash;
    harness
        .poller()
        .wait_until(
            &format!("invoice {} settled on {}", payment_hash, node),
            "settled",
            move || async move {
                match node.lookup_invoice(&payment_hash).await {
                    Ok(invoice) => Probe::when(invoice.settled, (), "not settled"),
                    Err(e) => Probe::Pending(e.to_string()),
                }
            },
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;
    use crate::error::FailureKind;
    use crate::orchestrator::RunEnv;
    use std::time::Duration;

    async fn open_harness() -> (NetworkHarness, OutPoint) {
        let config = HarnessConfig {
            seed_outputs: 2,
            spendable_blocks: 5,
            ..HarnessConfig::default()
        };
        let h = NetworkHarness::new(config, RunEnv::paused(11)).await.unwrap();
        let opening = h.open_channel(h.alice(), h.bob(), 50_000, 1).await.unwrap();
        h.generate(1).await.unwrap();
        let cp = h.wait_for_channel_open(opening, Duration::from_secs(5)).await.unwrap();
        wait_for_asymmetric_balance(&h, h.bob(), &cp, 0, 50_000).await.unwrap();
        (h, cp)
    }

    #[tokio::test(start_paused = true)]
    async fn test_asymmetric_balance_matches_both_sides() {
        let (h, cp) = open_harness().await;
        assert_asymmetric_balance(h.alice(), &cp, 50_000, 0).await.unwrap();
        assert_asymmetric_balance(h.bob(), &cp, 0, 50_000).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_asymmetric_balance_mismatch() {
        let (h, cp) = open_harness().await;
        let err = assert_asymmetric_balance(h.alice(), &cp, 0, 50_000).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Assertion);
        assert!(err.to_string().contains("local 50000 remote 0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_asymmetric_balance_channel_absent() {
        let (h, cp) = open_harness().await;
        let other = OutPoint::new(cp.txid, cp.index + 1);
        let err = assert_asymmetric_balance(h.alice(), &other, 50_000, 0).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Assertion);
        assert!(err.to_string().contains("1 other channel(s)"));

        let closing = h.close_channel(h.alice(), &cp, false).await.unwrap();
        h.generate(1).await.unwrap();
        h.wait_for_channel_close(closing, Duration::from_secs(5)).await.unwrap();
        let err = assert_asymmetric_balance(h.alice(), &cp, 50_000, 0).await.unwrap_err();
        assert!(err.to_string().contains("0 other channel(s)"));
    }
}
