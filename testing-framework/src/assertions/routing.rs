// File: testing-framework/src/assertions/routing.rs
//
// Topology assertions over a node's routing table.

use super::poll::Probe;
use crate::error::{HarnessError, Result, RpcResultExt};
use crate::harness::NetworkHarness;
use crate::invariants;
use crate::node::LightningNode;
use ln_itest_common::channel::RoutingLink;

/// The routing table of `node` holds exactly `expected`. No retry.
pub async fn assert_route_table_matches(node: &LightningNode, expected: &[RoutingLink]) -> Result<()> {
    let observed = node.show_routing_table().await.rpc("ShowRoutingTable")?;
    invariants::check_route_table(&observed, expected).map_err(|v| {
        HarnessError::assertion(
            format!("routing table of {}", node),
            format!("{} link(s)", expected.len()),
            v,
        )
    })
}

/// Poll until the routing table of `node` holds exactly `expected`
pub async fn wait_for_route_table(
    harness: &NetworkHarness,
    node: &LightningNode,
    expected: &[RoutingLink],
) -> Result<()> {
    harness
        .poller()
        .wait_until(
            &format!("routing table of {}", node),
            format!("{} link(s)", expected.len()),
            move || async move {
                match node.show_routing_table().await {
                    Ok(observed) => match invariants::check_route_table(&observed, expected) {
                        Ok(()) => Probe::Ready(()),
                        Err(v) => Probe::Pending(v.to_string()),
                    },
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
    use ln_itest_common::transaction::OutPoint;
    use std::time::Duration;

    const CAPACITY: u64 = 60_000;

    async fn open_harness() -> (NetworkHarness, OutPoint) {
        let config = HarnessConfig {
            seed_outputs: 2,
            spendable_blocks: 5,
            ..HarnessConfig::default()
        };
        let h = NetworkHarness::new(config, RunEnv::paused(13)).await.unwrap();
        let opening = h.open_channel(h.alice(), h.bob(), CAPACITY, 1).await.unwrap();
        h.generate(1).await.unwrap();
        let cp = h.wait_for_channel_open(opening, Duration::from_secs(5)).await.unwrap();
        (h, cp)
    }

    #[tokio::test(start_paused = true)]
    async fn test_route_table_matches_either_endpoint_order() {
        let (h, cp) = open_harness().await;
        let (alice, bob) = (h.alice().pubkey(), h.bob().pubkey());
        wait_for_route_table(&h, h.bob(), &[RoutingLink::new(cp, alice, bob, CAPACITY)])
            .await
            .unwrap();

        let forward = RoutingLink::new(cp, alice, bob, CAPACITY);
        let backward = RoutingLink::new(cp, bob, alice, CAPACITY);
        // Unsorted endpoints, as a remote node might report them
        let raw = RoutingLink {
            channel_point: cp,
            node1: forward.node2,
            node2: forward.node1,
            capacity: CAPACITY,
        };
        for node in [h.alice(), h.bob()] {
            for link in [&forward, &backward, &raw] {
                assert_route_table_matches(node, std::slice::from_ref(link)).await.unwrap();
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_route_table_mismatch() {
        let (h, cp) = open_harness().await;
        let (alice, bob) = (h.alice().pubkey(), h.bob().pubkey());

        let err = assert_route_table_matches(h.alice(), &[]).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Assertion);
        assert!(err.to_string().contains("0 link(s)"));

        let elsewhere = OutPoint::new(cp.txid, cp.index + 1);
        let expected = [
            RoutingLink::new(cp, alice, bob, CAPACITY),
            RoutingLink::new(elsewhere, bob, alice, CAPACITY),
        ];
        let err = assert_route_table_matches(h.alice(), &expected).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Assertion);
        assert!(err.to_string().contains("2 link(s)"));
    }
}
