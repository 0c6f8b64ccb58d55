// File: testing-framework/src/node/router.rs
//
// Shortest path search over directed channel edges. An edge exists from `from`
// to `to` only while `from` can push at least the payment amount through it.

use ln_itest_common::{crypto::PublicKey, transaction::OutPoint, Amount};
use std::collections::{HashMap, VecDeque};

/// Directed view of one open channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub channel_point: OutPoint,
    pub from: PublicKey,
    pub to: PublicKey,
    // What `from` can still send, in-flight HTLCs excluded
    pub spendable: Amount,
}

/// One hop of a route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub channel_point: OutPoint,
    pub from: PublicKey,
    pub to: PublicKey,
}

/// Fewest-hop route from `source` to `destination` able to carry `amount`.
///
/// Ties are broken by edge order so the same graph always yields the same route.
pub fn find_route(
    edges: &[Edge],
    source: &PublicKey,
    destination: &PublicKey,
    amount: Amount,
) -> Option<Vec<Hop>> {
    if source == destination || amount == 0 {
        return None;
    }

    let mut adjacency: HashMap<&PublicKey, Vec<&Edge>> = HashMap::new();
    for edge in edges.iter().filter(|e| e.spendable >= amount) {
        adjacency.entry(&edge.from).or_default().push(edge);
    }

    // node -> edge used to reach it
    let mut parent: HashMap<&PublicKey, &Edge> = HashMap::new();
    let mut queue = VecDeque::from([source]);

    while let Some(node) = queue.pop_front() {
        if node == destination {
            break;
        }
        for &edge in adjacency.get(node).into_iter().flatten() {
            if &edge.to == source || parent.contains_key(&edge.to) {
                continue;
            }
            parent.insert(&edge.to, edge);
            queue.push_back(&edge.to);
        }
    }

    let mut route = Vec::new();
    let mut cursor = destination;
    while cursor != source {
        let edge: &Edge = parent.get(cursor)?;
        route.push(Hop {
            channel_point: edge.channel_point,
            from: edge.from,
            to: edge.to,
        });
        cursor = &edge.from;
    }
    route.reverse();
    Some(route)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ln_itest_common::crypto::{Hash, KeyPair};
    use proptest::prelude::*;

    fn key(seed: u8) -> PublicKey {
        *KeyPair::from_secret([seed; 32]).public_key()
    }

    fn edge(seed: u8, from: u8, to: u8, spendable: Amount) -> Edge {
        Edge {
            channel_point: OutPoint::new(Hash::new([seed; 32]), 0),
            from: key(from),
            to: key(to),
            spendable,
        }
    }

    #[test]
    fn test_two_hop_route() {
        // carol(3) -> alice(1) -> bob(2)
        let edges = vec![edge(10, 1, 2, 100_000), edge(11, 3, 1, 100_000)];
        let route = find_route(&edges, &key(3), &key(2), 1_000).unwrap();
        assert_eq!(route.len(), 2);
        assert_eq!(route[0].from, key(3));
        assert_eq!(route[0].to, key(1));
        assert_eq!(route[1].to, key(2));
    }

    #[test]
    fn test_liquidity_is_directional() {
        let edges = vec![edge(10, 1, 2, 100_000), edge(10, 2, 1, 0)];
        assert!(find_route(&edges, &key(1), &key(2), 1_000).is_some());
        assert!(find_route(&edges, &key(2), &key(1), 1_000).is_none());
    }

    #[test]
    fn test_prefers_fewest_hops() {
        let edges = vec![
            edge(1, 1, 3, 10_000),
            edge(2, 3, 4, 10_000),
            edge(3, 4, 2, 10_000),
            edge(4, 1, 2, 10_000),
        ];
        let route = find_route(&edges, &key(1), &key(2), 500).unwrap();
        assert_eq!(route.len(), 1);
        assert_eq!(route[0].channel_point, OutPoint::new(Hash::new([4; 32]), 0));
    }

    #[test]
    fn test_insufficient_capacity_means_no_route() {
        let edges = vec![edge(10, 1, 2, 999)];
        assert!(find_route(&edges, &key(1), &key(2), 1_000).is_none());
        assert!(find_route(&edges, &key(1), &key(1), 1).is_none());
    }

    proptest! {
        #[test]
        fn prop_route_is_connected_and_liquid(
            raw in proptest::collection::vec((0u8..6, 0u8..6, 0u64..2_000), 0..20),
            amount in 1u64..2_000,
        ) {
            let edges: Vec<Edge> = raw
                .iter()
                .enumerate()
                .filter(|(_, (a, b, _))| a != b)
                .map(|(i, (a, b, s))| edge(i as u8 + 100, *a, *b, *s))
                .collect();

            if let Some(route) = find_route(&edges, &key(0), &key(5), amount) {
                prop_assert!(!route.is_empty());
                prop_assert_eq!(route[0].from, key(0));
                prop_assert_eq!(route.last().unwrap().to, key(5));
                for pair in route.windows(2) {
                    prop_assert_eq!(pair[0].to, pair[1].from);
                }
                for hop in &route {
                    let used = edges.iter().find(|e| {
                        e.channel_point == hop.channel_point && e.from == hop.from && e.to == hop.to
                    });
                    prop_assert!(used.map(|e| e.spendable >= amount).unwrap_or(false));
                }
            }
        }
    }
}
