// File: testing-framework/src/invariants/mod.rs
//
// Network invariants as pure checks over observed RPC data:
// - balance conservation on channels at rest
// - routing table equals the set of open channels
// - payment flow shifts balances by exactly the amount paid
// - sweep transactions spend only the commitment they recover

use ln_itest_common::{
    channel::{ChannelInfo, RoutingLink},
    crypto::Hash,
    transaction::{OutPoint, Transaction},
    Amount,
};
use std::collections::HashSet;
use thiserror::Error;

/// A network invariant that did not hold
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("channel {channel_point}: local {local} + remote {remote} != capacity {capacity}")]
    BalanceNotConserved {
        channel_point: OutPoint,
        local: Amount,
        remote: Amount,
        capacity: Amount,
    },

    #[error("routing table mismatch: missing {missing:?}, unexpected {unexpected:?}")]
    RouteTableMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("channel {channel_point}: local balance moved by {observed}, expected {expected}")]
    BalanceShift {
        channel_point: OutPoint,
        expected: i128,
        observed: i128,
    },

    #[error("input {input} of {txid} does not spend {parent}")]
    ForeignInput { txid: Hash, input: OutPoint, parent: Hash },

    #[error("transaction {txid} has no inputs")]
    NoInputs { txid: Hash },
}

/// `local + remote == capacity` for a channel with nothing in flight.
/// Channels with unsettled HTLCs are skipped.
pub fn check_conservation(channel: &ChannelInfo) -> Result<(), InvariantViolation> {
    if channel.is_balanced() {
        Ok(())
    } else {
        Err(InvariantViolation::BalanceNotConserved {
            channel_point: channel.channel_point,
            local: channel.local_balance,
            remote: channel.remote_balance,
            capacity: channel.capacity,
        })
    }
}

// Outpoint plus endpoints in a fixed order
fn link_key(link: &RoutingLink) -> (OutPoint, String, String) {
    let (a, b) = (link.node1.to_hex(), link.node2.to_hex());
    if a <= b {
        (link.channel_point, a, b)
    } else {
        (link.channel_point, b, a)
    }
}

fn describe(key: &(OutPoint, String, String)) -> String {
    format!("{} {}..<->{}..", key.0, &key.1[..8], &key.2[..8])
}

/// Observed links equal the expected set. Endpoint order does not matter,
/// duplicates do.
pub fn check_route_table(observed: &[RoutingLink], expected: &[RoutingLink]) -> Result<(), InvariantViolation> {
    let observed_keys: Vec<_> = observed.iter().map(link_key).collect();
    let expected_keys: HashSet<_> = expected.iter().map(link_key).collect();
    let observed_set: HashSet<_> = observed_keys.iter().cloned().collect();

    let mut missing: Vec<String> = expected_keys.difference(&observed_set).map(describe).collect();
    let mut unexpected: Vec<String> = observed_set.difference(&expected_keys).map(describe).collect();
    if observed_keys.len() != observed_set.len() {
        unexpected.push("duplicate links".to_string());
    }

    if missing.is_empty() && unexpected.is_empty() {
        Ok(())
    } else {
        missing.sort();
        unexpected.sort();
        Err(InvariantViolation::RouteTableMismatch { missing, unexpected })
    }
}

/// Local balance moved from `before` to `after` by exactly `expected`
pub fn check_balance_shift(
    channel_point: OutPoint,
    before: Amount,
    after: Amount,
    expected: i128,
) -> Result<(), InvariantViolation> {
    let observed = after as i128 - before as i128;
    if observed == expected {
        Ok(())
    } else {
        Err(InvariantViolation::BalanceShift {
            channel_point,
            expected,
            observed,
        })
    }
}

/// Every input of `tx` spends an output of `parent`
pub fn check_spends_only_from(tx: &Transaction, parent: &Hash) -> Result<(), InvariantViolation> {
    let txid = tx.txid();
    if tx.inputs.is_empty() {
        return Err(InvariantViolation::NoInputs { txid });
    }
    match tx.inputs.iter().find(|i| i.previous_output.txid != *parent) {
        Some(input) => Err(InvariantViolation::ForeignInput {
            txid,
            input: input.previous_output,
            parent: *parent,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ln_itest_common::{
        channel::ChannelState,
        crypto::{KeyPair, PublicKey},
        transaction::{Script, TxIn, TxOut},
    };
    use proptest::prelude::*;

    fn key(seed: u8) -> PublicKey {
        *KeyPair::from_secret([seed; 32]).public_key()
    }

    fn cp(seed: u8) -> OutPoint {
        OutPoint::new(Hash::new([seed; 32]), 0)
    }

    fn channel(local: Amount, remote: Amount, unsettled: Amount) -> ChannelInfo {
        ChannelInfo {
            channel_point: cp(1),
            remote_pubkey: key(2),
            capacity: 100_000,
            local_balance: local,
            remote_balance: remote,
            unsettled_balance: unsettled,
            state: ChannelState::Open,
        }
    }

    #[test]
    fn test_conservation() {
        assert!(check_conservation(&channel(95_000, 5_000, 0)).is_ok());
        assert!(check_conservation(&channel(94_000, 5_000, 1_000)).is_ok());
        assert!(matches!(
            check_conservation(&channel(94_000, 5_000, 0)),
            Err(InvariantViolation::BalanceNotConserved { .. })
        ));
    }

    #[test]
    fn test_route_table_ignores_endpoint_order() {
        let observed = vec![RoutingLink::new(cp(1), key(1), key(2), 10)];
        let expected = vec![RoutingLink::new(cp(1), key(2), key(1), 10)];
        assert!(check_route_table(&observed, &expected).is_ok());
    }

    #[test]
    fn test_route_table_reports_differences() {
        let observed = vec![
            RoutingLink::new(cp(1), key(1), key(2), 10),
            RoutingLink::new(cp(3), key(1), key(3), 10),
        ];
        let expected = vec![
            RoutingLink::new(cp(1), key(1), key(2), 10),
            RoutingLink::new(cp(2), key(3), key(1), 10),
        ];
        match check_route_table(&observed, &expected) {
            Err(InvariantViolation::RouteTableMismatch { missing, unexpected }) => {
                assert_eq!(missing.len(), 1);
                assert_eq!(unexpected.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }

        let doubled = vec![observed[0].clone(), observed[0].clone()];
        assert!(check_route_table(&doubled, &observed[..1]).is_err());
    }

    #[test]
    fn test_balance_shift() {
        assert!(check_balance_shift(cp(1), 100_000, 95_000, -5_000).is_ok());
        assert!(check_balance_shift(cp(1), 0, 5_000, 5_000).is_ok());
        assert_eq!(
            check_balance_shift(cp(1), 0, 4_000, 5_000),
            Err(InvariantViolation::BalanceShift {
                channel_point: cp(1),
                expected: 5_000,
                observed: 4_000,
            })
        );
    }

    #[test]
    fn test_sweep_inputs() {
        let commit = Hash::new([9; 32]);
        let out = vec![TxOut::new(1, Script::PayToAddress(Hash::zero()))];
        let sweep = Transaction::new(vec![TxIn::with_sequence(OutPoint::new(commit, 0), 4)], out.clone());
        assert!(check_spends_only_from(&sweep, &commit).is_ok());

        let mixed = Transaction::new(
            vec![TxIn::new(OutPoint::new(commit, 0)), TxIn::new(cp(4))],
            out.clone(),
        );
        assert!(matches!(
            check_spends_only_from(&mixed, &commit),
            Err(InvariantViolation::ForeignInput { .. })
        ));
        assert!(check_spends_only_from(&Transaction::new(vec![], out), &commit).is_err());
    }

    proptest! {
        #[test]
        fn prop_route_table_is_order_insensitive(
            seeds in proptest::collection::hash_set(1u8..40, 0..8),
            flips in proptest::collection::vec(any::<bool>(), 8),
        ) {
            let links: Vec<RoutingLink> = seeds
                .iter()
                .map(|s| RoutingLink::new(cp(*s), key(*s), key(s + 100), 1_000))
                .collect();
            let mut reordered: Vec<RoutingLink> = links
                .iter()
                .zip(flips.iter())
                .map(|(l, flip)| {
                    if *flip {
                        RoutingLink::new(l.channel_point, l.node2, l.node1, l.capacity)
                    } else {
                        l.clone()
                    }
                })
                .collect();
            reordered.reverse();
            prop_assert!(check_route_table(&reordered, &links).is_ok());
        }
    }
}
