// File: testing-framework/src/node/fabric.rs
//
// In-process "wire" between simulated nodes.
//
// The fabric owns the peer registry and the authoritative two-sided ledger of
// every channel. Nodes keep their own view of channel state and read balances
// from here. Lock order: a node may hold its state lock while taking the
// ledger lock, the fabric never calls into a node while holding the ledger.

use super::router::{find_route, Edge, Hop};
use super::sim_node::{ChannelProposal, NodeInner};
use crate::orchestrator::Clock;
use indexmap::IndexMap;
use ln_itest_common::{
    channel::{ChannelInfo, ChannelState, RoutingLink},
    crypto::{Hash, PublicKey},
    invoice::{PaymentOutcome, SendRequest},
    transaction::OutPoint,
    Amount, RpcError,
};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Both sides of one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub funder: PublicKey,
    pub fundee: PublicKey,
    pub capacity: Amount,
    pub funder_balance: Amount,
    pub fundee_balance: Amount,
    pub funder_in_flight: Amount,
    pub fundee_in_flight: Amount,
    pub state: ChannelState,
}

impl LedgerEntry {
    fn new(funder: PublicKey, fundee: PublicKey, capacity: Amount) -> Self {
        Self {
            funder,
            fundee,
            capacity,
            funder_balance: capacity,
            fundee_balance: 0,
            funder_in_flight: 0,
            fundee_in_flight: 0,
            state: ChannelState::PendingOpen,
        }
    }

    /// (balance, in_flight) of `node`'s side
    fn side(&self, node: &PublicKey) -> Option<(Amount, Amount)> {
        if *node == self.funder {
            Some((self.funder_balance, self.funder_in_flight))
        } else if *node == self.fundee {
            Some((self.fundee_balance, self.fundee_in_flight))
        } else {
            None
        }
    }

    fn side_mut(&mut self, node: &PublicKey) -> Option<(&mut Amount, &mut Amount)> {
        if *node == self.funder {
            Some((&mut self.funder_balance, &mut self.funder_in_flight))
        } else if *node == self.fundee {
            Some((&mut self.fundee_balance, &mut self.fundee_in_flight))
        } else {
            None
        }
    }

    /// What `node` can still send
    pub fn spendable(&self, node: &PublicKey) -> Amount {
        self.side(node)
            .map(|(balance, in_flight)| balance.saturating_sub(in_flight))
            .unwrap_or(0)
    }

    pub fn total_in_flight(&self) -> Amount {
        self.funder_in_flight + self.fundee_in_flight
    }

    pub fn remote_of(&self, node: &PublicKey) -> Option<PublicKey> {
        if *node == self.funder {
            Some(self.fundee)
        } else if *node == self.fundee {
            Some(self.funder)
        } else {
            None
        }
    }

    /// Settled balance of `node` and of its peer
    pub fn balances_for(&self, node: &PublicKey) -> Option<(Amount, Amount)> {
        let remote = self.remote_of(node)?;
        Some((self.side(node)?.0, self.side(&remote)?.0))
    }

    /// `ListChannels` entry as seen by `node`
    pub fn info_for(&self, channel_point: OutPoint, node: &PublicKey, state: ChannelState) -> Option<ChannelInfo> {
        let remote = self.remote_of(node)?;
        Some(ChannelInfo {
            channel_point,
            remote_pubkey: remote,
            capacity: self.capacity,
            local_balance: self.spendable(node),
            remote_balance: self.spendable(&remote),
            unsettled_balance: self.total_in_flight(),
            state,
        })
    }

    fn reserve(&mut self, from: &PublicKey, amount: Amount) -> bool {
        match self.side_mut(from) {
            Some((balance, in_flight)) if balance.saturating_sub(*in_flight) >= amount => {
                *in_flight += amount;
                true
            }
            _ => false,
        }
    }

    fn cancel(&mut self, from: &PublicKey, amount: Amount) {
        if let Some((_, in_flight)) = self.side_mut(from) {
            *in_flight = in_flight.saturating_sub(amount);
        }
    }

    // Moves a reserved HTLC from `from` to the other side
    fn settle(&mut self, from: &PublicKey, amount: Amount) {
        let Some(to) = self.remote_of(from) else {
            return;
        };
        if let Some((balance, in_flight)) = self.side_mut(from) {
            *balance = balance.saturating_sub(amount);
            *in_flight = in_flight.saturating_sub(amount);
        }
        if let Some((balance, _)) = self.side_mut(&to) {
            *balance += amount;
        }
    }
}

fn peer_key(a: &PublicKey, b: &PublicKey) -> (PublicKey, PublicKey) {
    if a <= b {
        (*a, *b)
    } else {
        (*b, *a)
    }
}

/// Peer registry, channel ledger and HTLC switch of the simulated network.
pub struct PeerFabric {
    clock: Arc<dyn Clock>,
    hop_latency: Duration,
    nodes: RwLock<HashMap<PublicKey, Weak<NodeInner>>>,
    peers: RwLock<HashSet<(PublicKey, PublicKey)>>,
    // Insertion order keeps route selection reproducible
    ledger: RwLock<IndexMap<OutPoint, LedgerEntry>>,
}

impl PeerFabric {
    pub fn new(clock: Arc<dyn Clock>, hop_latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            clock,
            hop_latency,
            nodes: RwLock::new(HashMap::new()),
            peers: RwLock::new(HashSet::new()),
            ledger: RwLock::new(IndexMap::new()),
        })
    }

    pub(crate) fn register(&self, node: &Arc<NodeInner>) {
        self.nodes.write().insert(node.pubkey(), Arc::downgrade(node));
    }

    pub(crate) fn unregister(&self, pubkey: &PublicKey) {
        self.nodes.write().remove(pubkey);
    }

    // Live node behind `pubkey`
    pub(crate) fn node(&self, pubkey: &PublicKey) -> Option<Arc<NodeInner>> {
        self.nodes
            .read()
            .get(pubkey)
            .and_then(Weak::upgrade)
            .filter(|node| node.is_running())
    }

    pub fn connect(&self, a: &PublicKey, b: &PublicKey) -> Result<(), RpcError> {
        if a == b {
            return Err(RpcError::invalid("cannot connect a node to itself"));
        }
        for key in [a, b] {
            if self.node(key).is_none() {
                return Err(RpcError::Unavailable(format!("node {} is not reachable", key)));
            }
        }
        if self.peers.write().insert(peer_key(a, b)) {
            log::debug!("Connected {} <-> {}", &a.to_hex()[..16], &b.to_hex()[..16]);
        }
        Ok(())
    }

    pub fn are_peers(&self, a: &PublicKey, b: &PublicKey) -> bool {
        self.peers.read().contains(&peer_key(a, b))
    }

    pub fn peer_count(&self, node: &PublicKey) -> usize {
        self.peers
            .read()
            .iter()
            .filter(|(a, b)| a == node || b == node)
            .count()
    }

    /// Hand a funding proposal to the responder and record the channel
    pub(crate) fn propose_channel(&self, proposal: &ChannelProposal) -> Result<(), RpcError> {
        let fundee = self
            .node(&proposal.fundee)
            .ok_or_else(|| RpcError::Unavailable(format!("node {} is not reachable", proposal.fundee)))?;
        fundee.accept_channel(proposal)?;

        self.ledger.write().insert(
            proposal.channel_point,
            LedgerEntry::new(proposal.funder, proposal.fundee, proposal.capacity),
        );
        Ok(())
    }

    /// Forget a channel whose funding never made it to the chain
    pub(crate) fn abandon_channel(&self, channel_point: &OutPoint) {
        let entry = self.ledger.write().shift_remove(channel_point);
        if let Some(entry) = entry {
            if let Some(fundee) = self.node(&entry.fundee) {
                fundee.forget_channel(channel_point);
            }
        }
    }

    pub(crate) fn mark_open(&self, channel_point: &OutPoint) {
        self.transition(channel_point, ChannelState::Open);
    }

    pub(crate) fn mark_closed(&self, channel_point: &OutPoint) {
        self.transition(channel_point, ChannelState::Closed);
    }

    fn transition(&self, channel_point: &OutPoint, next: ChannelState) {
        let mut ledger = self.ledger.write();
        if let Some(entry) = ledger.get_mut(channel_point) {
            if entry.state == next {
                return;
            }
            if entry.state.can_transition_to(next) {
                entry.state = next;
            } else {
                log::warn!(
                    "Ignoring ledger transition {} -> {} for {}",
                    entry.state,
                    next,
                    channel_point
                );
            }
        }
    }

    /// Freeze an open channel for closing. Fails while HTLCs are in flight.
    pub(crate) fn begin_close(&self, channel_point: &OutPoint, force: bool) -> Result<LedgerEntry, RpcError> {
        let mut ledger = self.ledger.write();
        let entry = ledger
            .get_mut(channel_point)
            .ok_or_else(|| RpcError::not_found(format!("channel {}", channel_point)))?;
        if entry.state != ChannelState::Open {
            return Err(RpcError::invalid(format!(
                "channel {} is {}",
                channel_point, entry.state
            )));
        }
        if entry.total_in_flight() > 0 {
            return Err(RpcError::rejected(format!(
                "channel {} has {} sat in flight",
                channel_point,
                entry.total_in_flight()
            )));
        }
        entry.state = if force {
            ChannelState::ForceClosing
        } else {
            ChannelState::Closing
        };
        Ok(entry.clone())
    }

    /// Tell the other endpoint its channel is being closed by `txid`
    pub(crate) fn notify_close(&self, peer: &PublicKey, channel_point: &OutPoint, txid: Hash, force: bool) {
        match self.node(peer) {
            Some(node) => node.remote_close(channel_point, txid, force),
            None => log::warn!("Peer {} gone, close of {} not delivered", peer, channel_point),
        }
    }

    pub fn entry(&self, channel_point: &OutPoint) -> Option<LedgerEntry> {
        self.ledger.read().get(channel_point).cloned()
    }

    pub fn channel_info(&self, channel_point: &OutPoint, node: &PublicKey, state: ChannelState) -> Option<ChannelInfo> {
        self.ledger
            .read()
            .get(channel_point)
            .and_then(|entry| entry.info_for(*channel_point, node, state))
    }

    /// Announced open channels, the graph every node routes over
    pub fn routing_table(&self) -> Vec<RoutingLink> {
        self.ledger
            .read()
            .iter()
            .filter(|(_, e)| e.state == ChannelState::Open)
            .map(|(cp, e)| RoutingLink::new(*cp, e.funder, e.fundee, e.capacity))
            .collect()
    }

    fn edges(ledger: &IndexMap<OutPoint, LedgerEntry>) -> Vec<Edge> {
        let mut edges = Vec::with_capacity(ledger.len() * 2);
        for (cp, entry) in ledger.iter().filter(|(_, e)| e.state == ChannelState::Open) {
            edges.push(Edge {
                channel_point: *cp,
                from: entry.funder,
                to: entry.fundee,
                spendable: entry.spendable(&entry.funder),
            });
            edges.push(Edge {
                channel_point: *cp,
                from: entry.fundee,
                to: entry.funder,
                spendable: entry.spendable(&entry.fundee),
            });
        }
        edges
    }

    // Find a route and reserve `amount` on every hop, atomically
    fn reserve_route(&self, source: &PublicKey, dest: &PublicKey, amount: Amount) -> Option<Vec<Hop>> {
        let mut ledger = self.ledger.write();
        let route = find_route(&Self::edges(&ledger), source, dest, amount)?;
        for hop in &route {
            let reserved = ledger
                .get_mut(&hop.channel_point)
                .map(|e| e.reserve(&hop.from, amount))
                .unwrap_or(false);
            if !reserved {
                // Edges were built under the same lock, so this is a ledger bug
                log::error!("Reservation failed on {} right after route search", hop.channel_point);
                return None;
            }
        }
        Some(route)
    }

    fn release_route(&self, route: &[Hop], amount: Amount) {
        let mut ledger = self.ledger.write();
        for hop in route {
            if let Some(entry) = ledger.get_mut(&hop.channel_point) {
                entry.cancel(&hop.from, amount);
            }
        }
    }

    /// Route one payment from `source`: reserve along the path, forward hop by
    /// hop, settle the destination invoice, then credit every hop backwards.
    pub async fn send_payment(&self, source: &PublicKey, request: &SendRequest) -> PaymentOutcome {
        let amount = request.amount;
        if amount == 0 {
            return PaymentOutcome::Failed {
                reason: "payment amount must be non zero".to_string(),
            };
        }

        let Some(route) = self.reserve_route(source, &request.dest, amount) else {
            let err = RpcError::NoRoute {
                destination: request.dest.to_hex(),
                amount,
            };
            return PaymentOutcome::Failed {
                reason: err.to_string(),
            };
        };

        for _ in &route {
            self.clock.sleep(self.hop_latency).await;
        }

        let settled = match self.node(&request.dest) {
            Some(dest) => dest.settle_invoice(&request.payment_hash, amount),
            None => Err("destination is not reachable".to_string()),
        };

        match settled {
            Ok(preimage) => {
                for hop in route.iter().rev() {
                    if let Some(entry) = self.ledger.write().get_mut(&hop.channel_point) {
                        entry.settle(&hop.from, amount);
                    }
                }
                if log::log_enabled!(log::Level::Debug) {
                    log::debug!(
                        "Payment {} settled over {} hop(s)",
                        request.payment_hash,
                        route.len()
                    );
                }
                PaymentOutcome::Settled {
                    preimage,
                    hops: route.len(),
                }
            }
            Err(reason) => {
                self.release_route(&route, amount);
                log::debug!("Payment {} failed: {}", request.payment_hash, reason);
                PaymentOutcome::Failed { reason }
            }
        }
    }
}
