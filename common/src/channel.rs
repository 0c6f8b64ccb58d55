use crate::{
    crypto::{Hash, PublicKey},
    transaction::OutPoint,
    Amount,
};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    PendingOpen,
    Open,
    Closing,
    ForceClosing,
    Closed,
}

impl ChannelState {
    /// Only single forward steps are legal, a channel never skips a state.
    pub fn can_transition_to(&self, next: ChannelState) -> bool {
        use ChannelState::*;
        matches!(
            (self, next),
            (PendingOpen, Open)
                | (Open, Closing)
                | (Open, ForceClosing)
                | (Closing, Closed)
                | (ForceClosing, Closed)
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ChannelState::Open)
    }

    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            ChannelState::PendingOpen | ChannelState::Closing | ChannelState::ForceClosing
        )
    }
}

impl Display for ChannelState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelState::PendingOpen => "pending-open",
            ChannelState::Open => "open",
            ChannelState::Closing => "closing",
            ChannelState::ForceClosing => "force-closing",
            ChannelState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// One entry of a node's `ListChannels` answer, seen from that node's side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub channel_point: OutPoint,
    pub remote_pubkey: PublicKey,
    pub capacity: Amount,
    pub local_balance: Amount,
    pub remote_balance: Amount,
    // Sum of HTLCs reserved on this channel and not yet settled
    pub unsettled_balance: Amount,
    pub state: ChannelState,
}

impl ChannelInfo {
    /// `local + remote == capacity` once nothing is in flight.
    pub fn is_balanced(&self) -> bool {
        self.unsettled_balance != 0
            || self.local_balance.checked_add(self.remote_balance) == Some(self.capacity)
    }
}

/// Routing table edge. Endpoints carry no direction.
#[derive(Clone, Debug, Eq, Serialize, Deserialize)]
pub struct RoutingLink {
    pub channel_point: OutPoint,
    pub node1: PublicKey,
    pub node2: PublicKey,
    pub capacity: Amount,
}

impl RoutingLink {
    pub fn new(channel_point: OutPoint, a: PublicKey, b: PublicKey, capacity: Amount) -> Self {
        // Store endpoints sorted so equal links compare equal
        let (node1, node2) = if a <= b { (a, b) } else { (b, a) };
        Self {
            channel_point,
            node1,
            node2,
            capacity,
        }
    }

    pub fn connects(&self, a: &PublicKey, b: &PublicKey) -> bool {
        (self.node1 == *a && self.node2 == *b) || (self.node1 == *b && self.node2 == *a)
    }

    pub fn other_end(&self, from: &PublicKey) -> Option<&PublicKey> {
        if self.node1 == *from {
            Some(&self.node2)
        } else if self.node2 == *from {
            Some(&self.node1)
        } else {
            None
        }
    }
}

impl PartialEq for RoutingLink {
    fn eq(&self, other: &Self) -> bool {
        self.channel_point == other.channel_point && self.connects(&other.node1, &other.node2)
    }
}

impl Display for RoutingLink {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} <-> {}]",
            self.channel_point,
            &self.node1.to_hex()[..16],
            &self.node2.to_hex()[..16]
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChannel {
    pub channel_point: OutPoint,
    pub remote_pubkey: PublicKey,
    pub capacity: Amount,
    pub state: ChannelState,
    // Txid of the transaction that will move the channel forward, if broadcast
    pub pending_txid: Option<Hash>,
    // Blocks left before a timelocked output can be swept
    pub blocks_til_maturity: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenStatusUpdate {
    /// Funding transaction broadcast
    Pending { txid: Hash },
    /// Funding confirmed and the channel is usable
    Open(OutPoint),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseStatusUpdate {
    /// Closing or commitment transaction broadcast
    Pending { txid: Hash },
    /// Closing transaction confirmed
    Closed(Hash),
}
