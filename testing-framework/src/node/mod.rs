// File: testing-framework/src/node/mod.rs
//
// Payment node RPC surface and the in-process nodes that serve it.

/// Peer registry and authoritative channel ledger shared by all nodes
pub mod fabric;
/// Route search over the channel graph
pub mod router;
/// In-process payment node
pub mod sim_node;
/// On-chain wallet of a node
pub mod wallet;

use async_trait::async_trait;
use ln_itest_common::{
    channel::{ChannelInfo, CloseStatusUpdate, OpenStatusUpdate, PendingChannel, RoutingLink},
    crypto::{Hash, PublicKey},
    invoice::{AddInvoiceResponse, Invoice, SendRequest, SendResponse},
    node::{NodeInfo, WalletBalance},
    transaction::OutPoint,
    Amount, RpcError,
};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use fabric::PeerFabric;
pub use sim_node::{NodeParams, SimNode};

/// Updates of a channel opening, `Pending` then `Open`
pub type OpenUpdateStream = mpsc::Receiver<OpenStatusUpdate>;

/// Updates of a channel closing, `Pending` then `Closed`
pub type CloseUpdateStream = mpsc::Receiver<CloseStatusUpdate>;

/// Sending half of a payment stream. Cloning it lets several tasks write
/// requests on the same stream.
#[derive(Clone)]
pub struct PaymentSender(mpsc::Sender<SendRequest>);

impl PaymentSender {
    /// Write one request on the stream
    pub async fn send(&self, request: SendRequest) -> Result<(), RpcError> {
        self.0.send(request).await.map_err(|_| RpcError::StreamClosed)
    }
}

/// Bidirectional `SendPayment` stream.
pub struct PaymentStream {
    sender: PaymentSender,
    receiver: mpsc::Receiver<SendResponse>,
}

impl PaymentStream {
    /// Pair the two halves of a stream
    pub fn new(sender: mpsc::Sender<SendRequest>, receiver: mpsc::Receiver<SendResponse>) -> Self {
        Self {
            sender: PaymentSender(sender),
            receiver,
        }
    }

    /// Write one request
    pub async fn send(&self, request: SendRequest) -> Result<(), RpcError> {
        self.sender.send(request).await
    }

    /// Read the next response, in completion order
    pub async fn recv(&mut self) -> Result<SendResponse, RpcError> {
        self.receiver.recv().await.ok_or(RpcError::StreamClosed)
    }

    /// Split into a cloneable sender and the receiving half
    pub fn into_split(self) -> (PaymentSender, mpsc::Receiver<SendResponse>) {
        (self.sender, self.receiver)
    }
}

/// RPC surface of a payment-channel node.
#[async_trait]
pub trait LightningRpc: Send + Sync {
    /// Node identity
    fn pubkey(&self) -> PublicKey;

    /// Human readable name
    fn alias(&self) -> &str;

    /// Identity, peers and channel counts
    async fn get_info(&self) -> Result<NodeInfo, RpcError>;

    /// Connect to a peer. Connections are symmetric.
    async fn connect_peer(&self, peer: &PublicKey) -> Result<(), RpcError>;

    /// Address of the node's on-chain wallet
    async fn new_address(&self) -> Result<Hash, RpcError>;

    /// On-chain wallet balance
    async fn wallet_balance(&self) -> Result<WalletBalance, RpcError>;

    /// Fund a channel to `peer`. Returns once the request is accepted, the
    /// funding transaction is broadcast in the background.
    async fn open_channel(
        &self,
        peer: &PublicKey,
        amount: Amount,
        min_confs: u32,
    ) -> Result<OpenUpdateStream, RpcError>;

    /// Close a channel cooperatively, or unilaterally when `force`
    async fn close_channel(
        &self,
        channel_point: &OutPoint,
        force: bool,
    ) -> Result<CloseUpdateStream, RpcError>;

    /// Sum of local balances over open channels
    async fn channel_balance(&self) -> Result<Amount, RpcError>;

    /// Register an invoice locked to `hash(preimage)`
    async fn add_invoice(
        &self,
        memo: &str,
        preimage: Hash,
        value: Amount,
    ) -> Result<AddInvoiceResponse, RpcError>;

    /// Invoice by payment hash
    async fn lookup_invoice(&self, payment_hash: &Hash) -> Result<Invoice, RpcError>;

    /// Open a bidirectional payment stream
    async fn send_payment(&self) -> Result<PaymentStream, RpcError>;

    /// Open channels seen from this node
    async fn list_channels(&self) -> Result<Vec<ChannelInfo>, RpcError>;

    /// Channels waiting for a confirmation or a timelock
    async fn pending_channels(&self) -> Result<Vec<PendingChannel>, RpcError>;

    /// Announced open channels of the network
    async fn show_routing_table(&self) -> Result<Vec<RoutingLink>, RpcError>;

    /// Whether the node still serves calls
    fn is_running(&self) -> bool;

    /// Stop every background task of the node. Idempotent.
    fn stop(&self);
}

/// Handle to one node of the test network: identity plus RPC client.
#[derive(Clone)]
pub struct LightningNode {
    rpc: Arc<dyn LightningRpc>,
}

impl LightningNode {
    /// Wrap an RPC client
    pub fn new(rpc: Arc<dyn LightningRpc>) -> Self {
        Self { rpc }
    }

    /// Identity as a hex string
    pub fn pubkey_str(&self) -> String {
        self.rpc.pubkey().to_hex()
    }
}

impl Deref for LightningNode {
    type Target = dyn LightningRpc;

    fn deref(&self) -> &Self::Target {
        self.rpc.as_ref()
    }
}

impl fmt::Debug for LightningNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LightningNode")
            .field("alias", &self.rpc.alias())
            .field("pubkey", &self.rpc.pubkey())
            .finish()
    }
}

impl fmt::Display for LightningNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.rpc.alias())
    }
}
