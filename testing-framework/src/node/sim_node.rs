// File: testing-framework/src/node/sim_node.rs
//
// In-process payment node.
//
// Each node runs a chain watcher task that replays connected blocks in height
// order. Block processing drives the on-chain wallet, moves channels through
// their states and feeds the nursery that sweeps timelocked outputs after a
// force close.

use super::fabric::{LedgerEntry, PeerFabric};
use super::wallet::Wallet;
use super::{CloseUpdateStream, LightningRpc, OpenUpdateStream, PaymentStream};
use crate::chain::ChainBackend;
use crate::config::HarnessConfig;
use async_trait::async_trait;
use ln_itest_common::{
    block::Block,
    channel::{ChannelInfo, ChannelState, CloseStatusUpdate, OpenStatusUpdate, PendingChannel, RoutingLink},
    config::{DUST_LIMIT, MAX_FUNDING_AMOUNT, NETWORK_NAME},
    crypto::{Hash, KeyPair, PublicKey},
    invoice::{AddInvoiceResponse, Invoice, SendRequest, SendResponse},
    node::{NodeInfo, WalletBalance},
    transaction::{OutPoint, Script, Transaction, TxIn, TxOut},
    Amount, RpcError,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};

const UPDATE_CHANNEL_CAPACITY: usize = 4;
const PAYMENT_STREAM_CAPACITY: usize = 64;

/// Protocol parameters of a simulated node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeParams {
    pub csv_delay: u32,
    pub funding_fee: Amount,
    pub closing_fee: Amount,
    pub sweep_fee: Amount,
}

impl From<&HarnessConfig> for NodeParams {
    fn from(config: &HarnessConfig) -> Self {
        Self {
            csv_delay: config.csv_delay,
            funding_fee: config.funding_fee,
            closing_fee: config.closing_fee,
            sweep_fee: config.sweep_fee,
        }
    }
}

impl Default for NodeParams {
    fn default() -> Self {
        (&HarnessConfig::default()).into()
    }
}

/// Funding offer delivered to the responder
#[derive(Debug, Clone)]
pub(crate) struct ChannelProposal {
    pub channel_point: OutPoint,
    pub funder: PublicKey,
    pub fundee: PublicKey,
    pub capacity: Amount,
    pub min_confs: u32,
}

#[derive(Debug, Clone)]
struct PendingSweep {
    outpoint: OutPoint,
    value: Amount,
    csv_delay: u32,
    // conf height of the commitment + csv delay
    maturity_height: Option<u64>,
    txid: Option<Hash>,
}

#[derive(Debug)]
struct LocalChannel {
    channel_point: OutPoint,
    remote: PublicKey,
    capacity: Amount,
    is_funder: bool,
    min_confs: u32,
    state: ChannelState,
    funding_height: Option<u64>,
    open_updates: Option<mpsc::Sender<OpenStatusUpdate>>,
    closing_txid: Option<Hash>,
    // Peer close seen before the funding confirmed here: (txid, force)
    queued_close: Option<(Hash, bool)>,
    close_updates: Option<mpsc::Sender<CloseStatusUpdate>>,
    sweep: Option<PendingSweep>,
}

impl LocalChannel {
    fn new(proposal: &ChannelProposal, is_funder: bool) -> Self {
        Self {
            channel_point: proposal.channel_point,
            remote: if is_funder {
                proposal.fundee
            } else {
                proposal.funder
            },
            capacity: proposal.capacity,
            is_funder,
            min_confs: proposal.min_confs.max(1),
            state: ChannelState::PendingOpen,
            funding_height: None,
            open_updates: None,
            closing_txid: None,
            queued_close: None,
            close_updates: None,
            sweep: None,
        }
    }

    fn set_state(&mut self, next: ChannelState) -> bool {
        if self.state.can_transition_to(next) {
            log::debug!("Channel {} {} -> {}", self.channel_point, self.state, next);
            self.state = next;
            true
        } else {
            log::warn!(
                "Refusing channel transition {} -> {} for {}",
                self.state,
                next,
                self.channel_point
            );
            false
        }
    }
}

struct NodeState {
    wallet: Wallet,
    channels: HashMap<OutPoint, LocalChannel>,
    invoices: HashMap<Hash, Invoice>,
    synced_height: u64,
}

pub(crate) struct NodeInner {
    alias: String,
    keys: KeyPair,
    params: NodeParams,
    chain: Arc<dyn ChainBackend>,
    fabric: Arc<PeerFabric>,
    state: RwLock<NodeState>,
    running: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl NodeInner {
    pub(crate) fn pubkey(&self) -> PublicKey {
        *self.keys.public_key()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<(), RpcError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(RpcError::Unavailable(format!("node {} is stopped", self.alias)))
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    fn address(&self) -> Hash {
        self.keys.public_key().address()
    }

    // Called by the fabric on the responder side of an open
    pub(crate) fn accept_channel(&self, proposal: &ChannelProposal) -> Result<(), RpcError> {
        self.ensure_running()?;
        let mut state = self.state.write();
        if state.channels.contains_key(&proposal.channel_point) {
            return Err(RpcError::invalid(format!(
                "channel {} already known",
                proposal.channel_point
            )));
        }
        state
            .channels
            .insert(proposal.channel_point, LocalChannel::new(proposal, false));
        log::debug!("{} accepted channel {}", self.alias, proposal.channel_point);
        Ok(())
    }

    pub(crate) fn forget_channel(&self, channel_point: &OutPoint) {
        self.state.write().channels.remove(channel_point);
    }

    // The peer started closing one of our channels
    pub(crate) fn remote_close(&self, channel_point: &OutPoint, txid: Hash, force: bool) {
        let mut state = self.state.write();
        let Some(channel) = state.channels.get_mut(channel_point) else {
            return;
        };
        if channel.state == ChannelState::PendingOpen {
            // Applied once our watcher has seen the funding confirm
            log::debug!(
                "{} queued close of pending channel {} by {}",
                self.alias,
                channel_point,
                txid
            );
            channel.queued_close = Some((txid, force));
        } else if channel.set_state(close_state(force)) {
            channel.closing_txid = Some(txid);
        }
    }

    /// Settle an incoming HTLC against a local invoice
    pub(crate) fn settle_invoice(&self, payment_hash: &Hash, amount: Amount) -> Result<Hash, String> {
        if !self.is_running() {
            return Err(format!("node {} is stopped", self.alias));
        }
        let mut state = self.state.write();
        let invoice = state
            .invoices
            .get_mut(payment_hash)
            .ok_or_else(|| format!("unknown payment hash {}", payment_hash))?;
        invoice.settle(amount).map_err(str::to_string)
    }

    // Replays every block between the last synced height and `block`
    async fn catch_up(&self, block: Option<Block>) {
        let target = match &block {
            Some(b) => b.height,
            None => match self.chain.get_block_count().await {
                Ok(height) => height,
                Err(e) => {
                    log::warn!("{} cannot read tip: {}", self.alias, e);
                    return;
                }
            },
        };

        let mut next = self.state.read().synced_height + 1;
        while next <= target {
            let current = match &block {
                Some(b) if b.height == next => b.clone(),
                _ => match self.chain.get_block_by_height(next).await {
                    Ok(b) => b,
                    Err(e) => {
                        log::warn!("{} cannot fetch block {}: {}", self.alias, next, e);
                        return;
                    }
                },
            };
            self.process_block(&current).await;
            next += 1;
        }
    }

    async fn process_block(&self, block: &Block) {
        let sweeps = {
            let mut state = self.state.write();
            self.apply_block(&mut state, block)
        };

        for (channel_point, tx) in sweeps {
            match self.chain.send_raw_transaction(tx.clone()).await {
                Ok(txid) => {
                    log::info!("{} broadcast sweep {} for {}", self.alias, txid, channel_point);
                    let mut state = self.state.write();
                    state.wallet.add_unconfirmed(&tx);
                    if let Some(sweep) = state
                        .channels
                        .get_mut(&channel_point)
                        .and_then(|c| c.sweep.as_mut())
                    {
                        sweep.txid = Some(txid);
                    }
                }
                // Retried on the next block
                Err(e) => log::debug!("{} sweep for {} not accepted yet: {}", self.alias, channel_point, e),
            }
        }
    }

    // Synchronous part of block processing. Returns sweeps ready to broadcast.
    fn apply_block(&self, state: &mut NodeState, block: &Block) -> Vec<(OutPoint, Transaction)> {
        if block.height <= state.synced_height {
            return Vec::new();
        }
        state.wallet.apply_block(block);
        state.synced_height = block.height;

        let height = block.height;
        let txids: HashSet<Hash> = block.txids().into_iter().collect();
        let mut sweeps = Vec::new();

        for channel in state.channels.values_mut() {
            if channel.state == ChannelState::PendingOpen {
                self.advance_open(channel, height, &txids);
            }
            // A close queued while pending may confirm in this very block
            match channel.state {
                ChannelState::Closing => self.advance_close(channel, &txids),
                ChannelState::ForceClosing => {
                    if let Some(tx) = self.advance_force_close(channel, height, &txids) {
                        sweeps.push((channel.channel_point, tx));
                    }
                }
                ChannelState::PendingOpen | ChannelState::Open | ChannelState::Closed => {}
            }
        }
        sweeps
    }

    fn advance_open(&self, channel: &mut LocalChannel, height: u64, txids: &HashSet<Hash>) {
        if channel.funding_height.is_none() && txids.contains(&channel.channel_point.txid) {
            channel.funding_height = Some(height);
        }
        let Some(conf) = channel.funding_height else {
            return;
        };
        if height + 1 - conf < channel.min_confs as u64 || !channel.set_state(ChannelState::Open) {
            return;
        }
        log::info!("{} channel {} is open", self.alias, channel.channel_point);
        if channel.is_funder {
            self.fabric.mark_open(&channel.channel_point);
            if let Some(updates) = channel.open_updates.take() {
                let _ = updates.try_send(OpenStatusUpdate::Open(channel.channel_point));
            }
        }
        if let Some((txid, force)) = channel.queued_close.take() {
            if channel.set_state(close_state(force)) {
                channel.closing_txid = Some(txid);
            }
        }
    }

    fn advance_close(&self, channel: &mut LocalChannel, txids: &HashSet<Hash>) {
        let Some(txid) = channel.closing_txid else {
            return;
        };
        if txids.contains(&txid) && channel.set_state(ChannelState::Closed) {
            self.fabric.mark_closed(&channel.channel_point);
            if let Some(updates) = channel.close_updates.take() {
                let _ = updates.try_send(CloseStatusUpdate::Closed(txid));
            }
        }
    }

    // Returns the sweep to broadcast once the to_local output matured
    fn advance_force_close(
        &self,
        channel: &mut LocalChannel,
        height: u64,
        txids: &HashSet<Hash>,
    ) -> Option<Transaction> {
        let commit_txid = channel.closing_txid?;
        if txids.contains(&commit_txid) {
            if let Some(updates) = channel.close_updates.take() {
                let _ = updates.try_send(CloseStatusUpdate::Closed(commit_txid));
            }
            match channel.sweep.as_mut() {
                Some(sweep) => sweep.maturity_height = Some(height + sweep.csv_delay as u64),
                None => {
                    if channel.set_state(ChannelState::Closed) {
                        self.fabric.mark_closed(&channel.channel_point);
                    }
                }
            }
        }

        let sweep = channel.sweep.clone()?;
        match (sweep.txid, sweep.maturity_height) {
            (Some(sweep_txid), _) if txids.contains(&sweep_txid) => {
                if channel.set_state(ChannelState::Closed) {
                    log::info!(
                        "{} swept {} sat from {}",
                        self.alias,
                        sweep.value,
                        channel.channel_point
                    );
                    self.fabric.mark_closed(&channel.channel_point);
                }
                None
            }
            (None, Some(maturity)) if height >= maturity => Some(self.sweep_transaction(&sweep)),
            _ => None,
        }
    }

    fn sweep_transaction(&self, sweep: &PendingSweep) -> Transaction {
        Transaction::new(
            vec![TxIn::with_sequence(sweep.outpoint, sweep.csv_delay)],
            vec![TxOut::new(
                sweep.value.saturating_sub(self.params.sweep_fee),
                Script::PayToAddress(self.address()),
            )],
        )
    }

    fn local_balance(&self, channel_point: &OutPoint) -> Amount {
        self.fabric
            .entry(channel_point)
            .map(|entry| entry.spendable(&self.pubkey()))
            .unwrap_or(0)
    }

    fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.fabric.unregister(&self.pubkey());
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }
        log::info!("Node {} stopped", self.alias);
    }
}

fn close_state(force: bool) -> ChannelState {
    if force {
        ChannelState::ForceClosing
    } else {
        ChannelState::Closing
    }
}

async fn watch_chain(node: Weak<NodeInner>, mut blocks: broadcast::Receiver<Block>) {
    loop {
        let block = match blocks.recv().await {
            Ok(block) => Some(block),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("Chain watcher lagged by {} block(s), resyncing", skipped);
                None
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let Some(node) = node.upgrade() else {
            break;
        };
        if !node.is_running() {
            break;
        }
        node.catch_up(block).await;
    }
}

/// Simulated payment node serving [`LightningRpc`].
pub struct SimNode {
    inner: Arc<NodeInner>,
}

impl SimNode {
    /// Start a node, register it with the fabric and begin watching the chain
    pub async fn spawn(
        alias: impl Into<String>,
        keys: KeyPair,
        params: NodeParams,
        chain: Arc<dyn ChainBackend>,
        fabric: Arc<PeerFabric>,
    ) -> Result<Self, RpcError> {
        // Subscribe first so no block falls between the height read and the stream
        let blocks = chain.subscribe_blocks();
        let synced_height = chain.get_block_count().await?;

        let inner = Arc::new(NodeInner {
            alias: alias.into(),
            state: RwLock::new(NodeState {
                wallet: Wallet::new(*keys.public_key()),
                channels: HashMap::new(),
                invoices: HashMap::new(),
                synced_height,
            }),
            keys,
            params,
            chain,
            fabric,
            running: AtomicBool::new(true),
            tasks: Mutex::new(Vec::new()),
        });
        inner.fabric.register(&inner);

        let watcher = tokio::spawn(watch_chain(Arc::downgrade(&inner), blocks));
        inner.track(watcher);

        log::info!(
            "Node {} started at height {} ({})",
            inner.alias,
            synced_height,
            inner.pubkey()
        );
        Ok(Self { inner })
    }

    fn funding_transaction(
        &self,
        peer: &PublicKey,
        amount: Amount,
    ) -> Result<Transaction, RpcError> {
        let mut state = self.inner.state.write();
        let target = amount + self.inner.params.funding_fee;
        let (inputs, total) = state.wallet.select_coins(target)?;

        let mut outputs = vec![TxOut::new(
            amount,
            Script::Multisig2of2(self.inner.pubkey(), *peer),
        )];
        if let Some(change) = state.wallet.change_output(total - target, DUST_LIMIT) {
            outputs.push(change);
        }
        Ok(Transaction::new(inputs, outputs))
    }

    // Cooperative close, the funder pays the fee
    fn closing_transaction(
        &self,
        channel_point: &OutPoint,
        entry: &LedgerEntry,
    ) -> Transaction {
        let fee = self.inner.params.closing_fee;
        let outputs = [
            (&entry.funder, entry.funder_balance.saturating_sub(fee)),
            (&entry.fundee, entry.fundee_balance),
        ]
        .into_iter()
        .filter(|(_, value)| *value >= DUST_LIMIT)
        .map(|(key, value)| TxOut::new(value, Script::PayToAddress(key.address())))
        .collect();
        Transaction::new(vec![TxIn::new(*channel_point)], outputs)
    }

    // Commitment of the closer. to_local is delayed, to_remote pays the peer directly.
    fn commitment_transaction(
        &self,
        channel_point: &OutPoint,
        remote: &PublicKey,
        local_balance: Amount,
        remote_balance: Amount,
        is_funder: bool,
    ) -> (Transaction, Option<PendingSweep>) {
        let fee = self.inner.params.closing_fee;
        let (local_value, remote_value) = if is_funder {
            (local_balance.saturating_sub(fee), remote_balance)
        } else {
            (local_balance, remote_balance.saturating_sub(fee))
        };
        let csv_delay = self.inner.params.csv_delay;

        let mut outputs = Vec::with_capacity(2);
        if local_value >= DUST_LIMIT {
            outputs.push(TxOut::new(
                local_value,
                Script::DelayedPayToKey {
                    key: self.inner.pubkey(),
                    csv_delay,
                },
            ));
        }
        if remote_value >= DUST_LIMIT {
            outputs.push(TxOut::new(remote_value, Script::PayToAddress(remote.address())));
        }
        let has_local = local_value >= DUST_LIMIT;
        let tx = Transaction::new(vec![TxIn::new(*channel_point)], outputs);

        let sweep = has_local.then(|| PendingSweep {
            outpoint: tx.outpoint(0),
            value: local_value,
            csv_delay,
            maturity_height: None,
            txid: None,
        });
        (tx, sweep)
    }
}

#[async_trait]
impl LightningRpc for SimNode {
    fn pubkey(&self) -> PublicKey {
        self.inner.pubkey()
    }

    fn alias(&self) -> &str {
        &self.inner.alias
    }

    async fn get_info(&self) -> Result<NodeInfo, RpcError> {
        self.inner.ensure_running()?;
        let tip = self.inner.chain.get_block_count().await?;
        let state = self.inner.state.read();
        Ok(NodeInfo {
            identity_pubkey: self.inner.pubkey(),
            alias: self.inner.alias.clone(),
            network: NETWORK_NAME.to_string(),
            num_peers: self.inner.fabric.peer_count(&self.inner.pubkey()),
            num_active_channels: state.channels.values().filter(|c| c.state.is_active()).count(),
            num_pending_channels: state.channels.values().filter(|c| c.state.is_pending()).count(),
            block_height: state.synced_height,
            synced_to_chain: state.synced_height == tip,
        })
    }

    async fn connect_peer(&self, peer: &PublicKey) -> Result<(), RpcError> {
        self.inner.ensure_running()?;
        self.inner.fabric.connect(&self.inner.pubkey(), peer)
    }

    async fn new_address(&self) -> Result<Hash, RpcError> {
        self.inner.ensure_running()?;
        Ok(self.inner.state.read().wallet.address())
    }

    async fn wallet_balance(&self) -> Result<WalletBalance, RpcError> {
        self.inner.ensure_running()?;
        Ok(self.inner.state.read().wallet.balance())
    }

    async fn open_channel(
        &self,
        peer: &PublicKey,
        amount: Amount,
        min_confs: u32,
    ) -> Result<OpenUpdateStream, RpcError> {
        self.inner.ensure_running()?;
        if amount < DUST_LIMIT || amount > MAX_FUNDING_AMOUNT {
            return Err(RpcError::invalid(format!(
                "channel amount {} outside [{}, {}]",
                amount, DUST_LIMIT, MAX_FUNDING_AMOUNT
            )));
        }
        let me = self.inner.pubkey();
        if !self.inner.fabric.are_peers(&me, peer) {
            return Err(RpcError::NotPeer(peer.to_hex()));
        }

        let funding = self.funding_transaction(peer, amount)?;
        let proposal = ChannelProposal {
            channel_point: funding.outpoint(0),
            funder: me,
            fundee: *peer,
            capacity: amount,
            min_confs,
        };
        if let Err(e) = self.inner.fabric.propose_channel(&proposal) {
            self.inner.state.write().wallet.unlock(&funding.inputs);
            return Err(e);
        }

        let (updates, stream) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        {
            let mut channel = LocalChannel::new(&proposal, true);
            channel.open_updates = Some(updates.clone());
            self.inner
                .state
                .write()
                .channels
                .insert(proposal.channel_point, channel);
        }
        log::info!(
            "{} funding channel {} of {} sat to {}",
            self.inner.alias,
            proposal.channel_point,
            amount,
            &peer.to_hex()[..16]
        );

        let node = self.inner.clone();
        let broadcast = tokio::spawn(async move {
            match node.chain.send_raw_transaction(funding.clone()).await {
                Ok(txid) => {
                    node.state.write().wallet.add_unconfirmed(&funding);
                    let _ = updates.send(OpenStatusUpdate::Pending { txid }).await;
                }
                Err(e) => {
                    log::warn!("{} funding broadcast failed: {}", node.alias, e);
                    {
                        let mut state = node.state.write();
                        state.wallet.unlock(&funding.inputs);
                        state.channels.remove(&proposal.channel_point);
                    }
                    node.fabric.abandon_channel(&proposal.channel_point);
                }
            }
        });
        self.inner.track(broadcast);

        Ok(stream)
    }

    async fn close_channel(
        &self,
        channel_point: &OutPoint,
        force: bool,
    ) -> Result<CloseUpdateStream, RpcError> {
        self.inner.ensure_running()?;
        let (remote, is_funder) = {
            let state = self.inner.state.read();
            let channel = state
                .channels
                .get(channel_point)
                .ok_or_else(|| RpcError::not_found(format!("channel {}", channel_point)))?;
            if channel.state != ChannelState::Open {
                return Err(RpcError::invalid(format!(
                    "channel {} is {}",
                    channel_point, channel.state
                )));
            }
            (channel.remote, channel.is_funder)
        };

        let entry = self.inner.fabric.begin_close(channel_point, force)?;
        let me = self.inner.pubkey();
        let (tx, sweep) = if force {
            let (local, remote_balance) = entry
                .balances_for(&me)
                .ok_or_else(|| RpcError::not_found(format!("channel {}", channel_point)))?;
            self.commitment_transaction(channel_point, &remote, local, remote_balance, is_funder)
        } else {
            (self.closing_transaction(channel_point, &entry), None)
        };
        let txid = tx.txid();

        self.inner.fabric.notify_close(&remote, channel_point, txid, force);

        let (updates, stream) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        {
            let mut state = self.inner.state.write();
            if let Some(channel) = state.channels.get_mut(channel_point) {
                channel.set_state(close_state(force));
                channel.closing_txid = Some(txid);
                channel.close_updates = Some(updates.clone());
                channel.sweep = sweep;
            }
        }
        log::info!(
            "{} {} channel {} with {}",
            self.inner.alias,
            if force { "force closing" } else { "closing" },
            channel_point,
            txid
        );

        let node = self.inner.clone();
        let channel_point = *channel_point;
        let broadcast = tokio::spawn(async move {
            match node.chain.send_raw_transaction(tx).await {
                Ok(txid) => {
                    let _ = updates.send(CloseStatusUpdate::Pending { txid }).await;
                }
                Err(e) => {
                    log::warn!("{} close broadcast for {} failed: {}", node.alias, channel_point, e);
                    if let Some(channel) = node.state.write().channels.get_mut(&channel_point) {
                        channel.close_updates = None;
                    }
                }
            }
        });
        self.inner.track(broadcast);

        Ok(stream)
    }

    async fn channel_balance(&self) -> Result<Amount, RpcError> {
        self.inner.ensure_running()?;
        let open: Vec<OutPoint> = self
            .inner
            .state
            .read()
            .channels
            .values()
            .filter(|c| c.state == ChannelState::Open)
            .map(|c| c.channel_point)
            .collect();
        Ok(open.iter().map(|cp| self.inner.local_balance(cp)).sum())
    }

    async fn add_invoice(
        &self,
        memo: &str,
        preimage: Hash,
        value: Amount,
    ) -> Result<AddInvoiceResponse, RpcError> {
        self.inner.ensure_running()?;
        let invoice = Invoice::new(memo.to_string(), preimage, value);
        let r_hash = invoice.payment_hash;

        let mut state = self.inner.state.write();
        if state.invoices.contains_key(&r_hash) {
            return Err(RpcError::invalid(format!("invoice {} already exists", r_hash)));
        }
        state.invoices.insert(r_hash, invoice);
        Ok(AddInvoiceResponse::new(r_hash, &self.inner.pubkey(), value))
    }

    async fn lookup_invoice(&self, payment_hash: &Hash) -> Result<Invoice, RpcError> {
        self.inner.ensure_running()?;
        self.inner
            .state
            .read()
            .invoices
            .get(payment_hash)
            .cloned()
            .ok_or_else(|| RpcError::not_found(format!("invoice {}", payment_hash)))
    }

    async fn send_payment(&self) -> Result<PaymentStream, RpcError> {
        self.inner.ensure_running()?;
        let (request_tx, mut requests) = mpsc::channel::<SendRequest>(PAYMENT_STREAM_CAPACITY);
        let (responses, response_rx) = mpsc::channel::<SendResponse>(PAYMENT_STREAM_CAPACITY);
        let fabric = self.inner.fabric.clone();
        let source = self.inner.pubkey();

        let server = tokio::spawn(async move {
            let mut in_flight = JoinSet::new();
            loop {
                tokio::select! {
                    request = requests.recv() => {
                        let Some(request) = request else {
                            break;
                        };
                        let fabric = fabric.clone();
                        let responses = responses.clone();
                        in_flight.spawn(async move {
                            let outcome = fabric.send_payment(&source, &request).await;
                            let _ = responses
                                .send(SendResponse {
                                    payment_hash: request.payment_hash,
                                    outcome,
                                })
                                .await;
                        });
                    }
                    Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                }
            }
            // Requester hung up, finish what is already in flight
            while in_flight.join_next().await.is_some() {}
        });
        self.inner.track(server);

        Ok(PaymentStream::new(request_tx, response_rx))
    }

    async fn list_channels(&self) -> Result<Vec<ChannelInfo>, RpcError> {
        self.inner.ensure_running()?;
        let me = self.inner.pubkey();
        let state = self.inner.state.read();
        let mut channels: Vec<ChannelInfo> = state
            .channels
            .values()
            .filter(|c| c.state == ChannelState::Open)
            .filter_map(|c| self.inner.fabric.channel_info(&c.channel_point, &me, c.state))
            .collect();
        channels.sort_by_key(|c| c.channel_point);
        Ok(channels)
    }

    async fn pending_channels(&self) -> Result<Vec<PendingChannel>, RpcError> {
        self.inner.ensure_running()?;
        let state = self.inner.state.read();
        let height = state.synced_height;
        let mut pending: Vec<PendingChannel> = state
            .channels
            .values()
            .filter(|c| c.state.is_pending())
            .map(|c| {
                let sweep_txid = c.sweep.as_ref().and_then(|s| s.txid);
                let pending_txid = match c.state {
                    ChannelState::PendingOpen => Some(c.channel_point.txid),
                    _ => sweep_txid.or(c.closing_txid),
                };
                PendingChannel {
                    channel_point: c.channel_point,
                    remote_pubkey: c.remote,
                    capacity: c.capacity,
                    state: c.state,
                    pending_txid,
                    blocks_til_maturity: c
                        .sweep
                        .as_ref()
                        .and_then(|s| s.maturity_height)
                        .map(|m| m.saturating_sub(height)),
                }
            })
            .collect();
        pending.sort_by_key(|c| c.channel_point);
        Ok(pending)
    }

    async fn show_routing_table(&self) -> Result<Vec<RoutingLink>, RpcError> {
        self.inner.ensure_running()?;
        Ok(self.inner.fabric.routing_table())
    }

    fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    fn stop(&self) {
        self.inner.stop();
    }
}

impl Drop for SimNode {
    fn drop(&mut self) {
        self.inner.stop();
    }
}
