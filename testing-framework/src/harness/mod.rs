// File: testing-framework/src/harness/mod.rs
//
// NetworkHarness: the explicit context of one run. It owns the chain driver,
// the peer fabric and every node, and hands them to scenarios by reference.
//
// Channel open and close are split in two steps. The first returns as soon as
// the transaction is broadcast, so the caller decides when blocks are mined.
// The second waits, bounded, for the final update.

use crate::assertions::poll::{recv_within, PollConfig, Poller, Probe};
use crate::chain::ChainDriver;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result, RpcResultExt};
use crate::node::{
    CloseUpdateStream, LightningNode, NodeParams, OpenUpdateStream, PeerFabric, SimNode,
};
use crate::orchestrator::RunEnv;
use ln_itest_common::{
    block::Block,
    channel::{ChannelInfo, CloseStatusUpdate, OpenStatusUpdate, PendingChannel},
    crypto::{Hash, PublicKey},
    node::WalletBalance,
    transaction::{OutPoint, Transaction},
    Amount,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Channel open in flight: funding broadcast, not yet confirmed
pub struct ChannelOpening {
    pub funding_txid: Hash,
    updates: OpenUpdateStream,
}

/// Channel close in flight: closing or commitment transaction broadcast
pub struct ChannelClosing {
    pub closing_txid: Hash,
    updates: CloseUpdateStream,
}

/// What a node looked like when a snapshot was taken
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub alias: String,
    pub pubkey: PublicKey,
    pub running: bool,
    pub wallet: Option<WalletBalance>,
    pub channels: Vec<ChannelInfo>,
    pub pending_channels: Vec<PendingChannel>,
}

/// Chain and node state captured for failure artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessSnapshot {
    pub block_height: Option<u64>,
    pub mempool: Vec<Hash>,
    pub nodes: Vec<NodeSnapshot>,
}

/// Shared context of one run: chain, nodes and their channels.
pub struct NetworkHarness {
    config: HarnessConfig,
    env: RunEnv,
    chain: ChainDriver,
    fabric: Arc<PeerFabric>,
    params: NodeParams,
    alice: LightningNode,
    bob: LightningNode,
    // Every node, seed nodes first
    nodes: RwLock<Vec<LightningNode>>,
    journal: Mutex<Vec<String>>,
    torn_down: AtomicBool,
}

impl NetworkHarness {
    /// Mine the setup chain, start Alice and Bob, connect and fund them.
    ///
    /// Every failure here is a setup failure and leaves nothing running.
    pub async fn new(config: HarnessConfig, env: RunEnv) -> Result<Self> {
        config.validate()?;
        let chain = ChainDriver::regtest();
        chain.set_up(config.spendable_blocks).await?;

        let fabric = PeerFabric::new(env.clock.clone(), config.hop_latency());
        let params = NodeParams::from(&config);

        let alice = spawn_node("Alice", &env, &params, &chain, &fabric).await?;
        let bob = spawn_node("Bob", &env, &params, &chain, &fabric).await?;

        let harness = Self {
            nodes: RwLock::new(vec![alice.clone(), bob.clone()]),
            alice,
            bob,
            config,
            env,
            chain,
            fabric,
            params,
            journal: Mutex::new(Vec::new()),
            torn_down: AtomicBool::new(false),
        };

        if let Err(e) = harness.set_up_seed_nodes().await {
            harness.tear_down_all();
            return Err(match e {
                HarnessError::Setup(_) => e,
                other => HarnessError::setup(other),
            });
        }
        log::info!(
            "Network harness ready (seed {:#018x}), Alice {} Bob {}",
            harness.env.seed(),
            harness.alice.pubkey(),
            harness.bob.pubkey()
        );
        Ok(harness)
    }

    async fn set_up_seed_nodes(&self) -> Result<()> {
        self.connect_nodes(&self.alice, &self.bob).await?;

        let per_node = self.config.seed_outputs as Amount * self.config.seed_output_value;
        let mut outputs = Vec::new();
        for node in [&self.alice, &self.bob] {
            let address = node.new_address().await.rpc("NewAddress")?;
            for _ in 0..self.config.seed_outputs {
                outputs.push((address, self.config.seed_output_value));
            }
        }
        self.chain.send_many(outputs).await?;
        self.generate(1).await?;

        for node in [&self.alice, &self.bob] {
            self.wait_for_wallet(node, per_node).await?;
        }
        self.note(format!(
            "seed nodes funded with {} x {} sat",
            self.config.seed_outputs, self.config.seed_output_value
        ));
        Ok(())
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn env(&self) -> &RunEnv {
        &self.env
    }

    /// The run's chain driver
    pub fn chain(&self) -> &ChainDriver {
        &self.chain
    }

    pub fn fabric(&self) -> &Arc<PeerFabric> {
        &self.fabric
    }

    pub fn alice(&self) -> &LightningNode {
        &self.alice
    }

    pub fn bob(&self) -> &LightningNode {
        &self.bob
    }

    /// Every node of the network, seed nodes first
    pub fn nodes(&self) -> Vec<LightningNode> {
        self.nodes.read().clone()
    }

    /// Poller with the configured timeout and interval
    pub fn poller(&self) -> Poller {
        Poller::new(
            self.env.clock.clone(),
            PollConfig {
                timeout: self.config.poll_timeout(),
                interval: self.config.poll_interval(),
            },
        )
    }

    /// Mine exactly `n` blocks
    pub async fn generate(&self, n: u32) -> Result<Vec<Hash>> {
        let hashes = self.chain.generate(n).await?;
        self.note(format!("generated {} block(s)", n));
        Ok(hashes)
    }

    pub async fn get_block(&self, hash: &Hash) -> Result<Block> {
        self.chain.get_block(hash).await
    }

    pub async fn get_raw_mempool(&self) -> Result<Vec<Hash>> {
        self.chain.get_raw_mempool().await
    }

    pub async fn get_raw_transaction(&self, txid: &Hash) -> Result<Transaction> {
        self.chain.get_raw_transaction(txid).await
    }

    /// Start a fresh node with a seeded identity. It has no peers and no coins.
    pub async fn new_node(&self, alias: &str) -> Result<LightningNode> {
        self.ensure_live()?;
        let node = spawn_node(alias, &self.env, &self.params, &self.chain, &self.fabric).await?;
        self.nodes.write().push(node.clone());
        self.note(format!("started node {} ({})", alias, node.pubkey()));
        Ok(node)
    }

    /// Make `a` and `b` peers
    pub async fn connect_nodes(&self, a: &LightningNode, b: &LightningNode) -> Result<()> {
        a.connect_peer(&b.pubkey()).await.rpc("ConnectPeer")?;
        self.note(format!("connected {} <-> {}", a, b));
        Ok(())
    }

    /// Pay `amount` to `node` from the miner wallet, confirm it and wait until
    /// the node's wallet sees it.
    pub async fn send_coins(&self, amount: Amount, node: &LightningNode) -> Result<()> {
        let before = node.wallet_balance().await.rpc("WalletBalance")?;
        let address = node.new_address().await.rpc("NewAddress")?;
        let txid = self.chain.send_coins_to(&address, amount).await?;
        self.generate(1).await?;
        self.wait_for_wallet(node, before.confirmed_balance + amount)
            .await?;
        self.note(format!("sent {} sat to {} in {}", amount, node, txid));
        Ok(())
    }

    async fn wait_for_wallet(&self, node: &LightningNode, at_least: Amount) -> Result<()> {
        self.poller()
            .wait_until(
                &format!("{} wallet balance", node),
                format!(">= {} sat confirmed", at_least),
                move || async move {
                    match node.wallet_balance().await {
                        Ok(balance) => Probe::when(
                            balance.confirmed_balance >= at_least,
                            (),
                            format!("{} sat confirmed", balance.confirmed_balance),
                        ),
                        Err(e) => Probe::Pending(format!("rpc error: {}", e)),
                    }
                },
            )
            .await
    }

    /// Ask `initiator` to fund a channel to `responder`. Returns once the
    /// funding transaction is in the mempool, never waits for confirmation.
    pub async fn open_channel(
        &self,
        initiator: &LightningNode,
        responder: &LightningNode,
        amount: Amount,
        min_confs: u32,
    ) -> Result<ChannelOpening> {
        let mut updates = initiator
            .open_channel(&responder.pubkey(), amount, min_confs)
            .await
            .rpc("OpenChannel")?;

        let update = recv_within(
            self.env.clock.as_ref(),
            &mut updates,
            "OpenChannel",
            self.config.poll_timeout(),
        )
        .await?;
        let funding_txid = match update {
            OpenStatusUpdate::Pending { txid } => txid,
            other => {
                return Err(HarnessError::assertion(
                    "first open update",
                    "pending",
                    format!("{:?}", other),
                ))
            }
        };

        self.note(format!(
            "{} opening {} sat channel to {}, funding {}",
            initiator, amount, responder, funding_txid
        ));
        Ok(ChannelOpening {
            funding_txid,
            updates,
        })
    }

    /// Block until the open update arrives or `deadline` elapses
    pub async fn wait_for_channel_open(&self, opening: ChannelOpening, deadline: Duration) -> Result<OutPoint> {
        let ChannelOpening {
            funding_txid,
            mut updates,
        } = opening;
        let update = recv_within(self.env.clock.as_ref(), &mut updates, "OpenChannel", deadline).await?;
        match update {
            OpenStatusUpdate::Open(channel_point) => {
                if channel_point.txid != funding_txid {
                    return Err(HarnessError::assertion(
                        "opened channel outpoint",
                        funding_txid,
                        channel_point,
                    ));
                }
                self.note(format!("channel {} open", channel_point));
                Ok(channel_point)
            }
            other => Err(HarnessError::assertion(
                "open update",
                "open",
                format!("{:?}", other),
            )),
        }
    }

    /// Close `channel_point` from `node`. `force` broadcasts the latest
    /// commitment without negotiation. Returns once the transaction is in
    /// the mempool.
    pub async fn close_channel(
        &self,
        node: &LightningNode,
        channel_point: &OutPoint,
        force: bool,
    ) -> Result<ChannelClosing> {
        let mut updates = node
            .close_channel(channel_point, force)
            .await
            .rpc("CloseChannel")?;

        let update = recv_within(
            self.env.clock.as_ref(),
            &mut updates,
            "CloseChannel",
            self.config.poll_timeout(),
        )
        .await?;
        let closing_txid = match update {
            CloseStatusUpdate::Pending { txid } => txid,
            other => {
                return Err(HarnessError::assertion(
                    "first close update",
                    "pending",
                    format!("{:?}", other),
                ))
            }
        };

        self.note(format!(
            "{} {} channel {}, closing tx {}",
            node,
            if force { "force closing" } else { "closing" },
            channel_point,
            closing_txid
        ));
        Ok(ChannelClosing {
            closing_txid,
            updates,
        })
    }

    /// Block until the close update arrives or `deadline` elapses. Returns the
    /// id of the transaction that closed the channel.
    pub async fn wait_for_channel_close(&self, closing: ChannelClosing, deadline: Duration) -> Result<Hash> {
        let ChannelClosing {
            closing_txid,
            mut updates,
        } = closing;
        let update = recv_within(self.env.clock.as_ref(), &mut updates, "CloseChannel", deadline).await?;
        match update {
            CloseStatusUpdate::Closed(txid) if txid == closing_txid => {
                self.note(format!("channel closed by {}", txid));
                Ok(txid)
            }
            other => Err(HarnessError::assertion(
                "close update",
                format!("closed by {}", closing_txid),
                format!("{:?}", other),
            )),
        }
    }

    /// Poll `node`'s channel listing until `channel_point` shows up
    pub async fn assert_channel_exists(&self, node: &LightningNode, channel_point: &OutPoint) -> Result<()> {
        let channel_point = *channel_point;
        self.poller()
            .wait_until(
                &format!("channel {} listed by {}", channel_point, node),
                channel_point,
                move || async move {
                    match node.list_channels().await {
                        Ok(channels) => Probe::when(
                            channels.iter().any(|c| c.channel_point == channel_point),
                            (),
                            format!("{} other channel(s)", channels.len()),
                        ),
                        Err(e) => Probe::Pending(format!("rpc error: {}", e)),
                    }
                },
            )
            .await
    }

    /// Mine one block when transactions are left in the mempool, so the next
    /// scenario starts from an empty one. Returns the number flushed.
    pub async fn flush_mempool(&self) -> Result<usize> {
        let mempool = self.get_raw_mempool().await?;
        if mempool.is_empty() {
            return Ok(0);
        }
        log::warn!("Flushing {} leftover mempool transaction(s)", mempool.len());
        self.generate(1).await?;
        Ok(mempool.len())
    }

    /// Append a line to the run journal
    pub fn note(&self, line: impl Into<String>) {
        let line = line.into();
        log::info!("{}", line);
        let stamp = chrono::Utc::now().format("%H:%M:%S%.3f");
        self.journal.lock().push(format!("{} {}", stamp, line));
    }

    /// Take every journal line recorded since the last drain
    pub fn drain_journal(&self) -> Vec<String> {
        std::mem::take(&mut *self.journal.lock())
    }

    /// Best-effort view of chain and nodes. Calls that fail are left empty.
    pub async fn snapshot(&self) -> HarnessSnapshot {
        let mut nodes = Vec::new();
        for node in self.nodes() {
            nodes.push(NodeSnapshot {
                alias: node.alias().to_string(),
                pubkey: node.pubkey(),
                running: node.is_running(),
                wallet: node.wallet_balance().await.ok(),
                channels: node.list_channels().await.unwrap_or_default(),
                pending_channels: node.pending_channels().await.unwrap_or_default(),
            });
        }
        HarnessSnapshot {
            block_height: self.chain.block_count().await.ok(),
            mempool: self.chain.get_raw_mempool().await.unwrap_or_default(),
            nodes,
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_torn_down() {
            Err(HarnessError::setup("harness already torn down"))
        } else {
            Ok(())
        }
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// Stop every node and the chain. Idempotent, also run on drop.
    pub fn tear_down_all(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let nodes = self.nodes.read().clone();
        for node in &nodes {
            node.stop();
        }
        self.chain.tear_down();
        log::info!("Network harness torn down ({} node(s))", nodes.len());
    }
}

impl Drop for NetworkHarness {
    fn drop(&mut self) {
        self.tear_down_all();
    }
}

async fn spawn_node(
    alias: &str,
    env: &RunEnv,
    params: &NodeParams,
    chain: &ChainDriver,
    fabric: &Arc<PeerFabric>,
) -> Result<LightningNode> {
    let node = SimNode::spawn(
        alias,
        env.rng.gen_keypair(),
        params.clone(),
        chain.backend(),
        fabric.clone(),
    )
    .await
    .map_err(|e| HarnessError::setup(format!("unable to start node {}: {}", alias, e)))?;
    Ok(LightningNode::new(Arc::new(node)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use ln_itest_common::config::SATOSHI_PER_BITCOIN;

    async fn harness() -> NetworkHarness {
        let config = HarnessConfig {
            seed_outputs: 2,
            spendable_blocks: 5,
            ..HarnessConfig::default()
        };
        NetworkHarness::new(config, RunEnv::paused(7)).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_funds_and_connects_seed_nodes() {
        let h = harness().await;
        assert_eq!(h.chain().block_count().await.unwrap(), 106);
        for node in [h.alice(), h.bob()] {
            let balance = node.wallet_balance().await.unwrap();
            assert_eq!(balance.confirmed_balance, 2 * SATOSHI_PER_BITCOIN);
            assert_eq!(node.get_info().await.unwrap().num_peers, 1);
        }
        assert!(!h.drain_journal().is_empty());
        assert!(h.drain_journal().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_wait_and_close() {
        let h = harness().await;
        let opening = h.open_channel(h.alice(), h.bob(), 200_000, 1).await.unwrap();
        assert_eq!(h.get_raw_mempool().await.unwrap(), vec![opening.funding_txid]);

        let hashes = h.generate(1).await.unwrap();
        let cp = h.wait_for_channel_open(opening, Duration::from_secs(5)).await.unwrap();
        assert!(h.get_block(&hashes[0]).await.unwrap().contains(&cp.txid));
        h.assert_channel_exists(h.bob(), &cp).await.unwrap();

        let closing = h.close_channel(h.alice(), &cp, false).await.unwrap();
        h.generate(1).await.unwrap();
        let txid = h.wait_for_channel_close(closing, Duration::from_secs(5)).await.unwrap();
        assert!(h.chain().get_raw_transaction(&txid).await.unwrap().spends(&cp));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_wait_times_out_without_blocks() {
        let h = harness().await;
        let opening = h.open_channel(h.alice(), h.bob(), 100_000, 1).await.unwrap();
        let err = h
            .wait_for_channel_open(opening, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Timeout);
        assert_eq!(h.flush_mempool().await.unwrap(), 1);
        assert_eq!(h.flush_mempool().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_node_and_send_coins() {
        let h = harness().await;
        let carol = h.new_node("Carol").await.unwrap();
        h.send_coins(SATOSHI_PER_BITCOIN, &carol).await.unwrap();
        assert_eq!(
            carol.wallet_balance().await.unwrap().confirmed_balance,
            SATOSHI_PER_BITCOIN
        );
        assert_eq!(h.nodes().len(), 3);

        let snapshot = h.snapshot().await;
        assert_eq!(snapshot.nodes.len(), 3);
        assert!(snapshot.mempool.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tear_down_is_idempotent() {
        let h = harness().await;
        h.tear_down_all();
        h.tear_down_all();
        assert!(h.is_torn_down());
        assert!(!h.alice().is_running());
        assert!(h.new_node("late").await.is_err());
        let err = h.generate(1).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Rpc);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_is_rejected() {
        let config = HarnessConfig {
            poll_interval_ms: 0,
            ..HarnessConfig::default()
        };
        assert!(NetworkHarness::new(config, RunEnv::paused(1)).await.is_err());
    }
}
