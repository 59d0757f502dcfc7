//! Shared test utilities for shard end-to-end tests.
//!
//! Provides a local shard of real nodes:
//! - one keypair and loopback address per member
//! - a shared member list, so every node dials and verifies the others
//! - polling helpers for connection and commit progress

use {
    shardline_consensus_election::{Block, NodeId},
    shardline_consensus_net::{NodeConfig, NodeHandle, PeerConfig, ShardNode},
    solana_keypair::Keypair,
    solana_signer::Signer,
    std::{
        net::TcpListener,
        sync::Arc,
        time::{Duration, Instant},
    },
    tokio::task::JoinHandle,
};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// How long a shard may take to connect fully.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a shard may take to commit the blocks a test waits for.
pub const COMMIT_TIMEOUT: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Info)
        .try_init();
}

/// `n` loopback addresses that were free a moment ago, in address order.
pub fn free_addrs(n: usize) -> Vec<NodeId> {
    let listeners: Vec<TcpListener> = (0..n)
        .map(|_| TcpListener::bind("127.0.0.1:0").unwrap())
        .collect();
    let mut addrs: Vec<NodeId> = listeners
        .iter()
        .map(|listener| listener.local_addr().unwrap())
        .collect();
    addrs.sort();
    addrs
}

// ─────────────────────────────────────────────────────────────────────────────
// Local shard
// ─────────────────────────────────────────────────────────────────────────────

pub struct LocalShard {
    pub addrs: Vec<NodeId>,
    pub nodes: Vec<NodeHandle>,
    joins: Vec<Option<JoinHandle<()>>>,
}

impl LocalShard {
    /// Start `n` members with dev timings.
    pub async fn start(n: usize) -> Self {
        Self::start_with(n, |_| {}).await
    }

    /// Start `n` members, letting `tweak` adjust each member's config.
    pub async fn start_with(n: usize, tweak: impl Fn(&mut NodeConfig)) -> Self {
        let addrs = free_addrs(n);
        let keypairs: Vec<Arc<Keypair>> = (0..n).map(|_| Arc::new(Keypair::new())).collect();
        let peers: Vec<PeerConfig> = addrs
            .iter()
            .zip(&keypairs)
            .map(|(addr, keypair)| PeerConfig::new(*addr, &keypair.pubkey()))
            .collect();

        let mut nodes = Vec::with_capacity(n);
        let mut joins = Vec::with_capacity(n);
        for (addr, keypair) in addrs.iter().zip(keypairs) {
            let mut config = NodeConfig {
                bind_addr: *addr,
                identity: *addr,
                peers: peers.clone(),
                ..NodeConfig::dev_default()
            };
            tweak(&mut config);
            let (handle, join) = ShardNode::start(config, keypair).await.unwrap();
            nodes.push(handle);
            joins.push(Some(join));
        }
        Self {
            addrs,
            nodes,
            joins,
        }
    }

    /// Wait until every running node sees `expected` live members.
    pub async fn wait_for_members(&self, expected: usize) {
        let reached = wait_until(CONNECT_TIMEOUT, || {
            self.nodes
                .iter()
                .filter(|node| !node.is_shutdown())
                .all(|node| node.member_count() == expected)
        })
        .await;
        assert!(
            reached,
            "shard did not settle at {expected} members: {:?}",
            self.member_counts()
        );
    }

    /// Wait until node `index` has committed at least `count` blocks.
    pub async fn wait_for_blocks(&self, index: usize, count: usize) -> Vec<Block> {
        let node = &self.nodes[index];
        let reached = wait_until(COMMIT_TIMEOUT, || node.committed_blocks().len() >= count).await;
        let blocks = node.committed_blocks();
        assert!(
            reached,
            "node {index} committed {} of {count} blocks",
            blocks.len()
        );
        blocks
    }

    /// Wait for `count` blocks on every running member and return their chains.
    pub async fn wait_for_chains(&self, count: usize) -> Vec<Vec<Block>> {
        let mut chains = Vec::with_capacity(self.nodes.len());
        for (index, node) in self.nodes.iter().enumerate() {
            if !node.is_shutdown() {
                chains.push(self.wait_for_blocks(index, count).await);
            }
        }
        chains
    }

    pub fn member_counts(&self) -> Vec<usize> {
        self.nodes.iter().map(|node| node.member_count()).collect()
    }

    /// Stop one member and wait for its actor to exit.
    pub async fn stop(&mut self, index: usize) {
        self.nodes[index].shutdown();
        if let Some(join) = self.joins[index].take() {
            join.await.unwrap();
        }
    }

    pub async fn shutdown(mut self) {
        for index in 0..self.nodes.len() {
            self.stop(index).await;
        }
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    condition()
}

/// Assert every chain holds the same blocks in the same order.
pub fn assert_same_chain(chains: &[Vec<Block>]) {
    let Some((first, rest)) = chains.split_first() else {
        return;
    };
    for (offset, chain) in rest.iter().enumerate() {
        assert_eq!(
            chain,
            first,
            "chain of node {} diverged from node 0",
            offset + 1
        );
    }
    for (index, block) in first.iter().enumerate() {
        assert_eq!(block.index, index as u64);
    }
}
