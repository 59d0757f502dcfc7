//! The shard node actor.
//!
//! A single task owns the [`ElectionEngine`] and applies every input to it
//! in turn: membership changes and decoded messages from the network,
//! commands from [`NodeHandle`]s, and the batch timer. Nothing else touches
//! engine state, so no lock guards it.

use {
    crate::{
        codec::Packet,
        config::NodeConfig,
        error::{ConsensusNetError, Result},
        membership::{InboundMessage, ShardEvent, ShardMembership},
    },
    log::{debug, info, warn},
    shardline_consensus_election::{
        Block, ElectionEngine, EngineOutput, KeyDirectory, MemoryLedger, NodeId, Outbound,
        PacketSigner, Recipient, Transaction,
    },
    std::{
        net::SocketAddr,
        sync::Arc,
        time::{Duration, Instant, SystemTime, UNIX_EPOCH},
    },
    tokio::{
        sync::{broadcast, mpsc},
        task::JoinHandle,
        time::MissedTickBehavior,
    },
    tokio_util::sync::CancellationToken,
};

/// Committed blocks a slow subscriber may lag behind before it misses some.
const BLOCK_CHANNEL_CAPACITY: usize = 1_024;

/// Requests from a [`NodeHandle`] to the node actor.
#[derive(Debug)]
pub enum NodeCommand {
    SubmitTransaction(Transaction),
}

/// Client side of a running node. Cheap to clone.
#[derive(Clone)]
pub struct NodeHandle {
    identity: NodeId,
    local_addr: SocketAddr,
    commands_tx: mpsc::Sender<NodeCommand>,
    membership: ShardMembership,
    ledger: MemoryLedger,
    blocks_tx: broadcast::Sender<Block>,
    cancel: CancellationToken,
}

impl NodeHandle {
    /// Queue a transaction for the next batch.
    pub async fn submit_transaction(
        &self,
        kind: impl Into<String>,
        data: impl Into<String>,
    ) -> Result<()> {
        self.commands_tx
            .send(NodeCommand::SubmitTransaction(Transaction::new(kind, data)))
            .await
            .map_err(|_| ConsensusNetError::ChannelClosed)
    }

    /// Every block committed so far, in chain order.
    pub fn committed_blocks(&self) -> Vec<Block> {
        self.ledger.blocks()
    }

    /// Blocks committed from now on.
    pub fn subscribe_blocks(&self) -> broadcast::Receiver<Block> {
        self.blocks_tx.subscribe()
    }

    pub fn member_count(&self) -> usize {
        self.membership.member_count()
    }

    pub fn peers(&self) -> Vec<NodeId> {
        self.membership.peers()
    }

    pub fn identity(&self) -> NodeId {
        self.identity
    }

    /// Address the listener actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Drop the connection to `peer`, as if it had failed.
    pub async fn remove_connection(&self, peer: NodeId) -> bool {
        self.membership.remove_connection(peer).await
    }

    /// Stop the node: the actor, the listener, the dialer and every
    /// connection.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

pub struct ShardNode {
    config: NodeConfig,
    engine: ElectionEngine,
    membership: ShardMembership,
    events_rx: mpsc::Receiver<ShardEvent>,
    commands_rx: mpsc::Receiver<NodeCommand>,
    blocks_tx: broadcast::Sender<Block>,
    cancel: CancellationToken,
    started_at: Instant,
    /// Set once the shard is complete or the startup grace ran out.
    batching: bool,
}

impl ShardNode {
    /// Bind the listener, start dialing and spawn the node actor.
    pub async fn start(
        config: NodeConfig,
        signer: Arc<dyn PacketSigner>,
    ) -> Result<(NodeHandle, JoinHandle<()>)> {
        config.validate()?;
        let directory = Arc::new(config.key_directory()?);
        if let Some(expected) = directory.lookup_public_key(&config.identity) {
            if expected != signer.public_key() {
                return Err(ConsensusNetError::Config(format!(
                    "keypair does not match the key configured for {}",
                    config.identity
                )));
            }
        }

        let cancel = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::channel(config.channel_buffer_size);
        let (commands_tx, commands_rx) = mpsc::channel(config.channel_buffer_size);
        let (blocks_tx, _) = broadcast::channel(BLOCK_CHANNEL_CAPACITY);

        let membership = ShardMembership::new(
            &config,
            signer.clone(),
            directory.clone(),
            events_tx,
            cancel.clone(),
        );
        let local_addr = membership.listen().await?;
        membership.spawn_dialer();

        let ledger = MemoryLedger::new();
        let engine = ElectionEngine::new(
            config.election.clone(),
            config.identity,
            config.peers.iter().map(|peer| peer.addr),
            signer,
            directory,
            Box::new(ledger.clone()),
        );

        let handle = NodeHandle {
            identity: config.identity,
            local_addr,
            commands_tx,
            membership: membership.clone(),
            ledger,
            blocks_tx: blocks_tx.clone(),
            cancel: cancel.clone(),
        };
        let node = Self {
            config,
            engine,
            membership,
            events_rx,
            commands_rx,
            blocks_tx,
            cancel,
            started_at: Instant::now(),
            batching: false,
        };
        Ok((handle, tokio::spawn(node.run())))
    }

    async fn run(mut self) {
        let mut batch_timer =
            tokio::time::interval(Duration::from_millis(self.config.election.batch_interval_ms));
        batch_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "shard node {} running with {} configured members",
            self.engine.identity(),
            self.config.peers.len().max(1)
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some(event) = self.events_rx.recv() => self.on_shard_event(event),
                command = self.commands_rx.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => {
                        debug!("every node handle dropped");
                        break;
                    }
                },
                _ = batch_timer.tick() => self.on_batch_tick(),
            }
        }

        self.cancel.cancel();
        info!(
            "shard node {} stopped after {} blocks",
            self.engine.identity(),
            self.engine.blocks().len()
        );
    }

    fn on_shard_event(&mut self, event: ShardEvent) {
        let output = match event {
            ShardEvent::PeerConnected(peer) => self.engine.on_peer_connected(peer),
            ShardEvent::PeerDisconnected(peer) => self.engine.on_peer_disconnected(peer),
            ShardEvent::Message(InboundMessage { from, message }) => {
                let kind = message.kind();
                match self.engine.on_message(from, message) {
                    Ok(output) => output,
                    Err(err) => {
                        warn!("rejected {kind} from {from}: {err}");
                        return;
                    }
                }
            }
        };
        self.dispatch(output);
    }

    fn on_command(&mut self, command: NodeCommand) {
        match command {
            NodeCommand::SubmitTransaction(transaction) => {
                self.engine.submit_transaction(transaction);
            }
        }
    }

    fn on_batch_tick(&mut self) {
        if !self.batching {
            let grace = Duration::from_millis(self.config.startup_grace_ms);
            if self.membership.all_connected() {
                info!("all shard members connected, starting to batch");
                self.batching = true;
            } else if self.started_at.elapsed() >= grace {
                info!(
                    "startup grace elapsed with {} members live, starting to batch",
                    self.membership.member_count()
                );
                self.batching = true;
            }
        }

        let mut output = EngineOutput::empty();
        if self.batching {
            output.merge(self.engine.on_batch_tick(now_micros()));
        }
        output.merge(self.engine.on_tick());
        self.dispatch(output);
    }

    fn dispatch(&self, output: EngineOutput) {
        for Outbound { to, message } in output.messages {
            let packet = Packet::Consensus(message);
            match to {
                Recipient::Shard => match self.membership.broadcast(&packet) {
                    Ok(sent) => debug!("broadcast {} to {sent} peers", packet.kind()),
                    Err(err) => warn!("broadcast of {} failed: {err}", packet.kind()),
                },
                Recipient::Peer(peer) => {
                    if let Err(err) = self.membership.unicast(peer, &packet) {
                        debug!("dropping {} for {peer}: {err}", packet.kind());
                    }
                }
            }
        }
        for block in output.committed_blocks {
            info!(
                "block {} committed: proof {} from {} with {} transactions",
                block.index,
                block.proof,
                block.origin,
                block.transactions.len()
            );
            // No subscribers is fine.
            let _ = self.blocks_tx.send(block);
        }
        for fault in output.faults {
            debug!("engine fault: {fault}");
        }
    }
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

// ── Tests ───────────────────────────────────────────────────────────────────
