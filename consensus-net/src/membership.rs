//! Shard membership: who we are connected to, and how.
//!
//! The shard is a fixed list of member addresses. Exactly one connection
//! exists per pair of members: a node dials only members whose address
//! sorts above its own and accepts only members whose address sorts below.
//! Every dialed connection opens with a signed hello naming the dialer,
//! which gives the acceptor a verified identity for the connection.
//!
//! This node itself is never connected to; it is counted once in
//! [`ShardMembership::member_count`].

use {
    crate::{
        codec::Packet,
        config::NodeConfig,
        error::{ConsensusNetError, Result},
        frame::FrameReader,
        peer::PeerConnection,
    },
    dashmap::{mapref::entry::Entry, DashMap, DashSet},
    log::{debug, error, info, warn},
    shardline_consensus_election::{
        verify_packet, ConsensusMessage, KeyDirectory, NodeId, PacketSigner,
    },
    std::{
        collections::BTreeSet,
        net::SocketAddr,
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
        time::Duration,
    },
    tokio::{
        io::AsyncWriteExt,
        net::{TcpListener, TcpStream},
        sync::mpsc,
        time::MissedTickBehavior,
    },
    tokio_util::sync::CancellationToken,
};

/// A consensus message together with the member that sent it.
#[derive(Debug)]
pub struct InboundMessage {
    pub from: NodeId,
    pub message: ConsensusMessage,
}

/// Everything the node actor hears from the network.
#[derive(Debug)]
pub enum ShardEvent {
    PeerConnected(NodeId),
    PeerDisconnected(NodeId),
    Message(InboundMessage),
}

struct MembershipInner {
    identity: NodeId,
    bind_addr: SocketAddr,
    /// Configured members, self excluded.
    members: BTreeSet<NodeId>,
    signer: Arc<dyn PacketSigner>,
    directory: Arc<dyn KeyDirectory>,
    connections: DashMap<NodeId, Arc<PeerConnection>>,
    /// Outbound dials in progress.
    dialing: DashSet<NodeId>,
    events_tx: mpsc::Sender<ShardEvent>,
    cancel: CancellationToken,
    next_connection_id: AtomicU64,
    max_frame_size: usize,
    dial_retry_interval: Duration,
    handshake_timeout: Duration,
}

/// Live connection table for one shard. Cheap to clone.
#[derive(Clone)]
pub struct ShardMembership {
    inner: Arc<MembershipInner>,
}

impl ShardMembership {
    pub fn new(
        config: &NodeConfig,
        signer: Arc<dyn PacketSigner>,
        directory: Arc<dyn KeyDirectory>,
        events_tx: mpsc::Sender<ShardEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let members = config
            .peers
            .iter()
            .map(|peer| peer.addr)
            .filter(|addr| *addr != config.identity)
            .collect();
        Self {
            inner: Arc::new(MembershipInner {
                identity: config.identity,
                bind_addr: config.bind_addr,
                members,
                signer,
                directory,
                connections: DashMap::new(),
                dialing: DashSet::new(),
                events_tx,
                cancel,
                next_connection_id: AtomicU64::new(1),
                max_frame_size: config.max_frame_size,
                dial_retry_interval: Duration::from_millis(config.dial_retry_interval_ms),
                handshake_timeout: Duration::from_millis(config.handshake_timeout_ms),
            }),
        }
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn identity(&self) -> NodeId {
        self.inner.identity
    }

    /// Configured members other than this node.
    pub fn members(&self) -> &BTreeSet<NodeId> {
        &self.inner.members
    }

    /// Live members, this node included.
    pub fn member_count(&self) -> usize {
        self.inner.connections.len().saturating_add(1)
    }

    /// Members with a live connection, in address order.
    pub fn peers(&self) -> Vec<NodeId> {
        let mut peers: Vec<NodeId> = self
            .inner
            .connections
            .iter()
            .map(|entry| *entry.key())
            .collect();
        peers.sort();
        peers
    }

    pub fn is_connected(&self, peer: &NodeId) -> bool {
        self.inner.connections.contains_key(peer)
    }

    /// True once every configured member has a live connection.
    pub fn all_connected(&self) -> bool {
        self.inner
            .members
            .iter()
            .all(|member| self.inner.connections.contains_key(member))
    }

    // ── Sending ─────────────────────────────────────────────────────────

    /// Queue `packet` for every live member. Returns how many were targeted.
    pub fn broadcast(&self, packet: &Packet) -> Result<usize> {
        let frame = packet.encode()?;
        let targets = self.snapshot();
        for connection in &targets {
            connection.enqueue_send(frame.clone());
        }
        Ok(targets.len())
    }

    /// Queue `packet` for one live member.
    pub fn unicast(&self, peer: NodeId, packet: &Packet) -> Result<()> {
        let connection = self
            .inner
            .connections
            .get(&peer)
            .map(|entry| entry.value().clone())
            .ok_or(ConsensusNetError::UnknownPeer(peer))?;
        connection.enqueue_send(packet.encode()?);
        Ok(())
    }

    /// Close and forget the connection to `peer`. The dialer re-establishes
    /// it later if `peer` is ours to dial.
    pub async fn remove_connection(&self, peer: NodeId) -> bool {
        let Some((_, connection)) = self.inner.connections.remove(&peer) else {
            return false;
        };
        connection.close();
        info!("removed connection to {peer}");
        self.notify(ShardEvent::PeerDisconnected(peer)).await;
        true
    }

    /// Copy the live connections out so no map guard is held while sending.
    fn snapshot(&self) -> Vec<Arc<PeerConnection>> {
        self.inner
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    // ── Listener ────────────────────────────────────────────────────────

    /// Bind the listener and start accepting members.
    pub async fn listen(&self) -> Result<SocketAddr> {
        let listener = TcpListener::bind(self.inner.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(
            "shard transport listening on {local_addr} as {}",
            self.inner.identity
        );
        tokio::spawn(self.clone().accept_loop(listener));
        Ok(local_addr)
    }

    async fn accept_loop(self, listener: TcpListener) {
        loop {
            let accepted = tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, addr)) => {
                    debug!("accepted connection from {addr}");
                    let membership = self.clone();
                    tokio::spawn(async move {
                        if let Err(err) = membership.accept_member(stream, addr).await {
                            warn!("rejected connection from {addr}: {err}");
                        }
                    });
                }
                Err(err) => {
                    error!("accept error: {err}");
                }
            }
        }
        debug!("listener stopped");
    }

    /// Run the acceptor side of the join handshake.
    async fn accept_member(&self, mut stream: TcpStream, addr: SocketAddr) -> Result<()> {
        let mut reader = FrameReader::new(self.inner.max_frame_size);
        let frame = tokio::time::timeout(
            self.inner.handshake_timeout,
            reader.read_frame(&mut stream),
        )
        .await
        .map_err(|_| handshake_failed(addr, "timed out waiting for hello"))??;

        let packet = Packet::decode(frame)?;
        let Packet::Hello { signature, origin } = packet else {
            return Err(handshake_failed(
                addr,
                format!("expected Hello, got {}", packet.kind()),
            ));
        };
        if !self.inner.members.contains(&origin) {
            return Err(handshake_failed(addr, format!("{origin} is not a shard member")));
        }
        if origin > self.inner.identity {
            return Err(handshake_failed(
                addr,
                format!("{origin} sorts above {}, it must be dialed", self.inner.identity),
            ));
        }
        let origin_text = origin.to_string();
        verify_packet(
            self.inner.directory.as_ref(),
            &origin,
            origin_text.as_bytes(),
            &signature,
        )
        .map_err(|err| handshake_failed(addr, err.to_string()))?;
        if self.is_connected(&origin) {
            return Err(handshake_failed(addr, format!("{origin} is already connected")));
        }

        self.register(origin, stream, reader).await
    }

    // ── Dialer ──────────────────────────────────────────────────────────

    /// Start the periodic dial loop. Each tick dials every member above us
    /// that is not connected and retries any stalled send.
    pub fn spawn_dialer(&self) {
        tokio::spawn(self.clone().dial_loop());
    }

    async fn dial_loop(self) {
        let mut interval = tokio::time::interval(self.inner.dial_retry_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            for connection in self.snapshot() {
                connection.try_send();
            }
            for peer in self.dial_targets() {
                if !self.inner.dialing.insert(peer) {
                    continue;
                }
                let membership = self.clone();
                tokio::spawn(async move {
                    if let Err(err) = membership.dial(peer).await {
                        debug!("dial to {peer} failed: {err}");
                    }
                    membership.inner.dialing.remove(&peer);
                });
            }
        }
        debug!("dialer stopped");
    }

    fn dial_targets(&self) -> Vec<NodeId> {
        self.inner
            .members
            .iter()
            .filter(|member| **member > self.inner.identity && !self.is_connected(member))
            .copied()
            .collect()
    }

    /// Run the dialer side of the join handshake.
    async fn dial(&self, peer: NodeId) -> Result<()> {
        let mut stream = tokio::time::timeout(self.inner.handshake_timeout, TcpStream::connect(peer))
            .await
            .map_err(|_| handshake_failed(peer, "connect timed out"))??;
        let origin = self.inner.identity;
        let hello = Packet::Hello {
            signature: self.inner.signer.sign_packet(origin.to_string().as_bytes()),
            origin,
        }
        .encode()?;
        stream.write_all(&hello).await?;
        self.register(peer, stream, FrameReader::new(self.inner.max_frame_size))
            .await
    }

    // ── Connection lifecycle ────────────────────────────────────────────

    async fn register(&self, peer: NodeId, stream: TcpStream, reader: FrameReader) -> Result<()> {
        let connection_id = self.inner.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let (connection, read_half) =
            PeerConnection::spawn(peer, connection_id, stream, self.inner.cancel.child_token())?;
        match self.inner.connections.entry(peer) {
            Entry::Occupied(_) => {
                connection.close();
                return Err(handshake_failed(peer, "already connected"));
            }
            Entry::Vacant(entry) => {
                entry.insert(connection.clone());
            }
        }
        info!(
            "connected to shard member {peer} via {}",
            connection.remote_addr()
        );
        self.notify(ShardEvent::PeerConnected(peer)).await;

        let membership = self.clone();
        tokio::spawn(async move {
            let result = connection
                .clone()
                .run_reader(read_half, reader, membership.inner.events_tx.clone())
                .await;
            match result {
                Ok(()) => debug!("connection to {peer} stopped"),
                Err(ConsensusNetError::TransportClosed) => info!("{peer} closed the connection"),
                Err(err) => warn!("connection to {peer} failed: {err}"),
            }
            membership.drop_connection(peer, connection_id).await;
        });
        Ok(())
    }

    /// Forget `peer` if `connection_id` is still its live connection.
    async fn drop_connection(&self, peer: NodeId, connection_id: u64) {
        let removed = self
            .inner
            .connections
            .remove_if(&peer, |_, connection| connection.connection_id() == connection_id);
        if let Some((_, connection)) = removed {
            connection.close();
            info!("lost shard member {peer}");
            self.notify(ShardEvent::PeerDisconnected(peer)).await;
        }
    }

    async fn notify(&self, event: ShardEvent) {
        if self.inner.events_tx.send(event).await.is_err() {
            debug!("node channel closed, membership event dropped");
        }
    }
}

fn handshake_failed(addr: SocketAddr, reason: impl Into<String>) -> ConsensusNetError {
    ConsensusNetError::HandshakeFailed {
        addr,
        reason: reason.into(),
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::config::{NodeConfig, PeerConfig},
        solana_keypair::Keypair,
    };

    struct TestMember {
        membership: ShardMembership,
        events_rx: mpsc::Receiver<ShardEvent>,
        cancel: CancellationToken,
    }

    fn free_addr() -> NodeId {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    }

    fn shard_config(identity: NodeId, members: &[(NodeId, &Keypair)]) -> NodeConfig {
        NodeConfig {
            bind_addr: identity,
            identity,
            peers: members
                .iter()
                .map(|(addr, keypair)| PeerConfig::new(*addr, &PacketSigner::public_key(*keypair)))
                .collect(),
            ..NodeConfig::dev_default()
        }
    }

    async fn start_member(config: &NodeConfig, keypair: Arc<Keypair>) -> TestMember {
        let directory = Arc::new(config.key_directory().unwrap());
        let (events_tx, events_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let membership = ShardMembership::new(config, keypair, directory, events_tx, cancel.clone());
        membership.listen().await.unwrap();
        membership.spawn_dialer();
        TestMember {
            membership,
            events_rx,
            cancel,
        }
    }

    async fn next_event(rx: &mut mpsc::Receiver<ShardEvent>) -> ShardEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timeout waiting for shard event")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_pair_connects_once_and_exchanges_messages() {
        let keypairs = [Arc::new(Keypair::new()), Arc::new(Keypair::new())];
        let mut addrs = [free_addr(), free_addr()];
        addrs.sort();
        let members: Vec<(NodeId, &Keypair)> = addrs
            .iter()
            .zip(&keypairs)
            .map(|(addr, keypair)| (*addr, keypair.as_ref()))
            .collect();

        let mut low = start_member(&shard_config(addrs[0], &members), keypairs[0].clone()).await;
        let mut high = start_member(&shard_config(addrs[1], &members), keypairs[1].clone()).await;

        assert!(matches!(
            next_event(&mut low.events_rx).await,
            ShardEvent::PeerConnected(peer) if peer == addrs[1]
        ));
        assert!(matches!(
            next_event(&mut high.events_rx).await,
            ShardEvent::PeerConnected(peer) if peer == addrs[0]
        ));
        assert!(low.membership.all_connected());
        assert_eq!(low.membership.member_count(), 2);
        assert_eq!(high.membership.peers(), vec![addrs[0]]);

        low.membership
            .broadcast(&Packet::Consensus(ConsensusMessage::Ready))
            .unwrap();
        high.membership
            .unicast(
                addrs[0],
                &Packet::Consensus(ConsensusMessage::Ack {
                    proof: "P1".to_string(),
                }),
            )
            .unwrap();

        match next_event(&mut high.events_rx).await {
            ShardEvent::Message(InboundMessage { from, message }) => {
                assert_eq!(from, addrs[0]);
                assert_eq!(message, ConsensusMessage::Ready);
            }
            other => panic!("unexpected event {other:?}"),
        }
        match next_event(&mut low.events_rx).await {
            ShardEvent::Message(InboundMessage { from, message }) => {
                assert_eq!(from, addrs[1]);
                assert_eq!(
                    message,
                    ConsensusMessage::Ack {
                        proof: "P1".to_string()
                    }
                );
            }
            other => panic!("unexpected event {other:?}"),
        }

        assert!(
            high.membership
                .unicast(free_addr(), &Packet::TransportAck)
                .is_err()
        );

        // Removing the connection notifies both sides.
        assert!(low.membership.remove_connection(addrs[1]).await);
        assert!(matches!(
            next_event(&mut low.events_rx).await,
            ShardEvent::PeerDisconnected(peer) if peer == addrs[1]
        ));
        assert!(matches!(
            next_event(&mut high.events_rx).await,
            ShardEvent::PeerDisconnected(peer) if peer == addrs[0]
        ));

        low.cancel.cancel();
        high.cancel.cancel();
    }

    #[tokio::test]
    async fn test_forged_hello_rejected() {
        let member_key = Arc::new(Keypair::new());
        let impostor_key = Keypair::new();
        let mut addrs = [free_addr(), free_addr()];
        addrs.sort();
        let config = shard_config(
            addrs[1],
            &[(addrs[0], &impostor_key), (addrs[1], member_key.as_ref())],
        );
        let mut member = start_member(&config, member_key.clone()).await;
        let mut stream = TcpStream::connect(addrs[1]).await.unwrap();

        // Claims to be addrs[0] but signs with a key the shard does not know.
        let wrong_key = Keypair::new();
        let hello = Packet::Hello {
            signature: wrong_key.sign_packet(addrs[0].to_string().as_bytes()),
            origin: addrs[0],
        };
        stream.write_all(&hello.encode().unwrap()).await.unwrap();

        let mut reader = FrameReader::new(1024);
        let closed = tokio::time::timeout(Duration::from_secs(5), reader.read_frame(&mut stream))
            .await
            .expect("connection should be dropped");
        assert!(closed.is_err());
        assert!(!member.membership.is_connected(&addrs[0]));
        assert!(member.events_rx.try_recv().is_err());
        member.cancel.cancel();
    }
}
