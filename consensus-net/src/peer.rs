//! One live connection to a shard peer.
//!
//! The write side is a stop-and-wait queue: at most one queued frame is in
//! flight, and the next one goes out only after the peer's transport ack.
//! The read side feeds a [`FrameReader`], answers every frame with a
//! transport ack, and forwards decoded messages to the node actor in the
//! order they arrived. Handlers run on the actor, never on the read loop.

use {
    crate::{
        codec::Packet,
        error::{ConsensusNetError, Result},
        frame::FrameReader,
        membership::{InboundMessage, ShardEvent},
    },
    bytes::Bytes,
    log::{debug, info, trace, warn},
    parking_lot::Mutex,
    shardline_consensus_election::{ConsensusMessage, NodeId},
    std::{collections::VecDeque, net::SocketAddr, sync::Arc},
    tokio::{
        io::AsyncWriteExt,
        net::{
            tcp::{OwnedReadHalf, OwnedWriteHalf},
            TcpStream,
        },
        sync::mpsc,
    },
    tokio_util::sync::CancellationToken,
};

/// Outbound frames awaiting delivery under the one-in-flight discipline.
#[derive(Debug)]
pub struct SendQueue {
    queue: VecDeque<Bytes>,
    /// True when the head frame may be sent.
    pending_ack_flag: bool,
}

impl SendQueue {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            pending_ack_flag: true,
        }
    }

    pub fn enqueue(&mut self, frame: Bytes) {
        self.queue.push_back(frame);
    }

    /// Hand out the head frame if nothing is in flight, marking it in flight.
    pub fn try_send(&mut self) -> Option<Bytes> {
        if !self.pending_ack_flag {
            return None;
        }
        let head = self.queue.front()?.clone();
        self.pending_ack_flag = false;
        Some(head)
    }

    /// The in-flight frame was acknowledged: drop it and release the next.
    ///
    /// An ack with nothing in flight is ignored.
    pub fn on_transport_ack(&mut self) -> Option<Bytes> {
        if self.pending_ack_flag {
            return None;
        }
        self.queue.pop_front();
        self.pending_ack_flag = true;
        self.try_send()
    }

    /// Writing the in-flight frame failed; keep it at the head for a retry.
    pub fn on_send_failure(&mut self) {
        self.pending_ack_flag = true;
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Default for SendQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
enum WriteCommand {
    /// Head of the send queue; a failure is reported back to the queue.
    Queued(Bytes),
    /// Transport acks bypass the queue.
    Direct(Bytes),
}

/// A live connection to one shard member.
#[derive(Debug)]
pub struct PeerConnection {
    /// The member's advertised identity.
    peer: NodeId,
    /// Socket address the connection actually runs between.
    remote_addr: SocketAddr,
    connection_id: u64,
    send_queue: Arc<Mutex<SendQueue>>,
    writer_tx: mpsc::UnboundedSender<WriteCommand>,
    cancel: CancellationToken,
}

impl PeerConnection {
    /// Take ownership of an established stream and start its writer task.
    ///
    /// The read half is returned for [`PeerConnection::run_reader`].
    pub fn spawn(
        peer: NodeId,
        connection_id: u64,
        stream: TcpStream,
        cancel: CancellationToken,
    ) -> Result<(Arc<Self>, OwnedReadHalf)> {
        let remote_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let send_queue = Arc::new(Mutex::new(SendQueue::new()));

        tokio::spawn(Self::write_loop(
            peer,
            write_half,
            writer_rx,
            send_queue.clone(),
            cancel.clone(),
        ));

        let connection = Arc::new(Self {
            peer,
            remote_addr,
            connection_id,
            send_queue,
            writer_tx,
            cancel,
        });
        Ok((connection, read_half))
    }

    pub fn peer(&self) -> NodeId {
        self.peer
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Frames queued and not yet acknowledged, in-flight one included.
    pub fn queued_frames(&self) -> usize {
        self.send_queue.lock().len()
    }

    /// Append a frame and send it if nothing is in flight.
    pub fn enqueue_send(&self, frame: Bytes) {
        let mut queue = self.send_queue.lock();
        queue.enqueue(frame);
        if let Some(head) = queue.try_send() {
            self.write(WriteCommand::Queued(head));
        }
    }

    /// Resend the head frame if a failed write left it unsent.
    pub fn try_send(&self) {
        let mut queue = self.send_queue.lock();
        if let Some(head) = queue.try_send() {
            self.write(WriteCommand::Queued(head));
        }
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn on_transport_ack(&self) {
        let mut queue = self.send_queue.lock();
        if let Some(next) = queue.on_transport_ack() {
            self.write(WriteCommand::Queued(next));
        }
    }

    fn write(&self, command: WriteCommand) {
        if self.writer_tx.send(command).is_err() {
            debug!("writer for {} already stopped", self.peer);
        }
    }

    /// Read frames until the connection closes, fails, or is cancelled.
    ///
    /// Frames are decoded in arrival order and every non-ack frame is
    /// acknowledged right away. Consensus messages are forwarded on
    /// `events_tx` in that same order; the node actor runs their handlers.
    pub async fn run_reader(
        self: Arc<Self>,
        mut read_half: OwnedReadHalf,
        mut reader: FrameReader,
        events_tx: mpsc::Sender<ShardEvent>,
    ) -> Result<()> {
        let ack = Packet::TransportAck.encode()?;
        let result = 'read: loop {
            let frames = tokio::select! {
                _ = self.cancel.cancelled() => break Ok(()),
                frames = reader.read_frames(&mut read_half) => frames,
            };
            let frames = match frames {
                Ok(frames) => frames,
                Err(err) => break Err(err),
            };
            for frame in frames {
                let Some(message) = self.accept_frame(frame, &ack) else {
                    continue;
                };
                let event = ShardEvent::Message(InboundMessage {
                    from: self.peer,
                    message,
                });
                let forwarded = tokio::select! {
                    _ = self.cancel.cancelled() => false,
                    sent = events_tx.send(event) => sent.is_ok(),
                };
                if !forwarded {
                    debug!("node channel closed, stopping reader for {}", self.peer);
                    break 'read Ok(());
                }
            }
        };
        self.cancel.cancel();
        result
    }

    /// Decode one frame. Transport acks release the send queue; anything
    /// else is acknowledged, and consensus messages are returned.
    fn accept_frame(&self, frame: Bytes, ack: &Bytes) -> Option<ConsensusMessage> {
        let packet = match Packet::decode(frame) {
            Ok(Packet::TransportAck) => {
                trace!("transport ack from {}", self.peer);
                self.on_transport_ack();
                return None;
            }
            Ok(packet) => packet,
            Err(err) => {
                self.write(WriteCommand::Direct(ack.clone()));
                warn!("dropping malformed frame from {}: {err}", self.peer);
                return None;
            }
        };
        self.write(WriteCommand::Direct(ack.clone()));
        debug!("received {} from {}", packet.kind(), self.peer);
        match packet {
            Packet::Consensus(message) => Some(message),
            other => {
                warn!("unexpected {} from {} after handshake", other.kind(), self.peer);
                None
            }
        }
    }

    async fn write_loop(
        peer: NodeId,
        mut write_half: OwnedWriteHalf,
        mut writer_rx: mpsc::UnboundedReceiver<WriteCommand>,
        send_queue: Arc<Mutex<SendQueue>>,
        cancel: CancellationToken,
    ) {
        loop {
            let command = tokio::select! {
                _ = cancel.cancelled() => break,
                command = writer_rx.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            let (frame, queued) = match command {
                WriteCommand::Queued(frame) => (frame, true),
                WriteCommand::Direct(frame) => (frame, false),
            };
            if let Err(err) = write_frame(&mut write_half, &frame).await {
                if queued {
                    send_queue.lock().on_send_failure();
                }
                info!("write to {peer} failed: {err}");
                cancel.cancel();
                break;
            }
        }
        let _ = write_half.shutdown().await;
    }
}

pub(crate) async fn write_frame(write_half: &mut OwnedWriteHalf, frame: &[u8]) -> Result<()> {
    write_half.write_all(frame).await?;
    write_half.flush().await.map_err(ConsensusNetError::from)
}

// ── Tests ───────────────────────────────────────────────────────────────────
