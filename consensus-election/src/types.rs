//! Core types for the shard election protocol.
//!
//! `proof_index` is the single owner of every [`Event`]; the pending queue
//! and the vote table refer to events by proof string only.

use {
    serde::{Deserialize, Serialize},
    solana_signature::Signature,
    std::{
        collections::{BTreeMap, HashMap, HashSet, VecDeque},
        fmt,
        net::SocketAddr,
    },
};

/// Identity of a shard member: the socket address it advertises to peers.
pub type NodeId = SocketAddr;

/// One application transaction, an opaque `(type, data)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: String,
}

impl Transaction {
    pub fn new(kind: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: data.into(),
        }
    }
}

/// The signed body of a propose packet, serialized as JSON on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBody {
    pub origin: NodeId,
    pub trxs: Vec<Transaction>,
    pub proof: String,
}

impl EventBody {
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// A proposed batch of transactions awaiting inclusion in a block.
#[derive(Debug, Clone)]
pub struct Event {
    pub origin: NodeId,
    pub transactions: Vec<Transaction>,
    pub proof: String,
    /// This node's signed vote for `proof`, prepared when the event is
    /// registered and replayed whenever the node votes for it.
    pub signed_update: ConsensusMessage,
    /// Peer signatures over `proof`, collected from their votes.
    pub backed_proofs: HashMap<NodeId, Signature>,
    /// Peers that acknowledged receipt of this event (origin only).
    pub backed_responses: HashSet<NodeId>,
    /// Set once the origin has asked the shard to elect this event.
    pub election_requested: bool,
}

impl Event {
    pub fn new(
        origin: NodeId,
        transactions: Vec<Transaction>,
        proof: String,
        signed_update: ConsensusMessage,
    ) -> Self {
        Self {
            origin,
            transactions,
            proof,
            signed_update,
            backed_proofs: HashMap::new(),
            backed_responses: HashSet::new(),
            election_requested: false,
        }
    }
}

/// A finalized, ordered unit of output. Blocks are append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Position in the local chain, starting at 0.
    pub index: u64,
    pub proof: String,
    pub origin: NodeId,
    pub transactions: Vec<Transaction>,
}

/// Where a node stands in the election cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    /// No round in flight; a queued election may start.
    Idle,
    /// This node has voted and is collecting the shard's votes.
    Voting,
    /// A winner was committed; waiting for every member's ready signal.
    AwaitingReady,
}

impl RoundPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundPhase::Idle => "idle",
            RoundPhase::Voting => "vote",
            RoundPhase::AwaitingReady => "ready",
        }
    }
}

impl fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide election bookkeeping for one node.
#[derive(Debug)]
pub struct ElectionState {
    /// Transactions not yet batched into an event.
    pub pending_transactions: VecDeque<Transaction>,
    /// Proofs of events awaiting inclusion, oldest proof first.
    pub pending_events: VecDeque<String>,
    /// Owner of every known, not yet evicted event.
    pub proof_index: HashMap<String, Event>,
    /// Current round's votes: voter -> proof voted for.
    pub next_event_votes: BTreeMap<NodeId, String>,
    /// Election requests not yet consumed by a round.
    pub pending_elections: usize,
    /// Rounds joined on a peer's vote before the matching election request
    /// arrived; each absorbs one later request.
    pub early_joins: usize,
    /// Members that signalled completion of the current round.
    pub ready_electors: HashSet<NodeId>,
    pub phase: RoundPhase,
    /// Winner of the round awaiting readiness, evicted once everyone is ready.
    pub awaiting_eviction: Option<String>,
    /// Proofs already committed; a late duplicate proposal must not revive them.
    /// Grows by one entry per committed block, in step with the chain itself.
    pub committed_proofs: HashSet<String>,
}

impl ElectionState {
    pub fn new() -> Self {
        Self {
            pending_transactions: VecDeque::new(),
            pending_events: VecDeque::new(),
            proof_index: HashMap::new(),
            next_event_votes: BTreeMap::new(),
            pending_elections: 0,
            early_joins: 0,
            ready_electors: HashSet::new(),
            phase: RoundPhase::Idle,
            awaiting_eviction: None,
            committed_proofs: HashSet::new(),
        }
    }

    /// True when no round is in flight.
    pub fn ready_for_new_election(&self) -> bool {
        self.phase == RoundPhase::Idle
    }

    /// Insert `proof` into the pending queue, keeping it ordered by age.
    ///
    /// Proofs are microsecond timestamps, so numeric order is age order;
    /// non-numeric proofs sort after numeric ones, lexicographically.
    pub fn enqueue_pending(&mut self, proof: String) {
        if self.pending_events.contains(&proof) {
            return;
        }
        let position = self
            .pending_events
            .iter()
            .position(|queued| proof_order(&proof, queued) == std::cmp::Ordering::Less)
            .unwrap_or(self.pending_events.len());
        self.pending_events.insert(position, proof);
    }
}

impl Default for ElectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Total order over proofs: numeric timestamps first, then by string.
pub fn proof_order(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Consensus-level messages exchanged between shard members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusMessage {
    /// Phase 1: a signed, JSON-serialized [`EventBody`].
    Propose { signature: Signature, event: Vec<u8> },
    /// Phase 2: receipt of a proposal.
    Ack { proof: String },
    /// Phase 3: the origin collected every ack and asks for an election.
    RequestElection { proof: String },
    /// Phase 4: the sender's signed vote for `proof`.
    Vote { signature: Signature, proof: String },
    /// Round complete on the sender.
    Ready,
}

impl ConsensusMessage {
    /// Short human-readable label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ConsensusMessage::Propose { .. } => "Propose",
            ConsensusMessage::Ack { .. } => "Ack",
            ConsensusMessage::RequestElection { .. } => "RequestElection",
            ConsensusMessage::Vote { .. } => "Vote",
            ConsensusMessage::Ready => "Ready",
        }
    }
}

/// Destination of an engine-produced message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    /// Every live shard member except this node.
    Shard,
    Peer(NodeId),
}

/// A message the engine wants delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: Recipient,
    pub message: ConsensusMessage,
}

impl Outbound {
    pub fn shard(message: ConsensusMessage) -> Self {
        Self {
            to: Recipient::Shard,
            message,
        }
    }

    pub fn peer(peer: NodeId, message: ConsensusMessage) -> Self {
        Self {
            to: Recipient::Peer(peer),
            message,
        }
    }
}
