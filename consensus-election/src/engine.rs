//! The shard election state machine.
//!
//! Drives each event through propose → ack → election request → vote →
//! commit → ready. The engine performs no I/O: every entry point returns an
//! [`EngineOutput`] with the messages to deliver and the blocks committed,
//! and the caller owns sockets and timers.
//!
//! Quorums are derived from the live membership at every check:
//!
//! | phase | counted from                  | threshold            |
//! |-------|-------------------------------|----------------------|
//! | ack   | live peers (origin excluded)  | `member_count() - 1` |
//! | vote  | live peers + self             | `member_count()`     |
//! | ready | live peers + self             | `member_count()`     |

use {
    crate::{
        config::ElectionConfig,
        error::{ElectionError, Result},
        identity::{verify_packet, KeyDirectory, PacketSigner},
        ledger::BlockSink,
        tally::tally_votes,
        timeout::RoundTimer,
        types::{
            Block, ConsensusMessage, ElectionState, Event, EventBody, NodeId, Outbound,
            RoundPhase, Transaction,
        },
    },
    log::*,
    solana_signature::Signature,
    std::{collections::BTreeSet, sync::Arc},
};

/// Result of processing an input.
#[derive(Debug, Default)]
pub struct EngineOutput {
    /// Messages to deliver to the shard or to a single peer.
    pub messages: Vec<Outbound>,
    /// Blocks committed while handling the input, in chain order.
    pub committed_blocks: Vec<Block>,
    /// Non-message failures observed along the way (round timeouts, sink
    /// errors). They never stop the engine.
    pub faults: Vec<ElectionError>,
}

impl EngineOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.committed_blocks.is_empty() && self.faults.is_empty()
    }

    /// Append everything from `other`, keeping order.
    pub fn merge(&mut self, other: EngineOutput) {
        self.messages.extend(other.messages);
        self.committed_blocks.extend(other.committed_blocks);
        self.faults.extend(other.faults);
    }
}

/// The election engine for one shard member.
pub struct ElectionEngine {
    config: ElectionConfig,
    /// This node's identity.
    identity: NodeId,
    signer: Arc<dyn PacketSigner>,
    directory: Arc<dyn KeyDirectory>,
    sink: Box<dyn BlockSink>,
    /// Configured shard members, self excluded.
    shard: BTreeSet<NodeId>,
    /// Members with a live connection right now.
    live_peers: BTreeSet<NodeId>,
    state: ElectionState,
    /// Local chain, append-only.
    blocks: Vec<Block>,
    /// Sequence number of the latest round this node took part in.
    round: u64,
    round_timer: RoundTimer,
    /// Last proof minted locally; new proofs are strictly greater.
    last_proof: u64,
}

impl ElectionEngine {
    pub fn new(
        config: ElectionConfig,
        identity: NodeId,
        shard: impl IntoIterator<Item = NodeId>,
        signer: Arc<dyn PacketSigner>,
        directory: Arc<dyn KeyDirectory>,
        sink: Box<dyn BlockSink>,
    ) -> Self {
        let shard = shard
            .into_iter()
            .filter(|member| *member != identity)
            .collect();
        let round_timer = RoundTimer::new(config.round_timeout_ms);
        Self {
            config,
            identity,
            signer,
            directory,
            sink,
            shard,
            live_peers: BTreeSet::new(),
            state: ElectionState::new(),
            blocks: Vec::new(),
            round: 0,
            round_timer,
            last_proof: 0,
        }
    }

    // -- Public API --

    /// Queue a transaction for the next batch.
    pub fn submit_transaction(&mut self, transaction: Transaction) {
        self.state.pending_transactions.push_back(transaction);
    }

    /// Batch pending transactions into a new event and propose it.
    ///
    /// `now_micros` seeds the proof; it is bumped when needed so proofs
    /// minted by this node stay strictly increasing.
    pub fn on_batch_tick(&mut self, now_micros: u64) -> EngineOutput {
        let mut output = EngineOutput::empty();
        if self.state.pending_transactions.is_empty() {
            return output;
        }

        let take = self
            .state
            .pending_transactions
            .len()
            .min(self.config.max_transactions_per_event);
        let proof_value = now_micros.max(self.last_proof.saturating_add(1));
        let proof = proof_value.to_string();
        let body = EventBody {
            origin: self.identity,
            trxs: self
                .state
                .pending_transactions
                .iter()
                .take(take)
                .cloned()
                .collect(),
            proof: proof.clone(),
        };
        let event_bytes = match body.to_json_bytes() {
            Ok(bytes) => bytes,
            Err(err) => {
                let fault = ElectionError::Serialization(err.to_string());
                error!("{fault}");
                output.faults.push(fault);
                return output;
            }
        };
        self.state.pending_transactions.drain(..take);
        self.last_proof = proof_value;

        let signature = self.signer.sign_packet(&event_bytes);
        let signed_update = self.make_vote(&proof);
        self.state.proof_index.insert(
            proof.clone(),
            Event::new(self.identity, body.trxs, proof.clone(), signed_update),
        );
        self.state.enqueue_pending(proof.clone());
        info!("Proposing event {proof} with {take} transactions");

        output.messages.push(Outbound::shard(ConsensusMessage::Propose {
            signature,
            event: event_bytes,
        }));
        self.check_ack_quorum(&proof, &mut output);
        output
    }

    /// Process a consensus message received from `from`.
    ///
    /// An `Err` means the message was rejected and had no effect on state.
    pub fn on_message(&mut self, from: NodeId, message: ConsensusMessage) -> Result<EngineOutput> {
        if from == self.identity || !self.shard.contains(&from) {
            return Err(ElectionError::UnknownSender(from));
        }
        trace!("{} from {from}", message.kind());
        match message {
            ConsensusMessage::Propose { signature, event } => {
                self.on_propose(from, &signature, &event)
            }
            ConsensusMessage::Ack { proof } => self.on_ack(from, proof),
            ConsensusMessage::RequestElection { proof } => {
                Ok(self.on_request_election(from, &proof))
            }
            ConsensusMessage::Vote { signature, proof } => self.on_vote(from, signature, proof),
            ConsensusMessage::Ready => Ok(self.on_ready(from)),
        }
    }

    /// A shard member's connection came up.
    pub fn on_peer_connected(&mut self, peer: NodeId) -> EngineOutput {
        if !self.shard.contains(&peer) {
            warn!("Ignoring connection from non-member {peer}");
            return EngineOutput::empty();
        }
        if self.live_peers.insert(peer) {
            info!(
                "Peer {peer} joined, {} of {} members live",
                self.member_count(),
                self.shard.len().saturating_add(1)
            );
        }
        EngineOutput::empty()
    }

    /// A shard member's connection went away. Every quorum is re-checked
    /// against the smaller membership.
    pub fn on_peer_disconnected(&mut self, peer: NodeId) -> EngineOutput {
        let mut output = EngineOutput::empty();
        if !self.live_peers.remove(&peer) {
            return output;
        }
        info!(
            "Peer {peer} left, {} of {} members live",
            self.member_count(),
            self.shard.len().saturating_add(1)
        );

        let own_unrequested: Vec<String> = self
            .state
            .pending_events
            .iter()
            .filter(|proof| {
                self.state
                    .proof_index
                    .get(*proof)
                    .is_some_and(|event| event.origin == self.identity && !event.election_requested)
            })
            .cloned()
            .collect();
        for proof in own_unrequested {
            self.check_ack_quorum(&proof, &mut output);
        }
        self.maybe_tally(&mut output);
        self.maybe_finish_round(&mut output);
        self.try_start_round(&mut output);
        output
    }

    /// Check the round deadline. An expired round is abandoned: its votes
    /// and readiness are discarded and one election is re-queued so the
    /// shard can try again.
    pub fn on_tick(&mut self) -> EngineOutput {
        let mut output = EngineOutput::empty();
        let Some(round) = self.round_timer.check_expired() else {
            return output;
        };
        self.round_timer.cancel();

        let phase = self.state.phase;
        let received = match phase {
            RoundPhase::Idle => return output,
            RoundPhase::Voting => self
                .state
                .next_event_votes
                .keys()
                .filter(|voter| self.is_live_member(voter))
                .count(),
            RoundPhase::AwaitingReady => self
                .state
                .ready_electors
                .iter()
                .filter(|member| self.is_live_member(member))
                .count(),
        };
        let fault = ElectionError::QuorumNeverReached {
            round,
            phase: phase.as_str(),
            received,
            required: self.member_count(),
        };
        warn!("{fault}");
        output.faults.push(fault);

        self.state.next_event_votes.clear();
        self.state.ready_electors.clear();
        match phase {
            RoundPhase::Voting => {
                self.state.pending_elections = self.state.pending_elections.saturating_add(1);
            }
            RoundPhase::AwaitingReady => self.evict_committed(),
            RoundPhase::Idle => {}
        }
        self.state.phase = RoundPhase::Idle;
        self.try_start_round(&mut output);
        output
    }

    // -- Accessors --

    /// Live members including this node.
    pub fn member_count(&self) -> usize {
        self.live_peers.len().saturating_add(1)
    }

    pub fn identity(&self) -> NodeId {
        self.identity
    }

    pub fn state(&self) -> &ElectionState {
        &self.state
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn live_peers(&self) -> &BTreeSet<NodeId> {
        &self.live_peers
    }

    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    // -- Message handlers --

    fn on_propose(
        &mut self,
        from: NodeId,
        signature: &Signature,
        event_bytes: &[u8],
    ) -> Result<EngineOutput> {
        let body =
            EventBody::from_json_bytes(event_bytes).map_err(|err| ElectionError::MalformedEvent {
                peer: from,
                reason: err.to_string(),
            })?;
        if body.origin != from {
            return Err(ElectionError::OriginMismatch {
                claimed: body.origin,
                actual: from,
            });
        }
        verify_packet(self.directory.as_ref(), &from, event_bytes, signature)?;

        let mut output = EngineOutput::empty();
        let proof = body.proof;
        if let Some(existing) = self.state.proof_index.get(&proof) {
            if existing.origin != from {
                return Err(ElectionError::ProofCollision {
                    owner: existing.origin,
                    origin: from,
                    proof,
                });
            }
            debug!("Duplicate proposal {proof} from {from}");
        } else if self.state.committed_proofs.contains(&proof) {
            debug!("Proposal {proof} from {from} is already committed");
            return Ok(output);
        } else {
            debug!(
                "Registered event {proof} from {from} ({} transactions)",
                body.trxs.len()
            );
            let signed_update = self.make_vote(&proof);
            self.state.proof_index.insert(
                proof.clone(),
                Event::new(from, body.trxs, proof.clone(), signed_update),
            );
            self.state.enqueue_pending(proof.clone());
        }

        output
            .messages
            .push(Outbound::peer(from, ConsensusMessage::Ack { proof }));
        self.try_start_round(&mut output);
        // A held tally may have been waiting for this proposal.
        self.maybe_tally(&mut output);
        Ok(output)
    }

    fn on_ack(&mut self, from: NodeId, proof: String) -> Result<EngineOutput> {
        let Some(event) = self.state.proof_index.get_mut(&proof) else {
            return Err(ElectionError::UnknownProof(proof));
        };
        if event.origin != self.identity {
            debug!("Ignoring ack from {from} for foreign event {proof}");
            return Ok(EngineOutput::empty());
        }
        event.backed_responses.insert(from);

        let mut output = EngineOutput::empty();
        self.check_ack_quorum(&proof, &mut output);
        Ok(output)
    }

    fn on_request_election(&mut self, from: NodeId, proof: &str) -> EngineOutput {
        debug!("Election requested by {from} for {proof}");
        if self.state.early_joins > 0 {
            self.state.early_joins = self.state.early_joins.saturating_sub(1);
        } else {
            self.state.pending_elections = self.state.pending_elections.saturating_add(1);
        }
        let mut output = EngineOutput::empty();
        self.try_start_round(&mut output);
        output
    }

    fn on_vote(
        &mut self,
        from: NodeId,
        signature: Signature,
        proof: String,
    ) -> Result<EngineOutput> {
        verify_packet(self.directory.as_ref(), &from, proof.as_bytes(), &signature)?;
        if let Some(event) = self.state.proof_index.get_mut(&proof) {
            event.backed_proofs.insert(from, signature);
        }
        debug!("Vote from {from} for {proof} ({} phase)", self.state.phase);
        self.state.next_event_votes.insert(from, proof);

        let mut output = EngineOutput::empty();
        self.try_start_round(&mut output);
        self.maybe_tally(&mut output);
        Ok(output)
    }

    fn on_ready(&mut self, from: NodeId) -> EngineOutput {
        let mut output = EngineOutput::empty();
        // A peer can only complete a round this node has voted in.
        if self.state.phase == RoundPhase::Idle {
            debug!("Ignoring stale ready from {from}");
            return output;
        }
        self.state.ready_electors.insert(from);
        self.maybe_finish_round(&mut output);
        output
    }

    // -- Internal logic --

    /// Request an election for one of our own events once every live peer
    /// acknowledged it.
    fn check_ack_quorum(&mut self, proof: &str, output: &mut EngineOutput) {
        let required = self.member_count().saturating_sub(1);
        let Some(event) = self.state.proof_index.get_mut(proof) else {
            return;
        };
        if event.origin != self.identity || event.election_requested {
            return;
        }
        let acked = event
            .backed_responses
            .iter()
            .filter(|peer| self.live_peers.contains(peer))
            .count();
        if acked < required {
            return;
        }
        event.election_requested = true;

        info!("Event {proof} acknowledged by {acked}/{required} peers, requesting election");
        output
            .messages
            .push(Outbound::shard(ConsensusMessage::RequestElection {
                proof: proof.to_string(),
            }));
        self.state.pending_elections = self.state.pending_elections.saturating_add(1);
        self.try_start_round(output);
    }

    /// Start a round if idle and there is a reason to: a queued election
    /// request, or peers already voting in a round we have not joined.
    fn try_start_round(&mut self, output: &mut EngineOutput) {
        if !self.state.ready_for_new_election() {
            return;
        }
        let Some(candidate) = self.state.pending_events.front().cloned() else {
            return;
        };
        if self.state.pending_elections > 0 {
            self.state.pending_elections = self.state.pending_elections.saturating_sub(1);
        } else if self
            .state
            .next_event_votes
            .keys()
            .any(|voter| *voter != self.identity)
        {
            self.state.early_joins = self.state.early_joins.saturating_add(1);
        } else {
            return;
        }
        self.begin_round(candidate, output);
    }

    fn begin_round(&mut self, candidate: String, output: &mut EngineOutput) {
        self.round = self.round.saturating_add(1);
        self.state.phase = RoundPhase::Voting;
        self.round_timer.start(self.round);

        let vote = match self.state.proof_index.get(&candidate) {
            Some(event) => event.signed_update.clone(),
            None => self.make_vote(&candidate),
        };
        info!("Round {} started, voting for {candidate}", self.round);
        output.messages.push(Outbound::shard(vote));
        self.state.next_event_votes.insert(self.identity, candidate);
        self.maybe_tally(output);
    }

    /// Tally once every live member voted. The vote table is cleared only
    /// when the winner is committed; a winner whose proposal has not arrived
    /// yet keeps the round in the voting phase until it does or the round
    /// times out.
    fn maybe_tally(&mut self, output: &mut EngineOutput) {
        if self.state.phase != RoundPhase::Voting {
            return;
        }
        let required = self.member_count();
        let counted: Vec<&str> = self
            .state
            .next_event_votes
            .iter()
            .filter(|(voter, _)| self.is_live_member(voter))
            .map(|(_, proof)| proof.as_str())
            .collect();
        if counted.len() < required {
            return;
        }
        let Some(result) = tally_votes(counted) else {
            return;
        };
        let Some(event) = self.state.proof_index.get(&result.winner) else {
            debug!(
                "Round {} elected {} before its proposal arrived, holding tally",
                self.round, result.winner
            );
            return;
        };
        let block = Block {
            index: self.blocks.len() as u64,
            proof: result.winner.clone(),
            origin: event.origin,
            transactions: event.transactions.clone(),
        };
        self.state.next_event_votes.clear();

        if result.tied {
            info!(
                "Round {} tied at {} votes, {} wins as smallest proof",
                self.round, result.votes, result.winner
            );
        }
        self.commit(block, output);
    }

    fn commit(&mut self, block: Block, output: &mut EngineOutput) {
        self.state.phase = RoundPhase::AwaitingReady;
        self.state.pending_events.retain(|proof| *proof != block.proof);

        if let Err(err) = self.sink.persist_committed_block(&block) {
            error!("Block {} not persisted: {err}", block.index);
            output.faults.push(err);
        }
        info!(
            "Committed block {} (proof {}, {} transactions, origin {})",
            block.index,
            block.proof,
            block.transactions.len(),
            block.origin
        );
        self.state.committed_proofs.insert(block.proof.clone());
        self.state.awaiting_eviction = Some(block.proof.clone());
        self.blocks.push(block.clone());
        output.committed_blocks.push(block);

        output.messages.push(Outbound::shard(ConsensusMessage::Ready));
        self.state.ready_electors.insert(self.identity);
        self.maybe_finish_round(output);
    }

    /// Close the round once every live member reported ready, then let the
    /// next queued election run.
    fn maybe_finish_round(&mut self, output: &mut EngineOutput) {
        if self.state.phase != RoundPhase::AwaitingReady {
            return;
        }
        let ready = self
            .state
            .ready_electors
            .iter()
            .filter(|member| self.is_live_member(member))
            .count();
        if ready < self.member_count() {
            return;
        }
        self.state.ready_electors.clear();
        self.evict_committed();
        self.state.phase = RoundPhase::Idle;
        self.round_timer.cancel();
        debug!("Round {} complete", self.round);
        self.try_start_round(output);
    }

    fn evict_committed(&mut self) {
        if let Some(proof) = self.state.awaiting_eviction.take() {
            self.state.proof_index.remove(&proof);
        }
    }

    fn is_live_member(&self, node: &NodeId) -> bool {
        *node == self.identity || self.live_peers.contains(node)
    }

    // -- Message construction --

    fn make_vote(&self, proof: &str) -> ConsensusMessage {
        ConsensusMessage::Vote {
            signature: self.signer.sign_packet(proof.as_bytes()),
            proof: proof.to_string(),
        }
    }
}
