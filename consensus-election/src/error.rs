//! Error types for the election engine.

use {crate::types::NodeId, thiserror::Error};

/// Reasons a consensus message or local operation was rejected.
///
/// Message-level variants describe a single offending message; the engine
/// drops that message and keeps running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ElectionError {
    /// The signature did not verify against the sender's registered key,
    /// or the sender has no registered key.
    #[error("signature from {peer} does not verify")]
    SignatureError { peer: NodeId },

    /// The event's declared origin differs from the peer that delivered it.
    #[error("event claims origin {claimed} but arrived from {actual}")]
    OriginMismatch { claimed: NodeId, actual: NodeId },

    /// The sender is not part of this shard.
    #[error("message from {0}, which is not a shard member")]
    UnknownSender(NodeId),

    /// A proof that is already registered was proposed by a different origin.
    #[error("proof {proof} already belongs to {owner}, rejected from {origin}")]
    ProofCollision {
        proof: String,
        owner: NodeId,
        origin: NodeId,
    },

    /// The event body could not be decoded.
    #[error("malformed event from {peer}: {reason}")]
    MalformedEvent { peer: NodeId, reason: String },

    /// A round did not gather its quorum before the round timeout fired.
    #[error("round {round} timed out with {received}/{required} {phase} responses")]
    QuorumNeverReached {
        round: u64,
        phase: &'static str,
        received: usize,
        required: usize,
    },

    /// A message referenced a proof this node does not hold.
    #[error("unknown proof {0}")]
    UnknownProof(String),

    /// A locally built event could not be serialized.
    #[error("failed to serialize event: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, ElectionError>;
