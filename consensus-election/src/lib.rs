//! Shardline shard election engine
//!
//! Orders transactions across a fixed shard of peers without a leader.
//! Every member batches its own pending transactions into signed events;
//! the shard then repeatedly elects one pending event and commits it as the
//! next block:
//!
//! 1. **Propose**: the origin broadcasts a signed event carrying a unique proof.
//! 2. **Ack**: every member registers the event and acknowledges it.
//! 3. **Request election**: with all acks in, the origin asks for a round.
//! 4. **Vote**: each member votes for the oldest event it holds.
//! 5. **Commit**: once every live member voted, the most-voted proof wins
//!    (ties go to the smallest proof) and becomes a block.
//! 6. **Ready**: members announce completion; the next round may begin
//!    once everyone is ready.
//!
//! Quorums are recomputed from live membership at every check, and a round
//! that stalls past its deadline is abandoned and retried.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               ElectionEngine                 │
//! │  ┌─────────┐  ┌──────────────┐  ┌─────────┐  │
//! │  │ Config  │  │ PacketSigner │  │BlockSink│  │
//! │  │         │  │ KeyDirectory │  │         │  │
//! │  └─────────┘  └──────────────┘  └─────────┘  │
//! │  ┌──────────────────────────────────────┐    │
//! │  │           ElectionState              │    │
//! │  │ pending events, proof index, votes,  │    │
//! │  │ election queue, ready electors       │    │
//! │  └──────────────────────────────────────┘    │
//! │  ┌──────────┐  ┌────────────┐                │
//! │  │  Tally   │  │ RoundTimer │                │
//! │  └──────────┘  └────────────┘                │
//! └──────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod tally;
pub mod timeout;
pub mod types;

// Re-exports for convenience
pub use config::{ConfigError, ElectionConfig};
pub use engine::{ElectionEngine, EngineOutput};
pub use error::{ElectionError, Result};
pub use identity::{verify_packet, KeyDirectory, PacketSigner, StaticKeyDirectory};
pub use ledger::{BlockSink, MemoryLedger};
pub use tally::{tally_votes, TallyResult};
pub use timeout::RoundTimer;
pub use types::{
    Block, ConsensusMessage, ElectionState, Event, EventBody, NodeId, Outbound, Recipient,
    RoundPhase, Transaction,
};
