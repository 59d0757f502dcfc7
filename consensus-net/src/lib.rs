//! Shardline shard networking layer
//!
//! This crate connects the members of one shard and drives the election
//! engine from `shardline-consensus-election` over the wire. It handles:
//!
//! - **Wire codec**: tagged packets whose fields are each prefixed with a
//!   4-byte big-endian length, inside a length-prefixed frame.
//! - **Stream reassembly**: frames are cut out of the TCP byte stream
//!   however the transport splits it.
//! - **Peer connections**: one stop-and-wait send queue per peer, driven
//!   by transport acks, and a read loop that acks and forwards every frame.
//! - **Shard membership**: deterministic dialing by address order, signed
//!   join handshake, retry of unconnected members, broadcast and unicast.
//! - **Node actor**: a single task that owns the engine and serializes
//!   every input to it.
//!
//! ## Architecture
//!
//! ```text
//!  ┌─────────────────────────────────────────────────┐
//!  │  NodeHandle (submit, subscribe, shutdown)       │
//!  └──────────────┬──────────────────────────────────┘
//!                 │  NodeCommand
//!  ┌──────────────▼──────────────────────────────────┐
//!  │  ShardNode actor                                │
//!  │  • owns the ElectionEngine                      │
//!  │  • batch timer, round deadline                  │
//!  │  • routes EngineOutput to broadcast / unicast   │
//!  └──────────────▲───────────────┬──────────────────┘
//!     ShardEvent  │               │  Packet
//!  ┌──────────────┴───────────────▼──────────────────┐
//!  │  ShardMembership                                │
//!  │  • listener + hello handshake                   │
//!  │  • dialer / retry loop                          │
//!  └──────┬──────────────────────────────────────────┘
//!         │  one per live member
//!  ┌──────▼──────────────────────────────────────────┐
//!  │  PeerConnection                                 │
//!  │  • SendQueue (one frame in flight)              │
//!  │  • FrameReader → codec → ShardEvent::Message    │
//!  └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Crate modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`codec`]      | Packet tags, field encoding, `Packet` |
//! | [`frame`]      | `FrameReader` stream reassembly |
//! | [`peer`]       | `PeerConnection` and its `SendQueue` |
//! | [`membership`] | `ShardMembership`, handshake, dialing |
//! | [`node`]       | `ShardNode` actor and `NodeHandle` |
//! | [`config`]     | `NodeConfig` defaults, YAML loading, dev overrides |
//! | [`error`]      | Crate-wide error enums |

pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod membership;
pub mod node;
pub mod peer;

pub use {
    codec::Packet,
    config::{read_keypair_file, NodeConfig, PeerConfig},
    error::{ConsensusNetError, FramingError, Result},
    frame::FrameReader,
    membership::{InboundMessage, ShardEvent, ShardMembership},
    node::{NodeCommand, NodeHandle, ShardNode},
    peer::{PeerConnection, SendQueue},
};
