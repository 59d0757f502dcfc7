//! Error types for the shard networking layer.

use {shardline_consensus_election::ConfigError, std::net::SocketAddr, thiserror::Error};

/// A single frame could not be decoded. Local to that frame: the frame is
/// dropped and the connection stays open.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// The frame has no tag byte.
    #[error("empty frame")]
    Empty,

    /// A length prefix claims more bytes than remain in the buffer.
    #[error("truncated frame: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("unknown packet tag {0:#04x}")]
    UnknownTag(u8),

    /// The tag was recognised but carried the wrong number of fields.
    #[error("tag {tag:#04x} expects {expected} fields, got {actual}")]
    FieldCount {
        tag: u8,
        expected: usize,
        actual: usize,
    },

    #[error("field is not valid UTF-8")]
    InvalidUtf8,

    /// A field or frame does not fit a 4-byte length prefix.
    #[error("field of {0} bytes exceeds the u32 length prefix")]
    FieldTooLarge(usize),

    #[error("signature field has {0} bytes")]
    InvalidSignature(usize),

    #[error("invalid node address {0:?}")]
    InvalidAddress(String),
}

/// Errors that can occur in the shard networking layer.
#[derive(Error, Debug)]
pub enum ConsensusNetError {
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// A length prefix exceeds the configured maximum frame size.
    #[error("frame too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge {
        /// Announced frame size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The peer closed the connection.
    #[error("transport closed by peer")]
    TransportClosed,

    /// Transport-level I/O error.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The join handshake was rejected or did not complete.
    #[error("handshake with {addr} failed: {reason}")]
    HandshakeFailed { addr: SocketAddr, reason: String },

    /// The peer is not a live shard member.
    #[error("unknown peer: {0}")]
    UnknownPeer(SocketAddr),

    /// The channel feeding the node actor is closed.
    #[error("node channel closed")]
    ChannelClosed,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("election config: {0}")]
    ElectionConfig(#[from] ConfigError),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Convenience result type for shard networking operations.
pub type Result<T> = std::result::Result<T, ConsensusNetError>;
