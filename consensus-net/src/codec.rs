//! Wire codec for shard packets.
//!
//! ## Wire format
//!
//! Every packet on the wire is framed as:
//!
//! ```text
//! [4 bytes: frame length (u32-be)] [1 byte: tag] [field]*
//! field = [4 bytes: field length (u32-be)] [N bytes]
//! ```
//!
//! The frame length covers the tag and the fields, not itself. Fields are
//! read back in the order the producer wrote them for that tag:
//!
//! | tag    | packet           | fields                       |
//! |--------|------------------|------------------------------|
//! | `0x00` | transport ack    | none                         |
//! | `0x01` | propose          | signature, event JSON        |
//! | `0x02` | ack              | proof                        |
//! | `0x03` | request election | proof                        |
//! | `0x04` | vote             | signature, proof             |
//! | `0x05` | ready            | none                         |
//! | `0x07` | hello            | signature, origin address    |

use {
    crate::error::FramingError,
    bytes::{Buf, BufMut, Bytes, BytesMut},
    shardline_consensus_election::{ConsensusMessage, NodeId},
    solana_signature::Signature,
};

pub const TAG_TRANSPORT_ACK: u8 = 0x00;
pub const TAG_PROPOSE: u8 = 0x01;
pub const TAG_ACK: u8 = 0x02;
pub const TAG_REQUEST_ELECTION: u8 = 0x03;
pub const TAG_VOTE: u8 = 0x04;
pub const TAG_READY: u8 = 0x05;
pub const TAG_HELLO: u8 = 0x07;

/// Size of every length prefix on the wire.
pub const LENGTH_PREFIX_LEN: usize = 4;

const SIGNATURE_LEN: usize = 64;

// ── Generic (tag, fields) layer ─────────────────────────────────────────────

/// Encode `tag` and `fields` as a complete frame, outer length prefix
/// included.
pub fn encode<F: AsRef<[u8]>>(tag: u8, fields: &[F]) -> Result<Bytes, FramingError> {
    let body_len = fields.iter().try_fold(1usize, |acc, field| {
        let len = field.as_ref().len();
        if u32::try_from(len).is_err() {
            return Err(FramingError::FieldTooLarge(len));
        }
        Ok(acc.saturating_add(LENGTH_PREFIX_LEN).saturating_add(len))
    })?;
    let frame_len = u32::try_from(body_len).map_err(|_| FramingError::FieldTooLarge(body_len))?;

    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_LEN.saturating_add(body_len));
    buf.put_u32(frame_len);
    buf.put_u8(tag);
    for field in fields {
        let field = field.as_ref();
        buf.put_u32(field.len() as u32);
        buf.put_slice(field);
    }
    Ok(buf.freeze())
}

/// Decode a frame body (the bytes after the outer length prefix) into its
/// tag and every field it carries.
pub fn decode(payload: Bytes) -> Result<(u8, Vec<Bytes>), FramingError> {
    let mut cursor = FieldCursor::new(payload);
    let tag = cursor.read_tag()?;
    let mut fields = Vec::new();
    while cursor.remaining() > 0 {
        fields.push(cursor.read_field()?);
    }
    Ok((tag, fields))
}

/// Bounds-checked reader over a frame body.
#[derive(Debug)]
pub struct FieldCursor {
    buf: Bytes,
}

impl FieldCursor {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn read_tag(&mut self) -> Result<u8, FramingError> {
        if self.buf.remaining() < 1 {
            return Err(FramingError::Empty);
        }
        Ok(self.buf.get_u8())
    }

    pub fn read_u32(&mut self) -> Result<u32, FramingError> {
        self.ensure(LENGTH_PREFIX_LEN)?;
        Ok(self.buf.get_u32())
    }

    /// Read one length-prefixed field without copying.
    pub fn read_field(&mut self) -> Result<Bytes, FramingError> {
        let len = self.read_u32()? as usize;
        self.ensure(len)?;
        Ok(self.buf.split_to(len))
    }

    fn ensure(&self, needed: usize) -> Result<(), FramingError> {
        let available = self.buf.remaining();
        if needed > available {
            return Err(FramingError::Truncated { needed, available });
        }
        Ok(())
    }
}

// ── Typed packets ───────────────────────────────────────────────────────────

/// Every packet a shard member can send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Stop-and-wait acknowledgement of the previous frame.
    TransportAck,
    /// First frame on a dialed connection: the dialer's identity, signed.
    Hello { signature: Signature, origin: NodeId },
    Consensus(ConsensusMessage),
}

impl Packet {
    pub fn tag(&self) -> u8 {
        match self {
            Packet::TransportAck => TAG_TRANSPORT_ACK,
            Packet::Hello { .. } => TAG_HELLO,
            Packet::Consensus(message) => match message {
                ConsensusMessage::Propose { .. } => TAG_PROPOSE,
                ConsensusMessage::Ack { .. } => TAG_ACK,
                ConsensusMessage::RequestElection { .. } => TAG_REQUEST_ELECTION,
                ConsensusMessage::Vote { .. } => TAG_VOTE,
                ConsensusMessage::Ready => TAG_READY,
            },
        }
    }

    /// Return a human-readable tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::TransportAck => "TransportAck",
            Packet::Hello { .. } => "Hello",
            Packet::Consensus(message) => message.kind(),
        }
    }

    /// Encode as a complete frame, ready to write to a socket.
    pub fn encode(&self) -> Result<Bytes, FramingError> {
        let tag = self.tag();
        match self {
            Packet::TransportAck | Packet::Consensus(ConsensusMessage::Ready) => {
                encode::<&[u8]>(tag, &[])
            }
            Packet::Hello { signature, origin } => {
                let origin = origin.to_string();
                encode(tag, &[signature.as_ref(), origin.as_bytes()])
            }
            Packet::Consensus(ConsensusMessage::Propose { signature, event }) => {
                encode(tag, &[signature.as_ref(), event.as_slice()])
            }
            Packet::Consensus(ConsensusMessage::Ack { proof })
            | Packet::Consensus(ConsensusMessage::RequestElection { proof }) => {
                encode(tag, &[proof.as_bytes()])
            }
            Packet::Consensus(ConsensusMessage::Vote { signature, proof }) => {
                encode(tag, &[signature.as_ref(), proof.as_bytes()])
            }
        }
    }

    /// Decode a frame body produced by [`crate::frame::FrameReader`].
    pub fn decode(payload: Bytes) -> Result<Self, FramingError> {
        let (tag, fields) = decode(payload)?;
        let packet = match tag {
            TAG_TRANSPORT_ACK => {
                expect_fields(tag, &fields, 0)?;
                Packet::TransportAck
            }
            TAG_PROPOSE => {
                expect_fields(tag, &fields, 2)?;
                Packet::Consensus(ConsensusMessage::Propose {
                    signature: signature_field(&fields[0])?,
                    event: fields[1].to_vec(),
                })
            }
            TAG_ACK => {
                expect_fields(tag, &fields, 1)?;
                Packet::Consensus(ConsensusMessage::Ack {
                    proof: utf8_field(&fields[0])?,
                })
            }
            TAG_REQUEST_ELECTION => {
                expect_fields(tag, &fields, 1)?;
                Packet::Consensus(ConsensusMessage::RequestElection {
                    proof: utf8_field(&fields[0])?,
                })
            }
            TAG_VOTE => {
                expect_fields(tag, &fields, 2)?;
                Packet::Consensus(ConsensusMessage::Vote {
                    signature: signature_field(&fields[0])?,
                    proof: utf8_field(&fields[1])?,
                })
            }
            TAG_READY => {
                expect_fields(tag, &fields, 0)?;
                Packet::Consensus(ConsensusMessage::Ready)
            }
            TAG_HELLO => {
                expect_fields(tag, &fields, 2)?;
                let origin = utf8_field(&fields[1])?;
                Packet::Hello {
                    signature: signature_field(&fields[0])?,
                    origin: origin
                        .parse()
                        .map_err(|_| FramingError::InvalidAddress(origin))?,
                }
            }
            other => return Err(FramingError::UnknownTag(other)),
        };
        Ok(packet)
    }
}

fn expect_fields(tag: u8, fields: &[Bytes], expected: usize) -> Result<(), FramingError> {
    if fields.len() == expected {
        Ok(())
    } else {
        Err(FramingError::FieldCount {
            tag,
            expected,
            actual: fields.len(),
        })
    }
}

fn utf8_field(field: &Bytes) -> Result<String, FramingError> {
    String::from_utf8(field.to_vec()).map_err(|_| FramingError::InvalidUtf8)
}

fn signature_field(field: &Bytes) -> Result<Signature, FramingError> {
    if field.len() != SIGNATURE_LEN {
        return Err(FramingError::InvalidSignature(field.len()));
    }
    Signature::try_from(field.as_ref()).map_err(|_| FramingError::InvalidSignature(field.len()))
}

// ── Tests ───────────────────────────────────────────────────────────────────
