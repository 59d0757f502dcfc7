//! Property-based tests for the wire codec and stream reassembly.
//!
//! Properties tested:
//! 1. Any chunking of a packet stream yields the same packets in order.
//! 2. A packet cut short anywhere never decodes.
//! 3. A corrupted field length is rejected, never read past the buffer.

#[cfg(test)]
mod tests {
    use {
        bytes::Bytes,
        proptest::prelude::*,
        shardline_consensus_election::ConsensusMessage,
        shardline_consensus_net::{FrameReader, FramingError, Packet},
        solana_signature::Signature,
    };

    // ── Helpers ──

    fn arb_proof() -> impl Strategy<Value = String> {
        "[0-9]{1,20}"
    }

    fn arb_message() -> impl Strategy<Value = ConsensusMessage> {
        prop_oneof![
            (any::<u8>(), prop::collection::vec(any::<u8>(), 0..256)).prop_map(
                |(seed, event)| ConsensusMessage::Propose {
                    signature: Signature::from([seed; 64]),
                    event,
                }
            ),
            arb_proof().prop_map(|proof| ConsensusMessage::Ack { proof }),
            arb_proof().prop_map(|proof| ConsensusMessage::RequestElection { proof }),
            (any::<u8>(), arb_proof()).prop_map(|(seed, proof)| ConsensusMessage::Vote {
                signature: Signature::from([seed; 64]),
                proof,
            }),
            Just(ConsensusMessage::Ready),
        ]
    }

    fn arb_packet() -> impl Strategy<Value = Packet> {
        prop_oneof![
            4 => arb_message().prop_map(Packet::Consensus),
            1 => Just(Packet::TransportAck),
            1 => (any::<u8>(), 1u16..u16::MAX).prop_map(|(seed, port)| Packet::Hello {
                signature: Signature::from([seed; 64]),
                origin: ([127, 0, 0, 1], port).into(),
            }),
        ]
    }

    // ── Reassembly ──

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_any_chunking_preserves_packets(
            packets in prop::collection::vec(arb_packet(), 1..8),
            chunk in 1usize..64,
        ) {
            let mut stream = Vec::new();
            for packet in &packets {
                stream.extend_from_slice(&packet.encode().unwrap());
            }

            let mut reader = FrameReader::new(1 << 20);
            let mut decoded = Vec::new();
            for piece in stream.chunks(chunk) {
                for frame in reader.feed(piece).unwrap() {
                    decoded.push(Packet::decode(frame).unwrap());
                }
            }
            prop_assert_eq!(decoded, packets);
            prop_assert_eq!(reader.buffered_len(), 0);
        }

        #[test]
        fn prop_truncated_packet_never_decodes(
            message in arb_message(),
            cut in 0usize..1024,
        ) {
            let frame = Packet::Consensus(message).encode().unwrap();
            let payload = frame.slice(4..);
            prop_assume!(cut < payload.len());
            // Ready is a bare tag; any shorter payload is empty.
            let result = Packet::decode(payload.slice(..cut));
            prop_assert!(result.is_err());
        }

        #[test]
        fn prop_inflated_field_length_rejected(
            proof in arb_proof(),
            extra in 1u32..1_000_000,
        ) {
            let frame = Packet::Consensus(ConsensusMessage::Ack { proof: proof.clone() })
                .encode()
                .unwrap();
            let mut payload = frame.slice(4..).to_vec();
            let claimed = (proof.len() as u32).saturating_add(extra);
            payload[1..5].copy_from_slice(&claimed.to_be_bytes());

            let result = Packet::decode(Bytes::from(payload));
            let is_truncated = matches!(result, Err(FramingError::Truncated { .. }));
            prop_assert!(is_truncated);
        }
    }
}
