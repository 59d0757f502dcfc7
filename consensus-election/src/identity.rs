//! Signing and identity lookup used by the election engine.
//!
//! Both are narrow capabilities: the engine signs payloads with the node's
//! own key and resolves a peer's public key by its [`NodeId`].

use {
    crate::{
        error::{ElectionError, Result},
        types::NodeId,
    },
    solana_keypair::Keypair,
    solana_pubkey::Pubkey,
    solana_signature::Signature,
    solana_signer::Signer,
    std::collections::HashMap,
};

/// Signs outbound packets with this node's identity key.
pub trait PacketSigner: Send + Sync {
    fn sign_packet(&self, payload: &[u8]) -> Signature;

    fn public_key(&self) -> Pubkey;
}

impl PacketSigner for Keypair {
    fn sign_packet(&self, payload: &[u8]) -> Signature {
        self.sign_message(payload)
    }

    fn public_key(&self) -> Pubkey {
        Signer::pubkey(self)
    }
}

/// Resolves shard members to their public keys.
pub trait KeyDirectory: Send + Sync {
    fn lookup_public_key(&self, node: &NodeId) -> Option<Pubkey>;
}

/// A fixed directory built from static shard configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticKeyDirectory {
    keys: HashMap<NodeId, Pubkey>,
}

impl StaticKeyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: NodeId, key: Pubkey) -> Option<Pubkey> {
        self.keys.insert(node, key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<(NodeId, Pubkey)> for StaticKeyDirectory {
    fn from_iter<I: IntoIterator<Item = (NodeId, Pubkey)>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

impl KeyDirectory for StaticKeyDirectory {
    fn lookup_public_key(&self, node: &NodeId) -> Option<Pubkey> {
        self.keys.get(node).copied()
    }
}

/// Check that `signature` over `payload` was produced by `node`.
///
/// An unknown node fails the same way as a bad signature.
pub fn verify_packet(
    directory: &dyn KeyDirectory,
    node: &NodeId,
    payload: &[u8],
    signature: &Signature,
) -> Result<()> {
    let key = directory
        .lookup_public_key(node)
        .ok_or(ElectionError::SignatureError { peer: *node })?;
    if signature.verify(key.as_ref(), payload) {
        Ok(())
    } else {
        Err(ElectionError::SignatureError { peer: *node })
    }
}
