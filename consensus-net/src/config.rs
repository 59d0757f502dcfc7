//! Configuration for a shard node.

use {
    crate::error::{ConsensusNetError, Result},
    serde::{Deserialize, Serialize},
    shardline_consensus_election::{ElectionConfig, NodeId, StaticKeyDirectory},
    solana_keypair::Keypair,
    solana_pubkey::Pubkey,
    std::{
        collections::HashSet,
        net::SocketAddr,
        path::{Path, PathBuf},
    },
};

const DEFAULT_PORT: u16 = 7400;

/// One configured shard member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Advertised address; also the member's identity.
    pub addr: NodeId,
    /// Base58 ed25519 public key the member signs with.
    pub pubkey: String,
}

impl PeerConfig {
    pub fn new(addr: NodeId, pubkey: &Pubkey) -> Self {
        Self {
            addr,
            pubkey: bs58::encode(pubkey.to_bytes()).into_string(),
        }
    }

    pub fn decode_pubkey(&self) -> Result<Pubkey> {
        let bytes = bs58::decode(&self.pubkey).into_vec().map_err(|err| {
            ConsensusNetError::Config(format!("pubkey for {} is not base58: {err}", self.addr))
        })?;
        Pubkey::try_from(bytes.as_slice()).map_err(|_| {
            ConsensusNetError::Config(format!(
                "pubkey for {} has {} bytes, expected 32",
                self.addr,
                bytes.len()
            ))
        })
    }
}

/// Configuration for one shard node.
///
/// `peers` lists every shard member, this node included, so the same file
/// can be shared across the shard with only `bind_addr`, `identity` and
/// `keypair_path` changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Local address the listener binds.
    /// Default: `0.0.0.0:7400`
    pub bind_addr: SocketAddr,

    /// Address this node is known by in `peers`.
    pub identity: NodeId,

    /// JSON keypair file (a 64-byte array). A fresh keypair is generated
    /// when unset, which only suits single-node and test shards.
    pub keypair_path: Option<PathBuf>,

    /// The full, fixed shard membership.
    pub peers: Vec<PeerConfig>,

    /// Largest frame body accepted from a peer, in bytes.
    pub max_frame_size: usize,

    /// Interval between dial attempts to unconnected members (ms).
    pub dial_retry_interval_ms: u64,

    /// How long a new connection may take to present its hello (ms).
    pub handshake_timeout_ms: u64,

    /// How long the node waits for the full shard before it starts
    /// proposing with whoever is connected (ms).
    pub startup_grace_ms: u64,

    /// Capacity of the channel feeding the node actor.
    pub channel_buffer_size: usize,

    pub election: ElectionConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let addr = SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT));
        Self {
            bind_addr: addr,
            identity: addr,
            keypair_path: None,
            peers: Vec::new(),
            max_frame_size: 1_048_576, // 1 MB
            dial_retry_interval_ms: 1_000,
            handshake_timeout_ms: 5_000,
            startup_grace_ms: 10_000,
            channel_buffer_size: 10_000,
            election: ElectionConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Create a config suitable for local testing with shorter timeouts.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn dev_default() -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        Self {
            bind_addr: addr,
            identity: addr,
            keypair_path: None,
            peers: Vec::new(),
            max_frame_size: 1_048_576,
            dial_retry_interval_ms: 100,
            handshake_timeout_ms: 1_000,
            startup_grace_ms: 2_000,
            channel_buffer_size: 1_000,
            election: ElectionConfig::dev_default(),
        }
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let config: Self = serde_yaml::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.election.validate()?;
        if self.max_frame_size == 0 || u32::try_from(self.max_frame_size).is_err() {
            return Err(ConsensusNetError::Config(format!(
                "max_frame_size must be between 1 and {}",
                u32::MAX
            )));
        }
        if self.dial_retry_interval_ms == 0 {
            return Err(ConsensusNetError::Config(
                "dial_retry_interval_ms must be positive".to_string(),
            ));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(ConsensusNetError::Config(
                "handshake_timeout_ms must be positive".to_string(),
            ));
        }
        if self.channel_buffer_size == 0 {
            return Err(ConsensusNetError::Config(
                "channel_buffer_size must be positive".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for peer in &self.peers {
            if !seen.insert(peer.addr) {
                return Err(ConsensusNetError::Config(format!(
                    "shard member {} listed twice",
                    peer.addr
                )));
            }
            peer.decode_pubkey()?;
        }
        if !self.peers.is_empty() && !seen.contains(&self.identity) {
            return Err(ConsensusNetError::Config(format!(
                "identity {} is not in the shard member list",
                self.identity
            )));
        }
        Ok(())
    }

    /// Public keys of every configured member, keyed by address.
    pub fn key_directory(&self) -> Result<StaticKeyDirectory> {
        self.peers
            .iter()
            .map(|peer| Ok((peer.addr, peer.decode_pubkey()?)))
            .collect()
    }

    /// The keypair at `keypair_path`, or a fresh one when unset.
    pub fn load_keypair(&self) -> Result<Keypair> {
        match &self.keypair_path {
            Some(path) => read_keypair_file(path),
            None => Ok(Keypair::new()),
        }
    }
}

/// Read a keypair stored as a JSON array of 64 bytes.
pub fn read_keypair_file(path: impl AsRef<Path>) -> Result<Keypair> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)?;
    let bytes: Vec<u8> = serde_json::from_reader(file).map_err(|err| {
        ConsensusNetError::Config(format!("keypair file {}: {err}", path.display()))
    })?;
    Keypair::try_from(bytes.as_slice()).map_err(|err| {
        ConsensusNetError::Config(format!("keypair file {}: {err}", path.display()))
    })
}
