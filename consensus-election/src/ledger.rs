//! Committed block sink.
//!
//! The engine hands every committed block to a [`BlockSink`] exactly once,
//! before the next round can start.

use {
    crate::{error::Result, types::Block},
    parking_lot::RwLock,
    std::sync::Arc,
};

/// Storage collaborator that receives committed blocks.
pub trait BlockSink: Send {
    fn persist_committed_block(&mut self, block: &Block) -> Result<()>;
}

/// In-memory append-only chain, shareable between the engine and readers.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    blocks: Arc<RwLock<Vec<Block>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every block committed so far.
    pub fn blocks(&self) -> Vec<Block> {
        self.blocks.read().clone()
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }

    pub fn last(&self) -> Option<Block> {
        self.blocks.read().last().cloned()
    }
}

impl BlockSink for MemoryLedger {
    fn persist_committed_block(&mut self, block: &Block) -> Result<()> {
        self.blocks.write().push(block.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::types::Transaction};

    #[test]
    fn test_clones_share_chain() {
        let ledger = MemoryLedger::new();
        let mut writer = ledger.clone();
        assert!(ledger.is_empty());

        let block = Block {
            index: 0,
            proof: "1".to_string(),
            origin: "127.0.0.1:7000".parse().unwrap(),
            transactions: vec![Transaction::new("deposit", "10")],
        };
        writer.persist_committed_block(&block).unwrap();

        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.last(), Some(block));
    }
}
