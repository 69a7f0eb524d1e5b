//! Blocks & summaries.
use std::collections::BTreeSet;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::BlockHash;

/// A block's header data: the block's hash plus the hashes of every block
/// that must be locally present before this block can be validated.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockSummary {
    /// The hash of the block this summary describes.
    pub block_hash: BlockHash,
    /// Hashes of the block's parents.
    pub parent_hashes: Vec<BlockHash>,
    /// Hashes of the block's justifications.
    pub justification_hashes: Vec<BlockHash>,
}

impl BlockSummary {
    /// Returns the set of blocks that must be stored before this block can
    /// be validated: the union of parents and justifications.
    pub fn dependencies(&self) -> BTreeSet<BlockHash> {
        self.parent_hashes
            .iter()
            .chain(self.justification_hashes.iter())
            .copied()
            .collect()
    }
}

/// A full block: its summary plus the opaque consensus payload.
///
/// Only produced after a successful fetch + decompress + [`Block::read`].
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Block {
    /// The block's summary.
    pub summary: BlockSummary,
    /// The serialized body, opaque to the gossip layer.
    pub body: Vec<u8>,
}

/// An error parsing a [`Block`] from its canonical bytes.
#[derive(Debug, thiserror::Error)]
#[error("failed to parse block: {0}")]
pub struct BlockParseError(#[from] std::io::Error);

impl Block {
    /// Parses a block from its canonical byte serialization.
    pub fn read(bytes: &[u8]) -> Result<Self, BlockParseError> {
        Ok(borsh::from_slice(bytes)?)
    }

    /// Returns the block's canonical byte serialization.
    pub fn serialize(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("serializing a block into a Vec cannot fail")
    }

    /// The block's hash.
    pub const fn hash(&self) -> BlockHash {
        self.summary.block_hash
    }
}
