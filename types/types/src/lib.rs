//! # Galena Types
//!
//! The data types shared between Galena's crates: block hashes, block
//! summaries and full blocks, with their canonical byte serialization.
mod block;

pub use block::{Block, BlockParseError, BlockSummary};

/// A block's identifier.
///
/// Hashes are compared lexicographically byte-by-byte, which the array
/// [`Ord`] impl already does.
pub type BlockHash = [u8; 32];
