//! Gossip protocol messages.
use galena_types::BlockHash;

use crate::Node;

/// An announcement that the sender holds the named blocks.
///
/// The receiver answers with a [`NewBlocksResponse`] saying whether any of
/// the hashes were new to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBlocksRequest {
    /// The node making the announcement.
    pub sender: Node,
    /// The hashes being announced.
    pub block_hashes: Vec<BlockHash>,
}

/// The response to a [`NewBlocksRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewBlocksResponse {
    /// `true` if at least one announced hash was previously unknown to the
    /// receiver.
    pub is_new: bool,
}

/// A request to stream a block back as [`Chunk`](crate::Chunk) frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetBlockChunkedRequest {
    /// The hash of the requested block.
    pub block_hash: BlockHash,
    /// Compression algorithms the requester can decompress, in order of
    /// preference. The responder may always fall back to no compression.
    pub accepted_compression_algorithms: Vec<String>,
}
