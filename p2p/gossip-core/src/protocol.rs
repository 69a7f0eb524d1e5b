//! This module defines [`GossipRequest`] and [`GossipResponse`], the
//! request/response pairs a connected peer's gossip service understands.
//!
//! ```md
//! Request: NewBlocks,        Response: NewBlocks
//! Request: GetBlockChunked,  Response: BlockChunks
//! ```
use std::fmt;

use futures::stream::BoxStream;

use galena_wire::{Chunk, GetBlockChunkedRequest, NewBlocksRequest, NewBlocksResponse};

use crate::error::TransportError;

/// The stream of frames a peer answers a
/// [`GossipRequest::GetBlockChunked`] with.
pub type ChunkStream = BoxStream<'static, Result<Chunk, TransportError>>;

/// A request to a connected peer's gossip service.
#[derive(Debug, Clone)]
pub enum GossipRequest {
    /// Announce blocks the local node holds.
    NewBlocks(NewBlocksRequest),
    /// Ask the peer to stream a block back in chunks.
    GetBlockChunked(GetBlockChunkedRequest),
}

/// A response from a connected peer's gossip service.
pub enum GossipResponse {
    /// The response to a [`GossipRequest::NewBlocks`].
    NewBlocks(NewBlocksResponse),
    /// The response to a [`GossipRequest::GetBlockChunked`].
    BlockChunks(ChunkStream),
}

impl fmt::Debug for GossipResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NewBlocks(res) => f.debug_tuple("NewBlocks").field(res).finish(),
            Self::BlockChunks(_) => f.write_str("BlockChunks(..)"),
        }
    }
}
