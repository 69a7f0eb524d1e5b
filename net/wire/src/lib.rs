//! # Galena Wire
//!
//! A crate defining the messages exchanged over Galena's gossip protocol:
//! block announcements, chunked block transfers and the peer identities
//! named inside them.
pub mod chunk;
pub mod gossip;
mod node;

pub use chunk::{Chunk, ChunkHeader, COMPRESSION_LZ4, COMPRESSION_NONE};
pub use gossip::{GetBlockChunkedRequest, NewBlocksRequest, NewBlocksResponse};
pub use node::Node;
