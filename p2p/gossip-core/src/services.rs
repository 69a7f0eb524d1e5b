use galena_types::{Block, BlockHash, BlockSummary};
use galena_wire::Node;

/// A request to the block store backend.
#[derive(Debug, Clone)]
pub enum BackendRequest {
    /// Does the store already hold the block with this hash?
    HasBlock(BlockHash),
    /// Validate a freshly downloaded block.
    ///
    /// The gossip core delegates all consensus checks here; a failure
    /// response fails the download attempt.
    ValidateBlock(Block),
    /// Persist a full block.
    StoreBlock(Block),
    /// Persist a block summary.
    ///
    /// Always requested after the matching [`BackendRequest::StoreBlock`],
    /// so a crash between the two leaves a recoverable state.
    StoreBlockSummary(BlockSummary),
}

/// A response from the block store backend.
#[derive(Debug, Clone)]
pub enum BackendResponse {
    /// The answer to [`BackendRequest::HasBlock`].
    HasBlock(bool),
    /// A generic ok response.
    Ok,
}

/// A request to the peer discovery service.
#[derive(Debug, Clone, Copy)]
pub enum DiscoveryRequest {
    /// A snapshot of the peers considered alive, ordered by ascending
    /// distance from "recently alive". Freshness is expected within
    /// seconds.
    RecentlyAlivePeers,
}

/// A response from the peer discovery service.
#[derive(Debug, Clone)]
pub enum DiscoveryResponse {
    /// The return value of [`DiscoveryRequest::RecentlyAlivePeers`].
    Peers(Vec<Node>),
}
