//! # Galena Gossip Core
//!
//! The service contracts the gossip core is built on. This is a low level
//! crate: it only defines the request/response types and trait aliases for
//! the collaborators the gossip layer consumes — the block store backend,
//! peer discovery and the per-peer gossip RPC client. The actual gossip
//! logic lives in `galena-gossip`.
//!
//! Every seam is a [`tower::Service`] so implementations can be swapped for
//! mocks in tests and composed with tower middleware in the node.
use std::future::Future;

pub mod client;
pub mod error;
pub mod protocol;
pub mod services;

pub use client::{mock_client, ConnectRequest, GossipClient};
pub use error::TransportError;
pub use protocol::{ChunkStream, GossipRequest, GossipResponse};
pub use services::{
    BackendRequest, BackendResponse, DiscoveryRequest, DiscoveryResponse,
};

// ####################################################################################
// Below here is just helper traits, so we don't have to type out tower::Service bounds
// everywhere but still get to use tower.

/// The block store the gossip core reads from and writes to.
pub trait Backend:
    tower::Service<
        BackendRequest,
        Response = BackendResponse,
        Error = tower::BoxError,
        Future = Self::Future2,
    > + Send
    + 'static
{
    // This allows us to put more restrictive bounds on the future without defining the future here
    // explicitly.
    type Future2: Future<Output = Result<Self::Response, Self::Error>> + Send + 'static;
}

impl<T> Backend for T
where
    T: tower::Service<BackendRequest, Response = BackendResponse, Error = tower::BoxError>
        + Send
        + 'static,
    T::Future: Future<Output = Result<Self::Response, Self::Error>> + Send + 'static,
{
    type Future2 = T::Future;
}

/// The peer discovery service that ranks recently alive peers.
pub trait Discovery:
    tower::Service<
        DiscoveryRequest,
        Response = DiscoveryResponse,
        Error = tower::BoxError,
        Future = Self::Future2,
    > + Send
    + 'static
{
    type Future2: Future<Output = Result<Self::Response, Self::Error>> + Send + 'static;
}

impl<T> Discovery for T
where
    T: tower::Service<DiscoveryRequest, Response = DiscoveryResponse, Error = tower::BoxError>
        + Send
        + 'static,
    T::Future: Future<Output = Result<Self::Response, Self::Error>> + Send + 'static,
{
    type Future2 = T::Future;
}

/// The service that opens gossip RPC connections to peers.
pub trait Connector:
    tower::Service<
        ConnectRequest,
        Response = GossipClient,
        Error = tower::BoxError,
        Future = Self::Future2,
    > + Send
    + 'static
{
    type Future2: Future<Output = Result<Self::Response, Self::Error>> + Send + 'static;
}

impl<T> Connector for T
where
    T: tower::Service<ConnectRequest, Response = GossipClient, Error = tower::BoxError>
        + Send
        + 'static,
    T::Future: Future<Output = Result<Self::Response, Self::Error>> + Send + 'static,
{
    type Future2 = T::Future;
}
