//! Gossip clients.
//!
//! A [`GossipClient`] is the handle to one connected peer's gossip
//! service. Connections are opened per use by a [`Connector`](crate::Connector)
//! implementation; no pooling happens at this layer.
use tower::{util::BoxCloneService, Service};

use galena_wire::Node;

use crate::protocol::{GossipRequest, GossipResponse};

/// A request to open a gossip RPC connection to a peer.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// The peer to connect to.
    pub peer: Node,
}

/// The client side of one peer's gossip service.
pub type GossipClient = BoxCloneService<GossipRequest, GossipResponse, tower::BoxError>;

/// Builds a [`GossipClient`] directly from a request handler, skipping the
/// transport layer.
///
/// Intended for tests; pair it with [`tower::service_fn`].
pub fn mock_client<S>(request_handler: S) -> GossipClient
where
    S: Service<GossipRequest, Response = GossipResponse, Error = tower::BoxError>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    BoxCloneService::new(request_handler)
}

#[cfg(test)]
mod tests {
    use tower::{service_fn, ServiceExt};

    use galena_wire::NewBlocksResponse;

    use super::*;

    #[tokio::test]
    async fn mock_client_round_trips_requests() {
        let client = mock_client(service_fn(|req| async move {
            match req {
                GossipRequest::NewBlocks(_) => {
                    Ok(GossipResponse::NewBlocks(NewBlocksResponse { is_new: true }))
                }
                GossipRequest::GetBlockChunked(_) => panic!("unexpected request"),
            }
        }));

        let res = client
            .oneshot(GossipRequest::NewBlocks(galena_wire::NewBlocksRequest {
                sender: Node {
                    address: "127.0.0.1:0".parse().unwrap(),
                    name: "test".into(),
                },
                block_hashes: vec![[0; 32]],
            }))
            .await
            .unwrap();

        assert!(matches!(
            res,
            GossipResponse::NewBlocks(NewBlocksResponse { is_new: true })
        ));
    }
}
