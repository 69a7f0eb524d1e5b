//! # Relay Engine
//!
//! This module contains the [`RelayEngine`], which announces block hashes
//! to a bounded, randomized subset of live peers.
//!
//! For every hash the engine snapshots the discovery service's
//! recently-alive peer list, shuffles it, and contacts peers in waves
//! until either `relay_factor` peers accepted the block as new, the
//! saturation cap on contact attempts is hit, or the list is exhausted.
//! Peers that die mid-round are not replaced; re-announcing is the
//! caller's concern.
use std::{cmp::min, sync::Arc};

use futures::future::join_all;
use rand::{seq::SliceRandom, thread_rng};
use tokio::task::JoinSet;
use tower::ServiceExt;
use tracing::{instrument, Instrument};

use galena_gossip_core::{
    ConnectRequest, Connector, Discovery, DiscoveryRequest, DiscoveryResponse, GossipRequest,
    GossipResponse, TransportError,
};
use galena_types::BlockHash;
use galena_wire::{NewBlocksRequest, Node};

use crate::{config::GossipConfig, handles::RelayHandle, metrics::Metrics};

/// The relay engine.
///
/// Cheap to clone; every relay round runs on freshly cloned services.
#[derive(Clone)]
pub struct RelayEngine<D, C> {
    /// The peer discovery service.
    discovery: D,
    /// The service that opens gossip connections.
    connector: C,
    /// Our own identity, named as the sender in announcements.
    local_node: Node,
    /// The number of distinct acceptances to aim for per hash.
    relay_factor: usize,
    /// The cap on contact attempts per hash, derived from the saturation.
    max_to_try: usize,
    /// Whether `relay` blocks the caller until the round has finished.
    synchronous: bool,

    metrics: Arc<Metrics>,
}

impl<D, C> RelayEngine<D, C>
where
    D: Discovery + Clone,
    C: Connector + Clone,
{
    pub(crate) fn new(discovery: D, connector: C, metrics: Arc<Metrics>, config: &GossipConfig) -> Self {
        Self {
            discovery,
            connector,
            local_node: config.local_node.clone(),
            relay_factor: config.relay_factor,
            max_to_try: config.max_peers_to_try(),
            synchronous: config.is_synchronous,
            metrics,
        }
    }

    /// Announces each hash to a bounded set of peers.
    ///
    /// All hashes proceed concurrently, each against its own shuffled peer
    /// list snapshot. The returned handle completes when the whole round
    /// has finished; when the engine is synchronous the round is awaited
    /// here and the handle returns ready.
    pub async fn relay(&self, hashes: Vec<BlockHash>) -> RelayHandle {
        let mut rounds = JoinSet::new();

        for hash in hashes {
            let engine = self.clone();

            rounds.spawn(
                engine
                    .relay_hash(hash)
                    .instrument(tracing::debug_span!("relay_hash", block = %hex::encode(hash))),
            );
        }

        let round = async move { while rounds.join_next().await.is_some() {} };

        if self.synchronous {
            round.await;

            RelayHandle::ready()
        } else {
            let (done, handle) = RelayHandle::new();

            tokio::spawn(async move {
                round.await;
                let _ = done.send(());
            });

            handle
        }
    }

    /// Runs the relay round for a single hash.
    async fn relay_hash(mut self, hash: BlockHash) {
        let mut peers = match self.alive_peers().await {
            Ok(peers) => peers,
            Err(e) => {
                tracing::warn!("Failed to fetch peers for relaying: {e}");
                return;
            }
        };

        // Shuffled independently per hash, so different hashes may visit
        // different peers.
        peers.shuffle(&mut thread_rng());
        let mut peers = peers.into_iter();

        let mut relayed: usize = 0;
        let mut contacted: usize = 0;

        loop {
            let parallelism = min(
                self.relay_factor.saturating_sub(relayed),
                self.max_to_try.saturating_sub(contacted),
            );
            if parallelism == 0 {
                break;
            }

            let wave: Vec<Node> = peers.by_ref().take(parallelism).collect();
            if wave.is_empty() {
                // Peers exhausted.
                break;
            }

            contacted += wave.len();

            let outcomes = join_all(wave.into_iter().map(|peer| {
                announce(
                    self.connector.clone(),
                    self.metrics.clone(),
                    self.local_node.clone(),
                    peer,
                    hash,
                )
            }))
            .await;

            relayed += outcomes.into_iter().filter(|accepted| *accepted).count();
        }

        tracing::debug!(relayed, contacted, "Relay round for block finished");
    }

    async fn alive_peers(&mut self) -> Result<Vec<Node>, tower::BoxError> {
        let DiscoveryResponse::Peers(peers) = self
            .discovery
            .ready()
            .await?
            .call(DiscoveryRequest::RecentlyAlivePeers)
            .await?;

        Ok(peers)
    }
}

/// Announces `hash` to one peer, returning whether the peer accepted it as
/// new.
///
/// Transport and remote errors count the peer as contacted but not
/// relayed; they are logged and never propagated.
#[instrument(level = "debug", skip_all, fields(peer = %peer))]
async fn announce<C>(
    connector: C,
    metrics: Arc<Metrics>,
    sender: Node,
    peer: Node,
    hash: BlockHash,
) -> bool
where
    C: Connector + Clone,
{
    match try_announce(connector, sender, peer.clone(), hash).await {
        Ok(true) => {
            metrics.relay_accepted.inc();
            true
        }
        Ok(false) => {
            metrics.relay_rejected.inc();
            false
        }
        Err(e) => {
            metrics.relay_failed.inc();
            tracing::debug!("Failed to announce block to {peer}: {e}");
            false
        }
    }
}

async fn try_announce<C>(
    mut connector: C,
    sender: Node,
    peer: Node,
    hash: BlockHash,
) -> Result<bool, tower::BoxError>
where
    C: Connector + Clone,
{
    let client = connector
        .ready()
        .await?
        .call(ConnectRequest { peer })
        .await?;

    let response = client
        .oneshot(GossipRequest::NewBlocks(NewBlocksRequest {
            sender,
            block_hashes: vec![hash],
        }))
        .await?;

    let GossipResponse::NewBlocks(response) = response else {
        return Err(TransportError::PeerSentIncorrectResponse.into());
    };

    Ok(response.is_new)
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        net::SocketAddr,
        sync::{Arc, Mutex},
    };

    use tower::{service_fn, util::BoxCloneService};

    use galena_gossip_core::{mock_client, GossipClient};
    use galena_wire::NewBlocksResponse;

    use super::*;

    type MockDiscovery = BoxCloneService<DiscoveryRequest, DiscoveryResponse, tower::BoxError>;
    type MockConnector = BoxCloneService<ConnectRequest, GossipClient, tower::BoxError>;

    fn node(port: u16) -> Node {
        Node {
            address: SocketAddr::from(([127, 0, 0, 1], port)),
            name: format!("peer-{port}"),
        }
    }

    fn local_node() -> Node {
        node(9)
    }

    /// Counts connection attempts per peer address.
    type ContactLog = Arc<Mutex<HashMap<SocketAddr, usize>>>;

    fn mock_discovery(peers: Vec<Node>) -> MockDiscovery {
        BoxCloneService::new(service_fn(move |_: DiscoveryRequest| {
            let peers = peers.clone();
            async move { Ok(DiscoveryResponse::Peers(peers)) }
        }))
    }

    /// A connector whose peers all answer `is_new`, or fail to connect
    /// entirely when `connects` is false.
    fn mock_connector(log: ContactLog, connects: bool, is_new: bool) -> MockConnector {
        BoxCloneService::new(service_fn(move |req: ConnectRequest| {
            let log = log.clone();

            async move {
                *log.lock().unwrap().entry(req.peer.address).or_default() += 1;

                if !connects {
                    return Err(TransportError::ConnectionClosed.into());
                }

                Ok(mock_client(service_fn(move |req| async move {
                    match req {
                        GossipRequest::NewBlocks(_) => {
                            Ok(GossipResponse::NewBlocks(NewBlocksResponse { is_new }))
                        }
                        GossipRequest::GetBlockChunked(_) => panic!("unexpected request"),
                    }
                })))
            }
        }))
    }

    fn engine_config(relay_factor: usize, relay_saturation: usize) -> GossipConfig {
        let mut config = GossipConfig::new(local_node());
        config.relay_factor = relay_factor;
        config.relay_saturation = relay_saturation;
        config
    }

    fn total_contacts(log: &ContactLog) -> usize {
        log.lock().unwrap().values().sum()
    }

    /// `relay_factor = 3`, `relay_saturation = 50` caps contact attempts
    /// at 6: with every peer rejecting, the round stops there without
    /// visiting the remaining peers.
    #[tokio::test]
    async fn saturation_caps_contact_attempts() {
        let log = ContactLog::default();
        let metrics = Arc::new(Metrics::new());
        let peers = (1..=8).map(node).collect();

        let engine = RelayEngine::new(
            mock_discovery(peers),
            mock_connector(log.clone(), true, false),
            metrics.clone(),
            &engine_config(3, 50),
        );

        engine.relay(vec![[1; 32]]).await.await;

        assert_eq!(total_contacts(&log), 6);
        assert_eq!(metrics.relay_rejected.get(), 6);
        assert_eq!(metrics.relay_accepted.get(), 0);
    }

    /// With saturation 100 the cap is lifted; the round stops as soon as
    /// `relay_factor` peers accepted.
    #[tokio::test]
    async fn round_stops_once_relay_factor_is_reached() {
        let log = ContactLog::default();
        let metrics = Arc::new(Metrics::new());
        let peers = (1..=8).map(node).collect();

        let engine = RelayEngine::new(
            mock_discovery(peers),
            mock_connector(log.clone(), true, true),
            metrics.clone(),
            &engine_config(3, 100),
        );

        engine.relay(vec![[1; 32]]).await.await;

        assert_eq!(total_contacts(&log), 3);
        assert_eq!(metrics.relay_accepted.get(), 3);
    }

    /// With saturation 100 and no acceptors the round terminates by
    /// exhausting the peer list.
    #[tokio::test]
    async fn round_terminates_when_peers_are_exhausted() {
        let log = ContactLog::default();
        let metrics = Arc::new(Metrics::new());
        let peers = (1..=5).map(node).collect();

        let engine = RelayEngine::new(
            mock_discovery(peers),
            mock_connector(log.clone(), true, false),
            metrics.clone(),
            &engine_config(3, 100),
        );

        engine.relay(vec![[1; 32]]).await.await;

        assert_eq!(total_contacts(&log), 5);
    }

    #[tokio::test]
    async fn relay_factor_zero_contacts_no_peers() {
        let log = ContactLog::default();
        let metrics = Arc::new(Metrics::new());
        let peers = (1..=4).map(node).collect();

        let engine = RelayEngine::new(
            mock_discovery(peers),
            mock_connector(log.clone(), true, true),
            metrics.clone(),
            &engine_config(0, 50),
        );

        engine.relay(vec![[1; 32]]).await.await;

        assert_eq!(total_contacts(&log), 0);
    }

    /// Connection failures are logged, counted as contacted and never
    /// propagated; the saturation cap still bounds the round.
    #[tokio::test]
    async fn connector_failures_count_as_contacted() {
        let log = ContactLog::default();
        let metrics = Arc::new(Metrics::new());
        let peers = (1..=8).map(node).collect();

        let engine = RelayEngine::new(
            mock_discovery(peers),
            mock_connector(log.clone(), false, false),
            metrics.clone(),
            &engine_config(2, 0),
        );

        engine.relay(vec![[1; 32]]).await.await;

        assert_eq!(total_contacts(&log), 2);
        assert_eq!(metrics.relay_failed.get(), 2);
    }

    /// A synchronous engine finishes the round before `relay` returns;
    /// the handle is already complete.
    #[tokio::test]
    async fn synchronous_relay_completes_before_returning() {
        let log = ContactLog::default();
        let metrics = Arc::new(Metrics::new());
        let peers = (1..=4).map(node).collect();

        let mut config = engine_config(2, 100);
        config.is_synchronous = true;

        let engine = RelayEngine::new(
            mock_discovery(peers),
            mock_connector(log.clone(), true, true),
            metrics.clone(),
            &config,
        );

        let handle = engine.relay(vec![[1; 32]]).await;

        // The round already ran; nothing has awaited the handle yet.
        assert_eq!(total_contacts(&log), 2);

        handle.await;
    }

    /// Hashes are relayed concurrently, each with its own peer list
    /// snapshot and counters.
    #[tokio::test]
    async fn each_hash_gets_its_own_round() {
        let log = ContactLog::default();
        let metrics = Arc::new(Metrics::new());
        let peers = (1..=8).map(node).collect();

        let engine = RelayEngine::new(
            mock_discovery(peers),
            mock_connector(log.clone(), true, true),
            metrics.clone(),
            &engine_config(2, 100),
        );

        engine.relay(vec![[1; 32], [2; 32]]).await.await;

        assert_eq!(total_contacts(&log), 4);
        assert_eq!(metrics.relay_accepted.get(), 4);
    }
}
