//! Galena's gossip crate.
//!
//! This crate contains the gossip ingress/egress core of a Galena node: a
//! download manager that downloads blocks advertised by peers in
//! dependency order, and a [`RelayEngine`] that announces stored blocks to
//! a bounded, randomized subset of live peers.
//!
//! Everything external — the block store, peer discovery and the gossip
//! transport — is consumed through the service contracts defined in
//! `galena-gossip-core`.
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use galena_gossip_core::{Backend, Connector, Discovery};
use galena_types::{BlockHash, BlockSummary};
use galena_wire::Node;

mod config;
mod constants;
mod downloader;
mod handles;
mod metrics;
mod relay;

pub use config::{no_fatal_errors, ConfigError, FatalClassifier, GossipConfig, RetryConfig};
pub use downloader::{DownloadError, ScheduleError};
pub use handles::{DownloadHandle, RelayHandle};
pub use metrics::Metrics;
pub use relay::RelayEngine;

use downloader::{DownloadManager, DownloadSignal};
use handles::ScheduleFeedback;

/// Initializes the gossip core: starts the download manager's scheduler
/// loop and builds the relay engine.
///
/// Must be called from within a tokio runtime. Shutting the returned
/// interface down cancels the loop and every running worker.
///
/// # Usage
/// You must provide:
/// - A backend service that validates and stores blocks
/// - A discovery service that ranks recently alive peers
/// - A connector that opens gossip connections to peers
pub fn initialize_gossip<B, D, C>(
    backend: B,
    discovery: D,
    connector: C,
    config: GossipConfig,
) -> Result<GossipInterface<D, C>, ConfigError>
where
    B: Backend + Clone,
    D: Discovery + Clone,
    C: Connector + Clone,
{
    config.validate()?;

    let metrics = Arc::new(Metrics::new());
    let shutdown = CancellationToken::new();

    let relay = RelayEngine::new(discovery, connector.clone(), Arc::clone(&metrics), &config);

    let (manager, signals) = DownloadManager::new(
        backend,
        connector,
        relay.clone(),
        Arc::clone(&metrics),
        &config,
        shutdown.clone(),
    );

    tokio::spawn(manager.run());

    Ok(GossipInterface {
        signals,
        shutdown,
        relay,
        metrics,
    })
}

/// The handle to a running gossip core.
#[derive(Clone)]
pub struct GossipInterface<D, C> {
    /// The scheduler's signal queue.
    signals: mpsc::Sender<DownloadSignal>,
    /// Cancelling this shuts the whole core down.
    shutdown: CancellationToken,
    /// The relay engine, also usable directly for blocks the node already
    /// holds.
    relay: RelayEngine<D, C>,
    metrics: Arc<Metrics>,
}

impl<D, C> GossipInterface<D, C>
where
    D: Discovery + Clone,
    C: Connector + Clone,
{
    /// Schedules a block download.
    ///
    /// Returns once the request has been fully applied by the scheduler:
    /// a scheduling error is reported here, synchronously, while the
    /// download outcome is reported through the returned
    /// [`DownloadHandle`].
    ///
    /// Scheduling is idempotent. A block that is already stored completes
    /// immediately; one that is already scheduled has `source` added to
    /// its item, the relay flag ORed in and a fresh watcher attached.
    /// Dependencies must be scheduled before their dependants.
    pub async fn schedule_download(
        &self,
        summary: BlockSummary,
        source: Node,
        relay: bool,
    ) -> Result<DownloadHandle, ScheduleError> {
        if self.shutdown.is_cancelled() {
            return Err(ScheduleError::AlreadyShutDown);
        }

        let (schedule_feedback, schedule_result) = ScheduleFeedback::new();
        let (download_feedback, handle) = DownloadHandle::new();

        self.signals
            .send(DownloadSignal::Download {
                summary,
                source,
                relay,
                schedule_feedback,
                download_feedback,
            })
            .await
            .map_err(|_| ScheduleError::AlreadyShutDown)?;

        match schedule_result.await {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(e)) => Err(e),
            // The scheduler dropped our feedback, which only happens on
            // shutdown.
            Err(_) => Err(ScheduleError::AlreadyShutDown),
        }
    }

    /// Announces blocks the node already holds to a bounded set of peers.
    ///
    /// See [`RelayEngine::relay`].
    pub async fn relay(&self, hashes: Vec<BlockHash>) -> RelayHandle {
        self.relay.relay(hashes).await
    }

    /// Begins shutting the gossip core down.
    ///
    /// The scheduler loop stops, running workers are cancelled and
    /// outstanding watchers complete with [`DownloadError::ShutDown`].
    /// Subsequent [`GossipInterface::schedule_download`] calls fail with
    /// [`ScheduleError::AlreadyShutDown`].
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// The metrics this core maintains.
    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }
}
