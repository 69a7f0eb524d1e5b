//! Download workers.
//!
//! One worker per actively downloading item. A worker owns clones of the
//! external services, reads its item's advertised sources through the
//! shared map, and reports its outcome back to the scheduler as a signal.
//! Retry-with-backoff and source fail-over are two nested loops: failing
//! over to the next source starts with a fresh attempt counter.
use std::{collections::HashSet, fmt, net::SocketAddr, sync::Arc};

use dashmap::DashMap;
use tokio::sync::{mpsc, Semaphore};
use tower::ServiceExt;
use tracing::instrument;

use galena_gossip_core::{
    Backend, BackendRequest, ConnectRequest, Connector, Discovery, GossipRequest, GossipResponse,
    TransportError,
};
use galena_types::{Block, BlockHash, BlockSummary};
use galena_wire::{GetBlockChunkedRequest, Node, COMPRESSION_LZ4};

use crate::{
    config::{FatalClassifier, RetryConfig},
    downloader::{
        chunks::{self, ChunkFetchError},
        compress, DownloadError, DownloadItem, DownloadSignal,
    },
    metrics::{GaugeGuard, Metrics},
    relay::RelayEngine,
};

/// A worker for a single block: fetch, validate, store, optionally relay,
/// then report back.
pub(crate) struct Worker<B, C, D> {
    pub(crate) backend: B,
    pub(crate) connector: C,
    pub(crate) relay: RelayEngine<D, C>,
    /// The shared item map, read-only from here.
    pub(crate) items: Arc<DashMap<BlockHash, DownloadItem>>,
    /// Where to post the outcome.
    pub(crate) signals: mpsc::Sender<DownloadSignal>,
    /// The global budget for concurrent chunked fetches.
    pub(crate) fetch_permits: Arc<Semaphore>,
    pub(crate) retries: RetryConfig,
    pub(crate) fatal_classifier: FatalClassifier,
    pub(crate) metrics: Arc<Metrics>,
    /// The summary of the block to download.
    pub(crate) summary: BlockSummary,
}

impl<B, C, D> Worker<B, C, D>
where
    B: Backend + Clone,
    C: Connector + Clone,
    D: Discovery + Clone,
{
    #[instrument(
        level = "debug",
        name = "block_download",
        skip_all,
        fields(block = %hex::encode(self.summary.block_hash))
    )]
    pub(crate) async fn run(mut self) {
        let block_hash = self.summary.block_hash;

        let signal = match self.download().await {
            Ok(()) => DownloadSignal::Success(block_hash),
            Err(e) => DownloadSignal::Failure(block_hash, e),
        };

        // A send error means the scheduler is gone, i.e. shutdown; there
        // is nothing left to report to.
        let _ = self.signals.send(signal).await;
    }

    /// The outer fail-over loop: every advertised source is exhausted
    /// before the download fails. The reported error is the first one
    /// encountered.
    async fn download(&mut self) -> Result<(), DownloadError> {
        let block_hash = self.summary.block_hash;
        let mut tried = HashSet::new();
        let mut first_error = None;

        while let Some(source) = self.next_source(&tried) {
            tried.insert(source.address);

            match self.download_from(&source, &mut first_error).await {
                Ok(()) => {
                    self.maybe_relay(block_hash).await;
                    return Ok(());
                }
                Err(e) if self.is_fatal(&e) => return Err(e),
                Err(e) => tracing::debug!("Giving up on source {source}: {e}"),
            }
        }

        Err(first_error.unwrap_or(DownloadError::NoSources))
    }

    /// The first advertised source this worker has not tried yet.
    ///
    /// Reads the live item: sources announced after the worker started
    /// are picked up here.
    fn next_source(&self, tried: &HashSet<SocketAddr>) -> Option<Node> {
        let item = self.items.get(&self.summary.block_hash)?;

        item.sources
            .iter()
            .find(|source| !tried.contains(&source.address))
            .cloned()
    }

    /// The inner retry loop against a single source, with exponential
    /// backoff.
    async fn download_from(
        &mut self,
        source: &Node,
        first_error: &mut Option<DownloadError>,
    ) -> Result<(), DownloadError> {
        let mut attempt: u32 = 0;

        loop {
            let error = match self.attempt(source).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            first_error.get_or_insert_with(|| error.clone());

            if self.is_fatal(&error) || attempt >= self.retries.max_retries {
                return Err(error);
            }

            let Some(delay) = self.retries.backoff_delay(attempt) else {
                return Err(DownloadError::Configuration);
            };

            self.metrics.downloads_failed.inc();
            tracing::debug!("Retrying download from {source} in {delay:?}: {error}");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn is_fatal(&self, error: &DownloadError) -> bool {
        match error {
            DownloadError::Configuration | DownloadError::ShutDown => true,
            DownloadError::Backend(e) => (self.fatal_classifier)(e),
            DownloadError::InvalidChunks { .. }
            | DownloadError::Transport { .. }
            | DownloadError::NoSources => false,
        }
    }

    /// One fetch + validate + store attempt against `source`.
    async fn attempt(&mut self, source: &Node) -> Result<(), DownloadError> {
        let block = {
            // The permit only budgets peer byte streams; validation and
            // storage run outside it.
            let _permit = self
                .fetch_permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| DownloadError::ShutDown)?;
            let _ongoing = GaugeGuard::increment(&self.metrics.fetches_ongoing);

            self.fetch_block(source).await?
        };

        self.backend_call(BackendRequest::ValidateBlock(block.clone()))
            .await?;
        // Blocks precede summaries so a crash between the two leaves a
        // recoverable state.
        self.backend_call(BackendRequest::StoreBlock(block)).await?;
        self.backend_call(BackendRequest::StoreBlockSummary(self.summary.clone()))
            .await?;

        Ok(())
    }

    /// Fetches and parses the block over a chunked transfer.
    async fn fetch_block(&mut self, source: &Node) -> Result<Block, DownloadError> {
        let client = self
            .connector
            .ready()
            .await
            .map_err(|e| transport(source, e))?
            .call(ConnectRequest {
                peer: source.clone(),
            })
            .await
            .map_err(|e| transport(source, e))?;

        let request = GossipRequest::GetBlockChunked(GetBlockChunkedRequest {
            block_hash: self.summary.block_hash,
            accepted_compression_algorithms: vec![COMPRESSION_LZ4.to_string()],
        });

        let response = client
            .oneshot(request)
            .await
            .map_err(|e| transport(source, e))?;

        let GossipResponse::BlockChunks(chunk_stream) = response else {
            return Err(transport(
                source,
                TransportError::PeerSentIncorrectResponse.into(),
            ));
        };

        let (header, bytes) = chunks::assemble(chunk_stream).await.map_err(|e| match e {
            ChunkFetchError::Invalid(e) => invalid_chunks(source, &e),
            ChunkFetchError::Transport(e) => transport(source, e.into()),
        })?;

        let payload =
            compress::decompress(&header, &bytes).map_err(|e| invalid_chunks(source, &e))?;

        let block = Block::read(&payload).map_err(|e| invalid_chunks(source, &e))?;

        if block.hash() != self.summary.block_hash {
            return Err(DownloadError::InvalidChunks {
                reason: "block hash mismatch".to_string(),
                peer: source.clone(),
            });
        }

        Ok(block)
    }

    async fn backend_call(&mut self, request: BackendRequest) -> Result<(), DownloadError> {
        self.backend
            .ready()
            .await
            .map_err(backend_error)?
            .call(request)
            .await
            .map_err(backend_error)?;

        Ok(())
    }

    /// Kicks off a relay round iff any scheduling of this block requested
    /// it. The flag is sticky and may have been set after this worker
    /// started, so the live item is consulted.
    async fn maybe_relay(&self, block_hash: BlockHash) {
        let relay_requested = self
            .items
            .get(&block_hash)
            .is_some_and(|item| item.relay);

        if relay_requested {
            // Round completion is not this worker's concern, so the handle
            // is dropped. A synchronous relay engine finishes the round
            // inside `relay` itself.
            drop(self.relay.relay(vec![block_hash]).await);
        }
    }
}

fn transport(peer: &Node, error: tower::BoxError) -> DownloadError {
    DownloadError::Transport {
        peer: peer.clone(),
        error: Arc::new(error),
    }
}

fn invalid_chunks(peer: &Node, reason: &impl fmt::Display) -> DownloadError {
    DownloadError::InvalidChunks {
        reason: reason.to_string(),
        peer: peer.clone(),
    }
}

fn backend_error(error: tower::BoxError) -> DownloadError {
    DownloadError::Backend(Arc::new(error))
}
