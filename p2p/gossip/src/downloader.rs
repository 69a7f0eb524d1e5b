//! # Download Manager
//!
//! This module contains the [`DownloadManager`], which downloads blocks
//! advertised by peers, hands them to the backend for validation and
//! storage, and optionally relays them onwards. It is started by
//! [`initialize_gossip`](crate::initialize_gossip).
//!
//! ## Implementation Details
//!
//! All state lives in an item map keyed by block hash. The scheduler loop
//! is the map's only writer and consumes one [`DownloadSignal`] at a time
//! from a one-slot queue: new download requests from
//! `schedule_download`, and success/failure reports posted back by
//! workers. Workers never touch the map directly; they only read a
//! snapshot of their item's advertised sources, which may widen while they
//! run.
//!
//! A block can only be downloaded once everything it depends on has been
//! stored, so callers must schedule in topological order. An item whose
//! dependencies are still scheduled waits; each dependency's success
//! signal removes an edge, and the item's worker starts when the last one
//! clears. A terminal failure leaves a tombstone in the map so dependants
//! stay blocked until the block is re-scheduled.
use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use dashmap::DashMap;
use tokio::{
    sync::{mpsc, Semaphore},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tracing::instrument;

use galena_gossip_core::{Backend, BackendRequest, BackendResponse, Connector, Discovery};
use galena_types::{BlockHash, BlockSummary};
use galena_wire::Node;

use crate::{
    config::{FatalClassifier, GossipConfig, RetryConfig},
    constants::SIGNAL_QUEUE_SLOTS,
    handles::{DownloadFeedback, ScheduleFeedback},
    metrics::Metrics,
    relay::RelayEngine,
};

mod chunks;
mod compress;
mod worker;

use worker::Worker;

/// An error scheduling a download.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    /// The gossip core has begun shutting down.
    #[error("the gossip core has been shut down")]
    AlreadyShutDown,
    /// The summary names dependencies that are neither stored nor
    /// scheduled. Callers must schedule in topological order.
    #[error("block {} is missing {} dependencies", hex::encode(.block_hash), .missing.len())]
    MissingDependencies {
        /// The block that could not be scheduled.
        block_hash: BlockHash,
        /// Its unsatisfied dependencies, in hash order.
        missing: Vec<BlockHash>,
    },
}

/// An error that terminally failed a block download.
///
/// Clonable because every watcher of the failed item receives it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DownloadError {
    /// A peer violated the chunked transfer contract.
    #[error("invalid chunks from {peer}: {reason}")]
    InvalidChunks {
        /// Which fold rule the stream violated.
        reason: String,
        /// The peer that sent the stream.
        peer: Node,
    },
    /// Connecting to or streaming from a peer failed.
    #[error("transport error from {peer}: {error}")]
    Transport {
        peer: Node,
        error: Arc<tower::BoxError>,
    },
    /// The backend rejected validation or storage.
    #[error("backend error: {0}")]
    Backend(Arc<tower::BoxError>),
    /// The retry configuration produced an unrepresentable backoff delay.
    #[error("retry backoff computed a non-finite delay, check the retry configuration")]
    Configuration,
    /// The item had no sources to try.
    #[error("no sources advertised the block")]
    NoSources,
    /// The gossip core was shut down while the download was outstanding.
    #[error("the gossip core has been shut down")]
    ShutDown,
}

/// A signal consumed by the scheduler loop.
pub(crate) enum DownloadSignal {
    /// A new download request.
    Download {
        summary: BlockSummary,
        source: Node,
        relay: bool,
        schedule_feedback: ScheduleFeedback,
        download_feedback: DownloadFeedback,
    },
    /// A worker downloaded, validated and stored its block.
    Success(BlockHash),
    /// A worker exhausted its sources.
    Failure(BlockHash, DownloadError),
}

/// A scheduled download, keyed by its block hash in the item map.
#[derive(Debug)]
pub(crate) struct DownloadItem {
    pub(crate) summary: BlockSummary,
    /// Peers that advertised the block, in announcement order. Only ever
    /// widens.
    pub(crate) sources: Vec<Node>,
    /// Whether to relay the block once stored. Sticky: once `true`, stays
    /// `true`.
    pub(crate) relay: bool,
    /// Dependencies that have not been downloaded yet.
    pub(crate) dependencies: BTreeSet<BlockHash>,
    /// Whether a worker is running for this item.
    pub(crate) is_downloading: bool,
    /// Tombstone flag: set on terminal failure, cleared by re-scheduling.
    pub(crate) is_error: bool,
    /// Watchers awaiting this block, each completed exactly once.
    pub(crate) watchers: Vec<DownloadFeedback>,
}

impl DownloadItem {
    /// A worker may start iff no worker is running, the item is not a
    /// tombstone and every dependency has been downloaded.
    pub(crate) fn can_start(&self) -> bool {
        !self.is_downloading && !self.is_error && self.dependencies.is_empty()
    }
}

/// The download manager: the scheduler loop plus the worker pool it
/// drives.
pub(crate) struct DownloadManager<B, C, D> {
    /// The block store backend.
    backend: B,
    /// The service that opens gossip connections, cloned into workers.
    connector: C,
    /// The relay engine, cloned into workers for post-store announcements.
    relay: RelayEngine<D, C>,

    /// The item map. The scheduler is the only writer; workers hold the
    /// same [`Arc`] to read their item's sources.
    items: Arc<DashMap<BlockHash, DownloadItem>>,
    /// The running workers, one per actively downloading item.
    workers: HashMap<BlockHash, JoinHandle<()>>,

    /// The sender side of the signal queue, cloned into workers.
    signal_tx: mpsc::Sender<DownloadSignal>,
    signal_rx: mpsc::Receiver<DownloadSignal>,

    /// The global budget for concurrent chunked fetches.
    fetch_permits: Arc<Semaphore>,
    retries: RetryConfig,
    fatal_classifier: FatalClassifier,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
}

impl<B, C, D> DownloadManager<B, C, D>
where
    B: Backend + Clone,
    C: Connector + Clone,
    D: Discovery + Clone,
{
    /// Creates the manager and the signal sender `schedule_download`
    /// feeds.
    pub(crate) fn new(
        backend: B,
        connector: C,
        relay: RelayEngine<D, C>,
        metrics: Arc<Metrics>,
        config: &GossipConfig,
        shutdown: CancellationToken,
    ) -> (Self, mpsc::Sender<DownloadSignal>) {
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_QUEUE_SLOTS);

        let manager = Self {
            backend,
            connector,
            relay,
            items: Arc::new(DashMap::new()),
            workers: HashMap::new(),
            signal_tx: signal_tx.clone(),
            signal_rx,
            fetch_permits: Arc::new(Semaphore::new(config.max_parallel_downloads)),
            retries: config.retries,
            fatal_classifier: config.fatal_classifier,
            metrics,
            shutdown,
        };

        (manager, signal_tx)
    }

    /// The scheduler loop.
    ///
    /// Strictly single-threaded over the item and worker maps; it only
    /// ends on shutdown, never because of an error in a signal's
    /// handling.
    #[instrument(level = "error", name = "download_manager", skip_all)]
    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    self.finish();
                    return;
                }
                signal = self.signal_rx.recv() => match signal {
                    Some(DownloadSignal::Download {
                        summary,
                        source,
                        relay,
                        schedule_feedback,
                        download_feedback,
                    }) => {
                        self.handle_download(summary, source, relay, schedule_feedback, download_feedback)
                            .await;
                    }
                    Some(DownloadSignal::Success(block_hash)) => self.handle_success(block_hash),
                    Some(DownloadSignal::Failure(block_hash, error)) => {
                        self.handle_failure(block_hash, &error);
                    }
                    // Unreachable while we hold a sender clone ourselves.
                    None => return,
                },
            }
        }
    }

    /// Applies a download request: answer immediately for stored blocks,
    /// merge into an already scheduled item, or validate dependencies and
    /// create a fresh one.
    async fn handle_download(
        &mut self,
        summary: BlockSummary,
        source: Node,
        relay: bool,
        schedule_feedback: ScheduleFeedback,
        download_feedback: DownloadFeedback,
    ) {
        let block_hash = summary.block_hash;

        if self.block_is_stored(block_hash).await {
            download_feedback.complete(Ok(()));
            schedule_feedback.complete(Ok(()));
            return;
        }

        if self.items.contains_key(&block_hash) {
            let can_start = {
                let mut item = self
                    .items
                    .get_mut(&block_hash)
                    .expect("the scheduler is the only writer of the item map");

                if !item.sources.contains(&source) {
                    item.sources.push(source);
                }
                item.relay |= relay;
                // Re-scheduling revives a tombstone.
                item.is_error = false;
                item.watchers.push(download_feedback);

                item.can_start()
            };

            if can_start {
                self.start_worker(block_hash);
            }
            schedule_feedback.complete(Ok(()));
            return;
        }

        // A fresh item: every dependency must either be scheduled already
        // or reported stored by the backend.
        let mut pending = BTreeSet::new();
        let mut missing = Vec::new();

        for dependency in summary.dependencies() {
            if self.items.contains_key(&dependency) {
                pending.insert(dependency);
            } else if !self.block_is_stored(dependency).await {
                missing.push(dependency);
            }
        }

        if !missing.is_empty() {
            schedule_feedback.complete(Err(ScheduleError::MissingDependencies {
                block_hash,
                missing,
            }));
            return;
        }

        let can_start = pending.is_empty();

        self.items.insert(
            block_hash,
            DownloadItem {
                summary,
                sources: vec![source],
                relay,
                dependencies: pending,
                is_downloading: false,
                is_error: false,
                watchers: vec![download_feedback],
            },
        );
        self.metrics.downloads_scheduled.inc();

        if can_start {
            self.start_worker(block_hash);
        }
        schedule_feedback.complete(Ok(()));
    }

    /// Removes the finished item, completes its watchers and starts every
    /// dependant this success unblocked.
    fn handle_success(&mut self, block_hash: BlockHash) {
        tracing::debug!(block = %hex::encode(block_hash), "Block downloaded and stored");

        self.workers.remove(&block_hash);
        self.metrics.downloads_ongoing.dec();
        self.metrics.downloads_succeeded.inc();

        let Some((_, item)) = self.items.remove(&block_hash) else {
            return;
        };
        self.metrics.downloads_scheduled.dec();

        for watcher in item.watchers {
            watcher.complete(Ok(()));
        }

        let mut unblocked = Vec::new();
        for mut entry in self.items.iter_mut() {
            if entry.dependencies.remove(&block_hash) && entry.can_start() {
                unblocked.push(*entry.key());
            }
        }

        for dependant in unblocked {
            self.start_worker(dependant);
        }
    }

    /// Converts the failed item into a tombstone and delivers the error to
    /// its watchers. Dependants are left blocked.
    fn handle_failure(&mut self, block_hash: BlockHash, error: &DownloadError) {
        tracing::debug!(block = %hex::encode(block_hash), "Failed to download block: {error}");

        self.workers.remove(&block_hash);
        self.metrics.downloads_ongoing.dec();
        self.metrics.downloads_failed.inc();

        let Some(mut item) = self.items.get_mut(&block_hash) else {
            return;
        };

        item.is_downloading = false;
        item.is_error = true;
        for watcher in item.watchers.drain(..) {
            watcher.complete(Err(error.clone()));
        }
    }

    /// Spawns the worker for an item that [`DownloadItem::can_start`].
    fn start_worker(&mut self, block_hash: BlockHash) {
        let summary = {
            let Some(mut item) = self.items.get_mut(&block_hash) else {
                return;
            };
            debug_assert!(item.can_start());

            item.is_downloading = true;
            item.summary.clone()
        };

        tracing::debug!(block = %hex::encode(block_hash), "Starting download worker");
        self.metrics.downloads_ongoing.inc();

        let worker = Worker {
            backend: self.backend.clone(),
            connector: self.connector.clone(),
            relay: self.relay.clone(),
            items: Arc::clone(&self.items),
            signals: self.signal_tx.clone(),
            fetch_permits: Arc::clone(&self.fetch_permits),
            retries: self.retries,
            fatal_classifier: self.fatal_classifier,
            metrics: Arc::clone(&self.metrics),
            summary,
        };

        self.workers.insert(block_hash, tokio::spawn(worker.run()));
    }

    async fn block_is_stored(&mut self, block_hash: BlockHash) -> bool {
        let request = BackendRequest::HasBlock(block_hash);

        let response = async {
            Ok::<_, tower::BoxError>(self.backend.ready().await?.call(request).await?)
        }
        .await;

        match response {
            Ok(BackendResponse::HasBlock(stored)) => stored,
            Ok(BackendResponse::Ok) => panic!("Backend returned wrong response."),
            Err(e) => {
                // The loop must survive backend hiccups; treat the block
                // as not stored.
                tracing::warn!("Backend failed to answer HasBlock: {e}");
                false
            }
        }
    }

    /// The shutdown path: cancel every worker and make sure no caller is
    /// left waiting on a handle forever.
    fn finish(&mut self) {
        tracing::info!(
            "Shutting down, cancelling {} download workers",
            self.workers.len()
        );

        for (_, worker) in self.workers.drain() {
            worker.abort();
            self.metrics.downloads_ongoing.dec();
        }

        for mut entry in self.items.iter_mut() {
            for watcher in entry.watchers.drain(..) {
                watcher.complete(Err(DownloadError::ShutDown));
            }
        }

        // Download signals already queued would otherwise leave their
        // callers waiting on the schedule feedback.
        while let Ok(signal) = self.signal_rx.try_recv() {
            if let DownloadSignal::Download {
                schedule_feedback, ..
            } = signal
            {
                schedule_feedback.complete(Err(ScheduleError::AlreadyShutDown));
            }
        }
    }
}
