//! Completion handles.
//!
//! Scheduling a download and the download itself complete over two
//! nominally distinct channels so a caller can't accidentally await the
//! wrong one: the scheduling outcome is the synchronous `Result` of
//! `schedule_download`, the download outcome is the returned
//! [`DownloadHandle`]. Relay rounds complete over a [`RelayHandle`].
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::sync::oneshot;

use crate::downloader::{DownloadError, ScheduleError};

/// An awaitable handle that completes when a scheduled block has been
/// downloaded and stored, or with the error that terminally failed the
/// download.
///
/// Completes with [`DownloadError::ShutDown`] if the gossip core is shut
/// down while the download is outstanding.
#[derive(Debug)]
pub struct DownloadHandle(oneshot::Receiver<Result<(), DownloadError>>);

impl DownloadHandle {
    /// Creates a connected feedback/handle pair.
    pub(crate) fn new() -> (DownloadFeedback, Self) {
        let (tx, rx) = oneshot::channel();

        (DownloadFeedback(tx), Self(rx))
    }

    /// A handle that is already complete.
    pub(crate) fn ready(result: Result<(), DownloadError>) -> Self {
        let (feedback, handle) = Self::new();
        feedback.complete(result);

        handle
    }
}

impl Future for DownloadHandle {
    type Output = Result<(), DownloadError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx).map(|res| match res {
            Ok(result) => result,
            // The manager dropped our watcher without completing it, which
            // only happens on shutdown.
            Err(_) => Err(DownloadError::ShutDown),
        })
    }
}

/// The sending half of a [`DownloadHandle`]: a watcher stored in the
/// download item, completed exactly once.
#[derive(Debug)]
pub(crate) struct DownloadFeedback(oneshot::Sender<Result<(), DownloadError>>);

impl DownloadFeedback {
    pub(crate) fn complete(self, result: Result<(), DownloadError>) {
        // The caller may have dropped its handle, which is fine.
        let _ = self.0.send(result);
    }
}

/// The sending half of the scheduling outcome, completed by the scheduler
/// once the download signal has been fully applied.
#[derive(Debug)]
pub(crate) struct ScheduleFeedback(oneshot::Sender<Result<(), ScheduleError>>);

impl ScheduleFeedback {
    pub(crate) fn new() -> (Self, oneshot::Receiver<Result<(), ScheduleError>>) {
        let (tx, rx) = oneshot::channel();

        (Self(tx), rx)
    }

    pub(crate) fn complete(self, result: Result<(), ScheduleError>) {
        let _ = self.0.send(result);
    }
}

/// An awaitable handle that completes when a relay round has finished.
///
/// Round termination says nothing about delivery to any particular peer.
#[derive(Debug)]
pub struct RelayHandle(oneshot::Receiver<()>);

impl RelayHandle {
    pub(crate) fn new() -> (oneshot::Sender<()>, Self) {
        let (tx, rx) = oneshot::channel();

        (tx, Self(rx))
    }

    /// A handle for a round that has already finished.
    pub(crate) fn ready() -> Self {
        let (tx, handle) = Self::new();
        let _ = tx.send(());

        handle
    }
}

impl Future for RelayHandle {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped sender also means the round is over.
        Pin::new(&mut self.0).poll(cx).map(|_| ())
    }
}
