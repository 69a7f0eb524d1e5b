/// An error talking to a peer's gossip service.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("the connection timed out")]
    TimedOut,
    #[error("the connection was closed")]
    ConnectionClosed,
    #[error("the peer sent an incorrect response to our request")]
    PeerSentIncorrectResponse,
    #[error("inner service error: {0}")]
    ServiceError(#[from] tower::BoxError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
