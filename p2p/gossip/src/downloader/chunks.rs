//! Chunk stream assembly.
//!
//! Folds the frames of a chunked block transfer into a single
//! length-policed byte buffer. The fold rejects the stream on the first
//! violated rule; the returned error names that rule.
use bytes::{Bytes, BytesMut};
use futures::StreamExt;

use galena_gossip_core::{ChunkStream, TransportError};
use galena_wire::{Chunk, ChunkHeader, COMPRESSION_LZ4, COMPRESSION_NONE};

/// Why a chunk stream was rejected.
///
/// The [`std::fmt::Display`] strings are part of the error contract and
/// are asserted on by tests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum ChunkStreamError {
    #[error("did not start with a header")]
    NoLeadingHeader,
    #[error("second header")]
    SecondHeader,
    #[error("unexpected algorithm: {0}")]
    UnexpectedAlgorithm(String),
    #[error("empty data frame")]
    EmptyDataFrame,
    #[error("exceeding promised content length")]
    ExceedingContentLength,
    #[error("did not receive a header")]
    MissingHeader,
    #[error("no data")]
    NoData,
}

/// An error consuming a chunk stream: either the peer violated the wire
/// contract or the transport failed mid-stream.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ChunkFetchError {
    #[error(transparent)]
    Invalid(#[from] ChunkStreamError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// The fold state of one chunked transfer.
#[derive(Debug, Default)]
pub(crate) struct ChunkAccumulator {
    header: Option<ChunkHeader>,
    /// Running total of data bytes received.
    received: usize,
    /// Data frames in arrival order.
    chunks: Vec<Bytes>,
}

impl ChunkAccumulator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Folds the next frame in, rejecting it on the first rule violation.
    pub(crate) fn fold(&mut self, chunk: Chunk) -> Result<(), ChunkStreamError> {
        match chunk {
            Chunk::Header(header) => {
                if self.header.is_some() {
                    return Err(ChunkStreamError::SecondHeader);
                }

                let algorithm = header.compression_algorithm.as_str();
                if algorithm != COMPRESSION_NONE && algorithm != COMPRESSION_LZ4 {
                    return Err(ChunkStreamError::UnexpectedAlgorithm(algorithm.to_string()));
                }

                self.header = Some(header);
                Ok(())
            }
            Chunk::Data(bytes) => {
                let Some(header) = &self.header else {
                    return Err(ChunkStreamError::NoLeadingHeader);
                };

                if bytes.is_empty() {
                    return Err(ChunkStreamError::EmptyDataFrame);
                }

                self.received += bytes.len();
                if self.received > header.content_length as usize {
                    return Err(ChunkStreamError::ExceedingContentLength);
                }

                self.chunks.push(bytes);
                Ok(())
            }
        }
    }

    /// Terminates the fold, returning the header and the concatenated
    /// payload bytes.
    pub(crate) fn finish(self) -> Result<(ChunkHeader, Bytes), ChunkStreamError> {
        let Some(header) = self.header else {
            return Err(ChunkStreamError::MissingHeader);
        };

        if self.chunks.is_empty() && header.content_length > 0 {
            return Err(ChunkStreamError::NoData);
        }

        let mut payload = BytesMut::with_capacity(self.received);
        for chunk in &self.chunks {
            payload.extend_from_slice(chunk);
        }

        Ok((header, payload.freeze()))
    }
}

/// Drains a peer's chunk stream into a validated byte buffer.
///
/// Aborts the stream on the first contract violation or transport error.
pub(crate) async fn assemble(mut stream: ChunkStream) -> Result<(ChunkHeader, Bytes), ChunkFetchError> {
    let mut accumulator = ChunkAccumulator::new();

    while let Some(chunk) = stream.next().await {
        accumulator.fold(chunk?)?;
    }

    Ok(accumulator.finish()?)
}

#[cfg(test)]
mod tests {
    use futures::{stream, StreamExt};
    use proptest::{collection::vec, prelude::*};

    use super::*;

    fn header(algorithm: &str, content_length: u32) -> Chunk {
        Chunk::Header(ChunkHeader {
            compression_algorithm: algorithm.to_string(),
            content_length,
            original_content_length: content_length,
        })
    }

    fn data(bytes: &'static [u8]) -> Chunk {
        Chunk::Data(Bytes::from_static(bytes))
    }

    fn fold_all(chunks: Vec<Chunk>) -> Result<(ChunkHeader, Bytes), ChunkStreamError> {
        let mut accumulator = ChunkAccumulator::new();
        for chunk in chunks {
            accumulator.fold(chunk)?;
        }
        accumulator.finish()
    }

    #[test]
    fn data_frames_concatenate_in_arrival_order() {
        let (header, payload) =
            fold_all(vec![header("", 6), data(b"abc"), data(b"d"), data(b"ef")]).unwrap();

        assert_eq!(header.content_length, 6);
        assert_eq!(payload, Bytes::from_static(b"abcdef"));
    }

    #[test]
    fn leading_data_frame_is_rejected() {
        let err = fold_all(vec![data(b"abc")]).unwrap_err();

        assert_eq!(err, ChunkStreamError::NoLeadingHeader);
        assert_eq!(err.to_string(), "did not start with a header");
    }

    #[test]
    fn second_header_is_rejected() {
        let err = fold_all(vec![header("", 3), header("", 3)]).unwrap_err();

        assert_eq!(err, ChunkStreamError::SecondHeader);
        assert_eq!(err.to_string(), "second header");
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let err = fold_all(vec![header("zstd", 3)]).unwrap_err();

        assert_eq!(err.to_string(), "unexpected algorithm: zstd");
    }

    #[test]
    fn empty_data_frame_is_rejected() {
        let err = fold_all(vec![header("", 3), data(b"")]).unwrap_err();

        assert_eq!(err, ChunkStreamError::EmptyDataFrame);
    }

    /// A header promising 10 bytes followed by 6 + 5 bytes of data must be
    /// rejected on the second frame.
    #[test]
    fn exceeding_content_length_is_rejected() {
        let err = fold_all(vec![header("", 10), data(b"abcdef"), data(b"ghijk")]).unwrap_err();

        assert_eq!(err, ChunkStreamError::ExceedingContentLength);
        assert_eq!(err.to_string(), "exceeding promised content length");
    }

    #[test]
    fn stream_without_header_is_rejected_at_termination() {
        let err = fold_all(vec![]).unwrap_err();

        assert_eq!(err, ChunkStreamError::MissingHeader);
        assert_eq!(err.to_string(), "did not receive a header");
    }

    #[test]
    fn missing_data_is_only_tolerated_for_empty_content() {
        assert_eq!(fold_all(vec![header("", 5)]).unwrap_err(), ChunkStreamError::NoData);

        let (_, payload) = fold_all(vec![header("", 0)]).unwrap();
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn assemble_surfaces_transport_errors() {
        let stream: ChunkStream = stream::iter(vec![
            Ok(header("", 4)),
            Err(TransportError::ConnectionClosed),
        ])
        .boxed();

        assert!(matches!(
            assemble(stream).await,
            Err(ChunkFetchError::Transport(TransportError::ConnectionClosed))
        ));
    }

    prop_compose! {
        fn chunk_strategy()(
            kind in 0_u8..4,
            length in 0_usize..32,
            content_length in 0_u32..64,
        ) -> Chunk {
            match kind {
                0 => Chunk::Header(ChunkHeader {
                    compression_algorithm: String::new(),
                    content_length,
                    original_content_length: content_length,
                }),
                1 => Chunk::Header(ChunkHeader {
                    compression_algorithm: "lz4".to_string(),
                    content_length,
                    original_content_length: content_length,
                }),
                _ => Chunk::Data(Bytes::from(vec![0_u8; length])),
            }
        }
    }

    proptest! {
        /// Folding an arbitrary frame sequence never panics, and an
        /// accepted fold never exceeds the promised content length.
        #[test]
        fn fold_never_panics(chunks in vec(chunk_strategy(), 0..16)) {
            if let Ok((header, payload)) = fold_all(chunks) {
                prop_assert!(payload.len() <= header.content_length as usize);
            }
        }
    }
}
