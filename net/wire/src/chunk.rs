//! Chunked block transfer frames.
//!
//! A block transfer is a sequence of [`Chunk`] frames: exactly one
//! [`Chunk::Header`] first, then one or more [`Chunk::Data`] frames whose
//! byte lengths sum to the header's `content_length`.
use bytes::Bytes;

/// The identifier of the "no compression" algorithm.
pub const COMPRESSION_NONE: &str = "";

/// The identifier of the LZ4 block compression algorithm.
pub const COMPRESSION_LZ4: &str = "lz4";

/// The leading frame of a chunked block transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeader {
    /// The compression algorithm applied to the transferred bytes,
    /// [`COMPRESSION_NONE`] or [`COMPRESSION_LZ4`].
    pub compression_algorithm: String,
    /// The number of bytes transferred over the wire, i.e. the sum of all
    /// the data frames' lengths.
    pub content_length: u32,
    /// The size of the payload after decompression.
    ///
    /// Equal to `content_length` when no compression is applied.
    pub original_content_length: u32,
}

impl ChunkHeader {
    /// Returns whether the transferred bytes are compressed.
    pub fn is_compressed(&self) -> bool {
        self.compression_algorithm != COMPRESSION_NONE
    }
}

/// A single frame of a chunked block transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// The first frame, describing the transfer.
    Header(ChunkHeader),
    /// A frame of payload bytes.
    Data(Bytes),
}

impl Chunk {
    /// Builds a header frame with no compression, for a payload of
    /// `length` bytes.
    pub fn plain_header(length: u32) -> Self {
        Self::Header(ChunkHeader {
            compression_algorithm: String::new(),
            content_length: length,
            original_content_length: length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_headers_are_uncompressed() {
        let Chunk::Header(header) = Chunk::plain_header(42) else {
            panic!("plain_header must build a header frame");
        };

        assert!(!header.is_compressed());
        assert_eq!(header.content_length, 42);
        assert_eq!(header.original_content_length, 42);
    }

    #[test]
    fn lz4_headers_are_compressed() {
        let header = ChunkHeader {
            compression_algorithm: COMPRESSION_LZ4.to_string(),
            content_length: 10,
            original_content_length: 40,
        };

        assert!(header.is_compressed());
    }
}
