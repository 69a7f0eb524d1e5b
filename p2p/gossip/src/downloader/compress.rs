//! The compression wrapper around chunked block payloads.
use galena_wire::{ChunkHeader, COMPRESSION_LZ4, COMPRESSION_NONE};

/// An error decompressing a transferred payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum DecompressError {
    #[error("unexpected algorithm: {0}")]
    UnexpectedAlgorithm(String),
    #[error("original content length {0} exceeds the lz4 block size limit")]
    OriginalLengthTooLarge(u32),
    #[error("lz4 decompression failed: {0}")]
    Lz4(String),
    #[error("decompressed to {got} bytes, expected {expected}")]
    WrongLength { got: usize, expected: usize },
}

/// Decompresses a transferred payload to exactly
/// `header.original_content_length` bytes.
///
/// With no compression the bytes are passed through untouched; the fold
/// already policed their length against the header.
pub(crate) fn decompress(header: &ChunkHeader, bytes: &[u8]) -> Result<Vec<u8>, DecompressError> {
    match header.compression_algorithm.as_str() {
        COMPRESSION_NONE => Ok(bytes.to_vec()),
        COMPRESSION_LZ4 => {
            let expected = header.original_content_length as usize;
            let capacity = i32::try_from(header.original_content_length)
                .map_err(|_| DecompressError::OriginalLengthTooLarge(header.original_content_length))?;

            let decompressed = lz4::block::decompress(bytes, Some(capacity))
                .map_err(|e| DecompressError::Lz4(e.to_string()))?;

            if decompressed.len() != expected {
                return Err(DecompressError::WrongLength {
                    got: decompressed.len(),
                    expected,
                });
            }

            Ok(decompressed)
        }
        other => Err(DecompressError::UnexpectedAlgorithm(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lz4_header(content_length: usize, original_content_length: usize) -> ChunkHeader {
        ChunkHeader {
            compression_algorithm: COMPRESSION_LZ4.to_string(),
            content_length: content_length.try_into().unwrap(),
            original_content_length: original_content_length.try_into().unwrap(),
        }
    }

    #[test]
    fn plain_payloads_pass_through() {
        let header = ChunkHeader {
            compression_algorithm: String::new(),
            content_length: 5,
            original_content_length: 5,
        };

        assert_eq!(decompress(&header, b"hello").unwrap(), b"hello");
    }

    #[test]
    fn lz4_round_trips() {
        let payload = b"a payload that compresses: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".repeat(4);
        let compressed = lz4::block::compress(&payload, None, false).unwrap();

        let header = lz4_header(compressed.len(), payload.len());

        assert_eq!(decompress(&header, &compressed).unwrap(), payload);
    }

    /// A declared original length that does not match the decompressed
    /// output, longer or shorter, fails the transfer.
    #[test]
    fn wrong_original_length_is_rejected() {
        let payload = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
        let compressed = lz4::block::compress(payload, None, false).unwrap();

        let header = lz4_header(compressed.len(), payload.len() + 1);

        assert!(matches!(
            decompress(&header, &compressed),
            Err(DecompressError::Lz4(_) | DecompressError::WrongLength { .. })
        ));
    }

    #[test]
    fn garbage_lz4_input_is_rejected() {
        let header = lz4_header(4, 100);

        assert!(matches!(
            decompress(&header, b"\xff\xff\xff\xff"),
            Err(DecompressError::Lz4(_) | DecompressError::WrongLength { .. })
        ));
    }
}
