//! Gzip codec used to fit oversized plaintext under the key service limit.
//!
//! Compression level is fixed to [`Compression::best`]; callers cannot tune it.

use crate::error::{Result, SecretsError};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{ErrorKind, Read, Write};

/// Compress `content` at maximum level.
pub fn encode(content: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(content.len() / 2), Compression::best());
    encoder
        .write_all(content)
        .map_err(|e| SecretsError::io(format!("gzip encode: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| SecretsError::io(format!("gzip finish: {}", e)))
}

/// Decompress a gzip stream produced by [`encode`].
pub fn decode(content: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(content);
    let mut out = Vec::with_capacity(content.len() * 2);
    decoder.read_to_end(&mut out).map_err(|e| match e.kind() {
        ErrorKind::InvalidInput | ErrorKind::InvalidData | ErrorKind::UnexpectedEof => {
            SecretsError::format(format!("gzip decode: {}", e))
        }
        _ => SecretsError::io(format!("gzip decode: {}", e)),
    })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let data = b"some data";
        let encoded = encode(data).expect("encode");
        let decoded = decode(&encoded).expect("decode");
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_repetitive_input_shrinks() {
        let data = vec![b'a'; 64 * 1024];
        let encoded = encode(&data).expect("encode");
        assert!(encoded.len() < 1024, "got {} bytes", encoded.len());
        assert_eq!(decode(&encoded).expect("decode"), data);
    }

    #[test]
    fn test_empty_round_trip() {
        let encoded = encode(&[]).expect("encode");
        assert!(!encoded.is_empty(), "gzip header is always written");
        assert!(decode(&encoded).expect("decode").is_empty());
    }

    #[test]
    fn test_garbage_is_format_error() {
        let err = decode(b"definitely not a gzip stream").unwrap_err();
        assert!(matches!(err, SecretsError::Format(_)), "got {:?}", err);
    }
}
