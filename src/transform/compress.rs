use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::error::{AppError, Result};

/// Fixed gzip level (zlib default)
const LEVEL: u32 = 6;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Compress a payload into a single gzip member
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 32), Compression::new(LEVEL));
    encoder.write_all(data)?;
    let compressed = encoder.finish()?;
    Ok(compressed)
}

/// Decompress a gzip payload produced by [`compress`]
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < GZIP_MAGIC.len() || data[..2] != GZIP_MAGIC {
        return Err(AppError::InvalidFormat(
            "payload is not a gzip stream".to_string(),
        ));
    }

    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 2);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| AppError::InvalidFormat(format!("corrupt gzip stream: {}", e)))?;

    // `compress` emits exactly one member and nothing after it
    let rest = decoder.into_inner();
    if !rest.is_empty() {
        return Err(AppError::InvalidFormat(format!(
            "{} unexpected bytes after gzip stream",
            rest.len()
        )));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let inputs: [&[u8]; 4] = [
            b"",
            b"helloworld",
            &[0u8; 4096],
            "ünïcödé payload with some repetition repetition repetition".as_bytes(),
        ];
        for input in inputs {
            let packed = compress(input).unwrap();
            assert_eq!(decompress(&packed).unwrap(), input);
        }
    }

    #[test]
    fn test_deterministic() {
        let data = b"the same bytes twice";
        assert_eq!(compress(data).unwrap(), compress(data).unwrap());
    }

    #[test]
    fn test_tiny_input_may_grow() {
        // gzip header + trailer outweigh the savings on 10 bytes
        let packed = compress(b"helloworld").unwrap();
        assert!(packed.len() > 10);
        assert_eq!(&packed[..2], &GZIP_MAGIC);
    }

    #[test]
    fn test_rejects_non_gzip() {
        assert!(matches!(decompress(b""), Err(AppError::InvalidFormat(_))));
        assert!(matches!(
            decompress(b"plain text"),
            Err(AppError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_rejects_trailing_garbage() {
        let mut packed = compress(b"helloworld").unwrap();
        packed.extend_from_slice(b"JUNKJUNK");
        assert!(matches!(decompress(&packed), Err(AppError::InvalidFormat(_))));

        // A second member is still not something `compress` produced
        let mut doubled = compress(b"hello").unwrap();
        doubled.extend(compress(b"world").unwrap());
        assert!(matches!(decompress(&doubled), Err(AppError::InvalidFormat(_))));
    }

    #[test]
    fn test_rejects_truncated_stream() {
        let packed = compress(b"some payload that is long enough to truncate").unwrap();
        let truncated = &packed[..packed.len() - 6];
        assert!(matches!(
            decompress(truncated),
            Err(AppError::InvalidFormat(_))
        ));
    }
}
