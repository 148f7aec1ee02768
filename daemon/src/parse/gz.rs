//! Gzip decompression of downloaded replication artifacts.

use std::io::Read;

use flate2::read::GzDecoder;

use crate::domain::Error;

/// Inflate a gzip-compressed artifact fully into memory.
///
/// Replication files are small (tens of kilobytes compressed), so the
/// whole document is inflated before parsing rather than streamed.
///
/// # Errors
///
/// Returns a decode error when the payload is not valid gzip.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut decoder = GzDecoder::new(data);
    let mut output = Vec::with_capacity(data.len().saturating_mul(8));
    decoder
        .read_to_end(&mut output)
        .map_err(|err| Error::decode(format!("gunzip failed: {err}")))?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    #[test]
    fn round_trips_a_payload() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"<osmChange/>").expect("encode");
        let compressed = encoder.finish().expect("finish");

        let inflated = decompress(&compressed).expect("valid gzip");
        assert_eq!(inflated, b"<osmChange/>");
    }

    #[test]
    fn rejects_plain_bytes() {
        assert!(decompress(b"definitely not gzip").is_err());
    }
}
