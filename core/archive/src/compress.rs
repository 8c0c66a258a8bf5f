//! Gzip layer between the tar stream and the encryption envelope.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use targpg_common::{Error, Result};

/// Gzip level used when none is configured.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Gzip-compress `data` at `level` (0-9).
pub fn compress(data: &[u8], level: u32) -> Result<Vec<u8>> {
    if level > 9 {
        return Err(Error::InvalidInput(format!(
            "Compression level must be between 0 and 9, got {}",
            level
        )));
    }

    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::new(level));
    encoder
        .write_all(data)
        .map_err(|e| Error::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| Error::Compression(e.to_string()))
}

/// Decompress a gzip stream.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 2);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::Compression(e.to_string()))?;
    Ok(out)
}
