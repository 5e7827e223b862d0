//! Zstd compression with thread-local context reuse.
//!
//! Grounded on `dashflow-streaming::compression`: a fresh
//! `zstd::bulk::Compressor`/`Decompressor` per call measurably costs more
//! than reusing one per thread, so each thread keeps its own in a
//! `thread_local!` `RefCell`. Safe across `.await` points because every
//! borrow is confined to the synchronous closure passed to `.with`.

use crate::error::Error;
use std::cell::RefCell;

thread_local! {
    static ENCODER_POOL: RefCell<Option<Result<zstd::bulk::Compressor<'static>, String>>> =
        const { RefCell::new(None) };
    static DECODER_POOL: RefCell<Option<Result<zstd::bulk::Decompressor<'static>, String>>> =
        const { RefCell::new(None) };
}

/// Default maximum decompressed size (16 MiB); shadow-buffered batches
/// are never expected to approach this.
pub const DEFAULT_MAX_DECOMPRESSED_SIZE: usize = 16 * 1024 * 1024;

/// Compress `data` at `level` (1-21; spec §4.3 "compressed at a
/// configurable level").
pub fn compress(data: &[u8], level: i32) -> crate::error::Result<Vec<u8>> {
    ENCODER_POOL.with(|pool| {
        let mut pool = pool.borrow_mut();
        let compressor_result =
            pool.get_or_insert_with(|| zstd::bulk::Compressor::new(level).map_err(|e| e.to_string()));
        let compressor = match compressor_result {
            Ok(c) => c,
            Err(e) => return Err(Error::Canonicalization(format!("zstd compressor init: {e}"))),
        };
        if compressor.set_compression_level(level).is_err() {
            // Keep using the previously configured level rather than failing.
        }
        compressor
            .compress(data)
            .map_err(|e| Error::Canonicalization(format!("zstd compress: {e}")))
    })
}

/// Decompress `data`, rejecting output larger than `max_size` to guard
/// against decompression bombs.
pub fn decompress(data: &[u8], max_size: usize) -> crate::error::Result<Vec<u8>> {
    DECODER_POOL.with(|pool| {
        let mut pool = pool.borrow_mut();
        let decompressor_result =
            pool.get_or_insert_with(|| zstd::bulk::Decompressor::new().map_err(|e| e.to_string()));
        let decompressor = match decompressor_result {
            Ok(d) => d,
            Err(e) => return Err(Error::Canonicalization(format!("zstd decompressor init: {e}"))),
        };
        decompressor
            .decompress(data, max_size)
            .map_err(|e| Error::Canonicalization(format!("zstd decompress: {e}")))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let data = b"shadow buffer payload".repeat(64);
        let compressed = compress(&data, 3).unwrap();
        assert!(compressed.len() < data.len());
        let decompressed = decompress(&compressed, DEFAULT_MAX_DECOMPRESSED_SIZE).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn decompress_respects_size_limit() {
        let data = b"x".repeat(1024);
        let compressed = compress(&data, 3).unwrap();
        assert!(decompress(&compressed, 16).is_err());
    }
}
