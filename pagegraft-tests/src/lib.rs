//! Shared helpers for the pagegraft scenario tests.

use flate2::Compression;
use flate2::write::{ZlibDecoder, ZlibEncoder};
use hayro_syntax::Pdf;
use std::io::Write;
use std::sync::Arc;

/// Flate-compress a payload the way a PDF producer would.
pub fn flate(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(6));
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Inflate a Flate-compressed payload.
pub fn inflate(data: &[u8]) -> Vec<u8> {
    let mut decoder = ZlibDecoder::new(Vec::new());
    decoder.write_all(data).unwrap();
    decoder.finish().unwrap()
}

/// Parse an in-memory document.
pub fn parse(data: Vec<u8>) -> Pdf {
    Pdf::new(Arc::new(data)).unwrap()
}

/// Count the occurrences of `needle` in `haystack`.
pub fn count_occurrences(haystack: &[u8], needle: &[u8]) -> usize {
    haystack
        .windows(needle.len())
        .filter(|window| *window == needle)
        .count()
}
