//! CRC32 checksum helpers shared by the chunk store and backup coordinator.
//!
//! Every persisted artifact that matters (chunk files, backup snapshots) carries
//! a CRC32 (IEEE polynomial) checksum that is validated on read. A mismatch is
//! surfaced as corruption, never ignored.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crc32fast::Hasher;

/// Computes a CRC32 checksum over the provided bytes.
///
/// Deterministic: the same input always produces the same output.
pub fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Verifies that the computed checksum matches the expected checksum.
pub fn verify_checksum(data: &[u8], expected: u32) -> bool {
    compute_checksum(data) == expected
}

/// Computes the CRC32 checksum of an entire file, reading in 8 KiB slabs.
pub fn compute_file_checksum(path: &Path) -> std::io::Result<u32> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Hasher::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

/// Formats a checksum as `crc32:xxxxxxxx` (lowercase hex, zero-padded).
pub fn format_checksum(checksum: u32) -> String {
    format!("crc32:{:08x}", checksum)
}

/// Parses a `crc32:xxxxxxxx` string back into the raw checksum value.
pub fn parse_checksum(formatted: &str) -> Option<u32> {
    let hex = formatted.strip_prefix("crc32:")?;
    u32::from_str_radix(hex, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_deterministic() {
        let data = b"chunk payload";
        assert_eq!(compute_checksum(data), compute_checksum(data));
    }

    #[test]
    fn checksum_detects_flipped_bit() {
        let mut data = vec![1u8, 2, 3, 4, 5];
        let original = compute_checksum(&data);
        data[2] ^= 0x01;
        assert_ne!(original, compute_checksum(&data));
    }

    #[test]
    fn format_round_trips() {
        let formatted = format_checksum(0xDEADBEEF);
        assert_eq!(formatted, "crc32:deadbeef");
        assert_eq!(parse_checksum(&formatted), Some(0xDEADBEEF));
    }

    #[test]
    fn parse_rejects_other_schemes() {
        assert_eq!(parse_checksum("sha256:deadbeef"), None);
    }
}
