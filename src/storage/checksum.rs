//! CRC32 checksum over the serialized store contents
//!
//! Uses CRC32 (IEEE polynomial). Verified on every load.

use crc32fast::Hasher;

/// Computes a CRC32 checksum over the provided data.
pub fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Verifies that the computed checksum matches the expected checksum.
pub fn verify_checksum(data: &[u8], expected: u32) -> bool {
    compute_checksum(data) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_deterministic() {
        let data = br#"{"wkeydb/keystore/node-A":{"status":"enabled"}}"#;
        assert_eq!(compute_checksum(data), compute_checksum(data));
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let mut data = b"keystore entries".to_vec();
        let original = compute_checksum(&data);
        data[3] ^= 0x01;
        assert!(!verify_checksum(&data, original));
    }
}
