//! Digest helpers. Signing secrets are only ever identified in logs and CLI
//! output by a digest prefix, never by value.

use sha2::{Digest, Sha256};

/// Returns the hexadecimal representation of a SHA-256 digest.
pub fn sha256_hex(data: &[u8]) -> String {
    let digest: [u8; 32] = Sha256::digest(data).into();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// First `len` hex characters of the SHA-256 digest of `data`.
pub fn fingerprint(data: &[u8], len: usize) -> String {
    let mut hex = sha256_hex(data);
    hex.truncate(len.min(hex.len()));
    hex
}
