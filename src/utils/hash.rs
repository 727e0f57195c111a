//! Content hashing.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 of a string, as lowercase hex.
pub fn sha256_str(content: &str) -> String {
    sha256_bytes(content.as_bytes())
}

/// Compute the SHA-256 of a byte slice, as lowercase hex.
pub fn sha256_bytes(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{:x}", digest)
}

/// Extract the first SHA-256 hex digest found in command output.
pub fn parse_sha256(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .find(|token| token.len() == 64 && token.chars().all(|c| c.is_ascii_hexdigit()))
        .map(|token| token.to_lowercase())
}
