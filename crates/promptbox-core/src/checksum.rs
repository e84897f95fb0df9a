//! Content fingerprinting shared with the remote store.
//!
//! Client and server compute the checksum independently and must agree
//! bit-for-bit, so everything here is a pure function of its input.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Length of a hex-encoded SHA-256 digest.
pub const CHECKSUM_LEN: usize = 64;

/// Canonical encoding of the hashed fields. Keys are emitted in
/// lexicographic order (`content`, `title`).
#[derive(Serialize)]
struct CanonicalPrompt<'a> {
    content: &'a str,
    title: &'a str,
}

/// Normalize text before hashing.
///
/// Trims surrounding whitespace, converts CRLF to LF and strips trailing
/// whitespace from every line.
pub fn normalize(text: &str) -> String {
    text.replace("\r\n", "\n")
        .trim()
        .split('\n')
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Compute the content checksum of a title/content pair.
///
/// Returns exactly 64 lowercase hex characters.
pub fn checksum(title: &str, content: &str) -> String {
    let title = normalize(title);
    let content = normalize(content);
    let canonical = CanonicalPrompt {
        content: &content,
        title: &title,
    };
    // Serializing two borrowed strings cannot fail.
    let encoded = serde_json::to_vec(&canonical).unwrap_or_default();
    format!("{:x}", Sha256::digest(&encoded))
}

/// Case-insensitive checksum comparison.
pub fn checksums_match(left: &str, right: &str) -> bool {
    left.eq_ignore_ascii_case(right)
}

/// Whether `value` looks like a hex SHA-256 digest.
pub fn is_valid_checksum(value: &str) -> bool {
    value.len() == CHECKSUM_LEN && value.chars().all(|c| c.is_ascii_hexdigit())
}
