//! Content hashing for change bookkeeping.
//!
//! The digest is stored on each file record. Append mode deliberately does
//! not consult it when deciding whether to skip an already-present path; see
//! the append semantics in [`crate::indexer`].

use sha2::{Digest, Sha256};

/// SHA-256 of the content, rendered as lowercase hex.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
