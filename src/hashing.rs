//! Stable content hashes for files and runs
//!
//! File hashes are computed over metadata only (name, size, timestamps) —
//! cheap, and sufficient to detect a meaningful change without reading file
//! contents. Run hashes fold the contained file hashes in sorted order so
//! the result is independent of discovery order.

use sha2::{Digest, Sha256};

/// Hash a file's identity: SHA-256 over filename ⊕ size ⊕ ctime ⊕ mtime.
///
/// Timestamps are expected in the canonical `YYYY-MM-DD HH:MM:SS` form
/// (see [`crate::paths::normalize_time`]). Returns 64 lowercase hex chars.
pub fn file_hash(
    filename: &str,
    filesize: u64,
    creation_time: &str,
    modification_time: &str,
) -> String {
    let input = format!("{filename}{filesize}{creation_time}{modification_time}");
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// Hash a run: SHA-256 over run_location ⊕ ctime ⊕ mtime ⊕ H(sorted file hashes).
///
/// Sorting the file hashes before the inner digest makes the result
/// invariant under permutation of `file_hashes`.
pub fn run_hash(
    run_location: &str,
    creation_time: &str,
    last_modification_time: &str,
    file_hashes: &[String],
) -> String {
    let mut sorted: Vec<&str> = file_hashes.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let files_digest = format!("{:x}", Sha256::digest(sorted.concat().as_bytes()));

    let input = format!("{run_location}{creation_time}{last_modification_time}{files_digest}");
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// Short hex digest used for bounded-length derived keys (lock keys).
pub fn short_hash(input: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(input.as_bytes()));
    digest[..12].to_string()
}
