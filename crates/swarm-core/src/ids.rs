//! Session-scoped identifier generation.

use sha2::{Digest, Sha256};

/// Eight lowercase hex characters derived from a fresh ULID.
///
/// Used as the per-session suffix of instance ids and for shortening
/// repository paths in worktree directory names.
pub fn short_hex() -> String {
    let seed = ulid::Ulid::new().to_string();
    hex_prefix(seed.as_bytes())
}

/// Eight lowercase hex characters of the SHA-256 of `data`.
///
/// Deterministic for a given input, so the same repository path always maps
/// to the same external directory name.
pub fn hex_prefix(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().take(4).map(|b| format!("{b:02x}")).collect()
}

/// Instance id of the form `<name>_<8 hex>`, minted once per session.
pub fn instance_id(name: &str) -> String {
    format!("{}_{}", name, short_hex())
}
