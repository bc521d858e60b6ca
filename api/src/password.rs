use sha2::{Digest, Sha256};

/// Deterministic one-way digest of a password, hex-encoded.
///
/// The store authenticates by exact (login, digest) equality, so the digest
/// has to be stable across processes and restarts.
pub fn digest(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}
