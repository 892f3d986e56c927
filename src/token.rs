//! Token secret codec: mint, prefix, hash.
//!
//! Secrets have the textual form `pg_<64 lowercase hex chars>` (67 bytes).
//! Only the SHA-256 hash of the full secret is ever persisted; the plaintext
//! exists exactly once, at mint time.

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const SECRET_PREFIX: &str = "pg_";
pub const SECRET_LEN: usize = 67;
pub const PREFIX_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("system RNG unavailable: {0}")]
    Rng(#[from] rand::Error),
}

/// Mint a fresh full secret from 32 cryptographically random bytes.
pub fn mint() -> Result<String, TokenError> {
    let mut bytes = [0u8; 32];
    OsRng.try_fill_bytes(&mut bytes)?;
    let mut secret = String::with_capacity(SECRET_LEN);
    secret.push_str(SECRET_PREFIX);
    for byte in bytes {
        secret.push_str(&format!("{:02x}", byte));
    }
    Ok(secret)
}

/// First 8 characters of the secret (`pg_` + 5 hex), stored for display.
pub fn prefix(secret: &str) -> &str {
    &secret[..PREFIX_LEN.min(secret.len())]
}

/// Lowercase hex SHA-256 over the full secret text. Deterministic; this is
/// the lookup key for authentication.
pub fn hash(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Whether `secret` matches `pg_[0-9a-f]{64}` exactly.
pub fn is_well_formed(secret: &str) -> bool {
    secret.len() == SECRET_LEN
        && secret.starts_with(SECRET_PREFIX)
        && secret.as_bytes()[SECRET_PREFIX.len()..]
            .iter()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
