use rand::Rng;
use sha2::{Digest, Sha256};

/// Generate a session token. Returns `(full_token, sha256_hash)`.
/// Format: `fok_st_` + 32 random bytes hex-encoded.
pub fn generate_session_token() -> (String, String) {
    let raw = random_hex(32);
    let full_token = format!("fok_st_{raw}");
    let hash = hash_token(&full_token);
    (full_token, hash)
}

/// SHA-256 hex digest of a token string.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Extract the first 8 chars after `fok_st_` for display/identification.
pub fn token_prefix(full_token: &str) -> String {
    full_token
        .strip_prefix("fok_st_")
        .map(|rest| rest.chars().take(8).collect())
        .unwrap_or_default()
}

/// Generate `n` random bytes and return as hex string.
fn random_hex(n: usize) -> String {
    let bytes: Vec<u8> = (0..n).map(|_| rand::thread_rng().r#gen::<u8>()).collect();
    hex::encode(&bytes)
}
