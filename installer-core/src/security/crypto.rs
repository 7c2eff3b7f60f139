// Cryptographic utilities

use anyhow::Result;
use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};

/// Byte length of every generated application secret.
pub const SECRET_BYTES: usize = 32;

/// SHA-256 hex digest (lowercase).
pub fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    let digest = hasher.finalize();
    hex(&digest)
}

/// Compute a safe fingerprint for a secret (hash only; never log the raw secret).
pub fn secret_fingerprint(input: &str) -> String {
    let full = sha256_hex(input.as_bytes());
    format!("sha256:{}", &full[..12])
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| anyhow::anyhow!("System random source unavailable"))?;
    Ok(buf)
}

/// Application encryption key: `base64:` + base64(32 random bytes).
pub fn generate_app_key() -> Result<String> {
    let bytes = random_bytes::<SECRET_BYTES>()?;
    Ok(format!(
        "base64:{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    ))
}

/// Token-signing secret: hex(32 random bytes).
pub fn generate_jwt_secret() -> Result<String> {
    let bytes = random_bytes::<SECRET_BYTES>()?;
    Ok(hex(&bytes))
}

/// bcrypt cost; the same default PHP's `password_hash` uses.
pub const BCRYPT_COST: u32 = 10;

/// Hash an account password as a `$2y$` bcrypt string, the format the application's
/// default hasher verifies. Input beyond 72 bytes is ignored by the algorithm.
pub fn hash_password(plaintext: &str) -> Result<String> {
    let parts = bcrypt::hash_with_result(plaintext, BCRYPT_COST)
        .map_err(|e| anyhow::anyhow!("Password hashing failed: {}", e))?;
    Ok(parts.format_for_version(bcrypt::Version::TwoY))
}

pub fn verify_password(plaintext: &str, hash: &str) -> bool {
    bcrypt::verify(plaintext, hash).unwrap_or(false)
}
