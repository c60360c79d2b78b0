//! HMAC-SHA256 helpers for verifying Coinbase Commerce webhook deliveries.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `payload` under `secret`
pub fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Check a hex signature against the expected HMAC, comparing in constant time
pub fn verify_hex_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(expected) = hmac_sha256_hex(secret, payload) else {
        return false;
    };
    constant_time_eq(signature.trim().to_ascii_lowercase().as_bytes(), expected.as_bytes())
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
