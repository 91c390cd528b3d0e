//! Cryptographic utilities for webhook verification.
//!
//! Both payment providers sign webhooks with HMAC-SHA256 and send the
//! hex-encoded digest in a header; this module holds the shared primitives.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 and return the lower-case hex digest (64 characters).
///
/// # Panics
///
/// Never panics in practice: HMAC-SHA256 accepts keys of any size per RFC 2104.
#[must_use]
pub fn hmac_sha256_hex(secret: &str, message: &str) -> String {
    // INVARIANT: `new_from_slice` only fails for fixed-size-key MACs.
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC-SHA256 accepts any key size");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Check a hex signature against the HMAC of `message`, ignoring case.
#[must_use]
pub fn verify_hmac_sha256_hex(secret: &str, message: &str, signature: &str) -> bool {
    let expected = hmac_sha256_hex(secret, message);
    constant_time_eq(&expected, &signature.trim().to_ascii_lowercase())
}

/// Constant-time string comparison to prevent timing attacks.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}
