//! Cryptographic utilities for webhook verification.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 of `message` and return it hex-encoded (64 characters).
///
/// Returns `None` only if the MAC rejects the key, which HMAC-SHA256 does not
/// do for any key length.
#[must_use]
pub fn hmac_sha256_hex(secret: &[u8], message: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(message);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Check a hex signature of `message` under `secret`.
///
/// Accepts upper- or lower-case hex and an optional `sha256=` prefix.
#[must_use]
pub fn verify_hmac_sha256(secret: &[u8], message: &[u8], signature: &str) -> bool {
    let signature = signature.trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    hmac_sha256_hex(secret, message)
        .is_some_and(|expected| constant_time_eq(&expected, &signature.to_ascii_lowercase()))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_matches_known_vector() {
        // RFC 4231 test case 2.
        let result = hmac_sha256_hex(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            result,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn verify_accepts_prefix_and_case() {
        let body = br#"{"transaction_id":"x","status":"success"}"#;
        let signature = hmac_sha256_hex(b"whsec", body).unwrap();

        assert!(verify_hmac_sha256(b"whsec", body, &signature));
        assert!(verify_hmac_sha256(b"whsec", body, &format!("sha256={signature}")));
        assert!(verify_hmac_sha256(b"whsec", body, &signature.to_ascii_uppercase()));
    }

    #[test]
    fn verify_rejects_tampering() {
        let body = b"payload";
        let signature = hmac_sha256_hex(b"whsec", body).unwrap();

        assert!(!verify_hmac_sha256(b"other", body, &signature));
        assert!(!verify_hmac_sha256(b"whsec", b"payload!", &signature));
        assert!(!verify_hmac_sha256(b"whsec", body, ""));
    }

    #[test]
    fn constant_time_eq_compares_contents_and_length() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(constant_time_eq("", ""));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
    }
}
