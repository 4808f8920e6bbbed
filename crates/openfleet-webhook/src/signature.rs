//! `X-Hub-Signature-256` verification (spec §4.8 step 2, §6.2).

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verifies `header_value` (`sha256=<hex>`) against an HMAC-SHA256 of
/// `body` keyed by `secret`. Comparison is constant-time via
/// [`Mac::verify_slice`]; any malformed input (missing prefix, bad hex)
/// is a mismatch rather than an error.
pub fn verify_signature(secret: &str, body: &[u8], header_value: &str) -> bool {
    let Some(hex_sig) = header_value.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&sig_bytes).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmac::Mac;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_signature_verifies() {
        let body = br#"{"hello":"world"}"#;
        let header = sign("topsecret", body);
        assert!(verify_signature("topsecret", body, &header));
    }

    #[test]
    fn tampered_body_fails_verification() {
        let body = br#"{"hello":"world"}"#;
        let header = sign("topsecret", body);
        assert!(!verify_signature("topsecret", b"{\"hello\":\"mallory\"}", &header));
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let body = br#"{"hello":"world"}"#;
        let header = sign("topsecret", body);
        assert!(!verify_signature("wrong", body, &header));
    }

    #[test]
    fn missing_prefix_is_a_mismatch_not_a_panic() {
        assert!(!verify_signature("topsecret", b"body", "not-a-signature"));
    }
}
