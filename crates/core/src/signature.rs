use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Prefix accepted (and produced) on signature headers.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Hex-encoded HMAC-SHA256 of `body` keyed with `secret`.
#[must_use]
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Check a webhook signature, with or without the `sha256=` prefix.
///
/// The comparison runs in constant time.
#[must_use]
pub fn verify(secret: &str, body: &[u8], signature: &str) -> bool {
    let provided = signature
        .trim()
        .strip_prefix(SIGNATURE_PREFIX)
        .unwrap_or_else(|| signature.trim());
    let Ok(provided) = hex::decode(provided) else {
        return false;
    };
    let expected = {
        let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(body);
        mac.finalize().into_bytes()
    };
    expected.as_slice().ct_eq(&provided).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify() {
        let body = br#"{"policyId":"p-1"}"#;
        let sig = sign("s3cret", body);
        assert_eq!(sig.len(), 64);
        assert!(verify("s3cret", body, &sig));
        assert!(verify("s3cret", body, &format!("{SIGNATURE_PREFIX}{sig}")));
    }

    #[test]
    fn rejects_wrong_secret_body_or_garbage() {
        let body = b"payload";
        let sig = sign("s3cret", body);
        assert!(!verify("other", body, &sig));
        assert!(!verify("s3cret", b"tampered", &sig));
        assert!(!verify("s3cret", body, "not-hex"));
        assert!(!verify("s3cret", body, &sig[..10]));
    }
}
