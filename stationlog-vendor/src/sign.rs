//! Request signing for the vendor cloud API.
//!
//! The signature is HMAC-SHA256 over the canonical parameter string
//! `k=v&k=v…`, built from the request parameters plus `accessKey`, `nonce`
//! and `timestamp`, sorted by key. The result is lower-case hex.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Shared access key / secret pair issued by the vendor.
#[derive(Clone)]
pub struct Credentials {
    access_key: String,
    secret_key: String,
}

/// Header values attached to every signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub access_key: String,
    pub nonce: String,
    pub timestamp: String,
    pub sign: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    /// Signs `params` together with the access key, nonce and timestamp.
    ///
    /// `params` must only contain the parameters that take part in the
    /// signature, which is not always everything sent on the wire.
    pub fn sign_request(&self, params: &[(&str, &str)], nonce: &str, timestamp: &str) -> SignedHeaders {
        let mut all: BTreeMap<&str, &str> = params.iter().copied().collect();
        all.insert("accessKey", &self.access_key);
        all.insert("nonce", nonce);
        all.insert("timestamp", timestamp);

        let sign = hmac_hex(&self.secret_key, &canonical_string(&all));

        SignedHeaders {
            access_key: self.access_key.clone(),
            nonce: nonce.to_owned(),
            timestamp: timestamp.to_owned(),
            sign,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Joins already-sorted parameters as `k=v&k=v`.
pub fn canonical_string(params: &BTreeMap<&str, &str>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn hmac_hex(secret: &str, message: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials::new("ak-test", "sk-test")
    }

    #[test]
    fn canonical_string_sorts_keys() {
        let params: BTreeMap<&str, &str> =
            [("timestamp", "3"), ("accessKey", "a"), ("nonce", "2"), ("sn", "X1")]
                .into_iter()
                .collect();

        assert_eq!(
            canonical_string(&params),
            "accessKey=a&nonce=2&sn=X1&timestamp=3"
        );
    }

    #[test]
    fn signature_is_deterministic() {
        let a = credentials().sign_request(&[("sn", "R331")], "123456", "1700000000000");
        let b = credentials().sign_request(&[("sn", "R331")], "123456", "1700000000000");

        assert_eq!(a, b);
        assert_eq!(a.sign.len(), 64);
        assert!(a.sign.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signature_changes_with_any_parameter() {
        let base = credentials()
            .sign_request(&[("sn", "R331")], "123456", "1700000000000")
            .sign;

        let other_param = credentials()
            .sign_request(&[("sn", "R332")], "123456", "1700000000000")
            .sign;
        let other_nonce = credentials()
            .sign_request(&[("sn", "R331")], "123457", "1700000000000")
            .sign;
        let other_time = credentials()
            .sign_request(&[("sn", "R331")], "123456", "1700000000001")
            .sign;
        let other_key = Credentials::new("ak-other", "sk-test")
            .sign_request(&[("sn", "R331")], "123456", "1700000000000")
            .sign;

        for sign in [other_param, other_nonce, other_time, other_key] {
            assert_ne!(sign, base);
        }
    }

    #[test]
    fn signature_matches_manual_hmac() {
        let signed = credentials().sign_request(&[], "111111", "42");
        let expected = hmac_hex("sk-test", "accessKey=ak-test&nonce=111111&timestamp=42");

        assert_eq!(signed.sign, expected);
    }

    #[test]
    fn debug_redacts_secret() {
        let debug = format!("{:?}", credentials());
        assert!(!debug.contains("sk-test"));
    }
}
