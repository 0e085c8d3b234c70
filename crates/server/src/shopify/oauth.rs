//! OAuth callback verification.
//!
//! Shopify signs the callback query string: every parameter except `hmac`
//! and `signature`, sorted by key, joined as `k=v&k=v`, hex HMAC-SHA256
//! with the app secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verify the `hmac` parameter of an OAuth callback query.
#[must_use]
pub fn verify_query_hmac(params: &[(String, String)], secret: &str) -> bool {
    let Some(provided) = params
        .iter()
        .find(|(k, _)| k == "hmac")
        .map(|(_, v)| v.as_str())
    else {
        return false;
    };
    let Ok(provided) = hex::decode(provided) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(signing_message(params).as_bytes());
    mac.verify_slice(&provided).is_ok()
}

fn signing_message(params: &[(String, String)]) -> String {
    let mut pairs: Vec<&(String, String)> = params
        .iter()
        .filter(|(k, _)| k != "hmac" && k != "signature")
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SECRET: &str = "hush";

    fn sign(params: &[(String, String)]) -> String {
        let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(signing_message(params).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_signing_message_sorted_without_hmac() {
        let p = params(&[
            ("timestamp", "1337178173"),
            ("shop", "store.myshopify.com"),
            ("hmac", "ignored"),
            ("code", "0907a61c0c8d55e99db179b68161bc00"),
        ]);
        assert_eq!(
            signing_message(&p),
            "code=0907a61c0c8d55e99db179b68161bc00&shop=store.myshopify.com&timestamp=1337178173"
        );
    }

    #[test]
    fn test_verify_query_hmac_valid() {
        let mut p = params(&[
            ("code", "abc"),
            ("shop", "store.myshopify.com"),
            ("timestamp", "1700000000"),
        ]);
        let hmac = sign(&p);
        p.push(("hmac".to_string(), hmac));
        assert!(verify_query_hmac(&p, SECRET));
    }

    #[test]
    fn test_verify_query_hmac_tampered() {
        let mut p = params(&[("code", "abc"), ("shop", "store.myshopify.com")]);
        let hmac = sign(&p);
        p.push(("hmac".to_string(), hmac));
        p[0].1 = "other".to_string();
        assert!(!verify_query_hmac(&p, SECRET));
    }

    #[test]
    fn test_verify_query_hmac_missing_or_malformed() {
        let p = params(&[("code", "abc")]);
        assert!(!verify_query_hmac(&p, SECRET));

        let p = params(&[("code", "abc"), ("hmac", "zz-not-hex")]);
        assert!(!verify_query_hmac(&p, SECRET));
    }
}
