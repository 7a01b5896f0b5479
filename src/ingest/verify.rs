//! Webhook signature verification.
//!
//! The recording provider signs each delivery with HMAC-SHA256 over
//! `"{id}.{timestamp}.{body}"`, keyed by the base64 payload of a
//! `whsec_`-prefixed shared secret. Verification is a pure predicate:
//! no side effects, clock injected for testability.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Accepted skew between the signed timestamp and now, in seconds
const REPLAY_WINDOW_SEC: i64 = 300;

const SECRET_PREFIX: &str = "whsec_";

/// The three headers every signed delivery must carry
#[derive(Debug, Clone)]
pub struct WebhookHeaders {
    pub id: String,
    pub timestamp: String,
    pub signature: String,
}

/// Collect the required headers; None if any is absent or empty.
pub fn parse_webhook_headers(
    id: Option<&str>,
    timestamp: Option<&str>,
    signature: Option<&str>,
) -> Option<WebhookHeaders> {
    match (id, timestamp, signature) {
        (Some(id), Some(ts), Some(sig)) if !id.is_empty() && !ts.is_empty() && !sig.is_empty() => {
            Some(WebhookHeaders {
                id: id.to_string(),
                timestamp: ts.to_string(),
                signature: sig.to_string(),
            })
        }
        _ => None,
    }
}

/// Verify a delivery against the shared secret.
///
/// The signature header may hold multiple space-separated entries of the
/// form `"{version},{value}"`; the delivery is accepted if any entry's
/// value matches. Comparison is constant-time via `Mac::verify_slice`.
pub fn verify_signature(
    secret: &str,
    headers: &WebhookHeaders,
    raw_body: &str,
    now: DateTime<Utc>,
) -> bool {
    // Replay protection: reject anything outside the freshness window
    let ts_sec: i64 = match headers.timestamp.parse() {
        Ok(v) => v,
        Err(_) => return false,
    };
    if (now.timestamp() - ts_sec).abs() > REPLAY_WINDOW_SEC {
        return false;
    }

    let encoded_key = secret.strip_prefix(SECRET_PREFIX).unwrap_or(secret);
    let key = match BASE64.decode(encoded_key) {
        Ok(k) => k,
        Err(_) => return false,
    };

    let signed_content = format!("{}.{}.{}", headers.id, headers.timestamp, raw_body);

    headers.signature.split(' ').any(|entry| {
        // Entry format: "{version},{value}"; the value may itself contain commas
        let value = match entry.split_once(',') {
            Some((_, v)) => v,
            None => return false,
        };
        let candidate = match BASE64.decode(value) {
            Ok(c) => c,
            Err(_) => return false,
        };
        let mut mac = match HmacSha256::new_from_slice(&key) {
            Ok(m) => m,
            Err(_) => return false,
        };
        mac.update(signed_content.as_bytes());
        mac.verify_slice(&candidate).is_ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sign(secret: &str, id: &str, ts: &str, body: &str) -> String {
        let key = BASE64
            .decode(secret.strip_prefix(SECRET_PREFIX).unwrap())
            .unwrap();
        let mut mac = HmacSha256::new_from_slice(&key).unwrap();
        mac.update(format!("{id}.{ts}.{body}").as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }

    fn test_secret() -> String {
        format!("{}{}", SECRET_PREFIX, BASE64.encode(b"super secret key"))
    }

    #[test]
    fn test_valid_signature_accepted() {
        let secret = test_secret();
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let ts = now.timestamp().to_string();
        let sig = sign(&secret, "msg_1", &ts, r#"{"hello":true}"#);

        let headers = WebhookHeaders {
            id: "msg_1".into(),
            timestamp: ts,
            signature: format!("v1,{sig}"),
        };
        assert!(verify_signature(&secret, &headers, r#"{"hello":true}"#, now));
    }

    #[test]
    fn test_stale_timestamp_rejected_even_with_valid_signature() {
        let secret = test_secret();
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let stale = (now.timestamp() - REPLAY_WINDOW_SEC - 1).to_string();
        let sig = sign(&secret, "msg_1", &stale, "body");

        let headers = WebhookHeaders {
            id: "msg_1".into(),
            timestamp: stale,
            signature: format!("v1,{sig}"),
        };
        assert!(!verify_signature(&secret, &headers, "body", now));
    }

    #[test]
    fn test_future_timestamp_rejected() {
        let secret = test_secret();
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let future = (now.timestamp() + REPLAY_WINDOW_SEC + 10).to_string();
        let sig = sign(&secret, "msg_1", &future, "body");

        let headers = WebhookHeaders {
            id: "msg_1".into(),
            timestamp: future,
            signature: format!("v1,{sig}"),
        };
        assert!(!verify_signature(&secret, &headers, "body", now));
    }

    #[test]
    fn test_any_of_multiple_entries_matches() {
        let secret = test_secret();
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let ts = now.timestamp().to_string();
        let good = sign(&secret, "msg_1", &ts, "body");
        let bad = BASE64.encode(b"not the signature");

        let headers = WebhookHeaders {
            id: "msg_1".into(),
            timestamp: ts.clone(),
            signature: format!("v1,{bad} v1,{good}"),
        };
        assert!(verify_signature(&secret, &headers, "body", now));

        let headers = WebhookHeaders {
            id: "msg_1".into(),
            timestamp: ts,
            signature: format!("v1,{bad} v2,{bad}"),
        };
        assert!(!verify_signature(&secret, &headers, "body", now));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let secret = test_secret();
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let ts = now.timestamp().to_string();
        let sig = sign(&secret, "msg_1", &ts, "original body");

        let headers = WebhookHeaders {
            id: "msg_1".into(),
            timestamp: ts,
            signature: format!("v1,{sig}"),
        };
        assert!(!verify_signature(&secret, &headers, "tampered body", now));
    }

    #[test]
    fn test_non_numeric_timestamp_rejected() {
        let secret = test_secret();
        let now = Utc::now();
        let headers = WebhookHeaders {
            id: "msg_1".into(),
            timestamp: "soon".into(),
            signature: "v1,AAAA".into(),
        };
        assert!(!verify_signature(&secret, &headers, "body", now));
    }

    #[test]
    fn test_missing_headers_not_parsed() {
        assert!(parse_webhook_headers(Some("id"), Some("1"), None).is_none());
        assert!(parse_webhook_headers(Some("id"), None, Some("v1,x")).is_none());
        assert!(parse_webhook_headers(None, Some("1"), Some("v1,x")).is_none());
        assert!(parse_webhook_headers(Some(""), Some("1"), Some("v1,x")).is_none());
        assert!(parse_webhook_headers(Some("id"), Some("1"), Some("v1,x")).is_some());
    }
}
