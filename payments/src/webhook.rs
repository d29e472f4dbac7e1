//! Webhook signature verification and event parsing.
//!
//! The gateway signs every delivery with a header of the form
//! `t=<unix seconds>,v1=<hex hmac-sha256>`, where the MAC covers the string
//! `"{t}.{raw body}"`. Nothing in the payload is trusted until the signature
//! checks out and the timestamp is inside the tolerance window.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Event type the order workflow finalizes on. Everything else is
/// acknowledged and ignored.
pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

/// Maximum accepted age of a signed timestamp, in seconds.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("missing signature header")]
    MissingSignature,

    #[error("malformed signature header")]
    MalformedSignature,

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("signed timestamp outside tolerance window")]
    StaleTimestamp,

    #[error("malformed event payload: {0}")]
    Payload(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: EventData,
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    pub object: SessionObject,
}

#[derive(Debug, Deserialize)]
pub struct SessionObject {
    #[serde(default)]
    pub metadata: EventMetadata,
}

#[derive(Debug, Deserialize, Default)]
pub struct EventMetadata {
    pub order_id: Option<String>,
    pub user_id: Option<String>,
}

/// Verify the signature header against `secret` and parse the event
/// envelope. `now` is the verifier's clock in unix seconds; deliveries whose
/// signed timestamp differs by more than `tolerance_secs` are rejected even
/// when the MAC is valid, to bound replay.
pub fn verify_and_parse(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
    now: i64,
    tolerance_secs: i64,
) -> Result<Event, WebhookError> {
    let (timestamp, signature) = parse_header(signature_header)?;

    if (now - timestamp).abs() > tolerance_secs {
        return Err(WebhookError::StaleTimestamp);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::MalformedSignature)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    mac.verify_slice(&signature)
        .map_err(|_| WebhookError::SignatureMismatch)?;

    Ok(serde_json::from_slice(payload)?)
}

/// Compute the signature header for `payload` at `timestamp`. Counterpart of
/// [`verify_and_parse`], used to exercise the verifier and by tooling that
/// simulates gateway deliveries.
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    let digest = mac.finalize().into_bytes();
    format!("t={timestamp},v1={}", hex::encode(digest))
}

fn parse_header(header: &str) -> Result<(i64, Vec<u8>), WebhookError> {
    if header.is_empty() {
        return Err(WebhookError::MissingSignature);
    }

    let mut timestamp = None;
    let mut signature = None;

    for part in header.split(',') {
        match part.split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signature = hex::decode(value).ok(),
            _ => {}
        }
    }

    match (timestamp, signature) {
        (Some(t), Some(s)) => Ok((t, s)),
        _ => Err(WebhookError::MalformedSignature),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";

    fn completed_event() -> Vec<u8> {
        serde_json::json!({
            "id": "evt_001",
            "type": CHECKOUT_COMPLETED,
            "data": {
                "object": {
                    "metadata": { "order_id": "ord_1", "user_id": "usr_1" }
                }
            }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn test_sign_then_verify() {
        let payload = completed_event();
        let header = sign(&payload, SECRET, 1_700_000_000);

        let event =
            verify_and_parse(&payload, &header, SECRET, 1_700_000_010, DEFAULT_TOLERANCE_SECS)
                .unwrap();

        assert_eq!(event.id, "evt_001");
        assert_eq!(event.kind, CHECKOUT_COMPLETED);
        assert_eq!(event.data.object.metadata.user_id.as_deref(), Some("usr_1"));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let payload = completed_event();
        let header = sign(&payload, SECRET, 1_700_000_000);

        let mut tampered = payload.clone();
        tampered[10] ^= 1;

        let err =
            verify_and_parse(&tampered, &header, SECRET, 1_700_000_000, DEFAULT_TOLERANCE_SECS)
                .unwrap_err();
        assert!(matches!(err, WebhookError::SignatureMismatch));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let payload = completed_event();
        let header = sign(&payload, "whsec_other", 1_700_000_000);

        let err =
            verify_and_parse(&payload, &header, SECRET, 1_700_000_000, DEFAULT_TOLERANCE_SECS)
                .unwrap_err();
        assert!(matches!(err, WebhookError::SignatureMismatch));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let payload = completed_event();
        let header = sign(&payload, SECRET, 1_700_000_000);

        let err =
            verify_and_parse(&payload, &header, SECRET, 1_700_009_999, DEFAULT_TOLERANCE_SECS)
                .unwrap_err();
        assert!(matches!(err, WebhookError::StaleTimestamp));
    }

    #[test]
    fn test_malformed_header_rejected() {
        let payload = completed_event();

        for header in ["", "t=abc,v1=00", "v1=00", "t=123", "garbage"] {
            assert!(verify_and_parse(
                &payload,
                header,
                SECRET,
                1_700_000_000,
                DEFAULT_TOLERANCE_SECS
            )
            .is_err());
        }
    }

    #[test]
    fn test_metadata_defaults_when_absent() {
        let payload = serde_json::json!({
            "id": "evt_002",
            "type": "payment_intent.created",
            "data": { "object": {} }
        })
        .to_string()
        .into_bytes();
        let header = sign(&payload, SECRET, 1_700_000_000);

        let event =
            verify_and_parse(&payload, &header, SECRET, 1_700_000_000, DEFAULT_TOLERANCE_SECS)
                .unwrap();
        assert!(event.data.object.metadata.user_id.is_none());
    }
}
