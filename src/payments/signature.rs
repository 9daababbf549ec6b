//! Webhook signature scheme.
//!
//! The processor signs the raw request body with HMAC-SHA256 over
//! `"{timestamp}.{body}"` and sends `Ink-Signature: t=<unix>,v1=<hex>`.
//! The timestamp bounds the replay window; the MAC is checked in constant
//! time via [`Mac::verify_slice`].

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("malformed signature header")]
    Malformed,
    #[error("timestamp outside tolerance window")]
    Stale,
    #[error("signature mismatch")]
    Mismatch,
}

/// Compute the hex signature for `payload` at `timestamp`. Used by tests and
/// by the local payment simulator.
pub fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify an `Ink-Signature` header against the raw body. `now` is the
/// current unix time; timestamps further than `tolerance_secs` away are
/// rejected before any MAC work.
pub fn verify(
    secret: &str,
    header: &str,
    payload: &[u8],
    now: i64,
    tolerance_secs: i64,
) -> Result<(), SignatureError> {
    let (timestamp, provided) = parse_header(header)?;

    if (now - timestamp).abs() > tolerance_secs {
        return Err(SignatureError::Stale);
    }

    let provided = hex::decode(provided).map_err(|_| SignatureError::Malformed)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac.verify_slice(&provided)
        .map_err(|_| SignatureError::Mismatch)
}

fn parse_header(header: &str) -> Result<(i64, &str), SignatureError> {
    let mut timestamp = None;
    let mut v1 = None;
    for pair in header.split(',') {
        match pair.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => v1 = Some(value),
            _ => {}
        }
    }
    match (timestamp, v1) {
        (Some(t), Some(sig)) => Ok((t, sig)),
        _ => Err(SignatureError::Malformed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"id":"evt_1","type":"payment_intent.succeeded"}"#;

    fn header_for(timestamp: i64, payload: &[u8]) -> String {
        format!("t={},v1={}", timestamp, sign(SECRET, timestamp, payload))
    }

    #[test]
    fn valid_signature_passes() {
        let now = 1_700_000_000;
        let header = header_for(now, BODY);
        assert_eq!(verify(SECRET, &header, BODY, now, 300), Ok(()));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let now = 1_700_000_000;
        let header = header_for(now, BODY);
        let err = verify(SECRET, &header, b"{}", now, 300).unwrap_err();
        assert_eq!(err, SignatureError::Mismatch);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let now = 1_700_000_000;
        let header = header_for(now, BODY);
        let err = verify("other-secret", &header, BODY, now, 300).unwrap_err();
        assert_eq!(err, SignatureError::Mismatch);
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let now = 1_700_000_000;
        let header = header_for(now - 301, BODY);
        let err = verify(SECRET, &header, BODY, now, 300).unwrap_err();
        assert_eq!(err, SignatureError::Stale);
    }

    #[test]
    fn future_timestamp_outside_window_is_rejected() {
        let now = 1_700_000_000;
        let header = header_for(now + 400, BODY);
        let err = verify(SECRET, &header, BODY, now, 300).unwrap_err();
        assert_eq!(err, SignatureError::Stale);
    }

    #[test]
    fn malformed_headers_are_rejected() {
        let now = 1_700_000_000;
        for header in ["", "t=abc,v1=00", "v1=00", "t=123"] {
            let err = verify(SECRET, header, BODY, now, 300).unwrap_err();
            assert_eq!(err, SignatureError::Malformed, "header: {header}");
        }
    }

    #[test]
    fn non_hex_signature_is_rejected() {
        let now = 1_700_000_000;
        let header = format!("t={now},v1=zz");
        let err = verify(SECRET, &header, BODY, now, 300).unwrap_err();
        assert_eq!(err, SignatureError::Malformed);
    }

    #[test]
    fn extra_pairs_are_ignored() {
        let now = 1_700_000_000;
        let header = format!("{},v0=deadbeef", header_for(now, BODY));
        assert_eq!(verify(SECRET, &header, BODY, now, 300), Ok(()));
    }
}
