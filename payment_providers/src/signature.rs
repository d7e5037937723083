//! HMAC-SHA256 webhook signatures.
//!
//! Both providers sign webhooks with a shared secret. Comparisons go through [`Mac::verify_slice`], which is constant
//! time.
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use log::*;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signatures older (or further in the future) than this are rejected.
pub const DEFAULT_SIGNATURE_TOLERANCE_SECS: i64 = 300;

fn mac_for(secret: &str) -> Option<HmacSha256> {
    if secret.is_empty() {
        return None;
    }
    HmacSha256::new_from_slice(secret.as_bytes()).ok()
}

/// Hex-encoded HMAC-SHA256 of `payload`. Returns an empty string for an empty secret.
pub fn sign_hex(secret: &str, payload: &[u8]) -> String {
    match mac_for(secret) {
        Some(mut mac) => {
            mac.update(payload);
            hex::encode(mac.finalize().into_bytes())
        },
        None => String::default(),
    }
}

/// Checks a hex-encoded HMAC-SHA256 of `payload`. An empty secret never verifies.
pub fn verify_hex(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(mut mac) = mac_for(secret) else {
        return false;
    };
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// The parts of a `t=<unix>,v1=<hex>[,v1=<hex>...]` signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampedSignature {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

impl TimestampedSignature {
    pub fn parse(header: &str) -> Option<Self> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", t)) => timestamp = t.parse::<i64>().ok(),
                Some(("v1", sig)) => signatures.push(sig.to_string()),
                _ => {},
            }
        }
        match (timestamp, signatures.is_empty()) {
            (Some(timestamp), false) => Some(Self { timestamp, signatures }),
            _ => None,
        }
    }

    pub fn header_for(secret: &str, timestamp: i64, body: &[u8]) -> String {
        format!("t={timestamp},v1={}", sign_hex(secret, &signed_payload(timestamp, body)))
    }
}

fn signed_payload(timestamp: i64, body: &[u8]) -> Vec<u8> {
    let mut payload = format!("{timestamp}.").into_bytes();
    payload.extend_from_slice(body);
    payload
}

/// Verifies a timestamped signature header over `"{t}.{body}"`.
pub fn verify_timestamped(secret: &str, body: &[u8], header: &str, now: DateTime<Utc>, tolerance_secs: i64) -> bool {
    let Some(parsed) = TimestampedSignature::parse(header) else {
        debug!("💳️ Malformed signature header");
        return false;
    };
    let age = (now.timestamp() - parsed.timestamp).abs();
    if age > tolerance_secs {
        warn!("💳️ Webhook signature timestamp is {age}s away from now. Rejecting it");
        return false;
    }
    let payload = signed_payload(parsed.timestamp, body);
    parsed.signatures.iter().any(|sig| verify_hex(secret, &payload, sig))
}
