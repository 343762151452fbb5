// splitpay/src/signature.rs
// Webhook signature checks for both gateways

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Deliveries signed further than this from the local clock are refused
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature missing")]
    Missing,
    #[error("malformed signature: {0}")]
    Malformed(&'static str),
    #[error("signature mismatch")]
    Mismatch,
}

/// Signed template: `id:{data.id};request-id:{x-request-id};ts:{ts};`.
/// Absent parts are left out; alphanumeric ids are signed lowercased.
pub fn marketplace_manifest(data_id: Option<&str>, request_id: Option<&str>, ts: &str) -> String {
    let mut manifest = String::new();
    if let Some(id) = data_id.filter(|id| !id.is_empty()) {
        let id = if id.chars().all(|c| c.is_ascii_alphanumeric()) {
            id.to_ascii_lowercase()
        } else {
            id.to_string()
        };
        manifest.push_str(&format!("id:{};", id));
    }
    if let Some(request_id) = request_id.filter(|id| !id.is_empty()) {
        manifest.push_str(&format!("request-id:{};", request_id));
    }
    manifest.push_str(&format!("ts:{};", ts));
    manifest
}

/// Verify the marketplace `x-signature` header (`ts=...,v1=...`)
pub fn verify_marketplace_signature(
    signature_header: Option<&str>,
    request_id: Option<&str>,
    data_id: Option<&str>,
    webhook_secret: &str,
) -> Result<(), SignatureError> {
    verify_marketplace_signature_at(
        signature_header,
        request_id,
        data_id,
        webhook_secret,
        Utc::now().timestamp(),
    )
}

pub fn verify_marketplace_signature_at(
    signature_header: Option<&str>,
    request_id: Option<&str>,
    data_id: Option<&str>,
    webhook_secret: &str,
    now: i64,
) -> Result<(), SignatureError> {
    let signature_header = signature_header.ok_or(SignatureError::Missing)?;

    let parts: HashMap<&str, &str> = signature_header
        .split(',')
        .filter_map(|part| {
            let mut split = part.trim().splitn(2, '=');
            Some((split.next()?, split.next()?))
        })
        .collect();

    let ts = parts.get("ts").ok_or(SignatureError::Malformed("missing ts"))?;
    let expected = parts.get("v1").ok_or(SignatureError::Malformed("missing v1"))?;
    let expected = hex::decode(expected).map_err(|_| SignatureError::Malformed("v1 is not hex"))?;

    let mut signed_at: i64 = ts
        .parse()
        .map_err(|_| SignatureError::Malformed("ts is not a number"))?;
    // some deliveries carry milliseconds
    if signed_at > 1_000_000_000_000 {
        signed_at /= 1000;
    }
    if (now - signed_at).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(SignatureError::Malformed("stale ts"));
    }

    let manifest = marketplace_manifest(data_id, request_id, ts);
    let mut mac = HmacSha256::new_from_slice(webhook_secret.as_bytes())
        .map_err(|_| SignatureError::Malformed("unusable secret"))?;
    mac.update(manifest.as_bytes());

    mac.verify_slice(&expected).map_err(|_| SignatureError::Mismatch)
}

/// The direct PIX webhook URL is registered with a shared `hmac` query parameter
pub fn verify_shared_secret(provided: Option<&str>, webhook_secret: &str) -> Result<(), SignatureError> {
    let provided = provided.ok_or(SignatureError::Missing)?;

    // compare keyed digests so the check does not leak the secret through timing
    let digest = |value: &str| -> Result<Vec<u8>, SignatureError> {
        let mut mac = HmacSha256::new_from_slice(webhook_secret.as_bytes())
            .map_err(|_| SignatureError::Malformed("unusable secret"))?;
        mac.update(value.as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    };

    let mut mac = HmacSha256::new_from_slice(webhook_secret.as_bytes())
        .map_err(|_| SignatureError::Malformed("unusable secret"))?;
    mac.update(provided.as_bytes());
    mac.verify_slice(&digest(webhook_secret)?)
        .map_err(|_| SignatureError::Mismatch)
}
