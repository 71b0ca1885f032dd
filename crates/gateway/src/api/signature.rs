//! Webhook signature verification.
//!
//! The voice platform signs every webhook with
//! `webhook-signature: t=<unix_seconds>,v0=<hex_hmac_sha256>` where the
//! MAC is computed over `"<t>.<raw_body>"`. Verification order matters:
//! parse, then skew check, then the MAC itself — a stale replay is
//! rejected before any HMAC work, and digest comparison is constant-time
//! via `subtle`. There is no unsigned-acceptance fallback.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use mr_domain::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// A parsed `webhook-signature` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub digest_hex: String,
}

/// Parse `t=<unix_seconds>,v0=<hex>`. Field order is fixed; unknown
/// trailing fields are rejected rather than ignored.
pub fn parse_header(header: &str) -> Result<SignatureHeader> {
    let mut timestamp = None;
    let mut digest_hex = None;

    for part in header.split(',') {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| Error::SignatureMalformed(format!("segment '{part}' has no '='")))?;
        match key.trim() {
            "t" => {
                let ts: i64 = value
                    .trim()
                    .parse()
                    .map_err(|_| Error::SignatureMalformed("t is not an integer".into()))?;
                timestamp = Some(ts);
            }
            "v0" => {
                let hex_str = value.trim();
                if hex_str.len() != 64 || !hex_str.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(Error::SignatureMalformed(
                        "v0 is not a 64-char hex digest".into(),
                    ));
                }
                digest_hex = Some(hex_str.to_ascii_lowercase());
            }
            other => {
                return Err(Error::SignatureMalformed(format!(
                    "unexpected segment '{other}'"
                )));
            }
        }
    }

    match (timestamp, digest_hex) {
        (Some(timestamp), Some(digest_hex)) => Ok(SignatureHeader {
            timestamp,
            digest_hex,
        }),
        (None, _) => Err(Error::SignatureMalformed("missing t".into())),
        (_, None) => Err(Error::SignatureMalformed("missing v0".into())),
    }
}

/// Verify a webhook signature against the raw request body.
///
/// Fails with `SignatureMissing` / `SignatureMalformed` / `SignatureStale`
/// (|now − t| > skew) / `SignatureMismatch`. The digest comparison is
/// constant-time.
pub fn verify(
    raw_body: &[u8],
    signature_header: Option<&str>,
    secret: &[u8],
    now: DateTime<Utc>,
    skew_seconds: i64,
) -> Result<()> {
    let header = signature_header.ok_or(Error::SignatureMissing)?;
    let parsed = parse_header(header)?;

    let age_seconds = (now.timestamp() - parsed.timestamp).abs();
    if age_seconds > skew_seconds {
        return Err(Error::SignatureStale { age_seconds });
    }

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| Error::Internal(format!("HMAC init: {e}")))?;
    mac.update(parsed.timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(raw_body);
    let computed = hex::encode(mac.finalize().into_bytes());

    if computed.as_bytes().ct_eq(parsed.digest_hex.as_bytes()).unwrap_u8() != 1 {
        return Err(Error::SignatureMismatch);
    }
    Ok(())
}

/// Compute a valid header value for a body at a timestamp. Used by tests
/// and the doctor command to exercise the verify path end-to-end.
pub fn sign(raw_body: &[u8], secret: &[u8], timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(raw_body);
    format!("t={timestamp},v0={}", hex::encode(mac.finalize().into_bytes()))
}
