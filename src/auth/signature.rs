//! HMAC request signatures for app-to-app calls.
//!
//! Callers sign `METHOD\nPATH\nTIMESTAMP\nNONCE` with their app secret
//! (HMAC-SHA256, base64) and send the pieces in the `X-App-Key`,
//! `X-Timestamp`, `X-Nonce` and `X-Signature` headers. The gateway
//! recomputes the signature from the request it actually received, so a
//! tampered method or path can never verify.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, KeyInit, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::{Error, Result};

/// Header carrying the caller's app key.
pub const APP_KEY_HEADER: &str = "x-app-key";
/// Header carrying the unix-seconds timestamp the caller signed.
pub const TIMESTAMP_HEADER: &str = "x-timestamp";
/// Header carrying the single-use nonce the caller signed.
pub const NONCE_HEADER: &str = "x-nonce";
/// Header carrying the base64 HMAC-SHA256 signature.
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Compute the expected signature for a request.
///
/// The method is uppercased before signing so `get` and `GET` produce the
/// same canonical string. The path is signed exactly as received, without
/// the query string.
///
/// # Errors
///
/// Returns [`Error::Internal`] if the HMAC key cannot be constructed.
pub fn compute_signature(
    method: &str,
    path: &str,
    timestamp: i64,
    nonce: &str,
    secret: &str,
) -> Result<String> {
    let canonical = format!("{}\n{path}\n{timestamp}\n{nonce}", method.to_uppercase());
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Internal(format!("hmac key: {e}")))?;
    mac.update(canonical.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Compare a presented signature against the expected one.
///
/// Constant-time comparison to prevent timing side-channels.
#[must_use]
pub fn signatures_match(expected: &str, presented: &str) -> bool {
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}

/// Check that a signed timestamp lies within `tolerance_secs` of `now`.
///
/// # Errors
///
/// Returns [`Error::Authentication`] when the timestamp is too far in the
/// past or the future.
pub fn check_timestamp(timestamp: i64, now: i64, tolerance_secs: i64) -> Result<()> {
    if (now - timestamp).abs() > tolerance_secs {
        return Err(Error::Authentication(
            "request timestamp outside the accepted window".into(),
        ));
    }
    Ok(())
}
