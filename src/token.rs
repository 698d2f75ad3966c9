//! Signed ticket tokens.
//!
//! A ticket's QR code carries a self-describing token: the canonical JSON
//! payload `{tid, eid, iat}` plus a truncated HMAC-SHA256 signature, the
//! whole thing base64url-encoded. Tokens verify offline, without a database
//! lookup; revocation and single-use are the gate validator's job.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Hex characters of the truncated signature.
const SIG_LEN: usize = 16;

/// Token verification failure.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    /// Signature did not match the payload.
    #[error("sig")]
    Signature,
    /// Not base64url, not JSON, or missing fields.
    #[error("malformed")]
    Malformed,
}

/// Signed payload carried in the QR code. Field order is the canonical
/// signing order; do not reorder.
#[derive(Debug, Serialize, Deserialize)]
struct TokenClaims {
    tid: String,
    eid: String,
    iat: i64,
    sig: String,
}

/// The unsigned portion, serialized for signing. Must mirror the field
/// order of [`TokenClaims`].
#[derive(Debug, Serialize)]
struct TokenPayload<'a> {
    tid: &'a str,
    eid: &'a str,
    iat: i64,
}

/// Verified contents of a ticket token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedToken {
    /// Ticket id as an opaque string.
    pub ticket_id: String,
    /// Event id as an opaque string.
    pub event_id: String,
    /// Issue time in epoch milliseconds.
    pub issued_at_ms: i64,
}

/// Produces and verifies HMAC-signed, base64url-encoded ticket tokens.
#[derive(Clone)]
pub struct TicketTokenCodec {
    key: Vec<u8>,
}

impl TicketTokenCodec {
    /// Create a codec with the given HMAC secret.
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self { key: secret.into() }
    }

    /// Sign a ticket token.
    ///
    /// `tid` and `eid` are opaque identifier strings; `iat_ms` is the issue
    /// time in epoch milliseconds. Signing the same inputs yields the same
    /// token, so callers vary `iat_ms` to mint distinct codes.
    #[must_use]
    pub fn sign(&self, tid: &str, eid: &str, iat_ms: i64) -> String {
        let sig = self.signature(tid, eid, iat_ms);
        let claims = TokenClaims {
            tid: tid.to_string(),
            eid: eid.to_string(),
            iat: iat_ms,
            sig,
        };
        // Serialization of a plain struct cannot fail.
        #[allow(clippy::expect_used)]
        let json = serde_json::to_vec(&claims).expect("token claims serialize");
        base64url_encode(&json)
    }

    /// Verify a token, returning its claims.
    ///
    /// # Errors
    ///
    /// `TokenError::Malformed` for anything that does not decode into the
    /// expected shape; `TokenError::Signature` when the HMAC does not match.
    /// Never panics on hostile input.
    pub fn verify(&self, token: &str) -> Result<VerifiedToken, TokenError> {
        let raw = base64url_decode(token).ok_or(TokenError::Malformed)?;
        let claims: TokenClaims =
            serde_json::from_slice(&raw).map_err(|_| TokenError::Malformed)?;
        let expected = self.signature(&claims.tid, &claims.eid, claims.iat);
        if !constant_time_eq(expected.as_bytes(), claims.sig.as_bytes()) {
            return Err(TokenError::Signature);
        }
        Ok(VerifiedToken {
            ticket_id: claims.tid,
            event_id: claims.eid,
            issued_at_ms: claims.iat,
        })
    }

    /// Truncated hex HMAC over the canonical payload JSON.
    fn signature(&self, tid: &str, eid: &str, iat_ms: i64) -> String {
        let payload = TokenPayload {
            tid,
            eid,
            iat: iat_ms,
        };
        #[allow(clippy::expect_used)]
        let json = serde_json::to_vec(&payload).expect("token payload serialize");
        #[allow(clippy::expect_used)]
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(&json);
        let mut hexed = hex::encode(mac.finalize().into_bytes());
        hexed.truncate(SIG_LEN);
        hexed
    }
}

fn base64url_encode(data: &[u8]) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;
    URL_SAFE_NO_PAD.encode(data)
}

fn base64url_decode(data: &str) -> Option<Vec<u8>> {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;
    URL_SAFE_NO_PAD.decode(data).ok()
}

/// Length-checked constant-time byte comparison.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn codec() -> TicketTokenCodec {
        TicketTokenCodec::new("test-qr-secret")
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let token = codec().sign("ticket-1", "event-1", 1_700_000_000_000);
        let verified = codec().verify(&token).unwrap();
        assert_eq!(verified.ticket_id, "ticket-1");
        assert_eq!(verified.event_id, "event-1");
        assert_eq!(verified.issued_at_ms, 1_700_000_000_000);
    }

    #[test]
    fn any_single_byte_mutation_fails_verification() {
        let token = codec().sign("ticket-1", "event-1", 42);
        for i in 0..token.len() {
            let mut bytes = token.clone().into_bytes();
            bytes[i] = if bytes[i] == b'A' { b'B' } else { b'A' };
            let mutated = String::from_utf8(bytes).unwrap();
            if mutated == token {
                continue;
            }
            assert!(
                codec().verify(&mutated).is_err(),
                "mutation at byte {i} verified"
            );
        }
    }

    #[test]
    fn wrong_key_is_a_signature_error() {
        let token = codec().sign("t", "e", 1);
        let other = TicketTokenCodec::new("another-secret");
        assert_eq!(other.verify(&token), Err(TokenError::Signature));
    }

    #[test]
    fn garbage_is_malformed_not_a_panic() {
        for junk in ["", "!!!!", "bm90IGpzb24", "eyJ0aWQiOjF9"] {
            assert_eq!(codec().verify(junk), Err(TokenError::Malformed));
        }
    }

    #[test]
    fn fresh_iat_mints_a_distinct_token() {
        let a = codec().sign("t", "e", 1);
        let b = codec().sign("t", "e", 2);
        assert_ne!(a, b);
    }

    #[test]
    fn signature_is_sixteen_hex_chars() {
        let token = codec().sign("t", "e", 1);
        let raw = base64url_decode(&token).unwrap();
        let claims: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        let sig = claims["sig"].as_str().unwrap();
        assert_eq!(sig.len(), SIG_LEN);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
