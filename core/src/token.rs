//! Pure signed-token verification.
//!
//! Scan tokens are issued externally and presented as an opaque string:
//!
//! ```text
//! FP1.<base64url(claims json)>.<base64url(hmac-sha256 tag)>
//! ```
//!
//! The tag covers the literal `FP1.<payload>` prefix. Verification is a
//! pure function of the token, the shared secret, and an injected `now`;
//! it performs no I/O and is not part of the transactional critical
//! section. An expired-but-authentic token still surfaces its embedded
//! identifiers so the engine can log a reject row against the ticket.

use crate::error::TokenError;
use crate::types::{TicketCode, TokenId};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Container version prefix for the current token format.
const TOKEN_VERSION: &str = "FP1";

/// Claims embedded in a scan token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Ticket the token was issued for
    pub ticket_code: TicketCode,
    /// Rotating token identifier
    pub token_id: TokenId,
    /// Expiry as unix seconds
    pub expires_at: i64,
}

/// The identifiers recovered from a verified, unexpired token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedToken {
    /// Ticket the token was issued for
    pub ticket_code: TicketCode,
    /// Rotating token identifier
    pub token_id: TokenId,
    /// When the token stops being accepted
    pub expires_at: DateTime<Utc>,
}

/// Verifies a signed scan token's integrity and expiry.
///
/// Implementations must be pure: no I/O, no clock access beyond the `now`
/// argument.
pub trait TokenVerifier: Send + Sync {
    /// Verify `raw` against the shared secret and `now`.
    ///
    /// # Errors
    ///
    /// - [`TokenError::Malformed`] if the container or claims don't parse
    /// - [`TokenError::BadSignature`] if the tag doesn't match
    /// - [`TokenError::Expired`] if authentic but past its expiry
    fn verify(&self, raw: &str, now: DateTime<Utc>) -> Result<VerifiedToken, TokenError>;
}

/// HMAC-SHA256 verifier for the `FP1` container format.
#[derive(Clone)]
pub struct HmacTokenVerifier {
    secret: Vec<u8>,
}

impl HmacTokenVerifier {
    /// Create a verifier from the shared signing secret.
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl TokenVerifier for HmacTokenVerifier {
    fn verify(&self, raw: &str, now: DateTime<Utc>) -> Result<VerifiedToken, TokenError> {
        let mut parts = raw.split('.');
        let (version, payload_b64, tag_b64) = match (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) {
            (Some(v), Some(p), Some(t), None) => (v, p, t),
            _ => return Err(TokenError::Malformed),
        };
        if version != TOKEN_VERSION {
            return Err(TokenError::Malformed);
        }

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| TokenError::Malformed)?;
        let tag = URL_SAFE_NO_PAD
            .decode(tag_b64)
            .map_err(|_| TokenError::Malformed)?;

        let expected = compute_tag(&self.secret, payload_b64);
        if !constant_time_eq::constant_time_eq(&expected, &tag) {
            return Err(TokenError::BadSignature);
        }

        let claims: TokenClaims =
            serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)?;

        let expires_at = Utc
            .timestamp_opt(claims.expires_at, 0)
            .single()
            .ok_or(TokenError::Malformed)?;
        if now >= expires_at {
            return Err(TokenError::Expired {
                ticket_code: claims.ticket_code,
                token_id: claims.token_id,
            });
        }

        Ok(VerifiedToken {
            ticket_code: claims.ticket_code,
            token_id: claims.token_id,
            expires_at,
        })
    }
}

/// Issuer-side counterpart of [`HmacTokenVerifier`].
///
/// Token issuance lives in an external service; this helper exists for that
/// service's client library and for test fixtures, and guarantees the two
/// sides of the format never drift apart.
#[must_use]
pub fn sign_token(secret: &[u8], claims: &TokenClaims) -> String {
    // serde_json cannot fail on this struct
    let payload = serde_json::to_vec(claims).unwrap_or_default();
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
    let tag = compute_tag(secret, &payload_b64);
    format!(
        "{TOKEN_VERSION}.{payload_b64}.{}",
        URL_SAFE_NO_PAD.encode(tag)
    )
}

fn compute_tag(secret: &[u8], payload_b64: &str) -> Vec<u8> {
    // Hmac accepts keys of any length
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return Vec::new();
    };
    mac.update(TOKEN_VERSION.as_bytes());
    mac.update(b".");
    mac.update(payload_b64.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::panic)]

    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    const SECRET: &[u8] = b"unit-test-secret";

    fn claims_expiring_in(now: DateTime<Utc>, secs: i64) -> TokenClaims {
        TokenClaims {
            ticket_code: TicketCode::new("TKT-0001"),
            token_id: TokenId::new(),
            expires_at: (now + Duration::seconds(secs)).timestamp(),
        }
    }

    #[test]
    fn verifies_a_freshly_signed_token() {
        let now = Utc::now();
        let claims = claims_expiring_in(now, 60);
        let raw = sign_token(SECRET, &claims);

        let verifier = HmacTokenVerifier::new(SECRET);
        let verified = verifier.verify(&raw, now).unwrap();
        assert_eq!(verified.ticket_code, claims.ticket_code);
        assert_eq!(verified.token_id, claims.token_id);
    }

    #[test]
    fn expired_token_surfaces_ticket_and_token_ids() {
        let now = Utc::now();
        let claims = claims_expiring_in(now, -1);
        let raw = sign_token(SECRET, &claims);

        let verifier = HmacTokenVerifier::new(SECRET);
        match verifier.verify(&raw, now) {
            Err(TokenError::Expired {
                ticket_code,
                token_id,
            }) => {
                assert_eq!(ticket_code, claims.ticket_code);
                assert_eq!(token_id, claims.token_id);
            }
            other => panic!("expected Expired, got {other:?}"),
        }
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let now = Utc::now();
        let claims = TokenClaims {
            ticket_code: TicketCode::new("TKT-0001"),
            token_id: TokenId::new(),
            expires_at: now.timestamp(),
        };
        let raw = sign_token(SECRET, &claims);
        let verifier = HmacTokenVerifier::new(SECRET);
        // now == expires_at (to second precision) must already be refused
        let at_expiry = Utc.timestamp_opt(claims.expires_at, 0).single().unwrap();
        assert!(matches!(
            verifier.verify(&raw, at_expiry),
            Err(TokenError::Expired { .. })
        ));
    }

    #[test]
    fn wrong_secret_is_a_bad_signature() {
        let now = Utc::now();
        let raw = sign_token(SECRET, &claims_expiring_in(now, 60));
        let verifier = HmacTokenVerifier::new(b"some-other-secret".to_vec());
        assert_eq!(verifier.verify(&raw, now), Err(TokenError::BadSignature));
    }

    #[test]
    fn garbage_is_malformed() {
        let verifier = HmacTokenVerifier::new(SECRET);
        let now = Utc::now();
        assert_eq!(verifier.verify("", now), Err(TokenError::Malformed));
        assert_eq!(verifier.verify("FP1", now), Err(TokenError::Malformed));
        assert_eq!(
            verifier.verify("FP0.abc.def", now),
            Err(TokenError::Malformed)
        );
        assert_eq!(
            verifier.verify("FP1.!!!.def", now),
            Err(TokenError::Malformed)
        );
    }

    proptest! {
        #[test]
        fn tampered_payload_never_verifies(extra in "[a-zA-Z0-9_-]{1,16}") {
            let now = Utc::now();
            let raw = sign_token(SECRET, &claims_expiring_in(now, 60));
            let mut parts = raw.splitn(3, '.');
            let (v, p, t) = (
                parts.next().unwrap(),
                parts.next().unwrap(),
                parts.next().unwrap(),
            );
            let tampered = format!("{v}.{p}{extra}.{t}");

            let verifier = HmacTokenVerifier::new(SECRET);
            prop_assert!(verifier.verify(&tampered, now).is_err());
        }

        #[test]
        fn arbitrary_strings_never_panic(raw in ".{0,256}") {
            let verifier = HmacTokenVerifier::new(SECRET);
            let _ = verifier.verify(&raw, Utc::now());
        }
    }
}
