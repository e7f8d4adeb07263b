//! Signed session tokens.
//!
//! A token is `role|expiry|signature` where the signature is the URL-safe
//! base64 HMAC-SHA256 of `role|expiry` under the server secret. Verification
//! recomputes the signature with the current secret and compares it in
//! constant time, then checks the expiry.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const DELIMITER: char = '|';

/// Session role carried by a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Admin => "admin",
        }
    }

    fn parse(s: &str) -> Option<Role> {
        match s {
            "viewer" => Some(Role::Viewer),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successfully verified token contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedToken {
    pub role: Role,
    /// Unix timestamp the token expires at.
    pub expires_at: i64,
}

/// HMAC-SHA256 signature of `payload`, URL-safe base64 without padding.
pub fn sign(secret: &str, payload: &str) -> String {
    // HMAC accepts keys of any length; the empty-secret case is rejected at
    // config load.
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
}

/// Create a token for `role` expiring `max_age_secs` from now.
pub fn create(secret: &str, role: Role, max_age_secs: i64) -> String {
    let expires_at = Utc::now().timestamp() + max_age_secs;
    let payload = format!("{}{}{}", role.as_str(), DELIMITER, expires_at);
    let signature = sign(secret, &payload);
    format!("{payload}{DELIMITER}{signature}")
}

/// Verify a token against `secret`. Returns `None` on any mismatch: wrong
/// field count, unknown role, malformed expiry, bad signature, or expiry in
/// the past.
pub fn verify(secret: &str, token: &str) -> Option<VerifiedToken> {
    let parts: Vec<&str> = token.split(DELIMITER).collect();
    if parts.len() != 3 {
        return None;
    }

    let role = Role::parse(parts[0])?;
    let expires_at: i64 = parts[1].parse().ok()?;

    let expected = sign(secret, &format!("{}{}{}", parts[0], DELIMITER, parts[1]));
    if !constant_time_eq(expected.as_bytes(), parts[2].as_bytes()) {
        return None;
    }

    if Utc::now().timestamp() > expires_at {
        return None;
    }

    Some(VerifiedToken { role, expires_at })
}

/// Constant-time equality. Length mismatch is rejected before the byte
/// comparison; the length check itself is a known, accepted timing signal.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn test_round_trip_preserves_role() {
        for role in [Role::Viewer, Role::Admin] {
            let token = create(SECRET, role, 3600);
            let verified = verify(SECRET, &token).expect("fresh token should verify");
            assert_eq!(verified.role, role);
        }
    }

    #[test]
    fn test_expired_token_fails_despite_valid_signature() {
        let expires_at = Utc::now().timestamp() - 10;
        let payload = format!("viewer|{expires_at}");
        let token = format!("{payload}|{}", sign(SECRET, &payload));
        assert!(verify(SECRET, &token).is_none());
    }

    #[test]
    fn test_wrong_secret_never_verifies() {
        let token = create(SECRET, Role::Admin, 3600);
        assert!(verify("another-secret", &token).is_none());
    }

    #[test]
    fn test_tampered_role_or_expiry_fails() {
        let token = create(SECRET, Role::Viewer, 3600);
        // role and expiry occupy everything before the second delimiter
        let payload_len = token.rfind(DELIMITER).unwrap();
        for i in 0..payload_len {
            if token.as_bytes()[i] == DELIMITER as u8 {
                continue;
            }
            let mut bytes = token.clone().into_bytes();
            bytes[i] = if bytes[i] == b'0' { b'1' } else { b'0' };
            let tampered = String::from_utf8(bytes).unwrap();
            assert!(
                verify(SECRET, &tampered).is_none(),
                "tampering at byte {i} should invalidate the token"
            );
        }
    }

    #[test]
    fn test_wrong_field_count_rejected() {
        assert!(verify(SECRET, "viewer|123").is_none());
        assert!(verify(SECRET, "viewer|123|sig|extra").is_none());
        assert!(verify(SECRET, "").is_none());
    }

    #[test]
    fn test_unknown_role_rejected() {
        let expires_at = Utc::now().timestamp() + 3600;
        let payload = format!("owner|{expires_at}");
        let token = format!("{payload}|{}", sign(SECRET, &payload));
        assert!(verify(SECRET, &token).is_none());
    }

    #[test]
    fn test_constant_time_eq_length_mismatch() {
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"abc", b"abc"));
    }
}
