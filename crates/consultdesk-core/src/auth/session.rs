use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::tokens::{IssuedTokens, RefreshedTokens};

/// Tokens closer than this to expiry are treated as already expired, so the
/// token handed to a caller survives the round trip of its request.
pub const REFRESH_MARGIN_MS: i64 = 60_000;

/// An authenticated session: who is signed in plus the token pair and expiry.
///
/// The serialized form is the durable storage record
/// `{ email, idToken, refreshToken, expiresAt }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "email")]
    pub identifier: String,
    #[serde(rename = "idToken")]
    pub access_token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
    /// Milliseconds since the Unix epoch.
    #[serde(rename = "expiresAt")]
    pub expires_at: i64,
}

impl Session {
    /// Build a session from a successful sign-in exchange.
    pub fn from_issued(tokens: IssuedTokens, issued_at: DateTime<Utc>) -> Self {
        Self {
            identifier: tokens.identifier,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at: expiry_millis(issued_at, tokens.lifetime_secs),
        }
    }

    /// The session that replaces this one after a refresh exchange.
    /// The identifier is kept; the rotated refresh token is always adopted.
    pub fn refreshed(&self, tokens: RefreshedTokens, issued_at: DateTime<Utc>) -> Self {
        Self {
            identifier: self.identifier.clone(),
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at: expiry_millis(issued_at, tokens.lifetime_secs),
        }
    }

    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.expires_at).single()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp_millis() >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Check whether the access token is inside the safety margin at `now`
    pub fn needs_refresh_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.saturating_sub(now.timestamp_millis()) <= REFRESH_MARGIN_MS
    }

    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh_at(Utc::now())
    }

    pub fn time_until_expiry(&self) -> Duration {
        let remaining = self.expires_at.saturating_sub(Utc::now().timestamp_millis());
        Duration::milliseconds(remaining.max(-i64::MAX))
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> i64 {
        self.time_until_expiry().num_minutes().max(0)
    }
}

/// Lifetimes come from the server, so the arithmetic saturates instead of
/// overflowing into a past expiry.
fn expiry_millis(issued_at: DateTime<Utc>, lifetime_secs: i64) -> i64 {
    issued_at
        .timestamp_millis()
        .saturating_add(lifetime_secs.max(0).saturating_mul(1000))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issued(lifetime_secs: i64) -> IssuedTokens {
        IssuedTokens {
            identifier: "a@b.com".to_string(),
            access_token: "T1".to_string(),
            refresh_token: "R1".to_string(),
            lifetime_secs,
        }
    }

    #[test]
    fn test_from_issued_computes_expiry() {
        let now = Utc::now();
        let session = Session::from_issued(issued(3600), now);

        assert_eq!(session.identifier, "a@b.com");
        assert_eq!(session.access_token, "T1");
        assert_eq!(session.refresh_token, "R1");
        assert_eq!(session.expires_at, now.timestamp_millis() + 3_600_000);
    }

    #[test]
    fn test_negative_lifetime_never_backdates() {
        let now = Utc::now();
        let session = Session::from_issued(issued(-30), now);
        assert_eq!(session.expires_at, now.timestamp_millis());
    }

    #[test]
    fn test_huge_lifetime_saturates() {
        let now = Utc::now();
        let session = Session::from_issued(issued(i64::MAX / 10), now);

        assert_eq!(session.expires_at, i64::MAX);
        assert!(!session.needs_refresh_at(now));
        assert!(!session.is_expired_at(now));
        assert!(session.minutes_until_expiry() > 0);
    }

    #[test]
    fn test_extreme_stored_expiry_does_not_panic() {
        let mut session = Session::from_issued(issued(3600), Utc::now());
        session.expires_at = i64::MIN;

        assert!(session.needs_refresh());
        assert!(session.is_expired());
        assert_eq!(session.minutes_until_expiry(), 0);
    }

    #[test]
    fn test_refreshed_keeps_identifier_and_rotates_tokens() {
        let now = Utc::now();
        let session = Session::from_issued(issued(3600), now);
        let next = session.refreshed(
            RefreshedTokens {
                access_token: "T2".to_string(),
                refresh_token: "R2".to_string(),
                lifetime_secs: 1800,
                user_id: "uid-1".to_string(),
            },
            now,
        );

        assert_eq!(next.identifier, "a@b.com");
        assert_eq!(next.access_token, "T2");
        assert_eq!(next.refresh_token, "R2");
        assert_eq!(next.expires_at, now.timestamp_millis() + 1_800_000);
    }

    #[test]
    fn test_refresh_margin_boundary() {
        let now = Utc::now();
        let mut session = Session::from_issued(issued(3600), now);

        session.expires_at = now.timestamp_millis() + REFRESH_MARGIN_MS + 1;
        assert!(!session.needs_refresh_at(now));

        session.expires_at = now.timestamp_millis() + REFRESH_MARGIN_MS;
        assert!(session.needs_refresh_at(now));
        assert!(!session.is_expired_at(now));

        session.expires_at = now.timestamp_millis() - 1000;
        assert!(session.needs_refresh_at(now));
        assert!(session.is_expired_at(now));
    }

    #[test]
    fn test_storage_record_field_names() {
        let session = Session {
            identifier: "a@b.com".to_string(),
            access_token: "T1".to_string(),
            refresh_token: "R1".to_string(),
            expires_at: 1_700_000_000_000,
        };

        let value = serde_json::to_value(&session).expect("serialize session");
        assert_eq!(value["email"], "a@b.com");
        assert_eq!(value["idToken"], "T1");
        assert_eq!(value["refreshToken"], "R1");
        assert_eq!(value["expiresAt"], 1_700_000_000_000i64);
    }

    #[test]
    fn test_minutes_until_expiry_clamps_at_zero() {
        let mut session = Session::from_issued(issued(3600), Utc::now());
        assert!(session.minutes_until_expiry() >= 59);

        session.expires_at = Utc::now().timestamp_millis() - 120_000;
        assert_eq!(session.minutes_until_expiry(), 0);
    }
}
