//! Contracts for the remote token exchanges the session manager depends on.

use async_trait::async_trait;

use crate::api::ApiError;

/// Result of a sign-in exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedTokens {
    pub identifier: String,
    pub access_token: String,
    pub refresh_token: String,
    pub lifetime_secs: i64,
}

/// Result of a refresh exchange. `refresh_token` may differ from the one sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub lifetime_secs: i64,
    pub user_id: String,
}

/// Exchanges credentials for a token pair.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn sign_in(&self, identifier: &str, secret: &str) -> Result<IssuedTokens, ApiError>;
}

/// Exchanges a refresh token for a new token pair.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, ApiError>;
}
