//! Client for the token-issuing identity service.
//!
//! Sign-in posts `{ email, password, returnSecureToken }` and receives
//! `{ idToken, email, refreshToken, expiresIn }`. Refresh posts a
//! `refresh_token` grant and receives `{ id_token, refresh_token, expires_in,
//! user_id }`. Lifetimes arrive as numeric strings.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::auth::{IssuedTokens, RefreshedTokens, TokenIssuer, TokenRefresher};
use crate::config::Config;

use super::ApiError;

/// HTTP request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignInRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    id_token: String,
    email: String,
    refresh_token: String,
    #[serde(deserialize_with = "lifetime_secs")]
    expires_in: i64,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    grant_type: &'static str,
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    #[serde(deserialize_with = "lifetime_secs")]
    expires_in: i64,
    #[serde(default)]
    user_id: String,
}

/// Accept a lifetime as either `"3600"` or `3600`.
fn lifetime_secs<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lifetime {
        Number(i64),
        Text(String),
    }

    match Lifetime::deserialize(deserializer)? {
        Lifetime::Number(secs) => Ok(secs),
        Lifetime::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid lifetime: {:?}", text))),
    }
}

/// Identity service client. Implements both [`TokenIssuer`] and
/// [`TokenRefresher`]. Clone is cheap.
#[derive(Clone)]
pub struct IdentityClient {
    client: Client,
    api_key: Option<String>,
    sign_in_url: String,
    refresh_url: String,
}

impl IdentityClient {
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            sign_in_url: config.sign_in_url.clone(),
            refresh_url: config.refresh_url.clone(),
        })
    }

    fn key_query(&self) -> Vec<(&'static str, &str)> {
        self.api_key
            .as_deref()
            .map(|key| vec![("key", key)])
            .unwrap_or_default()
    }

    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("{} response: {}", what, e)))
    }
}

#[async_trait]
impl TokenIssuer for IdentityClient {
    async fn sign_in(&self, identifier: &str, secret: &str) -> Result<IssuedTokens, ApiError> {
        debug!(identifier = identifier, "Sending sign-in request");
        let response = self
            .client
            .post(&self.sign_in_url)
            .query(&self.key_query())
            .json(&SignInRequest {
                email: identifier,
                password: secret,
                return_secure_token: true,
            })
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let body: SignInResponse = Self::parse(response, "Sign-in").await?;

        Ok(IssuedTokens {
            identifier: body.email,
            access_token: body.id_token,
            refresh_token: body.refresh_token,
            lifetime_secs: body.expires_in,
        })
    }
}

#[async_trait]
impl TokenRefresher for IdentityClient {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, ApiError> {
        debug!("Sending token refresh request");
        let response = self
            .client
            .post(&self.refresh_url)
            .query(&self.key_query())
            .form(&RefreshRequest {
                grant_type: "refresh_token",
                refresh_token,
            })
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let body: RefreshResponse = Self::parse(response, "Refresh").await?;

        Ok(RefreshedTokens {
            access_token: body.id_token,
            refresh_token: body.refresh_token,
            lifetime_secs: body.expires_in,
            user_id: body.user_id,
        })
    }
}
