//! API client for the consultant records backend.
//!
//! Records live under a single base URL; single-record operations identify
//! the record with an `id` query parameter. Every request carries a bearer
//! token obtained from the [`SessionManager`], so nothing is sent without a
//! valid session.

use std::time::Duration;

use reqwest::{header, Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::auth::SessionManager;
use crate::models::Consultant;

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Consultant API client.
/// Clone is cheap - reqwest::Client and SessionManager share their state.
#[derive(Clone)]
pub struct ConsultantClient {
    client: Client,
    base_url: String,
    session: SessionManager,
}

impl ConsultantClient {
    pub fn new(base_url: impl Into<String>, session: SessionManager) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            session,
        })
    }

    async fn auth_headers(&self) -> Result<header::HeaderMap, ApiError> {
        let token = self.session.get_valid_token().await?;
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| ApiError::InvalidToken)?,
        );
        Ok(headers)
    }

    fn request(&self, method: Method, id: Option<&str>) -> RequestBuilder {
        let builder = self.client.request(method, &self.base_url);
        match id {
            Some(id) => builder.query(&[("id", id)]),
            None => builder,
        }
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Send a request, backing off on 429. The token gate is consulted for
    /// every attempt so a long backoff never sends an expired token.
    async fn send(
        &self,
        method: Method,
        id: Option<&str>,
        body: Option<&Consultant>,
    ) -> Result<reqwest::Response, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut request = self
                .request(method.clone(), id)
                .headers(self.auth_headers().await?);
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Ok(response),
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(method = %method, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let text = response.text().await?;
        parse_body(&text)
    }

    // ===== Record Operations =====

    /// Fetch all consultant records
    pub async fn list(&self) -> Result<Vec<Consultant>, ApiError> {
        let response = self.send(Method::GET, None, None).await?;
        let consultants: Option<Vec<Consultant>> = Self::parse(response).await?;
        let consultants = consultants.unwrap_or_default();
        debug!(count = consultants.len(), "Fetched consultants");
        Ok(consultants)
    }

    pub async fn get(&self, id: &str) -> Result<Consultant, ApiError> {
        let response = self.send(Method::GET, Some(id), None).await?;
        Self::parse::<Option<Consultant>>(response)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("consultant {}", id)))
    }

    /// Create a record; returns it as stored, including its assigned id
    pub async fn create(&self, consultant: &Consultant) -> Result<Consultant, ApiError> {
        let response = self.send(Method::POST, None, Some(consultant)).await?;
        let created: Consultant = Self::parse(response).await?;
        debug!(id = ?created.id, "Created consultant");
        Ok(created)
    }

    pub async fn update(&self, id: &str, consultant: &Consultant) -> Result<Consultant, ApiError> {
        let response = self.send(Method::PUT, Some(id), Some(consultant)).await?;
        let text = response.text().await?;
        // Some backends answer an update with an empty body
        if text.trim().is_empty() {
            return Ok(Consultant {
                id: Some(id.to_string()),
                ..consultant.clone()
            });
        }
        parse_body(&text)
    }

    pub async fn delete(&self, id: &str) -> Result<(), ApiError> {
        self.send(Method::DELETE, Some(id), None).await?;
        debug!(id = id, "Deleted consultant");
        Ok(())
    }
}

fn parse_body<T: DeserializeOwned>(text: &str) -> Result<T, ApiError> {
    serde_json::from_str(text).map_err(|e| ApiError::InvalidResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::auth::{
        AuthError, IssuedTokens, MemorySessionStore, RefreshedTokens, Session, TokenIssuer,
        TokenRefresher,
    };

    struct Unreachable;

    #[async_trait]
    impl TokenIssuer for Unreachable {
        async fn sign_in(&self, _: &str, _: &str) -> Result<IssuedTokens, ApiError> {
            Err(ApiError::ServerError("unreachable".to_string()))
        }
    }

    #[async_trait]
    impl TokenRefresher for Unreachable {
        async fn refresh(&self, _: &str) -> Result<RefreshedTokens, ApiError> {
            Err(ApiError::ServerError("unreachable".to_string()))
        }
    }

    #[test]
    fn test_parse_list_body() {
        let list: Option<Vec<Consultant>> = parse_body(
            r#"[{"id":"1","firstName":"Ada","lastName":"Lovelace","email":"ada@example.com"}]"#,
        )
        .expect("parse list");
        assert_eq!(list.unwrap_or_default().len(), 1);

        let empty: Option<Vec<Consultant>> = parse_body("null").expect("parse null");
        assert!(empty.is_none());

        assert!(matches!(
            parse_body::<Consultant>("<html>"),
            Err(ApiError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_requests_blocked_without_session() {
        let identity = Arc::new(Unreachable);
        let session = SessionManager::new(
            identity.clone(),
            identity,
            Arc::new(MemorySessionStore::new()),
        );
        // Nothing listens on this port; the gate must refuse before connecting
        let client = ConsultantClient::new("http://127.0.0.1:9/consultants", session)
            .expect("client");

        let err = client.list().await.expect_err("list without session");
        assert!(matches!(err, ApiError::Session(AuthError::NotAuthenticated)));

        let err = client.delete("c-1").await.expect_err("delete without session");
        assert!(matches!(err, ApiError::Session(AuthError::NotAuthenticated)));
    }

    #[tokio::test]
    async fn test_unsendable_token_is_reported_as_token_error() {
        let identity = Arc::new(Unreachable);
        let session = Session {
            identifier: "a@b.com".to_string(),
            access_token: "T1\r\nX-Injected: 1".to_string(),
            refresh_token: "R1".to_string(),
            expires_at: chrono::Utc::now().timestamp_millis() + 3_600_000,
        };
        let manager = SessionManager::new(
            identity.clone(),
            identity,
            Arc::new(MemorySessionStore::with_session(&session).unwrap()),
        );
        let client = ConsultantClient::new("http://127.0.0.1:9/consultants", manager)
            .expect("client");

        assert!(matches!(client.auth_headers().await, Err(ApiError::InvalidToken)));
        assert!(matches!(client.list().await, Err(ApiError::InvalidToken)));
    }

    #[tokio::test]
    async fn test_valid_token_becomes_bearer_header() {
        let identity = Arc::new(Unreachable);
        let session = Session {
            identifier: "a@b.com".to_string(),
            access_token: "T1".to_string(),
            refresh_token: "R1".to_string(),
            expires_at: chrono::Utc::now().timestamp_millis() + 3_600_000,
        };
        let manager = SessionManager::new(
            identity.clone(),
            identity,
            Arc::new(MemorySessionStore::with_session(&session).unwrap()),
        );
        let client = ConsultantClient::new("http://127.0.0.1:9/consultants", manager)
            .expect("client");

        let headers = client.auth_headers().await.expect("headers");
        assert_eq!(headers[header::AUTHORIZATION], "Bearer T1");
    }

    #[test]
    fn test_single_record_requests_carry_id_query() {
        let identity = Arc::new(Unreachable);
        let session = SessionManager::new(
            identity.clone(),
            identity,
            Arc::new(MemorySessionStore::new()),
        );
        let client = ConsultantClient::new("https://api.example.com/consultants", session)
            .expect("client");

        let request = client.request(Method::DELETE, Some("c 1")).build().expect("build");
        assert_eq!(request.url().as_str(), "https://api.example.com/consultants?id=c+1");

        let request = client.request(Method::GET, None).build().expect("build");
        assert_eq!(request.url().query(), None);
    }
}
