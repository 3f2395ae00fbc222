use std::sync::Arc;

use thiserror::Error;

use crate::api::ApiError;

/// Failures surfaced by the session manager.
///
/// `Clone` so a single refresh outcome can be handed to every caller waiting
/// on it; the underlying transport error is shared behind an `Arc`.
#[derive(Error, Debug, Clone)]
pub enum AuthError {
    #[error("Authentication failed: {0}")]
    Authentication(Arc<ApiError>),

    #[error("Not authenticated - please log in")]
    NotAuthenticated,

    #[error("Token refresh failed: {0}")]
    Refresh(Arc<ApiError>),
}

impl AuthError {
    pub fn authentication(err: ApiError) -> Self {
        AuthError::Authentication(Arc::new(err))
    }

    pub fn refresh(err: ApiError) -> Self {
        AuthError::Refresh(Arc::new(err))
    }

    /// Message suitable for showing to the person at the keyboard
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Authentication(cause) => match cause.as_ref() {
                ApiError::Unauthorized | ApiError::BadRequest(_) | ApiError::AccessDenied(_) => {
                    "Invalid email or password".to_string()
                }
                ApiError::NetworkError(e) if e.is_timeout() => {
                    "Connection timed out. Please try again.".to_string()
                }
                ApiError::NetworkError(_) => {
                    "Unable to connect to server. Check your internet connection.".to_string()
                }
                ApiError::RateLimited => "Too many attempts. Please wait and try again.".to_string(),
                other => format!("Login failed: {}", other),
            },
            AuthError::NotAuthenticated => "You are not logged in".to_string(),
            AuthError::Refresh(_) => "Your session could not be renewed. Please log in again.".to_string(),
        }
    }
}
