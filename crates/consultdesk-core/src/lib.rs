//! consultdesk core - session management, API clients, models and config.
//!
//! The centre of the crate is [`auth::SessionManager`]: it signs the user in,
//! keeps the access/refresh token pair persisted across restarts, refreshes
//! the access token before it expires, and hands out valid tokens to the
//! [`api::ConsultantClient`].

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiError, ConsultantClient, IdentityClient};
pub use auth::{AuthError, AuthStatus, Session, SessionManager};
pub use config::Config;
pub use models::Consultant;
