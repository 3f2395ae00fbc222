//! Authentication module for managing the user's session.
//!
//! This module provides:
//! - `Session`: the access/refresh token pair with its absolute expiry
//! - `SessionManager`: login, logout and the `get_valid_token` gate
//! - `SessionStore`: durable storage for the session (file, keyring, memory)
//! - `TokenIssuer` / `TokenRefresher`: the remote exchanges the manager drives
//!
//! Access tokens are refreshed once they are within 60 seconds of expiry.

pub mod error;
pub mod manager;
pub mod session;
pub mod store;
pub mod tokens;

pub use error::AuthError;
pub use manager::{AuthStatus, SessionManager};
pub use session::{Session, REFRESH_MARGIN_MS};
pub use store::{
    open_store, FileSessionStore, KeyringSessionStore, MemorySessionStore, SessionBackend,
    SessionStore, StorageError,
};
pub use tokens::{IssuedTokens, RefreshedTokens, TokenIssuer, TokenRefresher};
