//! REST API clients.
//!
//! This module provides the `IdentityClient` for the sign-in and refresh
//! exchanges and the `ConsultantClient` for consultant records.
//!
//! Consultant requests use bearer token authentication; tokens come from the
//! `SessionManager`, which obtains them through the `IdentityClient`.

pub mod client;
pub mod error;
pub mod identity;

pub use client::ConsultantClient;
pub use error::ApiError;
pub use identity::IdentityClient;
