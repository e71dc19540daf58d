//! REST access to the Pulseboard service.
//!
//! Every request carries the current bearer token. A 401 triggers one shared
//! token refresh through [`AuthSession`] and a single replay of the request.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;

pub use auth::{AuthSession, HttpTokenRefresher, LogoutReason, TokenRefresher};
pub use client::{is_auth_exempt, ApiClient};
pub use config::ApiConfig;
pub use error::{ApiError, AuthError};
