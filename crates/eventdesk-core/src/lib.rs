//! Core library for eventdesk.
//!
//! Provides the authenticated API client used by every eventdesk front end:
//!
//! - `auth`: credentials, token inspection, storage, and the single-flight
//!   refresh protocol
//! - `api`: the request pipeline that injects bearer tokens and transparently
//!   retries after a refresh
//! - `config`: on-disk configuration and directory locations

pub mod api;
pub mod auth;
pub mod config;

pub use api::{ApiClient, ApiError};
pub use auth::{AuthError, AuthManager, AuthSettings, Credential, SessionEvent};
pub use config::Config;
