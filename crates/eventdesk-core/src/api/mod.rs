//! REST API client module for the event portal.
//!
//! This module provides the `ApiClient`, the request pipeline every portal
//! call goes through. It injects the bearer token from the session and
//! hides token expiry from callers by refreshing and retrying once.

pub mod client;
pub mod error;
pub mod pending;

pub use client::ApiClient;
pub use error::ApiError;
pub use pending::PendingRequest;
