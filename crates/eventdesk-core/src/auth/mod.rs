//! Authentication: credentials, token inspection, and the refresh protocol.
//!
//! This module provides:
//! - `Credential`: the access/refresh token pair
//! - `token`: fail-closed expiry checks on JWT access tokens
//! - `CredentialStore`: durable storage (file, OS keyring, memory)
//! - `SessionState`: the single in-memory owner of the current credential
//! - `RefreshCoordinator`: single-flight token refresh shared by all requests
//! - `SessionTerminator`: clears the session when refresh is impossible
//! - `AuthManager`: the above wired together, plus sign-in and logout

pub mod backend;
pub mod coordinator;
pub mod credential;
pub mod error;
pub mod manager;
pub mod session;
pub mod storage;
pub mod terminator;
pub mod token;

pub use backend::{HttpIdentityBackend, IdentityBackend};
pub use coordinator::RefreshCoordinator;
pub use credential::Credential;
pub use error::AuthError;
pub use manager::{AuthManager, AuthSettings, SessionStatus};
pub use session::{SessionEvent, SessionState, SignOutReason};
pub use storage::{
    CredentialStore, FileCredentialStore, KeyringCredentialStore, MemoryCredentialStore, StoreKind,
};
pub use terminator::SessionTerminator;
pub use token::{TokenError, TokenStatus};
