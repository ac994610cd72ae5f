use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast;
use tracing::info;

use super::backend::IdentityBackend;
use super::coordinator::RefreshCoordinator;
use super::session::{SessionEvent, SessionState, SignOutReason};
use super::storage::CredentialStore;
use super::terminator::SessionTerminator;
use super::token::{self, TokenStatus};
use super::{AuthError, Credential};

/// Default proactive refresh window (5 minutes)
pub const DEFAULT_REFRESH_WINDOW_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Start a background refresh when the access token expires within this window
    pub refresh_window: Duration,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            refresh_window: Duration::seconds(DEFAULT_REFRESH_WINDOW_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    SignedOut,
    Active {
        expires_at: Option<DateTime<Utc>>,
        status: TokenStatus,
    },
}

/// Everything that touches the credential, wired together.
/// Clone is cheap; clones share the session and the refresh state.
#[derive(Clone)]
pub struct AuthManager {
    session: Arc<SessionState>,
    backend: Arc<dyn IdentityBackend>,
    coordinator: RefreshCoordinator,
    terminator: SessionTerminator,
    settings: AuthSettings,
}

impl AuthManager {
    pub fn new(
        backend: Arc<dyn IdentityBackend>,
        store: Box<dyn CredentialStore>,
        settings: AuthSettings,
    ) -> Self {
        let session = Arc::new(SessionState::new(store));
        let terminator = SessionTerminator::new(Arc::clone(&session), Arc::clone(&backend));
        let coordinator =
            RefreshCoordinator::new(Arc::clone(&session), Arc::clone(&backend), terminator.clone());
        Self {
            session,
            backend,
            coordinator,
            terminator,
            settings,
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let credential = self.backend.sign_in(email, password).await?;
        self.session.replace(credential);
        info!("Signed in");
        self.session.emit(SessionEvent::SignedIn);
        Ok(())
    }

    /// User-initiated logout. Returns `false` if already signed out.
    pub async fn logout(&self) -> bool {
        self.terminator.terminate(SignOutReason::UserLogout).await
    }

    pub fn credential(&self) -> Option<Arc<Credential>> {
        self.session.current()
    }

    pub fn status(&self) -> SessionStatus {
        match self.session.current() {
            None => SessionStatus::SignedOut,
            Some(credential) => SessionStatus::Active {
                expires_at: credential.expires_at(),
                status: token::classify(&credential.access_token, self.settings.refresh_window),
            },
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.subscribe()
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }
}
