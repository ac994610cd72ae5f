use std::sync::Arc;

use tracing::{info, warn};

use super::backend::IdentityBackend;
use super::session::{SessionEvent, SessionState, SignOutReason};
use super::Credential;

/// Ends a session when it cannot be refreshed or the user logs out.
///
/// Termination has a local half (drop the credential, tell the presentation
/// layer) and a remote half (revoke the refresh token). Only the local half
/// is guaranteed; the remote call is best-effort.
#[derive(Clone)]
pub struct SessionTerminator {
    session: Arc<SessionState>,
    backend: Arc<dyn IdentityBackend>,
}

impl SessionTerminator {
    pub fn new(session: Arc<SessionState>, backend: Arc<dyn IdentityBackend>) -> Self {
        Self { session, backend }
    }

    /// End the session. Returns `false` if there was nothing to end, in which
    /// case no event is emitted and the backend is not contacted.
    pub async fn terminate(&self, reason: SignOutReason) -> bool {
        let discarded = self.end_locally(reason);
        let ended = discarded.is_some();
        self.notify_backend(discarded).await;
        ended
    }

    /// Drop the credential and tell the presentation layer. Returns the
    /// discarded credential if this call was the one that ended the session.
    pub(crate) fn end_locally(&self, reason: SignOutReason) -> Option<Arc<Credential>> {
        let discarded = self.session.take()?;
        info!(?reason, "Session ended");
        self.session.emit(SessionEvent::SignedOut(reason));
        Some(discarded)
    }

    /// Like `end_locally`, but only if the session still holds the pair
    /// with `refresh_token`. A session replaced by a newer sign-in survives.
    pub(crate) fn end_if_current(
        &self,
        refresh_token: &str,
        reason: SignOutReason,
    ) -> Option<Arc<Credential>> {
        let discarded = self.session.take_if_current(refresh_token)?;
        info!(?reason, "Session ended");
        self.session.emit(SessionEvent::SignedOut(reason));
        Some(discarded)
    }

    pub(crate) async fn notify_backend(&self, discarded: Option<Arc<Credential>>) {
        let Some(credential) = discarded else {
            return;
        };
        if let Err(e) = self.backend.logout(&credential.refresh_token).await {
            warn!(error = %e, "Failed to notify identity backend of logout");
        }
    }
}
