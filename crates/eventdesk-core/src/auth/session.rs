use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::storage::CredentialStore;
use super::Credential;

/// Capacity of the session event channel. Slow subscribers miss old events.
const EVENT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignOutReason {
    UserLogout,
    RefreshFailed(String),
}

/// Session lifecycle notifications for the presentation layer.
///
/// `SignedOut` means "send the user back to sign-in".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn,
    Refreshed,
    SignedOut(SignOutReason),
}

/// Owner of the current credential.
///
/// Readers get an `Arc` snapshot of the whole pair. Writers swap the
/// snapshot under the write lock and write through to the durable store in
/// the same critical section, so memory and store change in the same order.
/// The lock is never held across an `.await`.
pub struct SessionState {
    current: RwLock<Option<Arc<Credential>>>,
    store: Box<dyn CredentialStore>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionState {
    /// Create session state backed by `store`, loading anything it holds.
    ///
    /// A store that cannot be read is treated as empty.
    pub fn new(store: Box<dyn CredentialStore>) -> Self {
        let loaded = match store.load() {
            Ok(credential) => credential,
            Err(e) => {
                warn!(error = %e, "Failed to load stored credential");
                None
            }
        };
        debug!(has_credential = loaded.is_some(), "Session loaded");

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            current: RwLock::new(loaded.map(Arc::new)),
            store,
            events,
        }
    }

    /// Snapshot of the current credential
    pub fn current(&self) -> Option<Arc<Credential>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.current().is_some()
    }

    /// Atomically replace the credential pair
    pub fn replace(&self, credential: Credential) -> Arc<Credential> {
        let credential = Arc::new(credential);
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = Some(Arc::clone(&credential));
        if let Err(e) = self.store.save(&credential) {
            warn!(error = %e, "Failed to persist credential");
        }
        credential
    }

    /// Remove and return the credential. Only one caller ever gets `Some`
    /// for a given credential.
    pub fn take(&self) -> Option<Arc<Credential>> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let taken = current.take();
        if taken.is_some() {
            if let Err(e) = self.store.clear() {
                warn!(error = %e, "Failed to clear stored credential");
            }
        }
        taken
    }

    /// Replace the pair only if the session still holds `expected_refresh`.
    ///
    /// Returns `None` when the session was ended or replaced in the meantime,
    /// in which case nothing is written.
    pub fn replace_if_current(
        &self,
        expected_refresh: &str,
        credential: Credential,
    ) -> Option<Arc<Credential>> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if current.as_ref().map(|c| c.refresh_token.as_str()) != Some(expected_refresh) {
            return None;
        }
        let credential = Arc::new(credential);
        *current = Some(Arc::clone(&credential));
        if let Err(e) = self.store.save(&credential) {
            warn!(error = %e, "Failed to persist credential");
        }
        Some(credential)
    }

    /// Remove the credential only if it still holds `expected_refresh`
    pub fn take_if_current(&self, expected_refresh: &str) -> Option<Arc<Credential>> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if current.as_ref().map(|c| c.refresh_token.as_str()) != Some(expected_refresh) {
            return None;
        }
        let taken = current.take();
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear stored credential");
        }
        taken
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
