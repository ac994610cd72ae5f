//! Single-flight refresh of the access token.
//!
//! Any number of requests may discover at the same moment that their access
//! token is no longer accepted. The coordinator lets exactly one of them
//! start an exchange with the identity backend; everyone else queues behind
//! it and receives the same outcome, in arrival order.
//!
//! The state lives in a `std::sync::Mutex` that is only ever held for a
//! check-and-set and never across an `.await`, so two callers can never both
//! observe `Idle` and both start an exchange. The exchange itself runs in a
//! spawned task: callers that give up waiting do not cancel it, and the
//! remaining waiters are always settled.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::backend::IdentityBackend;
use super::session::{SessionEvent, SessionState, SignOutReason};
use super::terminator::SessionTerminator;
use super::{AuthError, Credential};

type Waiter = oneshot::Sender<Result<String, AuthError>>;

enum RefreshState {
    Idle,
    Refreshing { waiters: Vec<Waiter> },
}

/// What a caller has to do after the check-and-set.
enum Ticket {
    /// A token newer than the caller's is already stored
    Ready(String),
    /// Wait for the exchange that is (now) in flight
    Wait(oneshot::Receiver<Result<String, AuthError>>),
    Failed(AuthError),
}

struct Inner {
    state: Mutex<RefreshState>,
    session: Arc<SessionState>,
    backend: Arc<dyn IdentityBackend>,
    terminator: SessionTerminator,
}

/// Clone is cheap; clones share one state machine.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        session: Arc<SessionState>,
        backend: Arc<dyn IdentityBackend>,
        terminator: SessionTerminator,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RefreshState::Idle),
                session,
                backend,
                terminator,
            }),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.inner.lock_state(), RefreshState::Refreshing { .. })
    }

    /// Get an access token newer than `stale`, the token the caller's
    /// request was rejected with.
    ///
    /// If a refresh has already replaced `stale` the current token is
    /// returned immediately. Otherwise the caller starts an exchange or joins
    /// the one in flight.
    pub async fn refreshed_token(&self, stale: Option<&str>) -> Result<String, AuthError> {
        let ticket = {
            let mut state = self.inner.lock_state();
            if let RefreshState::Refreshing { waiters } = &mut *state {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                debug!(position = waiters.len(), "Joined in-flight token refresh");
                Ticket::Wait(rx)
            } else {
                match self.inner.session.current() {
                    None => Ticket::Failed(AuthError::NotSignedIn),
                    Some(current) if stale != Some(current.access_token.as_str()) => {
                        debug!("Access token already refreshed");
                        Ticket::Ready(current.access_token.clone())
                    }
                    Some(current) => {
                        let (tx, rx) = oneshot::channel();
                        *state = RefreshState::Refreshing { waiters: vec![tx] };
                        debug!("Starting token refresh");
                        self.spawn_exchange(current.refresh_token.clone());
                        Ticket::Wait(rx)
                    }
                }
            }
        };

        match ticket {
            Ticket::Ready(token) => Ok(token),
            Ticket::Failed(err) => Err(err),
            Ticket::Wait(rx) => rx.await.unwrap_or(Err(AuthError::Abandoned)),
        }
    }

    /// Start a background refresh if none is running.
    ///
    /// Returns whether this call started one.
    pub fn refresh_ahead(&self) -> bool {
        let mut state = self.inner.lock_state();
        if !matches!(*state, RefreshState::Idle) {
            return false;
        }
        let Some(current) = self.inner.session.current() else {
            return false;
        };
        *state = RefreshState::Refreshing {
            waiters: Vec::new(),
        };
        debug!("Starting proactive token refresh");
        self.spawn_exchange(current.refresh_token.clone());
        true
    }

    // Called with the state lock held, right after the Idle -> Refreshing
    // transition. Spawning does not suspend.
    fn spawn_exchange(&self, refresh_token: String) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let outcome = inner.backend.refresh(&refresh_token).await;
            inner.settle(&refresh_token, outcome).await;
        });
    }
}

impl Inner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish the exchange outcome and return to Idle.
    ///
    /// `exchanged` is the refresh token the exchange was started with. If the
    /// session no longer holds it (signed out or signed in again meanwhile)
    /// the outcome is dropped and waiters get whatever the session holds now.
    async fn settle(&self, exchanged: &str, outcome: Result<Credential, AuthError>) {
        match outcome {
            Ok(credential) => {
                // Store first: anyone who sees Idle afterwards sees the new pair
                let Some(credential) = self.session.replace_if_current(exchanged, credential)
                else {
                    info!("Session changed during token refresh, discarding result");
                    self.settle_superseded();
                    return;
                };
                let waiters = self.drain();
                info!(waiters = waiters.len(), "Token refresh succeeded");
                for waiter in waiters {
                    let _ = waiter.send(Ok(credential.access_token.clone()));
                }
                self.session.emit(SessionEvent::Refreshed);
            }
            Err(err) => {
                let reason = SignOutReason::RefreshFailed(err.to_string());
                let Some(discarded) = self.terminator.end_if_current(exchanged, reason) else {
                    info!(error = %err, "Token refresh failed after session changed");
                    self.settle_superseded();
                    return;
                };
                warn!(error = %err, "Token refresh failed, ending session");
                let waiters = self.drain();
                for waiter in waiters {
                    let _ = waiter.send(Err(err.clone()));
                }
                self.terminator.notify_backend(Some(discarded)).await;
            }
        }
    }

    fn settle_superseded(&self) {
        let current = self.session.current();
        for waiter in self.drain() {
            let result = match &current {
                Some(credential) => Ok(credential.access_token.clone()),
                None => Err(AuthError::NotSignedIn),
            };
            let _ = waiter.send(result);
        }
    }

    fn drain(&self) -> Vec<Waiter> {
        let mut state = self.lock_state();
        match std::mem::replace(&mut *state, RefreshState::Idle) {
            RefreshState::Refreshing { waiters } => waiters,
            RefreshState::Idle => Vec::new(),
        }
    }
}
