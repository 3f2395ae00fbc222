//! Session lifecycle: login, logout, startup validation and the token gate.
//!
//! The manager owns the only in-memory copy of the [`Session`] and mirrors
//! every change to its [`SessionStore`]. Authenticated callers go through
//! [`SessionManager::get_valid_token`], which refreshes lazily once the access
//! token is inside the safety margin. Concurrent callers that hit an expiring
//! token share one refresh exchange.

use std::sync::Arc;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use super::{AuthError, Session, SessionStore, TokenIssuer, TokenRefresher};

type RefreshFuture = BoxFuture<'static, Result<String, AuthError>>;

/// Authentication state as seen by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStatus {
    SignedOut,
    SignedIn { identifier: String },
}

impl AuthStatus {
    fn of(session: Option<&Session>) -> Self {
        match session {
            Some(session) => AuthStatus::SignedIn {
                identifier: session.identifier.clone(),
            },
            None => AuthStatus::SignedOut,
        }
    }

    pub fn is_signed_in(&self) -> bool {
        matches!(self, AuthStatus::SignedIn { .. })
    }
}

/// Owns the authenticated session. Clone is cheap and clones share state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    issuer: Arc<dyn TokenIssuer>,
    refresher: Arc<dyn TokenRefresher>,
    store: Arc<dyn SessionStore>,
    session: watch::Sender<Option<Session>>,
    status: watch::Sender<AuthStatus>,
    /// In-flight refresh, keyed by the refresh token it consumes. Held weakly:
    /// the waiters own the exchange, and it is dropped once none remain.
    pending_refresh: Mutex<Option<(String, WeakShared<RefreshFuture>)>>,
}

impl SessionManager {
    /// Create a manager, rehydrating whatever session the store holds.
    ///
    /// An unreadable record is treated as no session. No network call is made;
    /// use [`SessionManager::start`] to also validate the restored session.
    pub fn new(
        issuer: Arc<dyn TokenIssuer>,
        refresher: Arc<dyn TokenRefresher>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let session = match store.load() {
            Ok(session) => {
                debug!(found = session.is_some(), "Session loaded");
                session
            }
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable session record");
                None
            }
        };
        let status = AuthStatus::of(session.as_ref());

        Self {
            inner: Arc::new(Inner {
                issuer,
                refresher,
                store,
                session: watch::Sender::new(session),
                status: watch::Sender::new(status),
                pending_refresh: Mutex::new(None),
            }),
        }
    }

    /// Create a manager and validate the restored session.
    ///
    /// A restored session whose access token has already expired is refreshed
    /// once; if that fails the session is discarded rather than surfaced.
    pub async fn start(
        issuer: Arc<dyn TokenIssuer>,
        refresher: Arc<dyn TokenRefresher>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let manager = Self::new(issuer, refresher, store);
        manager.validate_restored().await;
        manager
    }

    async fn validate_restored(&self) {
        let refresh_token = match self.inner.session.borrow().as_ref() {
            Some(session) if session.is_expired() => session.refresh_token.clone(),
            _ => return,
        };

        info!("Restored session has expired, refreshing");
        if let Err(e) = self.refresh_single_flight(refresh_token).await {
            warn!(error = %e, "Could not refresh restored session, logging out");
            self.logout();
        }
    }

    /// Exchange credentials for a new session, replacing any existing one.
    /// On failure the current session is left as it was.
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<(), AuthError> {
        let issued = self
            .inner
            .issuer
            .sign_in(identifier, secret)
            .await
            .map_err(AuthError::authentication)?;

        let session = Session::from_issued(issued, Utc::now());
        info!(identifier = %session.identifier, "Login successful");
        self.inner.replace(Some(session));
        Ok(())
    }

    /// Drop the session from memory and storage.
    pub fn logout(&self) {
        if self.inner.session.borrow().is_none() {
            return;
        }
        self.inner.replace(None);
        info!("Logged out");
    }

    /// Return an access token that stays valid for at least the safety margin.
    ///
    /// Refresh failures are returned to the caller and leave the session in
    /// place; only startup validation logs out on a failed refresh.
    pub async fn get_valid_token(&self) -> Result<String, AuthError> {
        let refresh_token = {
            let current = self.inner.session.borrow();
            let session = current.as_ref().ok_or(AuthError::NotAuthenticated)?;
            if !session.needs_refresh() {
                return Ok(session.access_token.clone());
            }
            session.refresh_token.clone()
        };

        debug!("Access token inside refresh margin");
        self.refresh_single_flight(refresh_token).await
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.session.borrow().is_some()
    }

    pub fn current_user_identifier(&self) -> Option<String> {
        self.inner
            .session
            .borrow()
            .as_ref()
            .map(|session| session.identifier.clone())
    }

    /// Snapshot of the current session
    pub fn session(&self) -> Option<Session> {
        self.inner.session.borrow().clone()
    }

    pub fn status(&self) -> AuthStatus {
        self.inner.status.borrow().clone()
    }

    /// Receive a notification whenever the user signs in or out.
    pub fn subscribe(&self) -> watch::Receiver<AuthStatus> {
        self.inner.status.subscribe()
    }

    async fn refresh_single_flight(&self, refresh_token: String) -> Result<String, AuthError> {
        let pending = {
            let mut slot = self.inner.pending_refresh.lock().await;
            let joined = match slot.as_ref() {
                Some((key, pending)) if *key == refresh_token => pending.upgrade(),
                _ => None,
            };
            match joined {
                Some(pending) => {
                    debug!("Joining in-flight token refresh");
                    pending
                }
                None => {
                    let inner = Arc::clone(&self.inner);
                    let key = refresh_token.clone();
                    let pending: Shared<RefreshFuture> =
                        async move { inner.refresh(refresh_token).await }
                            .boxed()
                            .shared();
                    *slot = pending.downgrade().map(|weak| (key, weak));
                    pending
                }
            }
        };
        pending.await
    }
}

impl Inner {
    /// Swap the in-memory session and write it through to storage.
    fn replace(&self, session: Option<Session>) {
        let status = AuthStatus::of(session.as_ref());
        self.session.send_replace(session);
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
        self.persist(self.session.borrow().as_ref());
    }

    fn persist(&self, session: Option<&Session>) {
        if let Err(e) = self.store.save(session) {
            warn!(error = %e, "Failed to persist session");
        }
    }

    async fn refresh(self: Arc<Self>, refresh_token: String) -> Result<String, AuthError> {
        let result = self.refresher.refresh(&refresh_token).await;

        // Install before clearing the slot so late callers never refresh
        // with a token that has already been rotated.
        let outcome = match result {
            Ok(tokens) => {
                let now = Utc::now();
                let mut installed = None;
                self.session.send_if_modified(|current| match current {
                    Some(session) if session.refresh_token == refresh_token => {
                        let next = session.refreshed(tokens, now);
                        installed = Some(next.clone());
                        *session = next;
                        true
                    }
                    _ => false,
                });

                match installed {
                    Some(session) => {
                        self.persist(Some(&session));
                        info!(identifier = %session.identifier, "Access token refreshed");
                        Ok(session.access_token)
                    }
                    None => {
                        // Logout or a new login happened while the exchange was in flight
                        debug!("Session changed during refresh, discarding result");
                        self.session
                            .borrow()
                            .as_ref()
                            .map(|session| session.access_token.clone())
                            .ok_or(AuthError::NotAuthenticated)
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                Err(AuthError::refresh(e))
            }
        };

        let mut slot = self.pending_refresh.lock().await;
        if slot.as_ref().is_some_and(|(key, _)| *key == refresh_token) {
            *slot = None;
        }
        outcome
    }
}
