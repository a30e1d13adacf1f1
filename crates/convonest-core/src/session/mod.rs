//! Session store: who is signed in, and how to prove it.
//!
//! The store is the only owner of the current principal. Anything that needs
//! it (the request gateway, the forum facade, the CLI) is handed an
//! `Arc<SessionStore>` and may subscribe to transitions.
//!
//! ```text
//! Anonymous ──login──▶ Authenticating ──ok──▶ Authenticated
//!     ▲                     │                      │
//!     └──────── failed ─────┘                      │
//!     └────────────── logout / invalidate ─────────┘
//! ```
//!
//! Subscribers are called synchronously, after the state has changed and
//! outside of any lock, so they may read the store.

pub mod cache;
pub mod identity;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use convonest_types::Principal;
pub use identity::{
    Credential, IdentityError, IdentityFuture, IdentityProvider, Registration,
    RestIdentityProvider,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticating,
    Authenticated(Principal),
}

impl SessionState {
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            SessionState::Authenticated(principal) => Some(principal),
            SessionState::Anonymous | SessionState::Authenticating => None,
        }
    }
}

/// Why a transition happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionReason {
    LoginStarted,
    LoggedIn,
    LoginFailed,
    Restored,
    LoggedOut,
    /// Forced teardown, e.g. the backend answered 401/403.
    Invalidated(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTransition {
    pub from: SessionState,
    pub to: SessionState,
    pub reason: TransitionReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&SessionTransition) + Send + Sync>;

pub struct SessionStore {
    provider: Arc<dyn IdentityProvider>,
    state: Mutex<SessionState>,
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
    next_subscription: AtomicU64,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("state", &*self.state())
            .field("listeners_len", &self.lock_listeners().len())
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            provider,
            state: Mutex::new(SessionState::Anonymous),
            listeners: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(0),
        }
    }

    /// Rehydrates the session remembered by the identity provider.
    ///
    /// Returns the restored principal, if any.
    pub fn restore(&self) -> Option<Principal> {
        let principal = self.provider.restore()?;
        tracing::info!(user = %principal.identifier, "Restored session");
        self.transition(
            SessionState::Authenticated(principal.clone()),
            TransitionReason::Restored,
        );
        Some(principal)
    }

    pub fn current_principal(&self) -> Option<Principal> {
        self.state().principal().cloned()
    }

    pub fn snapshot(&self) -> SessionState {
        self.state().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state().principal().is_some()
    }

    /// Resolves the bearer credential for the current principal.
    ///
    /// Uses the provider's cached token; the network is only involved once
    /// that token has expired.
    ///
    /// # Errors
    /// `NotSignedIn` when anonymous, otherwise whatever the provider reports.
    pub async fn credential(&self) -> Result<Credential, IdentityError> {
        if !self.is_authenticated() {
            return Err(IdentityError::NotSignedIn);
        }
        self.provider.id_token().await
    }

    /// Signs in with email and password.
    ///
    /// # Errors
    /// Returns the provider's error; the store is back to `Anonymous` then.
    pub async fn login(&self, email: &str, password: &str) -> Result<Principal, IdentityError> {
        self.transition(SessionState::Authenticating, TransitionReason::LoginStarted);
        let result = self.provider.sign_in(email, password).await;
        self.finish_login(result)
    }

    /// Signs in with a Google ID token.
    ///
    /// # Errors
    /// Returns the provider's error; the store is back to `Anonymous` then.
    pub async fn login_with_google(&self, id_token: &str) -> Result<Principal, IdentityError> {
        self.transition(SessionState::Authenticating, TransitionReason::LoginStarted);
        let result = self.provider.sign_in_with_google(id_token).await;
        self.finish_login(result)
    }

    /// Creates an account and signs it in.
    ///
    /// # Errors
    /// Returns the provider's error; the store is back to `Anonymous` then.
    pub async fn register(&self, registration: &Registration) -> Result<Principal, IdentityError> {
        self.transition(SessionState::Authenticating, TransitionReason::LoginStarted);
        let result = self.provider.sign_up(registration).await;
        self.finish_login(result)
    }

    /// Explicit logout. Always ends anonymous.
    ///
    /// # Errors
    /// Returns an error if persisted credentials could not be removed.
    pub fn logout(&self) -> Result<(), IdentityError> {
        let cleared = self.provider.sign_out();
        if self.state().principal().is_some() {
            self.transition(SessionState::Anonymous, TransitionReason::LoggedOut);
        }
        cleared
    }

    /// Forced teardown. Only an authenticated session transitions, so
    /// concurrent callers tear it down once; returns whether this call did.
    pub fn invalidate(&self, reason: &str) -> bool {
        let from = {
            let mut state = self.state();
            if state.principal().is_none() {
                return false;
            }
            std::mem::replace(&mut *state, SessionState::Anonymous)
        };

        if let Err(e) = self.provider.sign_out() {
            tracing::warn!("Failed to clear stored credentials: {e}");
        }
        tracing::info!(reason, "Session invalidated");
        self.notify(&SessionTransition {
            from,
            to: SessionState::Anonymous,
            reason: TransitionReason::Invalidated(reason.to_string()),
        });
        true
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&SessionTransition) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.lock_listeners().push((id, Arc::new(listener)));
        id
    }

    /// Returns whether the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.lock_listeners();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn finish_login(
        &self,
        result: Result<Principal, IdentityError>,
    ) -> Result<Principal, IdentityError> {
        match result {
            Ok(principal) => {
                tracing::info!(user = %principal.identifier, "Logged in");
                self.transition(
                    SessionState::Authenticated(principal.clone()),
                    TransitionReason::LoggedIn,
                );
                Ok(principal)
            }
            Err(e) => {
                tracing::debug!("Login failed: {e}");
                self.transition(SessionState::Anonymous, TransitionReason::LoginFailed);
                Err(e)
            }
        }
    }

    fn transition(&self, to: SessionState, reason: TransitionReason) {
        let from = std::mem::replace(&mut *self.state(), to.clone());
        self.notify(&SessionTransition { from, to, reason });
    }

    fn notify(&self, transition: &SessionTransition) {
        let listeners: Vec<Listener> = self
            .lock_listeners()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(transition);
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<(SubscriptionId, Listener)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
