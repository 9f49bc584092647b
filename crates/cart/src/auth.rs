//! Auth state shared between the sign-in flow and the cart.
//!
//! The current session lives in a `tokio::sync::watch` channel. Whoever owns
//! sign-in calls [`AuthState::login`] / [`AuthState::logout`]; the cart reads
//! the current value at the start of each operation and follows transitions
//! through [`AuthState::subscribe`].

use std::sync::Arc;

use secrecy::SecretString;
use tokio::sync::watch;
use varketplace_core::UserId;

/// An authenticated session: who is signed in and the bearer token to send.
///
/// Implements `Debug` manually to redact the token.
#[derive(Clone)]
pub struct AuthSession {
    user_id: UserId,
    token: SecretString,
}

impl AuthSession {
    #[must_use]
    pub const fn new(user_id: UserId, token: SecretString) -> Self {
        Self { user_id, token }
    }

    #[must_use]
    pub const fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub const fn token(&self) -> &SecretString {
        &self.token
    }
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("user_id", &self.user_id)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Whether the cart is currently backed by local storage or the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartMode {
    Guest,
    Authenticated,
}

/// Handle on the current session.
///
/// Cheaply cloneable; all clones share one channel.
#[derive(Clone)]
pub struct AuthState {
    tx: Arc<watch::Sender<Option<AuthSession>>>,
}

impl AuthState {
    /// Start signed out.
    #[must_use]
    pub fn new() -> Self {
        Self::with_session(None)
    }

    /// Start with an optional session.
    #[must_use]
    pub fn with_session(session: Option<AuthSession>) -> Self {
        let (tx, _rx) = watch::channel(session);
        Self { tx: Arc::new(tx) }
    }

    /// Current session, if any.
    #[must_use]
    pub fn current(&self) -> Option<AuthSession> {
        self.tx.borrow().clone()
    }

    #[must_use]
    pub fn mode(&self) -> CartMode {
        if self.tx.borrow().is_some() {
            CartMode::Authenticated
        } else {
            CartMode::Guest
        }
    }

    /// Replace the session. Subscribers see the change even with no receiver
    /// currently alive.
    pub fn login(&self, session: AuthSession) {
        tracing::info!(user_id = %session.user_id(), "Session started");
        self.tx.send_replace(Some(session));
    }

    pub fn logout(&self) {
        if self.tx.send_replace(None).is_some() {
            tracing::info!("Session ended");
        }
    }

    /// Receiver for session transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<AuthSession>> {
        self.tx.subscribe()
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("mode", &self.mode())
            .finish()
    }
}
