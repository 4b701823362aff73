//! Authentication state and gating of protected actions.

use crate::error::{DashboardError, DashboardResult};
use crate::persistence::{KeyValueStore, PersistenceBridge};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Storage key of the session token.
pub const TOKEN_KEY: &str = "authToken";
/// Storage key of the signed-in user's identity.
pub const USER_KEY: &str = "user";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Anonymous,
    Authenticating,
    Authenticated,
}

/// Username and password as submitted on the login form.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// What a successful credential check hands back.
#[derive(Clone, Debug, PartialEq)]
pub struct Grant {
    pub token: String,
    pub user: Value,
}

/// The credential validation endpoint.
pub trait CredentialValidator: Send + Sync {
    /// Check a username/password pair. A rejection is a `Validation` error
    /// carrying the message to show the user.
    fn validate(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = DashboardResult<Grant>> + Send;

    /// Whether a previously issued token is still accepted.
    fn validate_token(&self, token: &str) -> impl Future<Output = DashboardResult<bool>> + Send;

    /// Revoke a token on the remote side.
    fn sign_out(&self, token: &str) -> impl Future<Output = DashboardResult<()>> + Send;
}

impl<V: CredentialValidator> CredentialValidator for Arc<V> {
    fn validate(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = DashboardResult<Grant>> + Send {
        (**self).validate(credentials)
    }

    fn validate_token(&self, token: &str) -> impl Future<Output = DashboardResult<bool>> + Send {
        (**self).validate_token(token)
    }

    fn sign_out(&self, token: &str) -> impl Future<Output = DashboardResult<()>> + Send {
        (**self).sign_out(token)
    }
}

/// How a persisted token is treated at startup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionRestore {
    /// A persisted token is trusted as is.
    #[default]
    Optimistic,
    /// A persisted token is checked with the validator first; a rejected one
    /// is discarded.
    Revalidate,
}

impl SessionRestore {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "optimistic" => Some(SessionRestore::Optimistic),
            "revalidate" => Some(SessionRestore::Revalidate),
            _ => None,
        }
    }
}

/// Token and identity of the current session. Replaced or cleared whole.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Session {
    pub token: Option<String>,
    pub user: Option<Value>,
}

/// The view or action a user was heading to when a gate stopped them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Intent(pub String);

impl Intent {
    pub fn new(target: impl Into<String>) -> Self {
        Intent(target.into())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Gate {
    Proceed(Intent),
    RedirectToLogin,
}

pub struct SessionGuard<K, V> {
    bridge: PersistenceBridge<K>,
    validator: V,
    state: SessionState,
    session: Session,
    pending: Option<Intent>,
    last_error: Option<String>,
}

impl<K: KeyValueStore, V: CredentialValidator> SessionGuard<K, V> {
    /// Build the guard from whatever session was persisted.
    pub async fn restore(bridge: PersistenceBridge<K>, validator: V, policy: SessionRestore) -> Self {
        let mut guard = SessionGuard {
            bridge,
            validator,
            state: SessionState::Anonymous,
            session: Session::default(),
            pending: None,
            last_error: None,
        };

        let token = match guard.bridge.load::<String>(TOKEN_KEY) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                log::warn!("persisted session token unreadable: {}", e);
                guard.last_error = Some(e.to_string());
                None
            }
        };
        let Some(token) = token else {
            return guard;
        };

        if policy == SessionRestore::Revalidate {
            match guard.validator.validate_token(&token).await {
                Ok(true) => {}
                Ok(false) => {
                    log::info!("persisted session token was rejected");
                    guard.clear_persisted();
                    return guard;
                }
                Err(e) => {
                    log::warn!("could not revalidate session, trusting stored token: {}", e);
                    guard.last_error = Some(e.to_string());
                }
            }
        }

        let user = guard.bridge.load::<Value>(USER_KEY).unwrap_or_else(|e| {
            log::warn!("persisted user identity unreadable: {}", e);
            None
        });
        guard.session = Session {
            token: Some(token),
            user,
        };
        guard.state = SessionState::Authenticated;
        guard
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current token and user, both `None` when anonymous.
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn user(&self) -> Option<&Value> {
        self.session.user.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    /// Message of the last failure seen by the guard. A successful login clears it.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn validator(&self) -> &V {
        &self.validator
    }

    /// Check credentials and, on success, persist and adopt the new session.
    ///
    /// A rejection leaves the current session as it was.
    pub async fn login(&mut self, credentials: &Credentials) -> DashboardResult<()> {
        if credentials.username.trim().is_empty() || credentials.password.is_empty() {
            let e = DashboardError::Validation("missing_credentials".to_string());
            self.last_error = Some(e.to_string());
            return Err(e);
        }

        let previous = self.state;
        self.state = SessionState::Authenticating;

        let grant = match self.validator.validate(credentials).await {
            Ok(grant) => grant,
            Err(e) => {
                log::info!("login rejected for {}: {}", credentials.username, e);
                self.state = previous;
                self.last_error = Some(e.to_string());
                return Err(e);
            }
        };

        let persisted = self
            .bridge
            .store(TOKEN_KEY, &grant.token)
            .and_then(|()| self.bridge.store(USER_KEY, &grant.user));
        if let Err(e) = persisted {
            log::error!("session could not be persisted: {}", e);
            self.restore_persisted();
            self.state = previous;
            self.last_error = Some(e.to_string());
            return Err(e);
        }

        log::info!("{} signed in", credentials.username);
        self.session = Session {
            token: Some(grant.token),
            user: Some(grant.user),
        };
        self.state = SessionState::Authenticated;
        self.last_error = None;
        Ok(())
    }

    /// End the session. Always succeeds locally; a failing remote sign-out is
    /// only logged.
    pub async fn logout(&mut self) {
        if let Some(token) = self.session.token.take() {
            if let Err(e) = self.validator.sign_out(&token).await {
                log::warn!("remote sign-out failed: {}", e);
            }
        }
        self.clear_persisted();
        self.pending = None;
        log::info!("signed out");
    }

    /// Let an action through when signed in. Otherwise remember it and ask
    /// for a login.
    pub fn gate(&mut self, intent: Intent) -> Gate {
        if self.is_authenticated() {
            Gate::Proceed(intent)
        } else {
            log::debug!("{} needs a login first", intent.0);
            self.pending = Some(intent);
            Gate::RedirectToLogin
        }
    }

    pub fn pending_intent(&self) -> Option<&Intent> {
        self.pending.as_ref()
    }

    /// The intent a gate held back, once the user has signed in.
    pub fn take_resume(&mut self) -> Option<Intent> {
        if self.is_authenticated() {
            self.pending.take()
        } else {
            None
        }
    }

    fn clear_persisted(&mut self) {
        for key in [TOKEN_KEY, USER_KEY] {
            if let Err(e) = self.bridge.remove(key) {
                log::warn!("could not remove {}: {}", key, e);
                self.last_error = Some(e.to_string());
            }
        }
        self.session = Session::default();
        self.state = SessionState::Anonymous;
    }

    /// Put the in-memory session back into storage after a failed write.
    fn restore_persisted(&self) {
        let result = match &self.session.token {
            Some(token) => self
                .bridge
                .store(TOKEN_KEY, token)
                .and_then(|()| match &self.session.user {
                    Some(user) => self.bridge.store(USER_KEY, user),
                    None => self.bridge.remove(USER_KEY),
                }),
            None => self
                .bridge
                .remove(TOKEN_KEY)
                .and_then(|()| self.bridge.remove(USER_KEY)),
        };
        if let Err(e) = result {
            log::warn!("previous session not restored in storage: {}", e);
        }
    }
}
