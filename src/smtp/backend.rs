//! Read-only state shared by every SMTP session

use std::fmt;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};

use crate::graph::MailDispatcher;

/// Whether clients must authenticate, and with which credential pair
#[derive(Clone)]
pub enum AuthPolicy {
    /// Any AUTH attempt succeeds and MAIL is accepted without one
    Disabled,
    /// MAIL is refused until AUTH PLAIN succeeds with this exact pair
    Required {
        username: String,
        password: SecretString,
    },
}

impl AuthPolicy {
    pub fn required(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Required {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    pub fn is_required(&self) -> bool {
        matches!(self, AuthPolicy::Required { .. })
    }

    /// Exact comparison of both halves of the pair
    pub fn verify(&self, username: &str, password: &str) -> bool {
        match self {
            AuthPolicy::Disabled => true,
            AuthPolicy::Required {
                username: expected_user,
                password: expected_pass,
            } => username == expected_user && password == expected_pass.expose_secret(),
        }
    }
}

impl fmt::Debug for AuthPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthPolicy::Disabled => f.write_str("Disabled"),
            AuthPolicy::Required { username, .. } => f
                .debug_struct("Required")
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

/// Everything a session needs beyond its own envelope state.
///
/// Built once at startup and shared behind an `Arc`; never mutated afterwards.
pub struct RelayBackend {
    auth: AuthPolicy,
    dispatcher: Arc<dyn MailDispatcher>,
}

impl RelayBackend {
    pub fn new(auth: AuthPolicy, dispatcher: Arc<dyn MailDispatcher>) -> Self {
        Self { auth, dispatcher }
    }

    pub fn auth(&self) -> &AuthPolicy {
        &self.auth
    }

    pub fn dispatcher(&self) -> &dyn MailDispatcher {
        self.dispatcher.as_ref()
    }
}

impl fmt::Debug for RelayBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayBackend")
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}
