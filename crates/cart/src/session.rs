//! Session oracle contract.
//!
//! The engine never owns authentication. It asks the oracle whether a customer
//! is signed in (to pick a strategy) and for the bearer credential (to call the
//! remote cart API).

use std::sync::{PoisonError, RwLock};

use secrecy::SecretString;

/// Answers "is there a currently authenticated user".
pub trait SessionOracle: Send + Sync {
    /// Whether a customer is signed in right now.
    fn is_authenticated(&self) -> bool;

    /// Bearer credential for the remote cart API, if signed in.
    fn current_credential(&self) -> Option<SecretString>;
}

/// A session whose credential is set explicitly.
///
/// Used by the CLI (token from the environment) and by tests that flip between
/// guest and signed-in modes.
#[derive(Default)]
pub struct StaticSession {
    token: RwLock<Option<SecretString>>,
}

impl StaticSession {
    /// A session with no signed-in customer.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A session signed in with `token`.
    #[must_use]
    pub fn authenticated(token: SecretString) -> Self {
        Self {
            token: RwLock::new(Some(token)),
        }
    }

    /// Sign in with `token`.
    pub fn login(&self, token: SecretString) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    /// Sign out.
    pub fn logout(&self) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl std::fmt::Debug for StaticSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticSession")
            .field("authenticated", &self.is_authenticated())
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl SessionOracle for StaticSession {
    fn is_authenticated(&self) -> bool {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn current_credential(&self) -> Option<SecretString> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
