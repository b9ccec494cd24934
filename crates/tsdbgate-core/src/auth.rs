//! Authentication oracle.
//!
//! The filtering backend asks an [`Authenticator`] whether a
//! `(user, password)` pair found on a line is allowed through. The proxy
//! never looks behind this trait, so any credential store can be plugged
//! in. [`StaticAuthenticator`] is the table-backed implementation built
//! from `[[auth.users]]`.

use std::collections::HashMap;

use tracing::debug;

use crate::config::UserEntry;

/// Answers whether a credential pair is valid.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, user: &str, password: &str) -> bool;
}

impl<F> Authenticator for F
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    fn authenticate(&self, user: &str, password: &str) -> bool {
        self(user, password)
    }
}

/// Fixed user table loaded from configuration.
pub struct StaticAuthenticator {
    /// username -> password
    users: HashMap<String, String>,
}

impl std::fmt::Debug for StaticAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticAuthenticator")
            .field("user_count", &self.users.len())
            .finish_non_exhaustive()
    }
}

impl StaticAuthenticator {
    pub fn new<I, U, P>(users: I) -> Self
    where
        I: IntoIterator<Item = (U, P)>,
        U: Into<String>,
        P: Into<String>,
    {
        Self {
            users: users
                .into_iter()
                .map(|(u, p)| (u.into(), p.into()))
                .collect(),
        }
    }

    pub fn from_entries(entries: &[UserEntry]) -> Self {
        Self::new(
            entries
                .iter()
                .map(|e| (e.user.clone(), e.password.clone())),
        )
    }
}

impl Authenticator for StaticAuthenticator {
    fn authenticate(&self, user: &str, password: &str) -> bool {
        let ok = self
            .users
            .get(user)
            .is_some_and(|stored| stored == password);
        if !ok {
            debug!(user, "credential check failed");
        }
        ok
    }
}
