//! Message backends.
//!
//! A [`Backend`] decides what happens to each framed message. One
//! instance is built at startup and shared by every session, so
//! implementations keep any mutable state behind their own locks.
//!
//! | backend | behavior |
//! |---------|----------|
//! | [`MockBackend`] | records messages, answers `version\n` locally |
//! | [`ForwardingBackend`] | sends messages upstream verbatim |
//! | [`FilteringBackend`] | drops unauthorized lines, then forwards |
//!
//! `handle` returning `None` tells the session to close the connection.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tracing::{debug, error, warn};

use tsdbgate_core::{
    Authenticator, BackendSettings, StaticAuthenticator, UpstreamSettings, VERSION_COMMAND,
    filter_authorized, is_empty_batch,
};

use crate::upstream::UpstreamConnector;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Handles one framed message and optionally produces a response.
pub trait Backend: Send + Sync {
    /// Short name used in logs.
    fn kind(&self) -> &'static str;

    fn handle<'a>(&'a self, message: &'a [u8]) -> BoxFuture<'a, Option<Vec<u8>>>;
}

/// Build the backend described by validated settings.
pub fn build_backend(settings: &BackendSettings, chunk_size: usize) -> Arc<dyn Backend> {
    match settings {
        BackendSettings::Mock { version } => Arc::new(MockBackend::new(version.clone())),
        BackendSettings::Forwarding(upstream) => {
            Arc::new(ForwardingBackend::new(upstream, chunk_size))
        }
        BackendSettings::Filtering { upstream, users } => Arc::new(FilteringBackend::new(
            ForwardingBackend::new(upstream, chunk_size),
            Arc::new(StaticAuthenticator::from_entries(users)),
        )),
    }
}

// ── Mock ─────────────────────────────────────────────────────────────

/// Test double that never talks to a database.
pub struct MockBackend {
    version: String,
    messages: Mutex<Vec<Vec<u8>>>,
}

impl MockBackend {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            messages: Mutex::new(Vec::new()),
        }
    }

    /// Every message handled so far, in arrival order.
    pub fn messages(&self) -> Vec<Vec<u8>> {
        self.messages.lock().expect("mock messages lock").clone()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new(tsdbgate_core::config::DEFAULT_MOCK_VERSION)
    }
}

impl Backend for MockBackend {
    fn kind(&self) -> &'static str {
        "mock"
    }

    fn handle<'a>(&'a self, message: &'a [u8]) -> BoxFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move {
            self.messages
                .lock()
                .expect("mock messages lock")
                .push(message.to_vec());

            (message == VERSION_COMMAND).then(|| self.version.clone().into_bytes())
        })
    }
}

// ── Forwarding ───────────────────────────────────────────────────────

/// Sends every message to the upstream database unchanged.
#[derive(Debug)]
pub struct ForwardingBackend {
    upstream: UpstreamConnector,
}

impl ForwardingBackend {
    pub fn new(settings: &UpstreamSettings, chunk_size: usize) -> Self {
        Self::with_connector(UpstreamConnector::new(settings, chunk_size))
    }

    pub fn with_connector(upstream: UpstreamConnector) -> Self {
        Self { upstream }
    }

    pub fn upstream(&self) -> &UpstreamConnector {
        &self.upstream
    }

    /// Forward `message`; connector failures are logged and become `None`.
    pub async fn forward(&self, message: &[u8]) -> Option<Vec<u8>> {
        match self.upstream.send(message).await {
            Ok(response) => {
                debug!(
                    sent = message.len(),
                    received = response.len(),
                    "forwarded message upstream"
                );
                Some(response)
            }
            Err(e) => {
                error!(upstream = %self.upstream.target(), error = %e, "upstream forwarding failed");
                None
            }
        }
    }
}

impl Backend for ForwardingBackend {
    fn kind(&self) -> &'static str {
        "forwarding"
    }

    fn handle<'a>(&'a self, message: &'a [u8]) -> BoxFuture<'a, Option<Vec<u8>>> {
        Box::pin(self.forward(message))
    }
}

// ── Filtering ────────────────────────────────────────────────────────

/// Forwards only the lines whose embedded credentials authenticate.
pub struct FilteringBackend {
    forwarding: ForwardingBackend,
    authenticator: Arc<dyn Authenticator>,
}

impl std::fmt::Debug for FilteringBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilteringBackend")
            .field("forwarding", &self.forwarding)
            .finish_non_exhaustive()
    }
}

impl FilteringBackend {
    pub fn new(forwarding: ForwardingBackend, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            forwarding,
            authenticator,
        }
    }

    pub fn forwarding(&self) -> &ForwardingBackend {
        &self.forwarding
    }

    /// Apply the authorization filter. `None` means nothing survived.
    pub fn authorize(&self, message: &[u8]) -> Option<String> {
        let Ok(text) = std::str::from_utf8(message) else {
            warn!(bytes = message.len(), "dropping non-UTF-8 message");
            return None;
        };

        let filtered = filter_authorized(text, |user, password| {
            self.authenticator.authenticate(user, password)
        });

        if is_empty_batch(&filtered) {
            debug!(bytes = message.len(), "no authorized lines in message");
            None
        } else {
            Some(filtered)
        }
    }
}

impl Backend for FilteringBackend {
    fn kind(&self) -> &'static str {
        "filtering"
    }

    fn handle<'a>(&'a self, message: &'a [u8]) -> BoxFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move {
            // Version queries carry no user data.
            if message == VERSION_COMMAND {
                return self.forwarding.forward(message).await;
            }

            let filtered = self.authorize(message)?;
            self.forwarding.forward(filtered.as_bytes()).await
        })
    }
}
