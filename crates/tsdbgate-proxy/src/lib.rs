//! tsdbgate relay — TLS termination and credential filtering in front of
//! a time-series database.
//!
//! # Components
//!
//! - **`listener`** — accepts TLS connections under a session limit
//! - **`session`** — per-connection read loop driving a backend
//! - **`framing`** — short-read message framing shared by both sides
//! - **`backend`** — mock, forwarding, and filtering message handlers
//! - **`upstream`** — the single shared connection to the database
//! - **`tls`** — certificate and key loading
//!
//! # Architecture
//!
//! ```text
//! client ──TLS──▶ Listener ──spawn──▶ Session
//!                                       │ message
//!                                       ▼
//!                                    Backend ──(filter)──▶ UpstreamConnector ──TCP──▶ TSDB
//!                                       │ response
//!                                       ▼
//!                                    client
//! ```

pub mod backend;
pub mod error;
pub mod framing;
pub mod listener;
pub mod session;
pub mod tls;
pub mod upstream;

pub use backend::{
    Backend, BoxFuture, FilteringBackend, ForwardingBackend, MockBackend, build_backend,
};
pub use error::{ProxyError, ProxyResult, TlsError, TlsResult, UpstreamError, UpstreamResult};
pub use framing::{Frame, FrameReader};
pub use listener::Listener;
pub use session::{SessionEnd, SessionSummary, run_session};
pub use upstream::UpstreamConnector;
