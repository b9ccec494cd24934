//! tsdbgate-core — configuration, errors, and credential filtering.
//!
//! Everything in this crate is free of I/O beyond reading the config
//! file, so the proxy crate and the daemon can share it without pulling
//! in the async runtime.

pub mod auth;
pub mod config;
pub mod error;
pub mod filter;

pub use auth::{Authenticator, StaticAuthenticator};
pub use config::{
    BackendKind, BackendSettings, ProxyConfig, ProxySettings, TlsPaths, UpstreamSettings,
    UserEntry,
};
pub use error::{ConfigError, ConfigResult};
pub use filter::{filter_authorized, is_empty_batch};

/// The literal command a client sends to ask for the database version.
pub const VERSION_COMMAND: &[u8] = b"version\n";
