//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for configuration loading and validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating the proxy configuration.
///
/// These are always fatal at startup; the daemon prints them once and
/// exits before opening any socket.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config syntax: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unknown backend kind '{0}' (expected one of: mock, forwarding, filtering)")]
    UnknownBackend(String),

    #[error("backend '{kind}' requires parameter '{param}'")]
    MissingParameter {
        kind: &'static str,
        param: &'static str,
    },

    #[error(
        "TLS certificate and key are required: set [tls] cert and key, \
         or listen.allow_plaintext = true for local testing"
    )]
    MissingTls,

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
