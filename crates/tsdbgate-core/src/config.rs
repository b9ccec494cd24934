//! tsdbgate.toml configuration parser.
//!
//! The file is deserialized into [`ProxyConfig`], a loose mirror of the
//! TOML layout where backend parameters are all optional. [`ProxyConfig::validate`]
//! turns it into [`ProxySettings`], which the proxy consumes. Every
//! rule that can reject a config lives in `validate`, so a bad file is
//! reported before any socket is opened.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Version answer used by the mock backend when none is configured.
pub const DEFAULT_MOCK_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\n");

const DEFAULT_LISTEN_HOST: &str = "0.0.0.0";
const DEFAULT_LISTEN_PORT: u16 = 4243;
const DEFAULT_MAX_SESSIONS: usize = 10_000;
const DEFAULT_CHUNK_SIZE: usize = 4096;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub listen: ListenConfig,
    pub tls: Option<TlsConfig>,
    pub backend: BackendConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_listen_host")]
    pub host: String,
    #[serde(default = "default_listen_port")]
    pub port: u16,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default)]
    pub allow_plaintext: bool,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_listen_host(),
            port: default_listen_port(),
            max_sessions: default_max_sessions(),
            chunk_size: default_chunk_size(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            allow_plaintext: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub kind: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub connect_timeout_ms: Option<u64>,
    pub response_timeout_ms: Option<u64>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub users: Vec<UserEntry>,
}

/// A single `[[auth.users]]` entry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for UserEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserEntry")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Backend kinds accepted in `[backend] kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Mock,
    Forwarding,
    Filtering,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Mock => "mock",
            BackendKind::Forwarding => "forwarding",
            BackendKind::Filtering => "filtering",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mock" => Ok(BackendKind::Mock),
            "forwarding" => Ok(BackendKind::Forwarding),
            "filtering" => Ok(BackendKind::Filtering),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

/// Validated proxy settings.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// `host:port` the listener binds to.
    pub listen_addr: String,
    pub max_sessions: usize,
    pub chunk_size: usize,
    /// How long a client may take to finish the TLS handshake.
    pub handshake_timeout: Duration,
    /// `None` only when plaintext was explicitly allowed.
    pub tls: Option<TlsPaths>,
    pub backend: BackendSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Where the forwarding backends send traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamSettings {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    /// Idle limit for reading an upstream response. `None` waits forever.
    pub response_timeout: Option<Duration>,
}

impl UpstreamSettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            response_timeout: None,
        }
    }

    /// Full address string.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub enum BackendSettings {
    Mock { version: String },
    Forwarding(UpstreamSettings),
    Filtering {
        upstream: UpstreamSettings,
        users: Vec<UserEntry>,
    },
}

impl BackendSettings {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendSettings::Mock { .. } => BackendKind::Mock,
            BackendSettings::Forwarding(_) => BackendKind::Forwarding,
            BackendSettings::Filtering { .. } => BackendKind::Filtering,
        }
    }
}

impl ProxyConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> ConfigResult<ProxySettings> {
        let listen = &self.listen;
        if listen.max_sessions == 0 {
            return Err(ConfigError::Invalid {
                field: "listen.max_sessions",
                reason: "must be at least 1".to_string(),
            });
        }
        if listen.chunk_size == 0 {
            return Err(ConfigError::Invalid {
                field: "listen.chunk_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if listen.handshake_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "listen.handshake_timeout_ms",
                reason: "must be non-zero".to_string(),
            });
        }
        if listen.host.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "listen.host",
                reason: "must not be empty".to_string(),
            });
        }

        let backend = self.validate_backend()?;

        let tls = match &self.tls {
            Some(TlsConfig {
                cert: Some(cert),
                key: Some(key),
            }) => Some(TlsPaths {
                cert: cert.clone(),
                key: key.clone(),
            }),
            _ if listen.allow_plaintext => None,
            _ => return Err(ConfigError::MissingTls),
        };

        Ok(ProxySettings {
            listen_addr: format_listen_addr(&listen.host, listen.port),
            max_sessions: listen.max_sessions,
            chunk_size: listen.chunk_size,
            handshake_timeout: Duration::from_millis(listen.handshake_timeout_ms),
            tls,
            backend,
        })
    }

    fn validate_backend(&self) -> ConfigResult<BackendSettings> {
        let backend = &self.backend;
        let kind: BackendKind = backend.kind.parse()?;

        match kind {
            BackendKind::Mock => Ok(BackendSettings::Mock {
                version: backend
                    .version
                    .clone()
                    .unwrap_or_else(|| DEFAULT_MOCK_VERSION.to_string()),
            }),
            BackendKind::Forwarding => {
                Ok(BackendSettings::Forwarding(self.upstream_settings(kind)?))
            }
            BackendKind::Filtering => {
                let upstream = self.upstream_settings(kind)?;
                let users = self.validate_users()?;
                Ok(BackendSettings::Filtering { upstream, users })
            }
        }
    }

    fn upstream_settings(&self, kind: BackendKind) -> ConfigResult<UpstreamSettings> {
        let backend = &self.backend;
        let host = backend
            .host
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or(ConfigError::MissingParameter {
                kind: kind.as_str(),
                param: "host",
            })?;
        let port = backend.port.ok_or(ConfigError::MissingParameter {
            kind: kind.as_str(),
            param: "port",
        })?;
        if port == 0 {
            return Err(ConfigError::Invalid {
                field: "backend.port",
                reason: "must be non-zero".to_string(),
            });
        }

        let connect_timeout_ms = backend
            .connect_timeout_ms
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS);
        if connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "backend.connect_timeout_ms",
                reason: "must be non-zero".to_string(),
            });
        }
        if backend.response_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid {
                field: "backend.response_timeout_ms",
                reason: "must be non-zero when set".to_string(),
            });
        }

        Ok(UpstreamSettings {
            host: host.to_string(),
            port,
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            response_timeout: backend.response_timeout_ms.map(Duration::from_millis),
        })
    }

    fn validate_users(&self) -> ConfigResult<Vec<UserEntry>> {
        let users = &self.auth.users;
        if users.is_empty() {
            return Err(ConfigError::MissingParameter {
                kind: BackendKind::Filtering.as_str(),
                param: "auth.users",
            });
        }

        let mut seen = HashSet::new();
        for entry in users {
            if entry.user.is_empty() || entry.password.is_empty() {
                return Err(ConfigError::Invalid {
                    field: "auth.users",
                    reason: "user and password must both be non-empty".to_string(),
                });
            }
            if entry.user.chars().any(char::is_whitespace)
                || entry.password.chars().any(char::is_whitespace)
            {
                return Err(ConfigError::Invalid {
                    field: "auth.users",
                    reason: format!("credentials for '{}' contain whitespace", entry.user),
                });
            }
            if !seen.insert(entry.user.as_str()) {
                return Err(ConfigError::Invalid {
                    field: "auth.users",
                    reason: format!("duplicate user '{}'", entry.user),
                });
            }
        }
        Ok(users.clone())
    }
}

/// IPv6 literals need brackets before the port is appended.
fn format_listen_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

fn default_listen_host() -> String {
    DEFAULT_LISTEN_HOST.to_string()
}

fn default_listen_port() -> u16 {
    DEFAULT_LISTEN_PORT
}

fn default_max_sessions() -> usize {
    DEFAULT_MAX_SESSIONS
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_handshake_timeout_ms() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILTERING: &str = r#"
[listen]
port = 4243

[tls]
cert = "/etc/tsdbgate/cert.pem"
key = "/etc/tsdbgate/key.pem"

[backend]
kind = "filtering"
host = "tsdb.internal"
port = 4242
response_timeout_ms = 250

[[auth.users]]
user = "root"
password = "root"
"#;

    fn parse(toml_str: &str) -> ProxyConfig {
        ProxyConfig::from_toml_str(toml_str).unwrap()
    }

    #[test]
    fn parses_filtering_config() {
        let settings = parse(FILTERING).validate().unwrap();
        assert_eq!(settings.listen_addr, "0.0.0.0:4243");
        assert_eq!(settings.max_sessions, DEFAULT_MAX_SESSIONS);
        assert_eq!(settings.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(settings.handshake_timeout, Duration::from_secs(10));
        assert_eq!(
            settings.tls,
            Some(TlsPaths {
                cert: PathBuf::from("/etc/tsdbgate/cert.pem"),
                key: PathBuf::from("/etc/tsdbgate/key.pem"),
            })
        );

        match settings.backend {
            BackendSettings::Filtering { upstream, users } => {
                assert_eq!(upstream.endpoint(), "tsdb.internal:4242");
                assert_eq!(upstream.connect_timeout, Duration::from_secs(5));
                assert_eq!(upstream.response_timeout, Some(Duration::from_millis(250)));
                assert_eq!(users.len(), 1);
            }
            other => panic!("expected filtering backend, got {other:?}"),
        }
    }

    #[test]
    fn mock_defaults_version() {
        let config = parse(
            r#"
[listen]
allow_plaintext = true

[backend]
kind = "mock"
"#,
        );
        let settings = config.validate().unwrap();
        assert!(settings.tls.is_none());
        match settings.backend {
            BackendSettings::Mock { version } => assert_eq!(version, DEFAULT_MOCK_VERSION),
            other => panic!("expected mock backend, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_backend_kind() {
        let mut config = parse(FILTERING);
        config.backend.kind = "carrier-pigeon".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownBackend(ref k) if k == "carrier-pigeon"));
        assert!(err.to_string().contains("expected one of"));
    }

    #[test]
    fn forwarding_requires_host_and_port() {
        let mut config = parse(FILTERING);
        config.backend.kind = "forwarding".to_string();
        config.backend.host = None;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingParameter { param: "host", .. })
        ));

        config.backend.host = Some("tsdb.internal".to_string());
        config.backend.port = None;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingParameter { param: "port", .. })
        ));
    }

    #[test]
    fn filtering_requires_users() {
        let mut config = parse(FILTERING);
        config.auth.users.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingParameter { param: "auth.users", .. })
        ));
    }

    #[test]
    fn rejects_duplicate_users() {
        let mut config = parse(FILTERING);
        config.auth.users.push(UserEntry {
            user: "root".to_string(),
            password: "other".to_string(),
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "auth.users", .. })
        ));
    }

    #[test]
    fn tls_required_unless_plaintext_allowed() {
        let mut config = parse(FILTERING);
        config.tls = None;
        assert!(matches!(config.validate(), Err(ConfigError::MissingTls)));

        config.tls = Some(TlsConfig {
            cert: Some(PathBuf::from("cert.pem")),
            key: None,
        });
        assert!(matches!(config.validate(), Err(ConfigError::MissingTls)));

        config.listen.allow_plaintext = true;
        assert!(config.validate().unwrap().tls.is_none());
    }

    #[test]
    fn rejects_zero_limits() {
        let mut config = parse(FILTERING);
        config.listen.max_sessions = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "listen.max_sessions", .. })
        ));

        let mut config = parse(FILTERING);
        config.listen.chunk_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "listen.chunk_size", .. })
        ));

        let mut config = parse(FILTERING);
        config.listen.handshake_timeout_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "listen.handshake_timeout_ms", .. })
        ));

        let mut config = parse(FILTERING);
        config.backend.response_timeout_ms = Some(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "backend.response_timeout_ms", .. })
        ));
    }

    #[test]
    fn ipv6_listen_host_is_bracketed() {
        let mut config = parse(FILTERING);
        config.listen.host = "::".to_string();
        assert_eq!(config.validate().unwrap().listen_addr, "[::]:4243");
    }

    #[test]
    fn missing_backend_section_is_parse_error() {
        let err = ProxyConfig::from_toml_str("[listen]\nport = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn user_entry_debug_hides_password() {
        let entry = UserEntry {
            user: "joshua".to_string(),
            password: "pencil".to_string(),
        };
        let rendered = format!("{entry:?}");
        assert!(rendered.contains("joshua"));
        assert!(!rendered.contains("pencil"));
    }
}
