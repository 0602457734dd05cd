//! Server configuration value object.
//!
//! [`ServerConfig`] is the single source of truth for *where* the server
//! listens and *whether* the primary listener is TLS-terminated.  It is built
//! once at startup, validated on construction, and never mutated afterwards,
//! so it can be cloned or shared freely between tasks and threads.
//!
//! # Bind targets
//!
//! The server binds two listeners:
//!
//! | Listener  | Bind target                                              |
//! |-----------|----------------------------------------------------------|
//! | primary   | `{address}:{port}` (TLS-wrapped iff TLS is enabled)      |
//! | policy    | `0.0.0.0:843` when `port == 80`, else `{address}:8843`   |
//!
//! Legacy browser plugins probe port 843 (or 8843 for unprivileged servers)
//! for a cross-domain policy file before they open a socket.  Those probes are
//! not WebSocket handshakes, so they are answered by a separate listener.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// The well-known insecure HTTP/WebSocket port.
pub const INSECURE_WEB_PORT: u16 = 80;

/// Policy port used when the primary listener runs on [`INSECURE_WEB_PORT`].
pub const POLICY_PORT: u16 = 843;

/// Policy port used for every other primary port.
pub const FALLBACK_POLICY_PORT: u16 = 8843;

/// Upper bound on a single TLS handshake unless configured otherwise.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Error type for configuration validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The bind address is not an IPv4 or IPv6 literal.
    #[error("invalid bind address '{0}': expected an IPv4 or IPv6 address")]
    InvalidAddress(String),

    /// The port is outside `0..=65535`.
    #[error("port {0} is out of range (0-65535)")]
    PortOutOfRange(i64),

    /// TLS is enabled but no certificate/key settings were given.
    #[error("TLS is enabled but no TLS settings were provided")]
    MissingTlsSettings,

    /// TLS settings were given but TLS is not enabled.
    #[error("TLS settings were provided but TLS is not enabled")]
    TlsNotEnabled,

    /// A TLS file path is empty.
    #[error("TLS setting '{0}' must not be empty")]
    EmptyTlsPath(&'static str),

    /// The TLS handshake timeout is zero.
    #[error("TLS handshake timeout must be greater than zero")]
    ZeroHandshakeTimeout,
}

/// Certificate material and handshake limits for the TLS-terminating listener.
///
/// The files are only *named* here; loading and parsing them is the job of
/// the server's TLS layer, which reports unreadable or malformed material as
/// a fatal `create()` error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    cert_path: PathBuf,
    key_path: PathBuf,
    handshake_timeout: Duration,
}

impl TlsSettings {
    /// Creates TLS settings with the [`DEFAULT_HANDSHAKE_TIMEOUT`].
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Overrides the per-connection handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Path to the PEM-encoded certificate chain.
    pub fn cert_path(&self) -> &PathBuf {
        &self.cert_path
    }

    /// Path to the PEM-encoded private key.
    pub fn key_path(&self) -> &PathBuf {
        &self.key_path
    }

    /// Maximum time a client may take to complete the TLS handshake.
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.cert_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyTlsPath("cert_path"));
        }
        if self.key_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyTlsPath("key_path"));
        }
        if self.handshake_timeout.is_zero() {
            return Err(ConfigError::ZeroHandshakeTimeout);
        }
        Ok(())
    }
}

/// Immutable server configuration: bind address, port and optional TLS.
///
/// # Example
///
/// ```rust
/// use wsd_core::ServerConfig;
///
/// let cfg = ServerConfig::new("127.0.0.1".parse().unwrap(), 8080);
/// assert_eq!(cfg.bind_target().to_string(), "127.0.0.1:8080");
/// assert_eq!(cfg.policy_bind_target().to_string(), "127.0.0.1:8843");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    address: IpAddr,
    port: u16,
    tls: Option<TlsSettings>,
}

impl ServerConfig {
    /// Creates a plaintext configuration.
    pub fn new(address: IpAddr, port: u16) -> Self {
        Self {
            address,
            port,
            tls: None,
        }
    }

    /// Creates a configuration whose primary listener is TLS-terminated.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the TLS settings are incomplete.
    pub fn with_tls(address: IpAddr, port: u16, tls: TlsSettings) -> Result<Self, ConfigError> {
        tls.validate()?;
        Ok(Self {
            address,
            port,
            tls: Some(tls),
        })
    }

    /// Builds a configuration from loosely typed parts (config files, CLI).
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidAddress`] if `address` is not an IP literal.
    /// - [`ConfigError::PortOutOfRange`] if `port` does not fit in `0..=65535`.
    /// - [`ConfigError::MissingTlsSettings`] if `tls_enabled` without settings.
    /// - [`ConfigError::TlsNotEnabled`] if settings are given without `tls_enabled`.
    pub fn try_from_parts(
        address: &str,
        port: i64,
        tls_enabled: bool,
        tls: Option<TlsSettings>,
    ) -> Result<Self, ConfigError> {
        let address: IpAddr = address
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(address.to_string()))?;
        let port = u16::try_from(port).map_err(|_| ConfigError::PortOutOfRange(port))?;

        match (tls_enabled, tls) {
            (true, Some(settings)) => Self::with_tls(address, port, settings),
            (true, None) => Err(ConfigError::MissingTlsSettings),
            (false, Some(_)) => Err(ConfigError::TlsNotEnabled),
            (false, None) => Ok(Self::new(address, port)),
        }
    }

    /// The IP address both listeners are derived from.
    pub fn address(&self) -> IpAddr {
        self.address
    }

    /// The primary listener port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the primary listener is TLS-terminated.
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// The TLS settings, present iff TLS is enabled.
    pub fn tls_settings(&self) -> Option<&TlsSettings> {
        self.tls.as_ref()
    }

    /// Bind target of the primary (WebSocket) listener.
    pub fn bind_target(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// Bind target of the auxiliary legacy-policy listener.
    ///
    /// A server on port 80 answers policy probes on every interface at port
    /// 843; any other server answers on its own address at port 8843.
    pub fn policy_bind_target(&self) -> SocketAddr {
        if self.port == INSECURE_WEB_PORT {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), POLICY_PORT)
        } else {
            SocketAddr::new(self.address, FALLBACK_POLICY_PORT)
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
