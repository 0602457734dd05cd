//! TOML configuration file for the `wsd` binary.
//!
//! The file is optional: every field has a default, so an empty file (or no
//! file at all) yields a plaintext server on `0.0.0.0:8080` with a permissive
//! policy document.
//!
//! ```toml
//! [server]
//! address = "0.0.0.0"
//! port = 8080
//! log_level = "info"
//!
//! [tls]
//! enabled = true
//! cert_path = "/etc/wsd/cert.pem"
//! key_path = "/etc/wsd/key.pem"
//! handshake_timeout_secs = 10
//!
//! [policy]
//! site_control = "master-only"
//!
//! [[policy.allow]]
//! domain = "*.example.com"
//! ports = "8080,8443"
//! ```
//!
//! # Raw values, validated later
//!
//! The file stores loosely typed values (`address` is a string, `port` an
//! `i64`) so that a typo produces a [`ConfigError`] naming the bad value
//! instead of a generic TOML type error.  [`FileConfig::server_config`] turns
//! the raw sections into the validated [`ServerConfig`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use wsd_core::{ConfigError, PolicyError, PolicyFile, ServerConfig, SiteControl, TlsSettings};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum FileConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The server section describes an impossible configuration.
    #[error("invalid server configuration: {0}")]
    Invalid(#[from] ConfigError),

    /// A policy rule is malformed.
    #[error("invalid policy configuration: {0}")]
    Policy(#[from] PolicyError),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub tls: TlsSection,
    #[serde(default)]
    pub policy: PolicySection,
}

/// Where the primary listener binds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    /// IP literal to bind.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_address")]
    pub address: String,
    /// Primary port.  Port 80 moves the policy listener to `0.0.0.0:843`.
    #[serde(default = "default_port")]
    pub port: i64,
    /// `tracing` filter directive: `"error"`, `"info"`, `"wsd=debug"`, ...
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// TLS termination of the primary listener.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TlsSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
}

/// The cross-domain policy served on the policy listener.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicySection {
    #[serde(default)]
    pub site_control: SiteControl,
    #[serde(default = "default_allow")]
    pub allow: Vec<PolicyRule>,
}

/// One `allow-access-from` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyRule {
    pub domain: String,
    pub ports: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> i64 {
    8080
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_handshake_timeout_secs() -> u64 {
    wsd_core::DEFAULT_HANDSHAKE_TIMEOUT.as_secs()
}
fn default_allow() -> Vec<PolicyRule> {
    vec![PolicyRule {
        domain: "*".to_string(),
        ports: "*".to_string(),
    }]
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

impl Default for TlsSection {
    fn default() -> Self {
        Self {
            enabled: false,
            cert_path: None,
            key_path: None,
            handshake_timeout_secs: default_handshake_timeout_secs(),
        }
    }
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            site_control: SiteControl::default(),
            allow: default_allow(),
        }
    }
}

// ── Loading and conversion ────────────────────────────────────────────────────

impl FileConfig {
    /// Reads and parses the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`FileConfigError::Io`] if the file cannot be read and
    /// [`FileConfigError::Parse`] if it is not valid TOML for this schema.
    pub fn load(path: &Path) -> Result<Self, FileConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| FileConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`FileConfigError::Parse`] on malformed TOML.
    pub fn from_toml_str(content: &str) -> Result<Self, FileConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Renders the configuration as pretty TOML.
    ///
    /// # Errors
    ///
    /// Returns [`FileConfigError::Serialize`] if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, FileConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validates the `[server]` and `[tls]` sections.
    ///
    /// # Errors
    ///
    /// Returns [`FileConfigError::Invalid`] for a bad address, an
    /// out-of-range port, or inconsistent TLS settings.
    pub fn server_config(&self) -> Result<ServerConfig, FileConfigError> {
        let tls = &self.tls;
        let settings = match (&tls.cert_path, &tls.key_path) {
            (None, None) => None,
            (cert, key) => Some(
                TlsSettings::new(
                    cert.clone().unwrap_or_default(),
                    key.clone().unwrap_or_default(),
                )
                .with_handshake_timeout(Duration::from_secs(tls.handshake_timeout_secs)),
            ),
        };

        Ok(ServerConfig::try_from_parts(
            &self.server.address,
            self.server.port,
            tls.enabled,
            settings,
        )?)
    }

    /// Builds the policy document from the `[policy]` section.
    ///
    /// # Errors
    ///
    /// Returns [`FileConfigError::Policy`] for a malformed rule.
    pub fn policy_file(&self) -> Result<PolicyFile, FileConfigError> {
        let mut policy = PolicyFile::new().site_control(self.policy.site_control);
        for rule in &self.policy.allow {
            policy = policy.allow(&rule.domain, &rule.ports)?;
        }
        Ok(policy)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_yields_defaults() {
        // Arrange / Act
        let cfg = FileConfig::from_toml_str("").unwrap();

        // Assert
        assert_eq!(cfg, FileConfig::default());
        let server = cfg.server_config().unwrap();
        assert_eq!(server.bind_target().to_string(), "0.0.0.0:8080");
        assert!(!server.is_tls_enabled());
    }

    #[test]
    fn test_partial_server_section_keeps_other_defaults() {
        let cfg = FileConfig::from_toml_str("[server]\nport = 80\n").unwrap();
        assert_eq!(cfg.server.port, 80);
        assert_eq!(cfg.server.address, "0.0.0.0");
        assert_eq!(cfg.server.log_level, "info");
    }

    #[test]
    fn test_tls_section_produces_tls_config() {
        // Arrange
        let toml = r#"
            [server]
            address = "127.0.0.1"
            port = 8443

            [tls]
            enabled = true
            cert_path = "cert.pem"
            key_path = "key.pem"
            handshake_timeout_secs = 3
        "#;

        // Act
        let server = FileConfig::from_toml_str(toml)
            .unwrap()
            .server_config()
            .unwrap();

        // Assert
        let tls = server.tls_settings().unwrap();
        assert_eq!(tls.cert_path(), &PathBuf::from("cert.pem"));
        assert_eq!(tls.handshake_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_enabled_tls_without_paths_is_rejected() {
        let cfg = FileConfig::from_toml_str("[tls]\nenabled = true\n").unwrap();
        assert!(matches!(
            cfg.server_config(),
            Err(FileConfigError::Invalid(ConfigError::MissingTlsSettings))
        ));
    }

    #[test]
    fn test_tls_paths_without_enabled_are_rejected() {
        let cfg = FileConfig::from_toml_str("[tls]\ncert_path = \"c.pem\"\nkey_path = \"k.pem\"\n")
            .unwrap();
        assert!(matches!(
            cfg.server_config(),
            Err(FileConfigError::Invalid(ConfigError::TlsNotEnabled))
        ));
    }

    #[test]
    fn test_missing_key_path_is_rejected() {
        let cfg =
            FileConfig::from_toml_str("[tls]\nenabled = true\ncert_path = \"c.pem\"\n").unwrap();
        assert!(matches!(
            cfg.server_config(),
            Err(FileConfigError::Invalid(ConfigError::EmptyTlsPath("key_path")))
        ));
    }

    #[test]
    fn test_out_of_range_port_is_rejected() {
        let cfg = FileConfig::from_toml_str("[server]\nport = 70000\n").unwrap();
        assert!(matches!(
            cfg.server_config(),
            Err(FileConfigError::Invalid(ConfigError::PortOutOfRange(70000)))
        ));
    }

    #[test]
    fn test_bad_address_is_rejected() {
        let cfg = FileConfig::from_toml_str("[server]\naddress = \"localhost\"\n").unwrap();
        assert!(matches!(
            cfg.server_config(),
            Err(FileConfigError::Invalid(ConfigError::InvalidAddress(_)))
        ));
    }

    #[test]
    fn test_policy_rules_are_applied_in_order() {
        let toml = r#"
            [policy]
            site_control = "all"

            [[policy.allow]]
            domain = "example.com"
            ports = "80"

            [[policy.allow]]
            domain = "*.example.org"
            ports = "8000-8100"
        "#;

        let policy = FileConfig::from_toml_str(toml).unwrap().policy_file().unwrap();
        let xml = policy.render();

        assert_eq!(policy.rule_count(), 2);
        assert!(xml.contains("permitted-cross-domain-policies=\"all\""));
        assert!(xml.find("example.com").unwrap() < xml.find("*.example.org").unwrap());
    }

    #[test]
    fn test_bad_policy_rule_is_rejected() {
        let toml = "[[policy.allow]]\ndomain = \"a b\"\nports = \"*\"\n";
        let cfg = FileConfig::from_toml_str(toml).unwrap();
        assert!(matches!(cfg.policy_file(), Err(FileConfigError::Policy(_))));
    }

    #[test]
    fn test_malformed_toml_is_a_parse_error() {
        assert!(matches!(
            FileConfig::from_toml_str("[server\nport = 1"),
            Err(FileConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let result = FileConfig::load(Path::new("/nonexistent/wsd.toml"));
        assert!(matches!(result, Err(FileConfigError::Io { .. })));
    }

    #[test]
    fn test_default_config_renders_and_parses_back() {
        let cfg = FileConfig::default();
        let text = cfg.to_toml_string().unwrap();
        assert_eq!(FileConfig::from_toml_str(&text).unwrap(), cfg);
    }
}
