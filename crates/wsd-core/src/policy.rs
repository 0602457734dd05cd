//! Legacy cross-domain socket policy document.
//!
//! Before opening a raw socket, browser plugins of the pre-WebSocket era sent
//! the literal string `<policy-file-request/>` followed by a NUL byte to port
//! 843 (or 8843) of the target host and expected an XML policy back:
//!
//! ```text
//! <?xml version="1.0"?>
//! <!DOCTYPE cross-domain-policy SYSTEM "http://www.adobe.com/xml/dtds/cross-domain-policy.dtd">
//! <cross-domain-policy>
//! <site-control permitted-cross-domain-policies="master-only"/>
//! <allow-access-from domain="*" to-ports="*"/>
//! </cross-domain-policy>
//! ```
//!
//! This module renders that document.  Serving it is the job of the
//! connection handler's policy entry point.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The request a plugin sends, without its trailing NUL byte.
pub const POLICY_REQUEST: &str = "<policy-file-request/>";

const DOCTYPE: &str =
    r#"<!DOCTYPE cross-domain-policy SYSTEM "http://www.adobe.com/xml/dtds/cross-domain-policy.dtd">"#;

/// Error type for invalid policy rules.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("invalid policy domain '{0}'")]
    InvalidDomain(String),
    #[error("invalid policy port list '{0}'")]
    InvalidPorts(String),
}

/// Value of the `permitted-cross-domain-policies` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SiteControl {
    None,
    #[default]
    MasterOnly,
    ByContentType,
    ByFtpFilename,
    All,
}

impl SiteControl {
    fn as_attr(self) -> &'static str {
        match self {
            SiteControl::None => "none",
            SiteControl::MasterOnly => "master-only",
            SiteControl::ByContentType => "by-content-type",
            SiteControl::ByFtpFilename => "by-ftp-filename",
            SiteControl::All => "all",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AccessRule {
    domain: String,
    ports: String,
}

/// A cross-domain policy: one site-control entry plus `allow-access-from` rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyFile {
    site_control: SiteControl,
    rules: Vec<AccessRule>,
}

impl PolicyFile {
    /// An empty policy (denies everything) with `master-only` site control.
    pub fn new() -> Self {
        Self {
            site_control: SiteControl::default(),
            rules: Vec::new(),
        }
    }

    /// A policy allowing every domain on every port.
    pub fn permissive() -> Self {
        Self {
            site_control: SiteControl::default(),
            rules: vec![AccessRule {
                domain: "*".to_string(),
                ports: "*".to_string(),
            }],
        }
    }

    /// Sets the site-control value.
    pub fn site_control(mut self, site_control: SiteControl) -> Self {
        self.site_control = site_control;
        self
    }

    /// Appends an `allow-access-from` rule.
    ///
    /// `domain` is a host name, an IP, `*`, or a `*.example.com` wildcard.
    /// `ports` is `*` or a comma-separated list of ports and `a-b` ranges.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] if either value would produce malformed XML or
    /// a port list browsers reject.
    pub fn allow(mut self, domain: &str, ports: &str) -> Result<Self, PolicyError> {
        if !valid_domain(domain) {
            return Err(PolicyError::InvalidDomain(domain.to_string()));
        }
        if !valid_ports(ports) {
            return Err(PolicyError::InvalidPorts(ports.to_string()));
        }
        self.rules.push(AccessRule {
            domain: domain.to_string(),
            ports: ports.to_string(),
        });
        Ok(self)
    }

    /// Number of `allow-access-from` rules.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Renders the XML document (without the trailing NUL).
    pub fn render(&self) -> String {
        let mut xml = String::from("<?xml version=\"1.0\"?>\n");
        xml.push_str(DOCTYPE);
        xml.push_str("\n<cross-domain-policy>\n");
        xml.push_str(&format!(
            "<site-control permitted-cross-domain-policies=\"{}\"/>\n",
            self.site_control.as_attr()
        ));
        for rule in &self.rules {
            xml.push_str(&format!(
                "<allow-access-from domain=\"{}\" to-ports=\"{}\"/>\n",
                rule.domain, rule.ports
            ));
        }
        xml.push_str("</cross-domain-policy>");
        xml
    }

    /// The bytes written to the socket: the document followed by a NUL byte.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut bytes = self.render().into_bytes();
        bytes.push(0);
        bytes
    }
}

impl Default for PolicyFile {
    fn default() -> Self {
        Self::permissive()
    }
}

/// Returns `true` if `payload` is a policy-file request.
///
/// Trailing NUL bytes and surrounding whitespace are ignored.
pub fn is_policy_request(payload: &[u8]) -> bool {
    let end = payload
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(payload.len());
    std::str::from_utf8(&payload[..end])
        .map(|text| text.trim() == POLICY_REQUEST)
        .unwrap_or(false)
}

fn valid_domain(domain: &str) -> bool {
    if domain == "*" {
        return true;
    }
    let host = domain.strip_prefix("*.").unwrap_or(domain);
    !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':'))
}

fn valid_ports(ports: &str) -> bool {
    if ports == "*" {
        return true;
    }
    !ports.is_empty()
        && ports.split(',').all(|part| {
            let mut bounds = part.trim().splitn(2, '-');
            let valid_port = |p: Option<&str>| p.map_or(false, |p| p.parse::<u16>().is_ok());
            match (bounds.next(), bounds.next()) {
                (first, None) => valid_port(first),
                (first, second) => valid_port(first) && valid_port(second),
            }
        })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
