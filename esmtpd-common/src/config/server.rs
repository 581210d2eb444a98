//! Top-level daemon configuration: the option set `esmtpd` loads from RON
//! on startup and hands down to the listener and its policies.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::{ServerTimeouts, TimeoutConfig};

fn default_host() -> IpAddr {
    "0.0.0.0".parse().unwrap()
}

const fn default_port() -> u16 {
    25
}

fn default_hostname() -> String {
    "localhost".to_string()
}

const fn default_max_connections() -> usize {
    512
}

const fn default_max_message_size() -> usize {
    25 * 1024 * 1024
}

const fn default_max_recipients() -> usize {
    100
}

const fn default_rate_limit_per_ip() -> u32 {
    60
}

const fn default_rate_limit_per_user() -> u32 {
    600
}

const fn default_rate_limit_window_seconds() -> u64 {
    60
}

/// The full set of options `esmtpd` recognises in its configuration file.
///
/// Every field carries a `#[serde(default = ...)]` so a deployment only
/// needs to override what it cares about; an empty document deserialises
/// to sensible, RFC 5321-aligned defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[allow(
    clippy::struct_excessive_bools,
    reason = "Configuration flags are intentionally bool-heavy"
)]
pub struct ServerConfig {
    /// Address to bind the listening socket to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to bind the listening socket to.
    #[serde(default = "default_port")]
    pub port: u16,

    /// The hostname advertised in the greeting banner and EHLO response.
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Maximum number of concurrently admitted sessions.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum accepted message size in octets, advertised via `SIZE`.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Maximum number of `RCPT TO` recipients per transaction.
    #[serde(default = "default_max_recipients")]
    pub max_recipients: usize,

    /// RFC 5321 protocol timeouts.
    #[serde(default)]
    pub timeouts: ServerTimeouts,

    /// Maximum requests per IP within `rate_limit_window_seconds`.
    #[serde(default = "default_rate_limit_per_ip")]
    pub rate_limit_per_ip: u32,

    /// Maximum requests per authenticated principal within the same window.
    #[serde(default = "default_rate_limit_per_user")]
    pub rate_limit_per_user: u32,

    /// Width of the rate-limiting sliding window, in seconds.
    #[serde(default = "default_rate_limit_window_seconds")]
    pub rate_limit_window_seconds: u64,

    /// Whether to advertise and accept `STARTTLS`.
    #[serde(default)]
    pub enable_tls: bool,

    /// PEM certificate chain path, required when `enable_tls` is set.
    #[serde(default)]
    pub tls_cert_path: Option<String>,

    /// PEM private key path, required when `enable_tls` is set.
    #[serde(default)]
    pub tls_key_path: Option<String>,

    /// Whether to advertise and accept `AUTH`.
    #[serde(default)]
    pub enable_auth: bool,

    /// Whether to apply greylisting to inbound transactions.
    #[serde(default)]
    pub enable_greylist: bool,

    /// Whether to consult a DNSBL before admitting a connection.
    #[serde(default)]
    pub enable_dnsbl: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            hostname: default_hostname(),
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
            max_recipients: default_max_recipients(),
            timeouts: ServerTimeouts::default(),
            rate_limit_per_ip: default_rate_limit_per_ip(),
            rate_limit_per_user: default_rate_limit_per_user(),
            rate_limit_window_seconds: default_rate_limit_window_seconds(),
            enable_tls: false,
            tls_cert_path: None,
            tls_key_path: None,
            enable_auth: false,
            enable_greylist: false,
            enable_dnsbl: false,
        }
    }
}

impl ServerConfig {
    /// Parse a `ServerConfig` from a RON document.
    ///
    /// # Errors
    /// Returns an error if `text` is not a valid RON document for this shape.
    pub fn from_ron(text: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(text)
    }

    #[must_use]
    pub fn command_timeout(&self) -> std::time::Duration {
        self.timeouts.command_timeout()
    }

    #[must_use]
    pub fn data_timeout(&self) -> std::time::Duration {
        self.timeouts.data_timeout()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = ServerConfig::from_ron("()").unwrap();
        assert_eq!(config.port, 25);
        assert_eq!(config.hostname, "localhost");
        assert!(!config.enable_tls);
        assert_eq!(config.max_recipients, 100);
    }

    #[test]
    fn overrides_merge_with_defaults() {
        let config = ServerConfig::from_ron(
            r#"(
                port: 2525,
                hostname: "mail.example.com",
                enable_tls: true,
                tls_cert_path: Some("/etc/esmtpd/cert.pem"),
                tls_key_path: Some("/etc/esmtpd/key.pem"),
            )"#,
        )
        .unwrap();
        assert_eq!(config.port, 2525);
        assert_eq!(config.hostname, "mail.example.com");
        assert!(config.enable_tls);
        assert_eq!(config.tls_cert_path.as_deref(), Some("/etc/esmtpd/cert.pem"));
    }
}
