//! The document `esmtpd`'s `main.rs` loads: the recognized option set from
//! `spec.md` §6.3 (`esmtpd_common::config::ServerConfig`) plus the spool
//! backend and greylist timing, which the core leaves to the deployment.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use esmtpd_common::config::ServerConfig;
use esmtpd_spool::SpoolConfig;

fn default_greylist_initial_delay_secs() -> u64 {
    300
}

fn default_greylist_entry_ttl_secs() -> u64 {
    86_400
}

/// Greylist timing, not part of `spec.md`'s recognized `Config` fields but
/// needed to construct [`esmtpd_smtp::greylist::Greylist`] when
/// `enable_greylist` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GreylistSettings {
    /// Seconds a first-contact triplet must age before a retry is let through.
    #[serde(default = "default_greylist_initial_delay_secs")]
    pub initial_delay_secs: u64,
    /// Seconds of inactivity before a triplet is forgotten entirely.
    #[serde(default = "default_greylist_entry_ttl_secs")]
    pub entry_ttl_secs: u64,
}

impl Default for GreylistSettings {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_greylist_initial_delay_secs(),
            entry_ttl_secs: default_greylist_entry_ttl_secs(),
        }
    }
}

impl GreylistSettings {
    #[must_use]
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    #[must_use]
    pub fn entry_ttl(&self) -> Duration {
        Duration::from_secs(self.entry_ttl_secs)
    }
}

/// Top-level configuration document for the `esmtpd` binary.
///
/// Only `Deserialize`: [`esmtpd_spool::SpoolConfig`] doesn't derive
/// `Serialize`, and nothing round-trips this document back to RON.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub spool: SpoolConfig,
    #[serde(default)]
    pub greylist: GreylistSettings,
}

impl DaemonConfig {
    /// Parse a `DaemonConfig` from a RON document.
    ///
    /// # Errors
    /// Returns an error if `text` is not a valid RON document for this shape.
    pub fn from_ron(text: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = DaemonConfig::from_ron("()").unwrap();
        assert_eq!(config.server.port, 25);
        assert_eq!(config.greylist.initial_delay_secs, 300);
    }

    #[test]
    fn overrides_merge_with_defaults() {
        let config = DaemonConfig::from_ron(
            r#"(
                server: (
                    port: 2525,
                    hostname: "mail.example.com",
                ),
            )"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 2525);
        assert_eq!(config.server.hostname, "mail.example.com");
    }
}
