//! The business-facing view of an in-flight SMTP session: what a
//! [`crate::policy`] collaborator sees, independent of the wire-level FSM.

use std::{borrow::Cow, collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{envelope::Envelope, status::Status};

/// Everything a policy hook (`AuthBackend`, `MessageSink`, ...) needs to know
/// about the session it's being asked to rule on.
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    /// The name given on `HELO`/`EHLO`.
    pub id: String,
    /// Whether the session negotiated `EHLO` (and therefore extensions) rather
    /// than plain `HELO`.
    pub extended: bool,
    /// The authenticated principal, once `AUTH` has succeeded.
    pub authenticated: Option<String>,
    /// The id assigned once this message has been handed to a backing store.
    pub tracking_id: Option<String>,
    /// Sender, recipients and transaction parameters for the current message.
    pub envelope: Envelope,
    /// The message body, once `DATA`/`BDAT` has completed.
    pub data: Option<Arc<[u8]>>,
    /// Free-form metadata a collaborator can stash against this session
    /// (e.g. a greylist decision, a DNSBL verdict) without needing its own
    /// side channel.
    pub metadata: HashMap<String, String>,
    /// A reply overriding the FSM's default response for the current command,
    /// set by a collaborator that rejected (or explicitly accepted) something.
    pub response: Option<(Status, Cow<'static, str>)>,
}

impl Context {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn message(&self) -> &[u8] {
        self.data.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn sender(&self) -> Option<String> {
        self.envelope.sender().map(ToString::to_string)
    }

    #[must_use]
    pub fn recipients(&self) -> Vec<String> {
        self.envelope
            .recipients()
            .map(|addrs| addrs.iter().map(ToString::to_string).collect())
            .unwrap_or_default()
    }

    /// Set the response that will override the FSM's default for the command
    /// currently being processed.
    pub fn reject(&mut self, status: Status, message: impl Into<Cow<'static, str>>) {
        self.response = Some((status, message.into()));
    }

    /// Clear everything tied to the current mail transaction (`RSET`,
    /// transaction completion), preserving `id`/`extended`/`authenticated`.
    pub fn reset_transaction(&mut self) {
        self.envelope.clear();
        self.data = None;
        self.metadata.clear();
        self.response = None;
        self.tracking_id = None;
    }
}

/// An EHLO capability line, independent of how the listening protocol chose
/// to configure the extension that produces it.
///
/// This is the wire-facing counterpart to a protocol's own extension
/// configuration type (e.g. `esmtpd_smtp::extensions::Extension`); the two
/// convert between each other losslessly so the EHLO banner always reflects
/// exactly what was configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    /// RFC 1870 SIZE. A value of `0` means "advertised but unbounded".
    Size(usize),
    /// RFC 2920 PIPELINING.
    Pipelining,
    /// RFC 6152 8BITMIME.
    EightBitMime,
    /// RFC 3207 STARTTLS.
    StartTls,
    /// RFC 4954 AUTH, naming the mechanisms offered (e.g. `PLAIN`, `LOGIN`).
    Auth(Vec<String>),
    /// RFC 3030 CHUNKING.
    Chunking,
    /// RFC 3030 BINARYMIME.
    BinaryMime,
    /// RFC 6531 SMTPUTF8.
    Smtputf8,
    /// HELP command support.
    Help,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Size(0) => f.write_str("SIZE"),
            Self::Size(max) => write!(f, "SIZE {max}"),
            Self::Pipelining => f.write_str("PIPELINING"),
            Self::EightBitMime => f.write_str("8BITMIME"),
            Self::StartTls => f.write_str("STARTTLS"),
            Self::Auth(mechanisms) => write!(f, "AUTH {}", mechanisms.join(" ")),
            Self::Chunking => f.write_str("CHUNKING"),
            Self::BinaryMime => f.write_str("BINARYMIME"),
            Self::Smtputf8 => f.write_str("SMTPUTF8"),
            Self::Help => f.write_str("HELP"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_size_zero_advertises_without_value() {
        assert_eq!(Capability::Size(0).to_string(), "SIZE");
        assert_eq!(Capability::Size(1000).to_string(), "SIZE 1000");
    }

    #[test]
    fn capability_auth_lists_mechanisms() {
        assert_eq!(
            Capability::Auth(vec!["PLAIN".to_string(), "LOGIN".to_string()]).to_string(),
            "AUTH PLAIN LOGIN"
        );
    }

    #[test]
    fn reject_sets_response() {
        let mut ctx = Context::default();
        ctx.reject(Status::Error, "no thanks");
        assert_eq!(ctx.response.unwrap().0, Status::Error);
    }

    #[test]
    fn reset_transaction_preserves_identity() {
        let mut ctx = Context {
            id: "client.example.com".to_string(),
            extended: true,
            authenticated: Some("alice".to_string()),
            ..Default::default()
        };
        ctx.data = Some(Arc::from(b"hello".as_slice()));
        ctx.metadata.insert("greylisted".to_string(), "true".to_string());

        ctx.reset_transaction();

        assert_eq!(ctx.id, "client.example.com");
        assert!(ctx.extended);
        assert_eq!(ctx.authenticated.as_deref(), Some("alice"));
        assert!(ctx.data.is_none());
        assert!(ctx.metadata.is_empty());
    }
}
