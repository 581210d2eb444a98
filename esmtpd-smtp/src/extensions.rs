use core::fmt::{self, Display};

use esmtpd_common::context::Capability;
use serde::Deserialize;

use crate::{command::AuthMechanism, session::TlsContext};

/// SMTP protocol extensions advertised in EHLO response.
///
/// Extensions modify SMTP behavior and capabilities as defined in various RFCs.
/// The server advertises supported extensions after receiving EHLO from the client.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "lowercase")]
pub enum Extension {
    /// STARTTLS extension (RFC 3207) - Allows upgrading connection to TLS.
    ///
    /// When advertised, clients can use the STARTTLS command to initiate
    /// TLS negotiation before transmitting sensitive data.
    Starttls(TlsContext),

    /// HELP extension - Provides command help information.
    ///
    /// Allows clients to request help about available commands via HELP command.
    Help,

    /// SIZE extension (RFC 1870) - Message size declaration and enforcement.
    ///
    /// # Behavior
    ///
    /// - Server advertises maximum message size in EHLO: `SIZE <max_bytes>`
    /// - Client declares message size in MAIL FROM: `MAIL FROM:<addr> SIZE=<bytes>`
    /// - Server validates at two points:
    ///   1. MAIL FROM: Rejects if declared size exceeds maximum (552 status)
    ///   2. DATA: Rejects if actual received bytes exceed maximum (552 status)
    ///
    /// # Configuration
    ///
    /// Set to 0 for no size limit (unlimited). When set to a positive value,
    /// messages exceeding the limit are rejected with SMTP status code 552.
    ///
    /// # RFC 1870 Compliance
    ///
    /// Per RFC 1870 Section 4, the SIZE parameter value "indicates the size of
    /// the message that the client wishes to transfer. The server may reject
    /// the MAIL command if the value supplied exceeds its implementation
    /// limit or otherwise violates a site policy."
    Size(usize),

    /// PIPELINING extension (RFC 2920) - Allows clients to send multiple
    /// commands without waiting for each response in between.
    Pipelining,

    /// 8BITMIME extension (RFC 6152) - Allows 8-bit MIME message bodies,
    /// declared via `BODY=8BITMIME` in MAIL FROM.
    EightBitMime,

    /// AUTH extension (RFC 4954) - Client authentication, naming the
    /// mechanisms this server is willing to negotiate.
    Auth(Vec<AuthMechanism>),

    /// CHUNKING extension (RFC 3030) - Allows message bodies to be sent in
    /// chunks via `BDAT` instead of `DATA`.
    Chunking,

    /// BINARYMIME extension (RFC 3030) - Allows unencoded binary message
    /// bodies, declared via `BODY=BINARYMIME`. Only meaningful alongside
    /// CHUNKING, since BDAT is the only framing that can carry arbitrary
    /// bytes safely.
    BinaryMime,

    /// SMTPUTF8 extension (RFC 6531) - Allows UTF-8 in envelope addresses
    /// and headers.
    Smtputf8,
}

impl Display for Extension {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(fmt, "{}", Capability::from(self))
    }
}

impl From<&Extension> for Capability {
    fn from(extension: &Extension) -> Self {
        match extension {
            Extension::Starttls(_) => Self::StartTls,
            Extension::Help => Self::Help,
            Extension::Size(max) => Self::Size(*max),
            Extension::Pipelining => Self::Pipelining,
            Extension::EightBitMime => Self::EightBitMime,
            Extension::Auth(mechanisms) => {
                Self::Auth(mechanisms.iter().map(ToString::to_string).collect())
            }
            Extension::Chunking => Self::Chunking,
            Extension::BinaryMime => Self::BinaryMime,
            Extension::Smtputf8 => Self::Smtputf8,
        }
    }
}

impl From<Extension> for Capability {
    fn from(extension: Extension) -> Self {
        Self::from(&extension)
    }
}
