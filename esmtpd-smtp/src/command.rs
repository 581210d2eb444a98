use core::fmt::{self, Display, Formatter};

use esmtpd_common::{
    address::{Address, AddressList},
    address_parser,
    envelope::BodyType,
};
use mailparse::MailAddr;

#[derive(PartialEq, PartialOrd, Eq, Hash, Debug)]
pub enum HeloVariant {
    Ehlo(String),
    Helo(String),
}

impl Display for HeloVariant {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ehlo(_) => "EHLO",
            Self::Helo(_) => "HELO",
        })
    }
}

/// The SASL mechanism named in an `AUTH` command (RFC 4954).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AuthMechanism {
    Plain,
    Login,
}

impl Display for AuthMechanism {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        })
    }
}

/// `MAIL FROM` parameters (RFC 1870 `SIZE`, RFC 6152 `BODY`, RFC 6531 `SMTPUTF8`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailParameters {
    pub size: Option<usize>,
    pub body: Option<BodyType>,
    pub smtputf8: bool,
}

impl MailParameters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl From<MailParameters> for esmtpd_common::envelope::MailParameters {
    fn from(value: MailParameters) -> Self {
        Self {
            declared_size: value.size,
            extra: std::collections::HashMap::new(),
        }
    }
}

/// Upper bound on a single `BDAT` chunk's declared size (RFC 3030 places no
/// fixed cap; this mirrors the CHUNKING advertisement's practical ceiling).
pub const MAX_CHUNK_SIZE: usize = 32 * 1024 * 1024;

#[derive(Eq, PartialEq, Debug)]
pub enum Command {
    Helo(HeloVariant),
    Help,
    /// If the first field is `None`, the null sender (`<>`) was given.
    MailFrom(Option<Address>, MailParameters),
    RcptTo(AddressList),
    Rset,
    Noop,
    /// `AUTH <mechanism> [initial-response]`.
    Auth(AuthMechanism, Option<String>),
    Data,
    /// `BDAT <chunk-size> [LAST]` (RFC 3030).
    Bdat(usize, bool),
    Quit,
    StartTLS,
    Invalid(String),
}

impl Command {
    #[must_use]
    pub fn inner(&self) -> String {
        match self {
            Self::MailFrom(from, _) => from.as_ref().map_or_else(String::new, |f| match &**f {
                MailAddr::Group(_) => String::new(),
                MailAddr::Single(s) => s.to_string(),
            }),
            Self::RcptTo(to) => to.to_string(),
            Self::Invalid(command) => command.clone(),
            Self::Helo(HeloVariant::Ehlo(id) | HeloVariant::Helo(id)) => id.clone(),
            _ => String::new(),
        }
    }

    /// Extract the SIZE parameter from a MAIL FROM command, if present.
    #[must_use]
    pub const fn size(&self) -> Option<usize> {
        match self {
            Self::MailFrom(_, params) => params.size,
            _ => None,
        }
    }
}

impl Display for Command {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Helo(v) => fmt.write_fmt(format_args!("{} {}", v, self.inner())),
            Self::MailFrom(s, params) => {
                let addr = s.as_ref().map_or_else(String::new, |f| match &**f {
                    MailAddr::Group(_) => String::new(),
                    MailAddr::Single(s) => s.to_string(),
                });
                if let Some(size_val) = params.size {
                    fmt.write_fmt(format_args!("MAIL FROM:{addr} SIZE={size_val}"))
                } else {
                    fmt.write_fmt(format_args!("MAIL FROM:{addr}"))
                }
            }
            Self::RcptTo(rcpt) => fmt.write_fmt(format_args!("RCPT TO:{rcpt}")),
            Self::Data => fmt.write_str("DATA"),
            Self::Bdat(size, last) => {
                if *last {
                    fmt.write_fmt(format_args!("BDAT {size} LAST"))
                } else {
                    fmt.write_fmt(format_args!("BDAT {size}"))
                }
            }
            Self::Quit => fmt.write_str("QUIT"),
            Self::StartTLS => fmt.write_str("STARTTLS"),
            Self::Invalid(s) => fmt.write_str(s),
            Self::Help => fmt.write_str("HELP"),
            Self::Rset => fmt.write_str("RSET"),
            Self::Noop => fmt.write_str("NOOP"),
            Self::Auth(mechanism, _) => fmt.write_fmt(format_args!("AUTH {mechanism}")),
        }
    }
}

/// Parse the `BODY=`/`SIZE=`/`SMTPUTF8` tail of a `MAIL FROM` command.
fn parse_mail_parameters(params: &str) -> Result<MailParameters, Command> {
    let mut out = MailParameters::default();
    let mut seen_size = false;

    for param in params.split_whitespace() {
        if let Some(value) = param.strip_prefix("SIZE=").or_else(|| {
            (param.len() >= 5 && param[..5].eq_ignore_ascii_case("SIZE=")).then(|| &param[5..])
        }) {
            if seen_size {
                return Err(Command::Invalid("Duplicate SIZE parameter not allowed".to_string()));
            }
            seen_size = true;
            // RFC 1870: a malformed or zero value is silently ignored rather
            // than rejecting the whole command.
            if let Some(size) = value.parse::<usize>().ok().filter(|v| *v != 0) {
                out.size = Some(size);
            }
        } else if let Some(value) = param.strip_prefix("BODY=").or_else(|| {
            (param.len() >= 5 && param[..5].eq_ignore_ascii_case("BODY=")).then(|| &param[5..])
        }) {
            out.body = BodyType::from_param(value);
        } else if param.eq_ignore_ascii_case("SMTPUTF8") {
            out.smtputf8 = true;
        }
        // Unrecognised parameters are ignored rather than rejected, per the
        // usual ESMTP tolerance for extensions a server doesn't implement.
    }

    Ok(out)
}

impl TryFrom<&str> for Command {
    type Error = Self;

    #[allow(clippy::too_many_lines)]
    fn try_from(command: &str) -> Result<Self, Self::Error> {
        let comm = command.to_ascii_uppercase();
        let comm = comm.trim();

        if comm.starts_with("MAIL FROM:") {
            if comm.len() < 11 {
                return Err(Self::Invalid(command.to_owned()));
            }

            let rest = command[10..].trim();
            let parts: Vec<&str> = rest.splitn(2, char::is_whitespace).collect();
            let addr = parts[0];
            let params = match parts.get(1) {
                Some(p) => parse_mail_parameters(p)?,
                None => MailParameters::default(),
            };

            if addr == "<>" {
                return Ok(Self::MailFrom(None, params));
            }

            address_parser::parse_reverse_path(addr).map_or_else(
                |err| Err(Self::Invalid(err.to_string())),
                |mailbox| Ok(Self::MailFrom(mailbox.map(Address::from), params)),
            )
        } else if comm.starts_with("RCPT TO:") {
            if comm.len() < 9 {
                return Err(Self::Invalid(command.to_owned()));
            }

            let rest = command[8..].trim();
            let addr = rest.splitn(2, char::is_whitespace).next().unwrap_or(rest);

            address_parser::parse_forward_path(addr).map_or_else(
                |e| Err(Self::Invalid(e.to_string())),
                |mailbox| Ok(Self::RcptTo(AddressList::from(vec![Address::from(mailbox)]))),
            )
        } else if comm.starts_with("EHLO") || comm.starts_with("HELO") {
            match command.split_once(' ') {
                None => Err(Self::Invalid(format!("Expected hostname in {comm}"))),
                Some((_, host)) if comm.starts_with('H') => {
                    Ok(Self::Helo(HeloVariant::Helo(host.trim().to_string())))
                }
                Some((_, host)) => Ok(Self::Helo(HeloVariant::Ehlo(host.trim().to_string()))),
            }
        } else if comm.starts_with("BDAT") {
            let rest = command
                .get(4..)
                .map(str::trim)
                .ok_or_else(|| Self::Invalid(command.to_owned()))?;
            let mut parts = rest.split_whitespace();
            let size = parts
                .next()
                .and_then(|s| s.parse::<usize>().ok())
                .ok_or_else(|| Self::Invalid(command.to_owned()))?;
            let last = parts.next().is_some_and(|s| s.eq_ignore_ascii_case("LAST"));
            Ok(Self::Bdat(size, last))
        } else if comm.starts_with("AUTH") {
            let rest = command
                .get(4..)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| Self::Invalid(command.to_owned()))?;
            let mut parts = rest.splitn(2, char::is_whitespace);
            let mechanism = match parts.next().map(str::to_ascii_uppercase).as_deref() {
                Some("PLAIN") => AuthMechanism::Plain,
                Some("LOGIN") => AuthMechanism::Login,
                _ => return Err(Self::Invalid("Unsupported AUTH mechanism".to_string())),
            };
            let initial = parts.next().map(str::to_string);
            Ok(Self::Auth(mechanism, initial))
        } else {
            match comm {
                "DATA" => Ok(Self::Data),
                "QUIT" => Ok(Self::Quit),
                "STARTTLS" => Ok(Self::StartTLS),
                "HELP" => Ok(Self::Help),
                "RSET" => Ok(Self::Rset),
                "NOOP" => Ok(Self::Noop),
                _ if comm.starts_with("NOOP") => Ok(Self::Noop),
                _ => Err(Self::Invalid(command.to_owned())),
            }
        }
    }
}

impl TryFrom<&[u8]> for Command {
    type Error = Self;

    fn try_from(command: &[u8]) -> Result<Self, Self::Error> {
        std::str::from_utf8(command).map_or_else(
            |_| Err(Self::Invalid("Unable to interpret command".to_string())),
            Self::try_from,
        )
    }
}

impl TryFrom<String> for Command {
    type Error = Self;

    fn try_from(command: String) -> Result<Self, Self::Error> {
        Self::try_from(command.as_str())
    }
}
