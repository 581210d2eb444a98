use core::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// A three-digit SMTP reply code (RFC 5321 §4.2, RFC 4954 for the AUTH codes).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Debug, Serialize, Deserialize)]
pub enum Status {
    ConnectionError = 101,
    #[allow(clippy::enum_variant_names)]
    SystemStatus = 211,
    HelpMessage = 215,
    ServiceReady = 220,
    GoodBye = 221,
    Ok = 250,
    AuthSuccessful = 235,
    AuthContinue = 334,
    StartMailInput = 354,
    Unavailable = 421,
    ActionUnavailable = 451,
    TooManyRecipients = 452,
    SyntaxError = 500,
    SyntaxErrorInParameters = 501,
    CommandNotImplemented = 502,
    InvalidCommandSequence = 503,
    UnsupportedAuthMechanism = 504,
    AuthRequired = 530,
    AuthTemporaryFailure = 454,
    AuthMechanismTooWeak = 534,
    AuthCredentialsInvalid = 535,
    Error = 550,
    ExceededStorage = 552,
    TransactionFailed = 554,
    Unknown(u32),
}

impl Status {
    /// Checks if the status is a permanent rejection
    pub fn is_permanent(self) -> bool {
        u32::from(self) >= 500
    }

    /// Checks if the status is a temporary rejection
    pub fn is_temporary(self) -> bool {
        u32::from(self) >= 400 && u32::from(self) < 500
    }
}

impl From<u32> for Status {
    fn from(value: u32) -> Self {
        match value {
            101 => Self::ConnectionError,
            211 => Self::SystemStatus,
            215 => Self::HelpMessage,
            220 => Self::ServiceReady,
            221 => Self::GoodBye,
            250 => Self::Ok,
            235 => Self::AuthSuccessful,
            334 => Self::AuthContinue,
            354 => Self::StartMailInput,
            421 => Self::Unavailable,
            451 => Self::ActionUnavailable,
            452 => Self::TooManyRecipients,
            454 => Self::AuthTemporaryFailure,
            500 => Self::SyntaxError,
            501 => Self::SyntaxErrorInParameters,
            502 => Self::CommandNotImplemented,
            503 => Self::InvalidCommandSequence,
            504 => Self::UnsupportedAuthMechanism,
            530 => Self::AuthRequired,
            534 => Self::AuthMechanismTooWeak,
            535 => Self::AuthCredentialsInvalid,
            550 => Self::Error,
            552 => Self::ExceededStorage,
            554 => Self::TransactionFailed,
            _ => Self::Unknown(value),
        }
    }
}

impl From<Status> for u32 {
    fn from(value: Status) -> Self {
        match value {
            Status::ConnectionError => 101,
            Status::SystemStatus => 211,
            Status::HelpMessage => 215,
            Status::ServiceReady => 220,
            Status::GoodBye => 221,
            Status::Ok => 250,
            Status::AuthSuccessful => 235,
            Status::AuthContinue => 334,
            Status::StartMailInput => 354,
            Status::Unavailable => 421,
            Status::ActionUnavailable => 451,
            Status::TooManyRecipients => 452,
            Status::AuthTemporaryFailure => 454,
            Status::SyntaxError => 500,
            Status::SyntaxErrorInParameters => 501,
            Status::CommandNotImplemented => 502,
            Status::InvalidCommandSequence => 503,
            Status::UnsupportedAuthMechanism => 504,
            Status::AuthRequired => 530,
            Status::AuthMechanismTooWeak => 534,
            Status::AuthCredentialsInvalid => 535,
            Status::Error => 550,
            Status::ExceededStorage => 552,
            Status::TransactionFailed => 554,
            Status::Unknown(v) => v,
        }
    }
}

impl Display for Status {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(fmt, "{}", u32::from(*self))
    }
}
