//! The SMTP envelope: sender, recipients and the parameters negotiated on
//! `MAIL FROM`/`RCPT TO`, kept separate from the message content itself.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::address::{Address, AddressList};

/// Body encoding negotiated via the `BODY=` MAIL parameter (RFC 6152, RFC 3030).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyType {
    #[default]
    SevenBit,
    EightBitMime,
    BinaryMime,
}

impl BodyType {
    #[must_use]
    pub fn from_param(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "7BIT" => Some(Self::SevenBit),
            "8BITMIME" => Some(Self::EightBitMime),
            "BINARYMIME" => Some(Self::BinaryMime),
            _ => None,
        }
    }
}

/// The `MAIL FROM`/`RCPT TO` parameters that aren't modelled as their own field
/// (`SIZE`, plus anything a deployment-specific extension wants to stash).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MailParameters {
    pub declared_size: Option<usize>,
    pub extra: HashMap<String, Option<String>>,
}

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    sender: Option<Address>,
    recipients: Option<AddressList>,
    mail_params: Option<MailParameters>,
    body_type: BodyType,
    smtputf8: bool,
}

impl Envelope {
    #[inline]
    #[must_use]
    pub const fn sender(&self) -> Option<&Address> {
        self.sender.as_ref()
    }

    #[inline]
    #[must_use]
    pub const fn sender_mut(&mut self) -> &mut Option<Address> {
        &mut self.sender
    }

    #[inline]
    #[must_use]
    pub const fn recipients(&self) -> Option<&AddressList> {
        self.recipients.as_ref()
    }

    #[inline]
    #[must_use]
    pub const fn recipients_mut(&mut self) -> &mut Option<AddressList> {
        &mut self.recipients
    }

    #[inline]
    #[must_use]
    pub const fn mail_params(&self) -> Option<&MailParameters> {
        self.mail_params.as_ref()
    }

    #[inline]
    #[must_use]
    pub const fn mail_params_mut(&mut self) -> &mut Option<MailParameters> {
        &mut self.mail_params
    }

    #[inline]
    #[must_use]
    pub const fn body_type(&self) -> BodyType {
        self.body_type
    }

    pub const fn set_body_type(&mut self, body_type: BodyType) {
        self.body_type = body_type;
    }

    #[inline]
    #[must_use]
    pub const fn smtputf8(&self) -> bool {
        self.smtputf8
    }

    pub const fn set_smtputf8(&mut self, smtputf8: bool) {
        self.smtputf8 = smtputf8;
    }

    /// Reset everything a `RSET` or a transaction's completion should clear,
    /// keeping the `Envelope` value but emptying its contents.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_type_from_param() {
        assert_eq!(BodyType::from_param("8bitmime"), Some(BodyType::EightBitMime));
        assert_eq!(BodyType::from_param("BINARYMIME"), Some(BodyType::BinaryMime));
        assert_eq!(BodyType::from_param("bogus"), None);
    }

    #[test]
    fn clear_resets_envelope() {
        let mut envelope = Envelope::default();
        envelope.set_smtputf8(true);
        envelope.set_body_type(BodyType::EightBitMime);
        envelope.clear();
        assert!(!envelope.smtputf8());
        assert_eq!(envelope.body_type(), BodyType::SevenBit);
    }
}
