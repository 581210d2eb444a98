//! RFC 4954 `AUTH` response decoding and backend dispatch.
//!
//! The FSM (see [`crate::state`]) only tracks *which* base64 blobs it has
//! collected; turning those into credentials and consulting an
//! [`esmtpd_common::policy::AuthBackend`] happens here.

use base64::Engine as _;
use esmtpd_common::policy::{AuthBackend, AuthResult};
use thiserror::Error;

use crate::{command::AuthMechanism, state::AuthStep};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid base64 encoding")]
    InvalidBase64,
    #[error("malformed AUTH response")]
    Malformed,
}

/// Decode a base64 `AUTH PLAIN` response (`authzid\0authcid\0passwd`) into
/// `(authcid, passwd)`. `authzid` is accepted but ignored.
pub fn decode_plain(response: &str) -> Result<(String, String), DecodeError> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(response)
        .map_err(|_| DecodeError::InvalidBase64)?;

    let mut parts = decoded.split(|&b| b == 0);
    let _authzid = parts.next().ok_or(DecodeError::Malformed)?;
    let authcid = parts.next().ok_or(DecodeError::Malformed)?;
    let passwd = parts.next().ok_or(DecodeError::Malformed)?;

    Ok((
        String::from_utf8(authcid.to_vec()).map_err(|_| DecodeError::Malformed)?,
        String::from_utf8(passwd.to_vec()).map_err(|_| DecodeError::Malformed)?,
    ))
}

/// Decode a single base64-encoded `AUTH LOGIN` continuation line.
pub fn decode_base64(value: &str) -> Result<String, DecodeError> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(value)
        .map_err(|_| DecodeError::InvalidBase64)?;
    String::from_utf8(decoded).map_err(|_| DecodeError::Malformed)
}

/// Base64-encode a `334` continuation prompt.
#[must_use]
pub fn encode_prompt(prompt: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(prompt)
}

/// Decode a completed `AUTH` exchange and consult `backend`.
///
/// # Errors
/// Returns [`DecodeError`] if the collected response isn't valid base64, or
/// isn't in the shape the mechanism expects (e.g. `PLAIN` missing a NUL
/// separator).
pub async fn authenticate(
    backend: &dyn AuthBackend,
    mechanism: AuthMechanism,
    step: &AuthStep,
) -> Result<AuthResult, DecodeError> {
    match (mechanism, step) {
        (AuthMechanism::Plain, AuthStep::Response(response)) => {
            let (user, pass) = decode_plain(response)?;
            Ok(backend.verify(&user, &pass).await)
        }
        (AuthMechanism::Login, AuthStep::Credentials(user, pass)) => {
            let user = decode_base64(user)?;
            let pass = decode_base64(pass)?;
            Ok(backend.verify(&user, &pass).await)
        }
        _ => Err(DecodeError::Malformed),
    }
}

#[cfg(test)]
mod tests {
    use esmtpd_common::policy::DenyAllAuthBackend;

    use super::*;

    #[test]
    fn decodes_plain_response() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("\0alice\0hunter2");
        let (user, pass) = decode_plain(&encoded).unwrap();
        assert_eq!(user, "alice");
        assert_eq!(pass, "hunter2");
    }

    #[test]
    fn rejects_invalid_base64() {
        assert_eq!(decode_plain("not base64!!"), Err(DecodeError::InvalidBase64));
    }

    #[test]
    fn rejects_missing_separators() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("no-separators-here");
        assert_eq!(decode_plain(&encoded), Err(DecodeError::Malformed));
    }

    #[test]
    fn round_trips_login_prompt() {
        let prompt = encode_prompt("Username:");
        assert_eq!(decode_base64(&prompt).unwrap(), "Username:");
    }

    #[tokio::test]
    async fn authenticate_dispatches_to_backend() {
        let backend = DenyAllAuthBackend;
        let user = base64::engine::general_purpose::STANDARD.encode("alice");
        let pass = base64::engine::general_purpose::STANDARD.encode("hunter2");

        let result = authenticate(
            &backend,
            AuthMechanism::Login,
            &AuthStep::Credentials(user, pass),
        )
        .await
        .unwrap();

        assert_eq!(result, AuthResult::Invalid);
    }

    #[tokio::test]
    async fn authenticate_rejects_incomplete_step() {
        let backend = DenyAllAuthBackend;
        let result = authenticate(&backend, AuthMechanism::Plain, &AuthStep::AwaitResponse).await;
        assert_eq!(result, Err(DecodeError::Malformed));
    }
}
