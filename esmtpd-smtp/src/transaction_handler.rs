//! Business logic handler for SMTP sessions.
//!
//! This module provides the `SmtpTransactionHandler` trait that separates
//! business logic (validation, spooling, authentication) from protocol state
//! management (FSM) and I/O orchestration.

use std::{borrow::Cow, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use esmtpd_common::{
    context::Context,
    policy::{AuthBackend, AuthResult, DenyAllAuthBackend},
    status::Status,
};
use esmtpd_spool::BackingStore;

use crate::{State, auth, state};

/// SMTP transaction handler for business logic.
///
/// This trait separates business concerns (validation, spooling, auditing)
/// from protocol concerns (state transitions) and I/O concerns (send/receive).
///
/// # Design Rationale
///
/// By separating business logic into a trait, we achieve:
/// - **Testability**: Business logic can be tested without I/O or networking
/// - **Flexibility**: Different implementations for production vs testing
/// - **Single Responsibility**: Each layer has a clear, focused purpose
/// - **Dependency Injection**: Easily swap implementations
///
/// # Responsibilities
///
/// The transaction handler is responsible for:
/// - Per-step validation
/// - Message spooling
/// - Response generation (success/failure messages)
/// - Audit logging
/// - `AUTH` credential verification
///
/// # Lifecycle
///
/// The handler is called after FSM state transitions:
/// 1. FSM transitions to new state (pure protocol logic)
/// 2. `SmtpTransactionHandler` validates the transition (business rules)
/// 3. `SmtpTransactionHandler` performs work (spooling, auditing, etc.)
/// 4. `Response` is generated and sent to client
#[async_trait]
pub trait SmtpTransactionHandler: Send + Sync {
    /// Validate a Connect event (new connection established)
    ///
    /// Called when a new client connects, before sending the greeting.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Business context for validation and response
    ///
    /// # Returns
    ///
    /// `true` if the connection should be accepted, `false` to reject
    async fn validate_connect(&mut self, ctx: &mut Context) -> bool;

    /// Validate an EHLO/HELO command
    ///
    /// Called after the client sends EHLO or HELO.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Business context for validation and response
    ///
    /// # Returns
    ///
    /// `true` if the EHLO/HELO should be accepted, `false` to reject
    async fn validate_ehlo(&mut self, ctx: &mut Context) -> bool;

    /// Validate a MAIL FROM command
    ///
    /// Called after the client sends MAIL FROM.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Business context for validation and response
    ///
    /// # Returns
    ///
    /// `true` if the MAIL FROM should be accepted, `false` to reject
    async fn validate_mail_from(&mut self, ctx: &mut Context) -> bool;

    /// Validate an RCPT TO command
    ///
    /// Called after the client sends RCPT TO.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Business context for validation and response
    ///
    /// # Returns
    ///
    /// `true` if the RCPT TO should be accepted, `false` to reject
    async fn validate_rcpt_to(&mut self, ctx: &mut Context) -> bool;

    /// Validate and process a complete message (after DATA)
    ///
    /// Called after the client sends the complete message (after ".").
    /// This method both validates the message and performs the spooling
    /// work if validation passes.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Business context for validation, spooling, and response
    ///
    /// # Returns
    ///
    /// `true` if the message was accepted and spooled, `false` if rejected
    async fn handle_message(&mut self, ctx: &mut Context) -> bool;

    /// Validate a completed `AUTH` exchange.
    ///
    /// Called once the client has supplied a full set of credentials for the
    /// mechanism it started (`AUTH PLAIN` with its initial response, or
    /// `AUTH LOGIN` after both prompts). Sets `ctx.response` and, on success,
    /// `ctx.authenticated`.
    ///
    /// # Returns
    ///
    /// `true` if authentication succeeded, `false` otherwise
    async fn validate_auth(&mut self, auth: &state::Auth, ctx: &mut Context) -> bool;
}

/// Default SMTP transaction handler: accepts every transaction step,
/// spools the message after `DATA`, and consults an injected
/// [`AuthBackend`] for `AUTH`.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use esmtpd_smtp::transaction_handler::DefaultSmtpTransactionHandler;
/// use esmtpd_spool::BackingStore;
///
/// # fn example(spool: Arc<dyn BackingStore>, peer: std::net::SocketAddr) {
/// let handler = DefaultSmtpTransactionHandler::new(Some(spool), peer);
/// // Use handler with session orchestrator
/// # }
/// ```
pub struct DefaultSmtpTransactionHandler {
    /// Optional spool for message persistence
    spool: Option<Arc<dyn BackingStore>>,
    /// Client peer address for audit logging
    peer: SocketAddr,
    /// Backend consulted for `AUTH PLAIN`/`AUTH LOGIN`. Defaults to one that
    /// rejects every credential.
    auth_backend: Arc<dyn AuthBackend>,
    /// Greylist consulted at `RCPT TO`, if the deployment enables one.
    greylist: Option<Arc<crate::greylist::Greylist>>,
    /// Text sent back as the `220` greeting at `validate_connect`.
    banner: Arc<str>,
    /// Declared-size ceiling checked at `MAIL FROM`; `0` disables the check.
    max_message_size: usize,
}

impl DefaultSmtpTransactionHandler {
    /// Creates a new default SMTP transaction handler with no `AUTH` backend
    /// or greylist wired in (every `AUTH` attempt is rejected; no greylisting).
    ///
    /// # Arguments
    ///
    /// * `spool` - Optional message spool for persistence
    /// * `peer` - Client peer address for audit logging
    #[must_use]
    pub fn new(spool: Option<Arc<dyn BackingStore>>, peer: SocketAddr) -> Self {
        Self {
            spool,
            peer,
            auth_backend: Arc::new(DenyAllAuthBackend),
            greylist: None,
            banner: Arc::from(""),
            max_message_size: 0,
        }
    }

    /// Creates a handler that consults `auth_backend` for `AUTH` attempts.
    #[must_use]
    pub fn with_auth_backend(
        spool: Option<Arc<dyn BackingStore>>,
        peer: SocketAddr,
        auth_backend: Arc<dyn AuthBackend>,
    ) -> Self {
        Self {
            spool,
            peer,
            auth_backend,
            greylist: None,
            banner: Arc::from(""),
            max_message_size: 0,
        }
    }

    /// Creates a handler with a full set of collaborators.
    #[must_use]
    pub fn with_collaborators(
        spool: Option<Arc<dyn BackingStore>>,
        peer: SocketAddr,
        auth_backend: Arc<dyn AuthBackend>,
        greylist: Option<Arc<crate::greylist::Greylist>>,
    ) -> Self {
        Self {
            spool,
            peer,
            auth_backend,
            greylist,
            banner: Arc::from(""),
            max_message_size: 0,
        }
    }

    /// Sets the text sent back as the `220` greeting at `validate_connect`.
    #[must_use]
    pub fn with_banner(mut self, banner: Arc<str>) -> Self {
        self.banner = banner;
        self
    }

    /// Sets the declared-size ceiling checked at `MAIL FROM`; `0` disables the check.
    #[must_use]
    pub const fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Spool a message after validation passes.
    ///
    /// This is an internal helper that handles:
    /// - Writing the message to the spool
    /// - Setting success/failure responses
    /// - Clearing transaction metadata
    /// - Audit logging
    /// - Event dispatching
    ///
    /// # Arguments
    ///
    /// * `ctx` - Business context containing the message data
    async fn spool_message(&self, ctx: &mut Context) {
        let tracking_id = if let Some(spool) = &self.spool
            && ctx.data.is_some()
        {
            match spool.write(ctx).await {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::error!("Failed to spool message: {e}");
                    ctx.response = Some((
                        Status::ActionUnavailable,
                        Cow::Borrowed("Please try again later"),
                    ));
                    return;
                }
            }
        } else {
            None
        };

        // Clear transaction state after successful acceptance
        ctx.metadata.remove("declared_size");

        // Set success response with tracking ID
        ctx.response = Some((
            Status::Ok,
            tracking_id.as_ref().map_or_else(
                || Cow::Borrowed("Ok: queued"),
                |id| Cow::Owned(format!("Ok: queued as {id}")),
            ),
        ));

        // Audit log: Message received and spooled
        if let Some(id) = &tracking_id {
            let sender = ctx.sender();
            let recipients = ctx.recipients();
            let size = ctx.data.as_ref().map_or(0, |d| d.len());
            let from_ip = self.peer.to_string();

            esmtpd_common::audit::log_message_received(
                &id.to_string(),
                &sender,
                &recipients,
                size,
                &from_ip,
            );
        }
    }
}

#[async_trait]
impl SmtpTransactionHandler for DefaultSmtpTransactionHandler {
    async fn validate_connect(&mut self, ctx: &mut Context) -> bool {
        ctx.response = Some((Status::ServiceReady, Cow::Owned(self.banner.to_string())));
        true
    }

    async fn validate_ehlo(&mut self, _ctx: &mut Context) -> bool {
        true
    }

    async fn validate_mail_from(&mut self, ctx: &mut Context) -> bool {
        if self.max_message_size > 0
            && let Some(declared_size) = ctx.envelope.mail_params().and_then(|p| p.declared_size)
            && declared_size > self.max_message_size
        {
            ctx.response = Some((
                Status::ExceededStorage,
                Cow::Borrowed("Message size exceeds maximum allowed"),
            ));
            return false;
        }

        ctx.response = Some((Status::Ok, Cow::Borrowed("Ok")));
        true
    }

    async fn validate_rcpt_to(&mut self, ctx: &mut Context) -> bool {
        let Some(greylist) = &self.greylist else {
            return true;
        };

        let sender = ctx.sender().unwrap_or_default();
        let Some(recipient) = ctx.recipients().into_iter().next_back() else {
            return true;
        };

        if greylist.check_triplet(self.peer.ip(), &sender, &recipient) {
            true
        } else {
            ctx.response = Some((
                Status::ActionUnavailable,
                Cow::Borrowed("4.7.1 Please try again later"),
            ));
            false
        }
    }

    async fn handle_message(&mut self, ctx: &mut Context) -> bool {
        self.spool_message(ctx).await;

        ctx.response
            .as_ref()
            .is_none_or(|(status, _)| !status.is_temporary() && !status.is_permanent())
    }

    async fn validate_auth(&mut self, auth: &state::Auth, ctx: &mut Context) -> bool {
        match auth::authenticate(self.auth_backend.as_ref(), auth.mechanism, &auth.step).await {
            Ok(AuthResult::Ok(principal)) => {
                ctx.authenticated = Some(principal);
                ctx.response = Some((Status::AuthSuccessful, Cow::Borrowed("2.7.0 Authentication successful")));
                true
            }
            Ok(AuthResult::Invalid) | Err(_) => {
                ctx.response = Some((
                    Status::AuthCredentialsInvalid,
                    Cow::Borrowed("5.7.8 Authentication credentials invalid"),
                ));
                false
            }
            Ok(AuthResult::TemporaryError) => {
                ctx.response = Some((
                    Status::AuthTemporaryFailure,
                    Cow::Borrowed("4.7.0 Temporary authentication failure"),
                ));
                false
            }
        }
    }
}

/// Helper function to determine if state requires validation.
///
/// This is used by the session orchestrator to decide whether to call
/// the business handler after an FSM transition.
///
/// # Arguments
///
/// * `state` - The current protocol state
///
/// # Returns
///
/// `true` if the state requires business logic validation
#[must_use]
pub const fn requires_validation(state: &State) -> bool {
    matches!(
        state,
        State::Connect(_)
            | State::Ehlo(_)
            | State::Helo(_)
            | State::MailFrom(_)
            | State::RcptTo(_)
            | State::PostDot(_)
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::MailParameters;

    #[test]
    fn test_default_handler_creation() {
        let handler = DefaultSmtpTransactionHandler::new(None, "127.0.0.1:1234".parse().unwrap());
        assert!(handler.spool.is_none());
        assert_eq!(handler.peer.to_string(), "127.0.0.1:1234");
    }

    #[test]
    fn test_default_handler_with_spool() {
        use esmtpd_spool::MemoryBackingStore;

        let spool = Arc::new(MemoryBackingStore::default());
        let handler =
            DefaultSmtpTransactionHandler::new(Some(spool), "127.0.0.1:1234".parse().unwrap());
        assert!(handler.spool.is_some());
    }

    #[test]
    fn test_requires_validation() {
        use crate::state::*;

        // States that require validation
        assert!(requires_validation(&State::Connect(Connect)));
        assert!(requires_validation(&State::Ehlo(Ehlo {
            id: "test".to_string()
        })));
        assert!(requires_validation(&State::Helo(Helo {
            id: "test".to_string()
        })));
        assert!(requires_validation(&State::MailFrom(MailFrom {
            sender: None,
            params: MailParameters::default()
        })));

        // States that don't require validation
        assert!(!requires_validation(&State::Data(Data)));
        assert!(!requires_validation(&State::Quit(Quit)));
        assert!(!requires_validation(&State::Invalid(Invalid {
            reason: String::new()
        })));
    }

    struct AcceptAnyoneBackend;

    #[async_trait]
    impl AuthBackend for AcceptAnyoneBackend {
        async fn verify(&self, user: &str, _pass: &str) -> AuthResult {
            AuthResult::Ok(user.to_string())
        }
    }

    #[tokio::test]
    async fn validate_auth_accepts_good_credentials() {
        use base64::Engine as _;

        use crate::{command::AuthMechanism, state::AuthStep};

        let mut handler = DefaultSmtpTransactionHandler::with_auth_backend(
            None,
            "127.0.0.1:1234".parse().unwrap(),
            Arc::new(AcceptAnyoneBackend),
        );

        let response = base64::engine::general_purpose::STANDARD.encode("\0alice\0hunter2");
        let auth = state::Auth {
            mechanism: AuthMechanism::Plain,
            step: AuthStep::Response(response),
        };
        let mut ctx = Context::default();

        assert!(handler.validate_auth(&auth, &mut ctx).await);
        assert_eq!(ctx.authenticated.as_deref(), Some("alice"));
        assert_eq!(ctx.response.unwrap().0, Status::AuthSuccessful);
    }

    #[tokio::test]
    async fn validate_auth_rejects_default_deny_all_backend() {
        use base64::Engine as _;

        use crate::{command::AuthMechanism, state::AuthStep};

        let mut handler =
            DefaultSmtpTransactionHandler::new(None, "127.0.0.1:1234".parse().unwrap());

        let response = base64::engine::general_purpose::STANDARD.encode("\0alice\0hunter2");
        let auth = state::Auth {
            mechanism: AuthMechanism::Plain,
            step: AuthStep::Response(response),
        };
        let mut ctx = Context::default();

        assert!(!handler.validate_auth(&auth, &mut ctx).await);
        assert!(ctx.authenticated.is_none());
        assert_eq!(ctx.response.unwrap().0, Status::AuthCredentialsInvalid);
    }

    #[tokio::test]
    async fn validate_rcpt_to_defers_first_contact_when_greylisted() {
        use crate::greylist::Greylist;

        let greylist = Arc::new(Greylist::new(
            std::time::Duration::from_secs(60),
            std::time::Duration::from_secs(3600),
        ));
        let mut handler = DefaultSmtpTransactionHandler::with_collaborators(
            None,
            "127.0.0.1:1234".parse().unwrap(),
            Arc::new(DenyAllAuthBackend),
            Some(greylist),
        );

        let mut ctx = Context::default();
        let mut sender = mailparse::addrparse("a@example.com").unwrap();
        ctx.envelope.sender_mut().replace(sender.remove(0).into());
        ctx.envelope
            .recipients_mut()
            .replace(mailparse::addrparse("b@example.com").unwrap().into());

        assert!(!handler.validate_rcpt_to(&mut ctx).await);
        assert_eq!(ctx.response.unwrap().0, Status::ActionUnavailable);
    }

    #[tokio::test]
    async fn validate_rcpt_to_passes_through_without_a_greylist() {
        let mut handler =
            DefaultSmtpTransactionHandler::new(None, "127.0.0.1:1234".parse().unwrap());
        let mut ctx = Context::default();

        assert!(handler.validate_rcpt_to(&mut ctx).await);
        assert!(ctx.response.is_none());
    }
}
