use std::{borrow::Cow, net::SocketAddr, path::PathBuf, sync::Arc};

use ahash::AHashMap;
use esmtpd_common::{
    Signal, context, error::SessionError, internal, outgoing, status::Status, tracing,
};
use esmtpd_tracing::traced;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite};

use esmtpd_common::policy::AuthBackend;

use crate::{
    State,
    connection::Connection,
    extensions::Extension,
    greylist::Greylist,
    state,
    transaction_handler::{DefaultSmtpTransactionHandler, SmtpTransactionHandler},
};

// Submodules containing implementation details
mod events;
mod io;
mod response;

#[repr(C)]
#[derive(PartialEq, Eq, Debug)]
pub enum Event {
    ConnectionClose,
    ConnectionKeepAlive,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct Context {
    pub state: State,
    pub message: Vec<u8>,
    pub sent: bool,
    /// Octets seen since the last CRLF, for the 998-octet line cap (RFC 5321 §4.5.3.1.6).
    pub line_len: usize,
}

pub type Response = (Option<Vec<String>>, Event);

#[derive(Clone, Debug, Deserialize)]
pub struct TlsContext {
    pub certificate: PathBuf,
    pub key: PathBuf,
}

pub struct SessionConfig {
    pub extensions: Vec<Extension>,
    pub tls_context: Option<TlsContext>,
    pub spool: Option<Arc<dyn esmtpd_spool::BackingStore>>,
    pub banner: String,
    pub init_context: AHashMap<Cow<'static, str>, String>,
    pub timeouts: crate::SmtpServerTimeouts,
    pub auth_backend: Option<Arc<dyn AuthBackend>>,
    pub greylist: Option<Arc<Greylist>>,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("extensions", &self.extensions)
            .field("tls_context", &self.tls_context)
            .field("banner", &self.banner)
            .field("init_context", &self.init_context)
            .field("timeouts", &self.timeouts)
            .field("auth_backend", &self.auth_backend.is_some())
            .field("greylist", &self.greylist.is_some())
            .finish_non_exhaustive()
    }
}

impl SessionConfig {
    /// Create a new `SessionConfig` builder
    #[must_use]
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }
}

/// Builder for `SessionConfig`
pub struct SessionConfigBuilder {
    extensions: Vec<Extension>,
    tls_context: Option<TlsContext>,
    spool: Option<Arc<dyn esmtpd_spool::BackingStore>>,
    banner: String,
    init_context: AHashMap<Cow<'static, str>, String>,
    timeouts: crate::SmtpServerTimeouts,
    auth_backend: Option<Arc<dyn AuthBackend>>,
    greylist: Option<Arc<Greylist>>,
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        Self {
            extensions: Vec::new(),
            tls_context: None,
            spool: None,
            banner: String::new(),
            init_context: AHashMap::new(),
            timeouts: crate::SmtpServerTimeouts::default(),
            auth_backend: None,
            greylist: None,
        }
    }
}

impl SessionConfigBuilder {
    /// Set the SMTP extensions supported by this session
    #[must_use]
    pub fn with_extensions(mut self, extensions: Vec<Extension>) -> Self {
        self.extensions = extensions;
        self
    }

    /// Set the TLS context for STARTTLS support
    #[must_use]
    pub fn with_tls_context(mut self, tls_context: Option<TlsContext>) -> Self {
        self.tls_context = tls_context;
        self
    }

    /// Set the spool controller for message persistence
    #[must_use]
    pub fn with_spool(mut self, spool: Option<Arc<dyn esmtpd_spool::BackingStore>>) -> Self {
        self.spool = spool;
        self
    }

    /// Set the server banner hostname
    #[must_use]
    pub fn with_banner(mut self, banner: String) -> Self {
        self.banner = banner;
        self
    }

    /// Set the initial context key-value pairs
    #[must_use]
    pub fn with_init_context(mut self, init_context: AHashMap<Cow<'static, str>, String>) -> Self {
        self.init_context = init_context;
        self
    }

    /// Set the timeout configuration for this session
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: crate::SmtpServerTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the backend consulted for `AUTH PLAIN`/`AUTH LOGIN`
    #[must_use]
    pub fn with_auth_backend(mut self, auth_backend: Arc<dyn AuthBackend>) -> Self {
        self.auth_backend = Some(auth_backend);
        self
    }

    /// Set the greylist consulted at `RCPT TO`
    #[must_use]
    pub fn with_greylist(mut self, greylist: Arc<Greylist>) -> Self {
        self.greylist = Some(greylist);
        self
    }

    /// Build the final `SessionConfig`
    #[must_use]
    pub fn build(self) -> SessionConfig {
        SessionConfig {
            extensions: self.extensions,
            tls_context: self.tls_context,
            spool: self.spool,
            banner: self.banner,
            init_context: self.init_context,
            timeouts: self.timeouts,
            auth_backend: self.auth_backend,
            greylist: self.greylist,
        }
    }
}

pub struct Session<Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync> {
    peer: SocketAddr,
    pub(super) context: Context,
    extensions: Vec<Extension>,
    pub(super) banner: Arc<str>,
    pub(super) tls_context: Option<TlsContext>,
    pub(super) spool: Option<Arc<dyn esmtpd_spool::BackingStore>>,
    pub(super) connection: Connection<Stream>,
    pub(super) transaction_handler: Box<dyn SmtpTransactionHandler>,
    init_context: Arc<AHashMap<Cow<'static, str>, String>>,
    /// Maximum message size in bytes as advertised via SIZE extension (RFC 1870).
    ///
    /// A value of 0 means no size limit is enforced (unlimited).
    ///
    /// This is validated at two points:
    /// 1. **MAIL FROM**: Against declared SIZE parameter (RFC 1870 Section 4)
    /// 2. **DATA**: Against actual received bytes (RFC 1870 Section 5)
    ///
    /// When the limit is exceeded, the server rejects with SMTP status code 552
    /// (Exceeded Storage Allocation).
    pub(super) max_message_size: usize,
    /// Server-side timeout configuration
    timeouts: crate::SmtpServerTimeouts,
    /// Start time for tracking connection lifetime
    start_time: std::time::Instant,
    /// Accumulates raw octets across one or more `BDAT` chunks (RFC 3030)
    /// until the `LAST` chunk completes the message.
    pub(super) bdat_buffer: Vec<u8>,
    /// `bdat_buffer.len()` at the start of the chunk currently being
    /// received, so its size can be reported without clearing the buffer
    /// for non-final chunks.
    pub(super) bdat_chunk_start: usize,
    /// Holds a second command pipelined (RFC 2920) into the same read as the
    /// one just dispatched, until the next call to `receive()`.
    pub(super) cmd_buffer: Vec<u8>,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync> Session<Stream> {
    #[traced(instrument(level = tracing::Level::TRACE, skip_all), timing)]
    pub(crate) fn create(stream: Stream, peer: SocketAddr, config: SessionConfig) -> Self {
        tracing::debug!("Config: {:?}", config);
        tracing::debug!("Extensions: {:?}", config.extensions);

        // Extract max message size from SIZE extension
        let max_message_size = config
            .extensions
            .iter()
            .find_map(|ext| match ext {
                Extension::Size(size) => Some(*size),
                _ => None,
            })
            .unwrap_or(0);

        tracing::debug!("Max message size: {max_message_size}");

        let tls_context = config.extensions.iter().find_map(|ext| match ext {
            Extension::Starttls(context) => Some(context.clone()),
            _ => None,
        });

        let auth_backend = config
            .auth_backend
            .unwrap_or_else(|| Arc::new(esmtpd_common::policy::DenyAllAuthBackend));

        let banner: Arc<str> = if config.banner.is_empty() {
            std::env::var("HOSTNAME")
                .unwrap_or_else(|_| "localhost".to_string())
                .into()
        } else {
            config.banner.into()
        };

        Self {
            peer,
            connection: Connection::Plain {
                stream,
                read_buf: Vec::new(),
                read_pos: 0,
                read_len: 0,
            },
            context: Context::default(),
            extensions: config.extensions,
            tls_context,
            transaction_handler: Box::new(
                DefaultSmtpTransactionHandler::with_collaborators(
                    config.spool.clone(),
                    peer,
                    auth_backend,
                    config.greylist,
                )
                .with_banner(Arc::clone(&banner))
                .with_max_message_size(max_message_size),
            ),
            spool: config.spool,
            banner,
            init_context: Arc::new(config.init_context),
            max_message_size,
            timeouts: config.timeouts,
            start_time: std::time::Instant::now(),
            bdat_buffer: Vec::new(),
            bdat_chunk_start: 0,
            cmd_buffer: Vec::new(),
        }
    }

    /// Get the appropriate timeout for the current state
    ///
    /// Returns timeout in seconds based on RFC 5321 recommendations:
    /// - DATA block reading: 3 minutes (waiting for message content)
    /// - DATA initiation: 2 minutes (for DATA command itself)
    /// - `PostDot`: 10 minutes (for processing after final dot)
    /// - Regular commands: 5 minutes (EHLO, MAIL FROM, RCPT TO, etc.)
    const fn get_timeout_secs(&self) -> u64 {
        match &self.context.state {
            State::Reading(_) => self.timeouts.data_block_secs,
            State::Data(_) => self.timeouts.data_init_secs,
            State::PostDot(_) => self.timeouts.data_termination_secs,
            _ => self.timeouts.command_secs,
        }
    }

    #[traced(instrument(level = tracing::Level::TRACE, skip_all, fields(?peer = self.peer), ret), timing(precision = "us"))]
    #[allow(clippy::too_many_lines)]
    pub(crate) async fn run(
        mut self,
        signal: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), SessionError> {
        internal!("Connected");

        async fn run_inner<Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync>(
            mut session: Session<Stream>,
            validate_context: &mut context::Context,
            mut signal: tokio::sync::broadcast::Receiver<Signal>,
        ) -> Result<(), SessionError> {
            loop {
                // Check if connection has exceeded maximum lifetime
                let connection_duration = session.start_time.elapsed();
                let max_duration = std::time::Duration::from_secs(session.timeouts.connection_secs);
                if connection_duration >= max_duration {
                    tracing::warn!(
                        peer = ?session.peer,
                        duration_secs = ?connection_duration.as_secs(),
                        max_secs = session.timeouts.connection_secs,
                        "Connection exceeded maximum lifetime, closing"
                    );
                    return Err(SessionError::Timeout(session.timeouts.connection_secs));
                }

                // Then generate the response based on what emit() set
                let (response, ev) = session.response(validate_context).await;

                validate_context.response = None;
                session.context.sent = true;

                for response in response.unwrap_or_default() {
                    outgoing!("{response}");

                    session.connection.send(&response).await.map_err(|err| {
                        internal!(level = ERROR, "{err}");
                        SessionError::Protocol(format!("Failed to send response: {err}"))
                    })?;
                }

                if Event::ConnectionClose == ev {
                    return Ok(());
                } else if let Some(tls_context) = session.tls_context.as_ref()
                    && matches!(session.context.state, State::StartTls(_))
                {
                    // Handle TLS upgrade inline to avoid borrowing issues
                    let (conn, info) = session
                        .connection
                        .upgrade(tls_context)
                        .await
                        .map_err(|e| SessionError::Protocol(e.to_string()))?;

                    session.connection = conn;

                    validate_context
                        .metadata
                        .insert(Cow::Borrowed("tls"), "true".to_string());
                    validate_context
                        .metadata
                        .insert(Cow::Borrowed("protocol"), info.proto());
                    validate_context
                        .metadata
                        .insert(Cow::Borrowed("cipher"), info.cipher());

                    session.context = Context {
                        sent: true,
                        ..Default::default()
                    };

                    // A fresh TLS layer means a fresh identity: RFC 3207 requires
                    // the client to re-EHLO, so drop anything the plaintext
                    // conversation established.
                    validate_context.id.clear();
                    validate_context.extended = false;
                    validate_context.authenticated = None;
                    validate_context
                        .metadata
                        .insert("tls".to_string(), "true".to_string());
                    validate_context
                        .metadata
                        .insert("protocol".to_string(), info.proto());
                    validate_context
                        .metadata
                        .insert("cipher".to_string(), info.cipher());

                    internal!(
                        level = DEBUG,
                        "Connection successfully upgraded with {info:#?}"
                    );
                } else {
                    session
                        .handle_command_loop(validate_context, &mut signal)
                        .await?;
                }
            }
        }

        let mut validate_context = context::Context {
            // Fast path: if init_context is empty, use default. Otherwise copy entries.
            // This avoids HashMap clone in the common case (empty init_context)
            metadata: if self.init_context.is_empty() {
                std::collections::HashMap::new()
            } else {
                self.init_context
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect()
            },
            ..Default::default()
        };

        self.emit(&mut validate_context).await;

        let result = run_inner(self, &mut validate_context, signal).await;

        internal!("Connection closed");

        result
    }

    /// Handle the main command receive loop with timeout and shutdown handling
    ///
    /// # Errors
    /// Returns `SessionError` if a timeout occurs or connection error happens.
    async fn handle_command_loop(
        &mut self,
        validate_context: &mut context::Context,
        signal: &mut tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), SessionError> {
        // Get state-aware timeout
        let timeout_secs = self.get_timeout_secs();
        let timeout_duration = std::time::Duration::from_secs(timeout_secs);

        tokio::select! {
            _ = signal.recv() => {
                self.context.sent = false;
                self.context.state = State::Close(state::Close);
                validate_context.response =
                    Some((Status::Unavailable, Cow::Borrowed("Server shutting down")));
                Ok(())
            }
            result = tokio::time::timeout(timeout_duration, self.receive(validate_context)) => {
                if let Ok(close) = result {
                    if close.unwrap_or(true) {
                        return Ok(());
                    }
                } else {
                    // Timeout occurred
                    tracing::warn!(
                        peer = ?self.peer,
                        state = ?self.context.state,
                        timeout_secs = timeout_secs,
                        "Client connection timed out"
                    );
                    return Err(SessionError::Timeout(timeout_secs));
                }
                Ok(())
            }
        }
    }
}
