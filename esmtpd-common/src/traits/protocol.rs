use std::{collections::HashMap, net::SocketAddr};

use serde::de::DeserializeOwned;
use tokio::net::TcpStream;

use crate::{
    Signal,
    error::{ProtocolError, SessionError},
};

/// Drives a single accepted connection to completion.
pub trait SessionHandler {
    /// Run the session until the client disconnects, it errors out, or
    /// `signal` fires `Signal::Shutdown`.
    fn run(
        self,
        signal: tokio::sync::broadcast::Receiver<Signal>,
    ) -> impl std::future::Future<Output = Result<(), SessionError>> + Send;
}

/// A wire protocol a [`Signal`]-aware listener can dispatch accepted
/// connections to.
pub trait Protocol: Default + Send + Sync {
    /// The session type produced for each accepted connection.
    type Session: SessionHandler + Send + Sync + 'static;

    /// Protocol-specific configuration (extensions, TLS material, timeouts, ...).
    type Args: Default + Clone + DeserializeOwned + Send + Sync + 'static;

    /// A short, human-readable name for this protocol, used in logs.
    fn ty() -> &'static str;

    /// Build a session that will drive `stream` to completion.
    fn handle(
        &self,
        stream: TcpStream,
        address: SocketAddr,
        init_context: HashMap<String, String>,
        args: Self::Args,
    ) -> Self::Session;

    /// Validate (and default-fill) `args` before the first connection is
    /// accepted.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid (e.g. a configured
    /// TLS certificate or key file doesn't exist).
    fn validate(&mut self, args: &mut Self::Args) -> Result<(), ProtocolError>;
}
