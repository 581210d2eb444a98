//! Wires a [`DaemonConfig`] into a running `esmtpd_smtp::Server`: builds the
//! `SmtpArgs` (extensions, spool, timeouts, auth backend, greylist), the
//! admission-level `Listener` (connection cap, DNSBL, rate limiter), and
//! drives the whole thing until a shutdown signal fires.

use std::sync::Arc;

use esmtpd_common::{
    internal,
    policy::{AuthBackend, DnsblPolicy},
    Signal,
};
use esmtpd_smtp::{
    extensions::Extension, greylist::Greylist, listener::Listener, server::Server,
    session::TlsContext, Smtp, SmtpArgs, SmtpServerTimeouts,
};
use tokio::sync::broadcast;

use crate::config::DaemonConfig;

/// The assembled daemon, ready to serve once `run` is called.
pub struct Daemon {
    config: DaemonConfig,
    auth_backend: Option<Arc<dyn AuthBackend>>,
    dnsbl: Option<Arc<dyn DnsblPolicy>>,
}

impl Daemon {
    #[must_use]
    pub fn new(config: DaemonConfig) -> Self {
        Self {
            config,
            auth_backend: None,
            dnsbl: None,
        }
    }

    /// Wire the backend consulted for `AUTH PLAIN`/`AUTH LOGIN`. Absent a
    /// call to this, `enable_auth` sessions get `DenyAllAuthBackend` (every
    /// credential is `535`) — `spec.md` Open Question (b).
    #[must_use]
    pub fn with_auth_backend(mut self, backend: Arc<dyn AuthBackend>) -> Self {
        self.auth_backend = Some(backend);
        self
    }

    /// Wire the DNSBL hook consulted at admission. Absent a call to this,
    /// `enable_dnsbl` has no effect (every peer is treated as clean).
    #[must_use]
    pub fn with_dnsbl(mut self, dnsbl: Arc<dyn DnsblPolicy>) -> Self {
        self.dnsbl = Some(dnsbl);
        self
    }

    fn build_extensions(&self) -> Vec<Extension> {
        let server = &self.config.server;
        let mut extensions = vec![Extension::Size(server.max_message_size)];

        if server.enable_tls {
            if let (Some(cert), Some(key)) = (&server.tls_cert_path, &server.tls_key_path) {
                extensions.push(Extension::Starttls(TlsContext {
                    certificate: cert.into(),
                    key: key.into(),
                }));
            } else {
                internal!(level = WARN, "enable_tls is set but tls_cert_path/tls_key_path are missing; STARTTLS will not be advertised");
            }
        }

        if server.enable_auth {
            extensions.push(Extension::Auth(vec![
                esmtpd_smtp::command::AuthMechanism::Plain,
                esmtpd_smtp::command::AuthMechanism::Login,
            ]));
        }

        extensions
    }

    fn build_server(&self) -> Server {
        let server_cfg = &self.config.server;

        let spool = self.config.spool.clone().into_backing_store();

        let timeouts = SmtpServerTimeouts {
            command_secs: server_cfg.command_timeout().as_secs(),
            data_init_secs: server_cfg.data_timeout().as_secs(),
            ..SmtpServerTimeouts::default()
        };

        let mut args = SmtpArgs::builder()
            .with_extensions(self.build_extensions())
            .with_spool(spool)
            .with_timeouts(timeouts);

        if let Some(backend) = &self.auth_backend {
            args = args.with_auth_backend(Arc::clone(backend));
        }

        if server_cfg.enable_greylist {
            let greylist = Arc::new(Greylist::new(
                self.config.greylist.initial_delay(),
                self.config.greylist.entry_ttl(),
            ));
            args = args.with_greylist(greylist);
        }

        let mut listener: Listener<Smtp> =
            Listener::from(std::net::SocketAddr::new(server_cfg.host, server_cfg.port))
                .with_max_connections(server_cfg.max_connections)
                .with_rate_limit(
                    server_cfg.rate_limit_per_ip,
                    server_cfg.rate_limit_window_seconds,
                )
                .with_args(args);

        if let Some(dnsbl) = &self.dnsbl {
            if server_cfg.enable_dnsbl {
                listener = listener.with_dnsbl(Arc::clone(dnsbl));
            }
        }

        Server::new(vec![listener])
    }

    /// Run until `shutdown` fires `Signal::Shutdown`, or forever if the
    /// receiver is never signalled by the caller — `main.rs` subscribes this
    /// to ctrl-c/SIGTERM.
    ///
    /// # Errors
    /// Returns an error if the listening socket fails to bind.
    pub async fn run(&self, shutdown: broadcast::Receiver<Signal>) -> anyhow::Result<()> {
        esmtpd_common::logging::init();
        internal!(
            "esmtpd listening on {}:{}",
            self.config.server.host,
            self.config.server.port
        );

        let server = self.build_server();
        server.serve(shutdown).await
    }
}
