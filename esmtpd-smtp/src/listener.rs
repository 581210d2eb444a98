//! Connection admission (C1 in `spec.md` §4.1): binds the listening socket,
//! enforces the concurrent-session cap, consults the DNSBL hook and the
//! per-IP rate limiter, then dispatches to the protocol handler.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
};

use esmtpd_common::{
    internal,
    policy::{DnsblPolicy, DnsblResult, NoopDnsblPolicy, RateKey},
    traits::protocol::{Protocol, SessionHandler},
    tracing, Signal,
};
use esmtpd_tracing::traced;

use crate::ratelimit::RateLimiter;

/// Decrements the shared active-session counter when dropped, whether the
/// owning task returned normally or unwound from a panic.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

const fn default_max_connections() -> usize {
    512
}

const fn default_rate_limit_per_ip() -> u32 {
    60
}

const fn default_rate_limit_window_secs() -> u64 {
    60
}

#[allow(
    clippy::unsafe_derive_deserialize,
    reason = "The unsafe aspects have nothing to do with the struct"
)]
#[derive(Deserialize, Serialize)]
pub struct Listener<Proto: Protocol> {
    socket: SocketAddr,
    #[serde(skip_serializing, default)]
    args: Proto::Args,
    /// Maximum number of sessions this listener will admit concurrently
    /// (`spec.md` §4.1 step 1, `max_connections` in §6.3).
    #[serde(default = "default_max_connections")]
    max_connections: usize,
    /// Requests per IP allowed within the admission rate-limit window
    /// (`spec.md` §4.6, checked at accept time rather than per-command).
    #[serde(default = "default_rate_limit_per_ip")]
    rate_limit_per_ip: u32,
    #[serde(default = "default_rate_limit_window_secs")]
    rate_limit_window_secs: u64,
    #[serde(skip)]
    dnsbl: Option<Arc<dyn DnsblPolicy>>,
    #[serde(skip)]
    rate_limiter: Option<Arc<RateLimiter>>,
    #[serde(skip)]
    active: Arc<AtomicUsize>,
}

impl<Proto: Protocol> Listener<Proto> {
    /// Wire a DNSBL policy hook (`spec.md` §6.2 `DnsblPolicy`). Absent a
    /// call to this, every peer is treated as clean.
    #[must_use]
    pub fn with_dnsbl(mut self, dnsbl: Arc<dyn DnsblPolicy>) -> Self {
        self.dnsbl = Some(dnsbl);
        self
    }

    #[must_use]
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    #[must_use]
    pub fn with_args(mut self, args: Proto::Args) -> Self {
        self.args = args;
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, max_per_window: u32, window_secs: u64) -> Self {
        self.rate_limit_per_ip = max_per_window;
        self.rate_limit_window_secs = window_secs;
        self
    }

    /// Currently admitted session count, for tests and metrics.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Write a rejection line and close the socket without ever handing it
    /// to the protocol handler (`spec.md` §4.1 steps 1, 3 and 4).
    async fn reject(mut stream: TcpStream, text: &'static str) {
        let _ = stream.write_all(text.as_bytes()).await;
        let _ = stream.shutdown().await;
    }
}

impl<Proto: Protocol> Listener<Proto> {
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, err))]
    pub async fn serve(
        &self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> anyhow::Result<()> {
        internal!("Serving {:?}", self.socket);
        let mut sessions = Vec::default();

        let (address, port) = (self.socket.ip(), self.socket.port());
        let listener = TcpListener::bind(self.socket).await?;

        let mut args = self.args.clone();
        let mut handler = Proto::default();
        handler.validate(&mut args)?;
        let args = args;

        let dnsbl: Arc<dyn DnsblPolicy> = self
            .dnsbl
            .clone()
            .unwrap_or_else(|| Arc::new(NoopDnsblPolicy));
        let rate_limiter = self.rate_limiter.clone().unwrap_or_else(|| {
            Arc::new(RateLimiter::new(
                self.rate_limit_per_ip,
                std::time::Duration::from_secs(self.rate_limit_window_secs),
            ))
        });

        loop {
            tokio::select! {
                sig = shutdown.recv() => {
                    if matches!(sig, Ok(Signal::Shutdown)) {
                        internal!(level = INFO, "SMTP Listener {}:{} Received Shutdown signal, finishing sessions ...", address, port);
                        join_all(sessions).await;
                        break;
                    }
                }

                connection = listener.accept() => {
                    let (stream, peer) = match connection {
                        Ok(pair) => pair,
                        Err(err) => {
                            // A failed accept() other than WouldBlock is
                            // logged and the loop continues, per
                            // spec.md §4.1.
                            internal!(level = ERROR, "Accept failed: {err}");
                            continue;
                        }
                    };
                    tracing::debug!("Connection received on {} from {}", self.socket, peer);

                    // Step 1: concurrent-session cap, enforced before any
                    // further allocation.
                    if self.active.load(Ordering::SeqCst) >= self.max_connections {
                        tokio::spawn(Self::reject(stream, "421 Too many connections, try again later\r\n"));
                        continue;
                    }

                    // Step 3: DNSBL hook. May block; run off the runtime thread.
                    let dnsbl_check = Arc::clone(&dnsbl);
                    let ip = peer.ip();
                    let listed = tokio::task::spawn_blocking(move || dnsbl_check.check(ip))
                        .await
                        .unwrap_or(DnsblResult::Clean);
                    if matches!(listed, DnsblResult::Listed) {
                        internal!(level = INFO, "{} rejected by DNSBL", peer);
                        tokio::spawn(Self::reject(stream, "554 Rejected\r\n"));
                        continue;
                    }

                    // Step 4: per-IP rate limit.
                    if !rate_limiter.check_and_increment(&RateKey::Ip(ip)) {
                        tokio::spawn(Self::reject(stream, "421 Too many connections, try again later\r\n"));
                        continue;
                    }

                    // Step 5: dispatch; the guard releases the cap slot on
                    // completion or panic.
                    self.active.fetch_add(1, Ordering::SeqCst);
                    let guard = ActiveGuard(Arc::clone(&self.active));
                    let session = handler.handle(stream, peer, HashMap::new(), args.clone());
                    let session_shutdown = shutdown.resubscribe();
                    sessions.push(tokio::spawn(async move {
                        let _guard = guard;
                        if let Err(err) = session.run(session_shutdown).await {
                            internal!(level = ERROR, "Error: {err}");
                        }
                    }));
                }
            }
        }

        Ok(())
    }
}

impl<Proto: Protocol> From<SocketAddr> for Listener<Proto> {
    fn from(socket: SocketAddr) -> Self {
        Self {
            socket,
            args: Proto::Args::default(),
            max_connections: default_max_connections(),
            rate_limit_per_ip: default_rate_limit_per_ip(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            dnsbl: None,
            rate_limiter: None,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use esmtpd_common::policy::DnsblPolicy;
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::Smtp;

    struct AlwaysListed;

    impl DnsblPolicy for AlwaysListed {
        fn check(&self, _ip: std::net::IpAddr) -> DnsblResult {
            DnsblResult::Listed
        }
    }

    #[tokio::test]
    async fn active_guard_decrements_on_drop() {
        let active = Arc::new(AtomicUsize::new(1));
        {
            let _guard = ActiveGuard(Arc::clone(&active));
            assert_eq!(active.load(Ordering::SeqCst), 1);
        }
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dnsbl_listed_peer_is_rejected_before_dispatch() {
        let bound = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local_addr = bound.local_addr().unwrap();
        drop(bound);

        let listener: Listener<Smtp> =
            Listener::from(local_addr).with_dnsbl(Arc::new(AlwaysListed));
        let (tx, rx) = tokio::sync::broadcast::channel(1);

        let serve = tokio::spawn(async move { listener.serve(rx).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut client = tokio::net::TcpStream::connect(local_addr).await.unwrap();
        let mut buf = [0u8; 64];
        let n = tokio::time::timeout(Duration::from_secs(1), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(buf[..n].starts_with(b"554"));

        let _ = tx.send(Signal::Shutdown);
        let _ = tokio::time::timeout(Duration::from_secs(1), serve).await;
    }

    #[tokio::test]
    async fn over_capacity_connection_is_rejected_with_421() {
        let bound = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local_addr = bound.local_addr().unwrap();
        drop(bound);

        let listener: Listener<Smtp> =
            Listener::from(local_addr).with_max_connections(0);
        let (tx, rx) = tokio::sync::broadcast::channel(1);

        let serve = tokio::spawn(async move { listener.serve(rx).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut client = tokio::net::TcpStream::connect(local_addr).await.unwrap();
        let mut buf = [0u8; 64];
        let n = tokio::time::timeout(Duration::from_secs(1), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(buf[..n].starts_with(b"421"));

        let _ = tx.send(Signal::Shutdown);
        let _ = tokio::time::timeout(Duration::from_secs(1), serve).await;
    }
}
