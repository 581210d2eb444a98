//! Collaborator interfaces the SMTP core consults but does not implement.
//!
//! These replace the teacher's FFI/dylib `modules::dispatch` mechanism with
//! ordinary trait objects: the loader and the loaded code ship in the same
//! process, so there's no need to cross a C ABI to reach them.

use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;

use crate::{context::Context, envelope::Envelope};

/// Verifies `AUTH PLAIN`/`AUTH LOGIN` credentials.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn verify(&self, user: &str, pass: &str) -> AuthResult;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    /// Authentication succeeded; the principal to record on the session.
    Ok(String),
    /// Credentials were rejected.
    Invalid,
    /// The backend couldn't answer right now (e.g. upstream directory down).
    TemporaryError,
}

/// Accepts a completed message for delivery or queuing.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn submit(&self, envelope: &Envelope, message: &[u8]) -> SinkResult;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkResult {
    /// Accepted; the queue/spool id to report back to the client.
    Accepted(String),
    /// Permanently rejected (maps to a 5xx final response).
    RejectedPermanent(String),
    /// Rejected for now; the client should retry later (maps to a 4xx).
    RejectedTemporary(String),
}

/// Consults a DNS blocklist (or any other IP reputation source) for the
/// connecting peer. Implementations may perform blocking I/O; callers are
/// expected to run them off the async runtime thread (e.g. via
/// `tokio::task::spawn_blocking`).
pub trait DnsblPolicy: Send + Sync {
    fn check(&self, ip: IpAddr) -> DnsblResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsblResult {
    Clean,
    Listed,
}

/// Decides whether a given session is subject to greylisting at all.
pub trait GreylistPolicy: Send + Sync {
    fn should_apply(&self, ctx: &Context) -> bool;
}

/// The key a rate limiter buckets connections/transactions by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateKey {
    Ip(IpAddr),
    Principal(String),
}

/// Decides how a session is keyed for rate limiting. The default
/// implementation buckets by peer IP address.
pub trait RateLimitPolicy: Send + Sync {
    fn key_for(&self, ctx: &Context, peer: SocketAddr) -> RateKey;
}

/// The rate-limit policy used when no deployment-specific policy is
/// configured: bucket by peer IP, or by the authenticated principal once
/// `AUTH` has succeeded.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRateLimitPolicy;

impl RateLimitPolicy for DefaultRateLimitPolicy {
    fn key_for(&self, ctx: &Context, peer: SocketAddr) -> RateKey {
        ctx.authenticated
            .clone()
            .map_or_else(|| RateKey::Ip(peer.ip()), RateKey::Principal)
    }
}

/// The greylist policy used when no deployment-specific policy is
/// configured: apply to every session.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultGreylistPolicy;

impl GreylistPolicy for DefaultGreylistPolicy {
    fn should_apply(&self, _ctx: &Context) -> bool {
        true
    }
}

/// An `AuthBackend` that rejects every credential — the safe default when a
/// deployment enables `AUTH` but wires no backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyAllAuthBackend;

#[async_trait]
impl AuthBackend for DenyAllAuthBackend {
    async fn verify(&self, _user: &str, _pass: &str) -> AuthResult {
        AuthResult::Invalid
    }
}

/// A `DnsblPolicy` that never lists anyone — the default when no DNSBL is
/// configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDnsblPolicy;

impl DnsblPolicy for NoopDnsblPolicy {
    fn check(&self, _ip: IpAddr) -> DnsblResult {
        DnsblResult::Clean
    }
}
