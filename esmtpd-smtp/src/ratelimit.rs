//! Sliding-window admission and transaction rate limiting.
//!
//! A single [`parking_lot::Mutex`] serialises all bucket operations. Each
//! check is a handful of map operations, so contention is not expected to be
//! meaningful even under load (see the concurrency notes this mirrors for
//! [`crate::greylist::Greylist`]).

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use esmtpd_common::policy::RateKey;
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    count: u32,
    window_start: Instant,
}

fn key_string(key: &RateKey) -> String {
    match key {
        RateKey::Ip(ip) => format!("ip:{ip}"),
        RateKey::Principal(principal) => format!("principal:{principal}"),
    }
}

/// A fixed-window rate limiter keyed by [`RateKey`].
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            limit,
            window,
        }
    }

    /// Record an attempt for `key`, returning `true` if it is within the
    /// configured limit and `false` if the caller should be rejected.
    ///
    /// Buckets untouched for two full windows are reclaimed opportunistically
    /// whenever the map is next locked.
    pub fn check_and_increment(&self, key: &RateKey) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();

        buckets.retain(|_, bucket| now.duration_since(bucket.window_start) < self.window * 2);

        let entry = buckets.entry(key_string(key)).or_insert(Bucket {
            count: 0,
            window_start: now,
        });

        if now.duration_since(entry.window_start) >= self.window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count += 1;
        entry.count <= self.limit
    }
}

impl Default for RateLimiter {
    /// 60 attempts per 60-second window, matching
    /// [`esmtpd_common::config::ServerConfig`]'s per-IP default.
    fn default() -> Self {
        Self::new(60, Duration::from_secs(60))
    }
}
