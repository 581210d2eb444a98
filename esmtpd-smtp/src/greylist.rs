//! Greylisting (sender/recipient/IP triplet deferral).
//!
//! On first contact a triplet is recorded and denied; RFC-compliant clients
//! retry delivery, at which point (once `initial_delay` has elapsed) the
//! triplet is marked allowed and every subsequent attempt passes immediately.
//! A single mutex serialises all operations, matching [`crate::ratelimit::RateLimiter`].

use std::{
    collections::HashMap,
    net::IpAddr,
    time::{Duration, Instant},
};

use parking_lot::Mutex;

#[derive(Debug, Clone)]
struct Entry {
    allowed: bool,
    first_seen: Instant,
    retry_count: u32,
}

type Triplet = (IpAddr, String, String);

/// Tracks `(ip, sender, recipient)` triplets and decides whether a given
/// attempt should be temporarily deferred.
pub struct Greylist {
    entries: Mutex<HashMap<Triplet, Entry>>,
    initial_delay: Duration,
    entry_ttl: Duration,
}

impl Greylist {
    #[must_use]
    pub fn new(initial_delay: Duration, entry_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            initial_delay,
            entry_ttl,
        }
    }

    /// Returns `true` if the triplet should be allowed through immediately.
    ///
    /// First contact is always denied (the triplet is recorded with
    /// `allowed = false`). A retry after `initial_delay` flips the triplet to
    /// allowed and is itself let through; a retry before that is denied
    /// again. Once allowed, a triplet stays allowed until it expires from
    /// inactivity (`entry_ttl`).
    pub fn check_triplet(&self, ip: IpAddr, sender: &str, recipient: &str) -> bool {
        let now = Instant::now();
        let key = (ip, sender.to_string(), recipient.to_string());
        let mut entries = self.entries.lock();

        entries.retain(|_, entry| now.duration_since(entry.first_seen) < self.entry_ttl);

        match entries.get_mut(&key) {
            None => {
                entries.insert(
                    key,
                    Entry {
                        allowed: false,
                        first_seen: now,
                        retry_count: 0,
                    },
                );
                false
            }
            Some(entry) if entry.allowed => true,
            Some(entry) => {
                entry.retry_count += 1;
                if now.duration_since(entry.first_seen) >= self.initial_delay {
                    entry.allowed = true;
                    true
                } else {
                    false
                }
            }
        }
    }
}

impl Default for Greylist {
    /// 60 second initial delay, 36 hour entry lifetime — long enough to
    /// cover a typical MTA's exponential retry schedule without pinning
    /// every triplet ever seen in memory forever.
    fn default() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_secs(36 * 60 * 60))
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn peer() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7))
    }

    #[test]
    fn first_contact_is_denied() {
        let greylist = Greylist::new(Duration::from_secs(60), Duration::from_secs(3600));
        assert!(!greylist.check_triplet(peer(), "a@example.com", "b@example.com"));
    }

    #[test]
    fn retry_before_delay_is_still_denied() {
        let greylist = Greylist::new(Duration::from_secs(60), Duration::from_secs(3600));
        assert!(!greylist.check_triplet(peer(), "a@example.com", "b@example.com"));
        assert!(!greylist.check_triplet(peer(), "a@example.com", "b@example.com"));
    }

    #[test]
    fn retry_after_delay_is_allowed_and_sticky() {
        let greylist = Greylist::new(Duration::from_millis(10), Duration::from_secs(3600));
        assert!(!greylist.check_triplet(peer(), "a@example.com", "b@example.com"));

        std::thread::sleep(Duration::from_millis(15));
        assert!(greylist.check_triplet(peer(), "a@example.com", "b@example.com"));
        // Once allowed, further attempts pass immediately.
        assert!(greylist.check_triplet(peer(), "a@example.com", "b@example.com"));
    }

    #[test]
    fn distinct_triplets_are_independent() {
        let greylist = Greylist::new(Duration::from_secs(60), Duration::from_secs(3600));
        assert!(!greylist.check_triplet(peer(), "a@example.com", "b@example.com"));
        assert!(!greylist.check_triplet(peer(), "a@example.com", "c@example.com"));
    }
}
