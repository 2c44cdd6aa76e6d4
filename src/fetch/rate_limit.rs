//! Per-host request pacing: a map from host to token bucket behind a
//! lightweight mutex, the only cross-worker coordination outside the
//! stores.
//!
//! Buckets emit at the configured rate with burst 1, which also keeps at
//! most one request per host in flight at typical latencies. Hosts that
//! answer 429 or fail repeatedly get an exponential penalty (2s doubling
//! to 60s) without slowing other hosts down.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

const BACKOFF_START: Duration = Duration::from_secs(2);
const BACKOFF_CAP: Duration = Duration::from_secs(60);

pub struct HostRateLimiter {
    min_interval: Duration,
    hosts: Mutex<HashMap<String, HostState>>,
}

#[derive(Clone, Copy)]
struct HostState {
    next_slot: Instant,
    backoff: Duration,
}

impl HostRateLimiter {
    pub fn new(rate_per_host: f64) -> Self {
        let rate = rate_per_host.max(0.01);
        Self {
            min_interval: Duration::from_secs_f64(1.0 / rate),
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for this host's next emission slot. Slots are handed out
    /// serially under the lock; the sleep happens outside it.
    pub async fn acquire(&self, host: &str) {
        let wait = {
            let mut hosts = self.hosts.lock();
            let now = Instant::now();
            let state = hosts.entry(host.to_string()).or_insert(HostState {
                next_slot: now,
                backoff: Duration::ZERO,
            });
            let slot = state.next_slot.max(now);
            state.next_slot = slot + self.min_interval + state.backoff;
            slot.saturating_duration_since(now)
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    /// Double this host's penalty (2s up to 60s) after a 429 or a
    /// transient failure.
    pub fn apply_backoff(&self, host: &str) {
        let mut hosts = self.hosts.lock();
        let now = Instant::now();
        let state = hosts.entry(host.to_string()).or_insert(HostState {
            next_slot: now,
            backoff: Duration::ZERO,
        });
        state.backoff = if state.backoff.is_zero() {
            BACKOFF_START
        } else {
            (state.backoff * 2).min(BACKOFF_CAP)
        };
        tracing::debug!("Backing off {host} for {:?}", state.backoff);
    }

    /// Reset the penalty after a successful request.
    pub fn clear_backoff(&self, host: &str) {
        if let Some(state) = self.hosts.lock().get_mut(host) {
            state.backoff = Duration::ZERO;
        }
    }

    #[cfg(test)]
    fn backoff_of(&self, host: &str) -> Duration {
        self.hosts
            .lock()
            .get(host)
            .map(|s| s.backoff)
            .unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_acquire_is_immediate() {
        let limiter = HostRateLimiter::new(1.0);
        let before = Instant::now();
        limiter.acquire("example.org").await;
        assert!(Instant::now().duration_since(before) < Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_acquire_waits_one_interval() {
        let limiter = HostRateLimiter::new(1.0);
        limiter.acquire("example.org").await;
        let before = Instant::now();
        limiter.acquire("example.org").await;
        let waited = Instant::now().duration_since(before);
        assert!(waited >= Duration::from_millis(900), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hosts_do_not_block_each_other() {
        let limiter = HostRateLimiter::new(1.0);
        limiter.acquire("a.org").await;
        let before = Instant::now();
        limiter.acquire("b.org").await;
        assert!(Instant::now().duration_since(before) < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_backoff_doubles_and_caps() {
        let limiter = HostRateLimiter::new(1.0);
        limiter.apply_backoff("x.org");
        assert_eq!(limiter.backoff_of("x.org"), Duration::from_secs(2));
        limiter.apply_backoff("x.org");
        assert_eq!(limiter.backoff_of("x.org"), Duration::from_secs(4));
        for _ in 0..10 {
            limiter.apply_backoff("x.org");
        }
        assert_eq!(limiter.backoff_of("x.org"), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_clear_backoff_resets() {
        let limiter = HostRateLimiter::new(1.0);
        limiter.apply_backoff("x.org");
        limiter.clear_backoff("x.org");
        assert_eq!(limiter.backoff_of("x.org"), Duration::ZERO);
    }
}
