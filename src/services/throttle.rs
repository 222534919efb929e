//! In-memory throttling of failed signin attempts.
//!
//! DESIGN
//! ======
//! Sliding-window counters backed by `HashMap<String, VecDeque<Instant>>`,
//! keyed by normalised username. Only failures are recorded; once a key has
//! `limit` failures inside the window, further attempts are refused before
//! any credential check. A successful signin clears the key.
//!
//! Keys are caller-chosen, so a key whose window has drained is dropped, and
//! recording a failure sweeps every drained key at most once per window.
//! The map holds at most the keys that failed within the last window.
//!
//! TRADE-OFFS
//! ==========
//! State is per-process. Behind several replicas the effective limit is
//! `limit * replicas`, which is acceptable for a brute-force speed bump.
//!
//! `check` and `record_failure` are separate lock acquisitions with the
//! credential check in between. N concurrent wrong-password attempts can all
//! pass `check` before any failure lands, so a burst may overshoot `limit`
//! by up to its concurrency.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::config::ThrottleConfig;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("too many failed signin attempts (max {limit} per {window_secs}s), retry in {retry_after_secs}s")]
pub struct ThrottleError {
    pub limit: usize,
    pub window_secs: u64,
    pub retry_after_secs: u64,
}

#[derive(Default)]
struct Failures {
    by_key: HashMap<String, VecDeque<Instant>>,
    last_sweep: Option<Instant>,
}

#[derive(Clone)]
pub struct SigninThrottle {
    failures: Arc<Mutex<Failures>>,
    config: ThrottleConfig,
}

impl SigninThrottle {
    #[must_use]
    pub fn new(config: ThrottleConfig) -> Self {
        Self { failures: Arc::new(Mutex::new(Failures::default())), config }
    }

    fn lock(&self) -> MutexGuard<'_, Failures> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse if `key` has reached its failure budget.
    pub fn check(&self, key: &str) -> Result<(), ThrottleError> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<(), ThrottleError> {
        if self.config.limit == 0 {
            return Ok(());
        }
        let mut failures = self.lock();
        let Some(deque) = failures.by_key.get_mut(key) else {
            return Ok(());
        };
        prune_window(deque, now, self.config.window);
        if deque.is_empty() {
            failures.by_key.remove(key);
            return Ok(());
        }
        if deque.len() < self.config.limit {
            return Ok(());
        }
        let retry_after = deque
            .front()
            .map_or(Duration::ZERO, |oldest| self.config.window.saturating_sub(now.duration_since(*oldest)));
        Err(ThrottleError {
            limit: self.config.limit,
            window_secs: self.config.window.as_secs(),
            retry_after_secs: retry_after.as_secs().max(1),
        })
    }

    /// Count one failed attempt against `key`.
    pub fn record_failure(&self, key: &str) {
        self.record_failure_at(key, Instant::now());
    }

    fn record_failure_at(&self, key: &str, now: Instant) {
        let mut failures = self.lock();
        let sweep_due = failures
            .last_sweep
            .is_none_or(|last| now.saturating_duration_since(last) >= self.config.window);
        if sweep_due {
            purge_drained(&mut failures.by_key, now, self.config.window);
            failures.last_sweep = Some(now);
        }
        let deque = failures.by_key.entry(key.to_owned()).or_default();
        prune_window(deque, now, self.config.window);
        deque.push_back(now);
    }

    /// Forget all failures for `key`.
    pub fn clear(&self, key: &str) {
        self.lock().by_key.remove(key);
    }

    /// Drop every key with no failures left inside the window, returning how
    /// many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    fn purge_expired_at(&self, now: Instant) -> usize {
        let mut failures = self.lock();
        failures.last_sweep = Some(now);
        purge_drained(&mut failures.by_key, now, self.config.window)
    }

    /// Number of keys currently tracked.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.lock().by_key.len()
    }
}

fn prune_window(deque: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&front) = deque.front() {
        if now.saturating_duration_since(front) >= window {
            deque.pop_front();
        } else {
            break;
        }
    }
}

fn purge_drained(by_key: &mut HashMap<String, VecDeque<Instant>>, now: Instant, window: Duration) -> usize {
    let before = by_key.len();
    by_key.retain(|_, deque| {
        prune_window(deque, now, window);
        !deque.is_empty()
    });
    before - by_key.len()
}

#[cfg(test)]
#[path = "throttle_test.rs"]
mod tests;
