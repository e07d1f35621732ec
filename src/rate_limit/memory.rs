//! Process-local counter store.
//!
//! Good for a single instance and for tests. Counters are not shared across
//! replicas, so a multi-node deployment should use the Upstash store.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::CounterStore;
use crate::error::AppError;

/// Minimum spacing between sweeps of expired counters.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

struct Counter {
    value: u64,
    expires_at: Option<Instant>,
}

impl Counter {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct Counters {
    entries: HashMap<String, Counter>,
    last_sweep: Option<Instant>,
}

impl Counters {
    /// Drops expired entries, at most once per [`SWEEP_INTERVAL`].
    fn sweep(&mut self, now: Instant) {
        let due = self
            .last_sweep
            .map_or(true, |at| now.saturating_duration_since(at) >= SWEEP_INTERVAL);
        if due {
            self.entries.retain(|_, counter| !counter.is_expired(now));
            self.last_sweep = Some(now);
        }
    }
}

/// In-memory counters with lazy expiry, mirroring Redis `INCR`/`EXPIRE`.
///
/// Expired keys are swept on increment, so one-off identities do not pile up.
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: Mutex<Counters>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a live key.
    #[cfg(test)]
    pub async fn get(&self, key: &str) -> Option<u64> {
        let counters = self.counters.lock().await;
        counters
            .entries
            .get(key)
            .filter(|counter| !counter.is_expired(Instant::now()))
            .map(|counter| counter.value)
    }

    /// Number of keys held, live or not yet swept.
    #[cfg(test)]
    pub async fn key_count(&self) -> usize {
        self.counters.lock().await.entries.len()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr_batch(&self, keys: &[String]) -> Result<Vec<u64>, AppError> {
        let mut counters = self.counters.lock().await;
        let now = Instant::now();
        counters.sweep(now);
        let values = keys
            .iter()
            .map(|key| {
                let counter = counters.entries.entry(key.clone()).or_insert(Counter {
                    value: 0,
                    expires_at: None,
                });
                if counter.is_expired(now) {
                    counter.value = 0;
                    counter.expires_at = None;
                }
                counter.value += 1;
                counter.value
            })
            .collect();
        Ok(values)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), AppError> {
        let mut counters = self.counters.lock().await;
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .ok_or_else(|| AppError::counter_store(format!("expiry of {ttl:?} is out of range")))?;
        if let Some(counter) = counters
            .entries
            .get_mut(key)
            .filter(|c| !c.is_expired(now))
        {
            counter.expires_at = Some(expires_at);
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, AppError> {
        let counters = self.counters.lock().await;
        let now = Instant::now();
        Ok(counters
            .entries
            .get(key)
            .filter(|counter| !counter.is_expired(now))
            .and_then(|counter| counter.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }
}
