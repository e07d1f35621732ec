//! Admission control in front of the inference backend.
//!
//! Two fixed-window counters gate every request: one per caller identity
//! (hourly) and one global (daily). Counters live behind [`CounterStore`] so
//! they can be shared across replicas or replaced by an in-memory fake.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use tracing::{debug, info, warn};

use crate::config::{CounterStoreKind, RateLimitConfig};
use crate::error::AppError;

pub mod memory;
pub mod upstash;

pub use memory::MemoryCounterStore;
pub use upstash::UpstashCounterStore;

const HOURLY_KEY_PREFIX: &str = "ratelimit:hourly:";
const DAILY_KEY: &str = "ratelimit:daily";

/// Shared counter store with atomic increment and key expiry.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increments every key in one round trip and returns the post-increment
    /// values in the same order.
    async fn incr_batch(&self, keys: &[String]) -> Result<Vec<u64>, AppError>;

    /// Installs a time-to-live on an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), AppError>;

    /// Remaining time-to-live, `None` when the key is missing or persistent.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, AppError>;
}

/// Why a request was refused.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DenyReason {
    HourlyLimit,
    DailyLimit,
    /// Counter store unreachable while configured to fail closed.
    StoreUnavailable,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HourlyLimit => write!(f, "hourly limit exceeded"),
            Self::DailyLimit => write!(f, "daily limit reached"),
            Self::StoreUnavailable => write!(f, "rate limiter unavailable, try again later"),
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Admission {
    Allowed,
    Denied(DenyReason),
}

/// Limits and policy flags applied by [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub hourly_limit: u64,
    pub daily_limit: u64,
    pub hourly_window: Duration,
    pub daily_window: Duration,
    pub fail_open: bool,
    pub charge_both: bool,
}

impl From<&RateLimitConfig> for RateLimitPolicy {
    fn from(cfg: &RateLimitConfig) -> Self {
        Self {
            hourly_limit: cfg.hourly_limit,
            daily_limit: cfg.daily_limit,
            hourly_window: cfg.hourly_window,
            daily_window: cfg.daily_window,
            fail_open: cfg.fail_open,
            charge_both: cfg.charge_both,
        }
    }
}

/// Per-identity hourly and global daily fixed-window limiter.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    policy: RateLimitPolicy,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, policy: RateLimitPolicy) -> Self {
        Self { store, policy }
    }

    /// Counts this request against both windows and decides admission.
    ///
    /// Store failures never propagate: they resolve to `Allowed` or
    /// `Denied(StoreUnavailable)` depending on `fail_open`.
    pub async fn admit(&self, identity: &str) -> Admission {
        match self.check(identity).await {
            Ok(admission) => admission,
            Err(err) if self.policy.fail_open => {
                warn!(identity, error = %err, "counter store unavailable; failing open");
                Admission::Allowed
            }
            Err(err) => {
                warn!(identity, error = %err, "counter store unavailable; failing closed");
                Admission::Denied(DenyReason::StoreUnavailable)
            }
        }
    }

    async fn check(&self, identity: &str) -> Result<Admission, AppError> {
        let hourly_key = hourly_key(identity);

        let (hourly, daily) = if self.policy.charge_both {
            let counts = self
                .store
                .incr_batch(&[hourly_key.clone(), DAILY_KEY.to_string()])
                .await?;
            let [hourly, daily] = counts[..] else {
                return Err(AppError::counter_store(format!(
                    "counter store returned {} values for 2 keys",
                    counts.len()
                )));
            };
            (hourly, Some(daily))
        } else {
            (self.incr_one(&hourly_key).await?, None)
        };

        self.install_expiry(&hourly_key, hourly, self.policy.hourly_window)
            .await?;
        if hourly > self.policy.hourly_limit {
            let retry_after_secs = self
                .store
                .ttl(&hourly_key)
                .await
                .ok()
                .flatten()
                .map(|ttl| ttl.as_secs());
            info!(
                identity,
                count = hourly,
                limit = self.policy.hourly_limit,
                retry_after_secs,
                "hourly limit exceeded"
            );
            if let Some(daily) = daily {
                self.install_expiry(DAILY_KEY, daily, self.policy.daily_window)
                    .await?;
            }
            return Ok(Admission::Denied(DenyReason::HourlyLimit));
        }

        let daily = match daily {
            Some(daily) => daily,
            None => self.incr_one(DAILY_KEY).await?,
        };
        self.install_expiry(DAILY_KEY, daily, self.policy.daily_window)
            .await?;
        if daily > self.policy.daily_limit {
            info!(count = daily, limit = self.policy.daily_limit, "daily limit reached");
            return Ok(Admission::Denied(DenyReason::DailyLimit));
        }

        debug!(identity, hourly, daily, "request admitted");
        Ok(Admission::Allowed)
    }

    async fn incr_one(&self, key: &str) -> Result<u64, AppError> {
        self.store
            .incr_batch(&[key.to_string()])
            .await?
            .first()
            .copied()
            .ok_or_else(|| AppError::counter_store("counter store returned no value"))
    }

    /// Sets the window expiry only on the increment that created the key.
    async fn install_expiry(&self, key: &str, count: u64, window: Duration) -> Result<(), AppError> {
        if count == 1 {
            self.store.expire(key, window).await?;
        }
        Ok(())
    }
}

fn hourly_key(identity: &str) -> String {
    format!("{HOURLY_KEY_PREFIX}{identity}")
}

/// Resolves the caller identity from a trusted proxy header.
///
/// Forwarding headers may hold a list; the first (client-most) entry wins.
/// Callers without a usable header all share `anonymous`.
pub fn identity_from_headers(headers: &HeaderMap, header_name: &str, anonymous: &str) -> String {
    headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(anonymous)
        .to_string()
}

/// Builds the configured counter store.
pub fn build_counter_store(cfg: &RateLimitConfig) -> Result<Arc<dyn CounterStore>, AppError> {
    match &cfg.store {
        CounterStoreKind::Memory => Ok(Arc::new(MemoryCounterStore::new())),
        CounterStoreKind::Upstash { url, token } => {
            Ok(Arc::new(UpstashCounterStore::new(url, token)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    fn policy(hourly_limit: u64, daily_limit: u64) -> RateLimitPolicy {
        RateLimitPolicy {
            hourly_limit,
            daily_limit,
            hourly_window: Duration::from_secs(3600),
            daily_window: Duration::from_secs(86_400),
            fail_open: false,
            charge_both: true,
        }
    }

    /// Wraps the in-memory store and records every expire call.
    #[derive(Default)]
    struct RecordingStore {
        inner: MemoryCounterStore,
        expires: Mutex<Vec<String>>,
        batches: AtomicUsize,
    }

    #[async_trait]
    impl CounterStore for RecordingStore {
        async fn incr_batch(&self, keys: &[String]) -> Result<Vec<u64>, AppError> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            self.inner.incr_batch(keys).await
        }

        async fn expire(&self, key: &str, ttl: Duration) -> Result<(), AppError> {
            self.expires.lock().unwrap().push(key.to_string());
            self.inner.expire(key, ttl).await
        }

        async fn ttl(&self, key: &str) -> Result<Option<Duration>, AppError> {
            self.inner.ttl(key).await
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl CounterStore for BrokenStore {
        async fn incr_batch(&self, _keys: &[String]) -> Result<Vec<u64>, AppError> {
            Err(AppError::counter_store("connection refused"))
        }

        async fn expire(&self, _key: &str, _ttl: Duration) -> Result<(), AppError> {
            Err(AppError::counter_store("connection refused"))
        }

        async fn ttl(&self, _key: &str) -> Result<Option<Duration>, AppError> {
            Err(AppError::counter_store("connection refused"))
        }
    }

    #[tokio::test]
    async fn denies_after_hourly_limit_for_same_identity_only() {
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()), policy(20, 1000));
        for _ in 0..20 {
            assert_eq!(limiter.admit("1.2.3.4").await, Admission::Allowed);
        }
        assert_eq!(
            limiter.admit("1.2.3.4").await,
            Admission::Denied(DenyReason::HourlyLimit)
        );
        assert_eq!(limiter.admit("5.6.7.8").await, Admission::Allowed);
    }

    #[tokio::test]
    async fn denies_when_global_daily_limit_reached() {
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()), policy(20, 3));
        assert_eq!(limiter.admit("a").await, Admission::Allowed);
        assert_eq!(limiter.admit("b").await, Admission::Allowed);
        assert_eq!(limiter.admit("c").await, Admission::Allowed);
        assert_eq!(
            limiter.admit("d").await,
            Admission::Denied(DenyReason::DailyLimit)
        );
    }

    #[tokio::test]
    async fn hourly_check_wins_when_both_exceeded() {
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()), policy(1, 1));
        assert_eq!(limiter.admit("a").await, Admission::Allowed);
        assert_eq!(
            limiter.admit("a").await,
            Admission::Denied(DenyReason::HourlyLimit)
        );
    }

    #[tokio::test]
    async fn expiry_installed_once_per_window() {
        let store = Arc::new(RecordingStore::default());
        let limiter = RateLimiter::new(store.clone(), policy(20, 1000));

        limiter.admit("a").await;
        let first_ttl = store.ttl("ratelimit:hourly:a").await.unwrap().unwrap();
        limiter.admit("a").await;
        limiter.admit("a").await;
        let later_ttl = store.ttl("ratelimit:hourly:a").await.unwrap().unwrap();

        let expires = store.expires.lock().unwrap().clone();
        assert_eq!(
            expires,
            vec!["ratelimit:hourly:a".to_string(), "ratelimit:daily".to_string()]
        );
        assert!(later_ttl <= first_ttl);
        assert_eq!(store.batches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn denied_requests_still_charge_daily_counter_by_default() {
        let store = Arc::new(MemoryCounterStore::new());
        let limiter = RateLimiter::new(store.clone(), policy(1, 1000));
        limiter.admit("a").await;
        limiter.admit("a").await;
        limiter.admit("a").await;
        assert_eq!(store.get("ratelimit:daily").await, Some(3));
    }

    #[tokio::test]
    async fn charge_both_disabled_spares_daily_counter_on_hourly_denial() {
        let store = Arc::new(RecordingStore::default());
        let mut policy = policy(1, 1000);
        policy.charge_both = false;
        let limiter = RateLimiter::new(store.clone(), policy);

        assert_eq!(limiter.admit("a").await, Admission::Allowed);
        assert_eq!(
            limiter.admit("a").await,
            Admission::Denied(DenyReason::HourlyLimit)
        );
        assert_eq!(store.inner.get("ratelimit:daily").await, Some(1));
        assert_eq!(store.inner.get("ratelimit:hourly:a").await, Some(2));
    }

    #[tokio::test]
    async fn store_failure_follows_fail_policy() {
        let closed = RateLimiter::new(Arc::new(BrokenStore), policy(20, 1000));
        assert_eq!(
            closed.admit("a").await,
            Admission::Denied(DenyReason::StoreUnavailable)
        );

        let mut open_policy = policy(20, 1000);
        open_policy.fail_open = true;
        let open = RateLimiter::new(Arc::new(BrokenStore), open_policy);
        assert_eq!(open.admit("a").await, Admission::Allowed);
    }

    #[test]
    fn identity_uses_first_forwarded_entry() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(
            identity_from_headers(&headers, "x-forwarded-for", "unknown"),
            "203.0.113.7"
        );
    }

    #[test]
    fn identity_falls_back_to_shared_bucket() {
        let headers = HeaderMap::new();
        assert_eq!(
            identity_from_headers(&headers, "x-forwarded-for", "unknown"),
            "unknown"
        );

        let mut blank = HeaderMap::new();
        blank.insert("x-forwarded-for", " ".parse().unwrap());
        assert_eq!(
            identity_from_headers(&blank, "x-forwarded-for", "anon"),
            "anon"
        );
    }
}
