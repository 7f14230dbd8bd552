//! Rate limiter - global and per-sender hourly send quotas
//!
//! Counters are tracked per UTC calendar hour. The fast path is a
//! `CounterStore` (atomic in-process counters with TTL semantics; an
//! external store can implement the same trait); every increment also
//! upserts a durable `rate_counters` row. When the fast path errors,
//! `check` falls back to counting SENT messages in the current hour
//! window straight from the store. Over-counting is tolerated,
//! under-counting is bounded by one per process restart.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mailcade_common::types::{BucketClock, SenderId};
use mailcade_common::Result;
use mailcade_storage::repository::{MessageRepository, RateCounterRepository};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::planner::{hour_start, next_hour_start};

/// Hourly quota configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub global_hourly_limit: i64,
    pub sender_hourly_limit: i64,
}

/// Outcome of a quota check
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Sends still available this hour across both scopes, clamped at 0
    pub remaining: i64,
    /// Start of the next UTC hour
    pub reset_at: DateTime<Utc>,
    /// Earliest instant a send may proceed
    pub next_slot_at: DateTime<Utc>,
}

/// Fast-path counter backend
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically add one and return the new count. The TTL is applied
    /// when the key is created (or recreated after expiry).
    async fn increment(&self, key: &str, ttl: Duration) -> anyhow::Result<i64>;

    /// Current count, zero when absent or expired
    async fn get(&self, key: &str) -> anyhow::Result<i64>;
}

/// In-process counter store
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, (i64, DateTime<Utc>)>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCounterStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, ttl: Duration) -> anyhow::Result<i64> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;

        let entry = entries.entry(key.to_string()).or_insert((0, now + ttl));
        if entry.1 <= now {
            *entry = (0, now + ttl);
        }
        entry.0 += 1;

        Ok(entry.0)
    }

    async fn get(&self, key: &str) -> anyhow::Result<i64> {
        let now = self.clock.now();
        let entries = self.entries.lock().await;

        Ok(entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(count, _)| *count)
            .unwrap_or(0))
    }
}

/// Fast-path key: `ratelimit:email:{global|sender:<id>}:YYYY-MM-DD-HH` (UTC)
fn fast_key(sender_id: Option<SenderId>, now: DateTime<Utc>) -> String {
    let hour = now.format("%Y-%m-%d-%H");
    match sender_id {
        Some(id) => format!("ratelimit:email:sender:{}:{}", id, hour),
        None => format!("ratelimit:email:global:{}", hour),
    }
}

/// Durable key: `{global|sender:<id>}:<hourStartIso>`
fn durable_key(sender_id: Option<SenderId>, window_start: DateTime<Utc>) -> String {
    let iso = window_start.to_rfc3339();
    match sender_id {
        Some(id) => format!("sender:{}:{}", id, iso),
        None => format!("global:{}", iso),
    }
}

/// Remaining-quota arithmetic over the two counter scopes
fn decide(
    config: &RateLimitConfig,
    global_count: i64,
    sender_count: Option<i64>,
    now: DateTime<Utc>,
) -> RateLimitDecision {
    let global_remaining = (config.global_hourly_limit - global_count).max(0);
    let remaining = match sender_count {
        Some(count) => global_remaining.min((config.sender_hourly_limit - count).max(0)),
        None => global_remaining,
    };

    let reset_at = next_hour_start(now, BucketClock::Utc);
    let next_slot_at = if remaining > 0 { now } else { reset_at };

    RateLimitDecision {
        allowed: remaining > 0,
        remaining,
        reset_at,
        next_slot_at,
    }
}

/// Fast-path TTL: the rest of the hour plus a minute of slack
fn counter_ttl(now: DateTime<Utc>) -> Duration {
    next_hour_start(now, BucketClock::Utc) - now + Duration::seconds(60)
}

/// Rate limiter shared by all workers of the process
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    counters: RateCounterRepository,
    messages: MessageRepository,
    clock: Arc<dyn Clock>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn CounterStore>,
        counters: RateCounterRepository,
        messages: MessageRepository,
        clock: Arc<dyn Clock>,
        config: RateLimitConfig,
    ) -> Self {
        Self {
            store,
            counters,
            messages,
            clock,
            config,
        }
    }

    /// Check whether a send may proceed now
    pub async fn check(&self, sender_id: Option<SenderId>) -> Result<RateLimitDecision> {
        let now = self.clock.now();

        match self.fast_counts(sender_id, now).await {
            Ok((global_count, sender_count)) => {
                Ok(decide(&self.config, global_count, sender_count, now))
            }
            Err(e) => {
                warn!("Counter store unavailable, falling back to SENT counts: {}", e);
                let (global_count, sender_count) = self.fallback_counts(sender_id, now).await?;
                Ok(decide(&self.config, global_count, sender_count, now))
            }
        }
    }

    /// Earliest instant the next send for this scope may run
    pub async fn next_slot(&self, sender_id: Option<SenderId>) -> Result<DateTime<Utc>> {
        Ok(self.check(sender_id).await?.next_slot_at)
    }

    /// Record a completed send against both scopes. Called only after the
    /// transport reported success; an increment that outruns a durable
    /// upsert inflates the counter, which is tolerated.
    pub async fn increment(&self, sender_id: Option<SenderId>) -> Result<()> {
        let now = self.clock.now();
        let ttl = counter_ttl(now);

        if let Err(e) = self.store.increment(&fast_key(None, now), ttl).await {
            warn!("Failed to bump global fast-path counter: {}", e);
        }
        if let Some(id) = sender_id {
            if let Err(e) = self.store.increment(&fast_key(Some(id), now), ttl).await {
                warn!("Failed to bump sender fast-path counter: {}", e);
            }
        }

        let window_start = hour_start(now, BucketClock::Utc);
        let window_end = window_start + Duration::hours(1);

        if let Err(e) = self
            .counters
            .upsert_increment(&durable_key(None, window_start), window_start, window_end)
            .await
        {
            warn!("Failed to upsert durable global counter: {}", e);
        }
        if let Some(id) = sender_id {
            if let Err(e) = self
                .counters
                .upsert_increment(&durable_key(Some(id), window_start), window_start, window_end)
                .await
            {
                warn!("Failed to upsert durable sender counter: {}", e);
            }
        }

        Ok(())
    }

    /// Reclaim durable counter rows older than 24 hours
    pub async fn cleanup_old_counters(&self) -> Result<u64> {
        let cutoff = self.clock.now() - Duration::hours(24);
        let removed = self
            .counters
            .cleanup_before(cutoff)
            .await
            .map_err(mailcade_common::Error::store)?;

        if removed > 0 {
            debug!(removed, "Reclaimed expired rate counters");
        }
        Ok(removed)
    }

    async fn fast_counts(
        &self,
        sender_id: Option<SenderId>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<(i64, Option<i64>)> {
        let global = self.store.get(&fast_key(None, now)).await?;
        let sender = match sender_id {
            Some(id) => Some(self.store.get(&fast_key(Some(id), now)).await?),
            None => None,
        };
        Ok((global, sender))
    }

    async fn fallback_counts(
        &self,
        sender_id: Option<SenderId>,
        now: DateTime<Utc>,
    ) -> Result<(i64, Option<i64>)> {
        let window_start = hour_start(now, BucketClock::Utc);
        let window_end = window_start + Duration::hours(1);

        let global = self
            .messages
            .count_sent_in_window(window_start, window_end, None)
            .await
            .map_err(mailcade_common::Error::store)?;

        let sender = match sender_id {
            Some(id) => Some(
                self.messages
                    .count_sent_in_window(window_start, window_end, Some(id))
                    .await
                    .map_err(mailcade_common::Error::store)?,
            ),
            None => None,
        };

        Ok((global, sender))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use uuid::Uuid;

    fn at(iso: &str) -> DateTime<Utc> {
        iso.parse().unwrap()
    }

    fn config() -> RateLimitConfig {
        RateLimitConfig {
            global_hourly_limit: 10,
            sender_hourly_limit: 3,
        }
    }

    #[test]
    fn test_fast_key_format() {
        let now = at("2025-01-01T10:42:13Z");
        assert_eq!(fast_key(None, now), "ratelimit:email:global:2025-01-01-10");

        let id: Uuid = "00000000-0000-0000-0000-00000000beef".parse().unwrap();
        assert_eq!(
            fast_key(Some(id), now),
            "ratelimit:email:sender:00000000-0000-0000-0000-00000000beef:2025-01-01-10"
        );
    }

    #[test]
    fn test_durable_key_format() {
        let start = at("2025-01-01T10:00:00Z");
        assert_eq!(durable_key(None, start), format!("global:{}", start.to_rfc3339()));

        let id: Uuid = "00000000-0000-0000-0000-00000000beef".parse().unwrap();
        assert!(durable_key(Some(id), start)
            .starts_with("sender:00000000-0000-0000-0000-00000000beef:"));
    }

    #[test]
    fn test_decide_global_only() {
        let now = at("2025-01-01T10:30:00Z");
        let d = decide(&config(), 4, None, now);
        assert!(d.allowed);
        assert_eq!(d.remaining, 6);
        assert_eq!(d.reset_at, at("2025-01-01T11:00:00Z"));
        assert_eq!(d.next_slot_at, now);
    }

    #[test]
    fn test_decide_takes_min_of_scopes() {
        let now = at("2025-01-01T10:30:00Z");

        let d = decide(&config(), 4, Some(1), now);
        assert_eq!(d.remaining, 2);

        let d = decide(&config(), 9, Some(0), now);
        assert_eq!(d.remaining, 1);
    }

    #[test]
    fn test_decide_exhausted() {
        let now = at("2025-01-01T10:30:00Z");
        let d = decide(&config(), 10, Some(0), now);
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);
        assert_eq!(d.next_slot_at, at("2025-01-01T11:00:00Z"));
    }

    #[test]
    fn test_decide_clamps_overshoot() {
        let now = at("2025-01-01T10:30:00Z");
        let d = decide(&config(), 25, Some(99), now);
        assert_eq!(d.remaining, 0);
        assert!(!d.allowed);
    }

    #[test]
    fn test_fresh_sender_is_allowed() {
        // A sender with no counter entry counts as zero.
        let now = at("2025-01-01T10:30:00Z");
        let d = decide(&config(), 0, Some(0), now);
        assert!(d.allowed);
        assert_eq!(d.remaining, 3);
    }

    #[test]
    fn test_counter_ttl_covers_rest_of_hour() {
        let ttl = counter_ttl(at("2025-01-01T10:59:00Z"));
        assert_eq!(ttl, Duration::seconds(60 + 60));

        let ttl = counter_ttl(at("2025-01-01T10:00:00Z"));
        assert_eq!(ttl, Duration::seconds(3600 + 60));
    }

    #[tokio::test]
    async fn test_memory_store_counts_and_expires() {
        let clock = Arc::new(ManualClock::new(at("2025-01-01T10:00:00Z")));
        let store = MemoryCounterStore::new(clock.clone());
        let ttl = Duration::minutes(61);

        assert_eq!(store.get("k").await.unwrap(), 0);
        assert_eq!(store.increment("k", ttl).await.unwrap(), 1);
        assert_eq!(store.increment("k", ttl).await.unwrap(), 2);
        assert_eq!(store.get("k").await.unwrap(), 2);

        // past the TTL the key reads as absent and restarts from zero
        clock.advance(Duration::minutes(62));
        assert_eq!(store.get("k").await.unwrap(), 0);
        assert_eq!(store.increment("k", ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_keys_are_independent() {
        let clock = Arc::new(ManualClock::new(at("2025-01-01T10:00:00Z")));
        let store = MemoryCounterStore::new(clock);
        let ttl = Duration::minutes(61);

        store.increment("a", ttl).await.unwrap();
        store.increment("a", ttl).await.unwrap();
        store.increment("b", ttl).await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), 2);
        assert_eq!(store.get("b").await.unwrap(), 1);
    }
}
