//! TTL cache with last-known-value fallback.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, trace, warn};

use tgate_core::Observed;

use crate::error::{FeedError, FeedResult};

/// Caches one fetched value per key.
///
/// A hit younger than the TTL is served without calling upstream. A miss or
/// expiry refetches under a timeout; when the refetch fails the last-known
/// value is returned flagged stale, keeping its original fetch time so its age
/// keeps growing. With nothing cached the failure surfaces as
/// [`FeedError::DataUnavailable`].
pub struct TtlCache<T> {
    name: &'static str,
    entries: DashMap<String, Observed<T>>,
    ttl_secs: i64,
    timeout: Duration,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(name: &'static str, ttl_secs: i64, timeout_ms: u64) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            ttl_secs,
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn peek(&self, key: &str) -> Option<Observed<T>> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        now: DateTime<Utc>,
        fetch: F,
    ) -> FeedResult<Observed<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FeedResult<T>>,
    {
        if let Some(cached) = self.peek(key) {
            if !cached.stale && cached.age_secs(now) < self.ttl_secs {
                trace!(cache = self.name, key, "Cache hit");
                return Ok(cached);
            }
        }

        let result = match tokio::time::timeout(self.timeout, fetch()).await {
            Ok(result) => result,
            Err(_) => Err(FeedError::Timeout {
                feed: self.name.to_string(),
                ms: self.timeout.as_millis() as u64,
            }),
        };

        match result {
            Ok(value) => {
                debug!(cache = self.name, key, "Refetched");
                let observed = Observed::fresh(value, now);
                self.entries.insert(key.to_string(), observed.clone());
                Ok(observed)
            }
            Err(e) => match self.entries.get_mut(key) {
                Some(mut entry) => {
                    entry.stale = true;
                    warn!(
                        cache = self.name,
                        key,
                        error = %e,
                        age_secs = entry.age_secs(now),
                        "Refetch failed, using last known value"
                    );
                    Ok(entry.value().clone())
                }
                None => {
                    warn!(cache = self.name, key, error = %e, "Fetch failed with nothing cached");
                    Err(FeedError::unavailable(self.name, format!("{key}: {e}")))
                }
            },
        }
    }
}
