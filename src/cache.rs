use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::debug;

use crate::error::ForwarderError;

/// Remembers which smart objects are known to exist on the platform.
///
/// Entries map a device id to the instant after which the answer must be
/// re-verified. Only affirmative answers are stored, so an object created
/// after a negative check is found again on the next event. Shared by all
/// concurrent invocations of the process; same-key races are last writer wins.
pub struct ExistenceCache {
    // grows on demand; `max_entries` is enforced on insert
    entries: Mutex<LruCache<String, Instant>>,
    max_entries: NonZeroUsize,
    validity_period: Duration,
}

impl ExistenceCache {
    pub fn new(max_entries: usize, validity_period: u64) -> Result<Self, ForwarderError> {
        let max_entries = NonZeroUsize::new(max_entries).ok_or_else(|| {
            ForwarderError::InvalidConfiguration(
                "cache max entries must be a strictly positive integer".to_string(),
            )
        })?;
        if validity_period == 0 {
            return Err(ForwarderError::InvalidConfiguration(
                "cache validity period must be a strictly positive integer".to_string(),
            ));
        }

        Ok(ExistenceCache {
            entries: Mutex::new(LruCache::unbounded()),
            max_entries,
            validity_period: Duration::from_secs(validity_period),
        })
    }

    /// Answers from the cache when a fresh entry exists, otherwise awaits
    /// `remote_check` and caches a positive result for the validity period.
    pub async fn exists<F, Fut>(
        &self,
        device_id: &str,
        now: Instant,
        remote_check: F,
    ) -> Result<bool, ForwarderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<bool, ForwarderError>>,
    {
        if self.is_fresh(device_id, now) {
            debug!("CACHE HIT: smart object {} is known to exist", device_id);
            return Ok(true);
        }

        let exists = remote_check().await?;
        if exists {
            let mut entries = self.lock();
            if !entries.contains(device_id) && entries.len() >= self.max_entries.get() {
                if let Some((evicted, _)) = entries.pop_lru() {
                    debug!("CACHE EVICT: dropping least recently used entry {}", evicted);
                }
            }
            entries.put(device_id.to_string(), now + self.validity_period);
            debug!(
                "CACHE UPDATE: smart object {} cached (cache size: {})",
                device_id,
                entries.len()
            );
        } else {
            debug!("smart object {} does not exist, not caching", device_id);
        }
        Ok(exists)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn is_fresh(&self, device_id: &str, now: Instant) -> bool {
        let mut entries = self.lock();
        match entries.get(device_id) {
            Some(expiry) if *expiry > now => true,
            Some(expiry) => {
                debug!(
                    "CACHE EXPIRED: entry for {} expired {:?} ago",
                    device_id,
                    now.duration_since(*expiry)
                );
                false
            }
            None => {
                debug!("CACHE MISS: no entry for {}", device_id);
                false
            }
        }
    }

    // A poisoned lock only means another invocation panicked mid-update; the
    // map itself is still a valid cache.
    fn lock(&self) -> MutexGuard<'_, LruCache<String, Instant>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
