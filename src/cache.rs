use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info};

/// TTL cache with single-flight protection: concurrent callers for the same
/// key share one in-flight fetch instead of each hitting upstream.
///
/// A failed fetch is never cached; the error is handed to every waiter and
/// the next caller starts over.
pub struct AsyncCache<T, E> {
    default_ttl: Duration,
    flight_counter: AtomicU64,
    entries: Mutex<HashMap<String, Entry<T, E>>>,
}

enum Entry<T, E> {
    Ready {
        value: T,
        stored_at: Instant,
        ttl: Duration,
    },
    InFlight {
        id: u64,
        tx: broadcast::Sender<Result<T, E>>,
    },
}

enum Claim<T, E> {
    Hit(T),
    Wait(broadcast::Receiver<Result<T, E>>),
    Lead(u64),
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheEntryStats {
    pub key: String,
    pub age_seconds: f64,
    pub ttl_seconds: f64,
    pub expired: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub in_flight: usize,
    pub entries: Vec<CacheEntryStats>,
}

impl<T, E> AsyncCache<T, E>
where
    T: Clone,
    E: Clone,
{
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            flight_counter: AtomicU64::new(0),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.get_or_fetch_with_ttl(key, self.default_ttl, fetch).await
    }

    /// Returns the cached value when fresh, otherwise runs `fetch` exactly
    /// once for all concurrent callers of `key` and stores the result for
    /// `ttl`. Waiters observe the same success or failure as the fetching
    /// caller.
    pub async fn get_or_fetch_with_ttl<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let flight_id = loop {
            let claim = {
                let mut entries = self.lock_entries();
                match entries.get(key) {
                    Some(Entry::Ready {
                        value,
                        stored_at,
                        ttl: entry_ttl,
                    }) if stored_at.elapsed() < *entry_ttl => Claim::Hit(value.clone()),
                    Some(Entry::InFlight { tx, .. }) => Claim::Wait(tx.subscribe()),
                    _ => {
                        let id = self.flight_counter.fetch_add(1, Ordering::Relaxed);
                        let (tx, _) = broadcast::channel(1);
                        entries.insert(key.to_string(), Entry::InFlight { id, tx });
                        Claim::Lead(id)
                    }
                }
            };

            match claim {
                Claim::Hit(value) => {
                    debug!("Cache hit for key: {}", key);
                    return Ok(value);
                }
                Claim::Wait(mut rx) => {
                    debug!("Cache busy for key: {}, awaiting in-flight fetch", key);
                    match rx.recv().await {
                        Ok(result) => return result,
                        // The fetching caller went away without settling;
                        // start over and claim the key ourselves.
                        Err(_) => continue,
                    }
                }
                Claim::Lead(id) => break id,
            }
        };

        debug!("Cache miss for key: {}, fetching", key);
        let mut guard = FlightGuard {
            entries: &self.entries,
            key,
            id: flight_id,
            armed: true,
        };
        let result = fetch().await;
        let tx = self.settle_flight(key, flight_id, ttl, &result);
        guard.armed = false;
        if let Some(tx) = tx {
            // Errors only mean no waiters subscribed.
            let _ = tx.send(result.clone());
        }
        result
    }

    /// Moves a finished flight out of the entry map. Stores the value on
    /// success, drops the entry on failure, and leaves the map untouched
    /// when the flight was superseded by `invalidate`/`clear`.
    fn settle_flight(
        &self,
        key: &str,
        flight_id: u64,
        ttl: Duration,
        result: &Result<T, E>,
    ) -> Option<broadcast::Sender<Result<T, E>>> {
        let mut entries = self.lock_entries();
        match entries.remove(key) {
            Some(Entry::InFlight { id, tx }) if id == flight_id => {
                match result {
                    Ok(value) => {
                        entries.insert(
                            key.to_string(),
                            Entry::Ready {
                                value: value.clone(),
                                stored_at: Instant::now(),
                                ttl,
                            },
                        );
                    }
                    Err(_) => {
                        debug!("Fetch for key '{}' failed, nothing cached", key);
                    }
                }
                Some(tx)
            }
            Some(other) => {
                // Not our flight anymore; put it back.
                entries.insert(key.to_string(), other);
                None
            }
            None => None,
        }
    }

    pub fn invalidate(&self, key: &str) {
        let removed = self.lock_entries().remove(key).is_some();
        if removed {
            debug!("Cache invalidated for key: {}", key);
        }
    }

    pub fn clear(&self) {
        let mut entries = self.lock_entries();
        let count = entries.len();
        entries.clear();
        info!("Cache cleared: {} entries removed", count);
    }

    /// Drops expired entries and returns how many were removed. Expiry is
    /// otherwise handled lazily on access, this only bounds memory.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.lock_entries();
        let before = entries.len();
        entries.retain(|_, entry| match entry {
            Entry::Ready {
                stored_at, ttl, ..
            } => stored_at.elapsed() < *ttl,
            Entry::InFlight { .. } => true,
        });
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Cleaned up {} expired cache entries", removed);
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.lock_entries();
        let mut stats = CacheStats {
            total_entries: entries.len(),
            valid_entries: 0,
            expired_entries: 0,
            in_flight: 0,
            entries: Vec::new(),
        };
        for (key, entry) in entries.iter() {
            match entry {
                Entry::Ready {
                    stored_at, ttl, ..
                } => {
                    let age = stored_at.elapsed();
                    let expired = age >= *ttl;
                    if expired {
                        stats.expired_entries += 1;
                    } else {
                        stats.valid_entries += 1;
                    }
                    stats.entries.push(CacheEntryStats {
                        key: key.clone(),
                        age_seconds: age.as_secs_f64(),
                        ttl_seconds: ttl.as_secs_f64(),
                        expired,
                    });
                }
                Entry::InFlight { .. } => {
                    stats.in_flight += 1;
                }
            }
        }
        stats
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, Entry<T, E>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes the in-flight entry if the fetching caller is dropped before it
/// settles, so waiters wake up and retry instead of hanging.
struct FlightGuard<'a, T, E> {
    entries: &'a Mutex<HashMap<String, Entry<T, E>>>,
    key: &'a str,
    id: u64,
    armed: bool,
}

impl<T, E> Drop for FlightGuard<'_, T, E> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(Entry::InFlight { id, .. }) = entries.get(self.key) {
            if *id == self.id {
                entries.remove(self.key);
            }
        }
    }
}
