use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{BoxError, KeyValueStore, Versioned};

const MIN_SWEEP_LEN: usize = 64;

struct Entry {
    value: Vec<u8>,
    version: u64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|t| now < t)
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    last_version: u64,
    /// Sweep expired entries once the map reaches this size.
    sweep_at: usize,
}

impl Inner {
    fn live(&mut self, key: &str) -> Option<&Entry> {
        let now = Instant::now();
        if self.entries.get(key).is_some_and(|e| !e.is_live(now)) {
            self.entries.remove(key);
        }
        self.entries.get(key)
    }

    fn write(&mut self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> u64 {
        let now = Instant::now();
        self.sweep(now);
        self.last_version += 1;
        let version = self.last_version;
        self.entries.insert(
            key.to_owned(),
            Entry {
                value,
                version,
                // a ttl past the clock's range never expires
                expires_at: ttl.and_then(|ttl| now.checked_add(ttl)),
            },
        );
        version
    }

    /// Drop every expired entry, amortized over writes.
    fn sweep(&mut self, now: Instant) {
        if self.entries.len() < self.sweep_at {
            return;
        }
        let before = self.entries.len();
        self.entries.retain(|_, e| e.is_live(now));
        self.sweep_at = (self.entries.len() * 2).max(MIN_SWEEP_LEN);
        if before > self.entries.len() {
            tracing::debug!(removed = before - self.entries.len(), "Swept expired entries");
        }
    }
}

/// In-process [`KeyValueStore`].
///
/// Suitable for tests and single-instance deployments; state is lost on
/// restart. Expired entries are dropped on access and swept in bulk as the
/// map grows, so abandoned logins do not accumulate.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let inner = self.inner.lock().await;
        inner.entries.values().filter(|e| e.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    #[cfg(test)]
    async fn raw_len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }
}

impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned<Vec<u8>>>, BoxError> {
        let mut inner = self.inner.lock().await;
        Ok(inner.live(key).map(|e| Versioned {
            value: e.value.clone(),
            version: e.version,
        }))
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<u64, BoxError> {
        let mut inner = self.inner.lock().await;
        Ok(inner.write(key, value, ttl))
    }

    async fn put_if_version(
        &self,
        key: &str,
        expected_version: u64,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<Option<u64>, BoxError> {
        let mut inner = self.inner.lock().await;
        if inner.live(key).map(|e| e.version) != Some(expected_version) {
            return Ok(None);
        }
        Ok(Some(inner.write(key, value, ttl)))
    }

    async fn delete(&self, key: &str) -> Result<(), BoxError> {
        self.inner.lock().await.entries.remove(key);
        Ok(())
    }

    async fn delete_if_version(&self, key: &str, expected_version: u64) -> Result<bool, BoxError> {
        let mut inner = self.inner.lock().await;
        if inner.live(key).map(|e| e.version) != Some(expected_version) {
            return Ok(false);
        }
        inner.entries.remove(key);
        Ok(true)
    }
}
