// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory config store fake for testing without filesystem I/O.

use rayfarm_app_core::config::{ConfigError, ConfigStore};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Which operations an [`InMemoryConfigStore`] should refuse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StoreFailure {
    /// Everything works.
    #[default]
    None,
    /// `load_raw` fails with `ConfigError::Other`.
    Load,
    /// `save_raw` fails with `ConfigError::Other`.
    Save,
}

/// In-memory [`ConfigStore`]; clones share one map.
///
/// ```
/// use rayfarm_app_core::config::{ConfigService, Provenance};
/// use rayfarm_app_core::prefs::{CoordinatorPrefs, COORDINATOR_KEY};
/// use rayfarm_dry_tests::InMemoryConfigStore;
///
/// let store = InMemoryConfigStore::new();
/// let service = ConfigService::new(store.clone());
/// let (_, provenance) = service.load_or_init::<CoordinatorPrefs>(COORDINATOR_KEY);
/// assert_eq!(provenance, Provenance::Initialized);
/// assert_eq!(store.writes(), 1);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryConfigStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    blobs: HashMap<String, Vec<u8>>,
    writes: usize,
    failure: StoreFailure,
}

impl InMemoryConfigStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding `value` as JSON under `key`.
    pub fn seeded<T: Serialize>(key: &str, value: &T) -> Result<Self, serde_json::Error> {
        let store = Self::new();
        store.put_raw(key, serde_json::to_vec(value)?);
        Ok(store)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Place raw bytes under `key` without counting a write.
    pub fn put_raw(&self, key: &str, data: impl Into<Vec<u8>>) {
        self.lock().blobs.insert(key.to_string(), data.into());
    }

    /// Raw bytes under `key`, bypassing any configured failure.
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().blobs.get(key).cloned()
    }

    /// Successful `save_raw` calls so far.
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    /// Make subsequent calls fail.
    pub fn fail(&self, failure: StoreFailure) {
        self.lock().failure = failure;
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        let inner = self.lock();
        if inner.failure == StoreFailure::Load {
            return Err(ConfigError::Other("simulated load failure".into()));
        }
        inner.blobs.get(key).cloned().ok_or(ConfigError::NotFound)
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let mut inner = self.lock();
        if inner.failure == StoreFailure::Save {
            return Err(ConfigError::Other("simulated save failure".into()));
        }
        inner.blobs.insert(key.to_string(), data.to_vec());
        inner.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayfarm_app_core::config::{ConfigService, Provenance};
    use rayfarm_app_core::prefs::{CoordinatorPrefs, WorkerPrefs, COORDINATOR_KEY, WORKER_KEY};

    #[test]
    fn seeded_prefs_are_loaded_not_rewritten() {
        let prefs = CoordinatorPrefs {
            workers: vec!["/run/w0.sock".into()],
            call_timeout_ms: 500,
            max_retries: 0,
        };
        let store = InMemoryConfigStore::seeded(COORDINATOR_KEY, &prefs).unwrap();
        let service = ConfigService::new(store.clone());
        let (loaded, provenance) = service.load_or_init::<CoordinatorPrefs>(COORDINATOR_KEY);
        assert_eq!(loaded, prefs);
        assert_eq!(provenance, Provenance::Stored);
        assert_eq!(store.writes(), 0);
    }

    #[test]
    fn failing_save_falls_back_to_defaults() {
        let store = InMemoryConfigStore::new();
        store.fail(StoreFailure::Save);
        let service = ConfigService::new(store.clone());
        let (prefs, provenance) = service.load_or_init::<WorkerPrefs>(WORKER_KEY);
        assert_eq!(prefs, WorkerPrefs::default());
        assert_eq!(provenance, Provenance::Fallback);
        assert!(store.raw(WORKER_KEY).is_none());
    }

    #[test]
    fn failing_load_leaves_existing_blob_alone() {
        let store = InMemoryConfigStore::new();
        store.put_raw(WORKER_KEY, br#"{"socket_path":"/run/w.sock"}"#.to_vec());
        store.fail(StoreFailure::Load);
        let service = ConfigService::new(store.clone());
        let (_, provenance) = service.load_or_init::<WorkerPrefs>(WORKER_KEY);
        assert_eq!(provenance, Provenance::Fallback);
        assert_eq!(store.writes(), 0);
        assert!(store.raw(WORKER_KEY).is_some());
    }

    #[test]
    fn clones_share_state() {
        let a = InMemoryConfigStore::new();
        let b = a.clone();
        a.save_raw("k", b"v").unwrap();
        assert_eq!(b.load_raw("k").unwrap(), b"v");
        assert_eq!(b.writes(), 1);
    }
}
