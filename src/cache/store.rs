//! Cache Store Module
//!
//! Main cache engine: a sharded concurrent map of TTL entries plus the
//! background sweeper that owns nothing but a weak handle to it.

use std::borrow::Borrow;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::runtime::Handle;
use tracing::trace;

use crate::cache::CacheEntry;
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::tasks::{spawn_sweep_task, SweepHandle};

// == Cache Store ==
/// Concurrent TTL cache keyed by `K`, holding values of type `V`.
///
/// Every operation locks at most the shard holding its key; there is no
/// lock across the whole map.
///
/// # Concurrency
/// Only [`add_or_update`](Self::add_or_update) is atomic for a given key.
/// The compute family checks, runs the producer, then writes: two concurrent
/// misses on one key may both run their producers, and a `set` landing in
/// between can be overwritten by the computed value. Last writer wins.
pub struct CacheStore<K, V> {
    /// Key-entry storage
    entries: Arc<DashMap<K, CacheEntry<V>>>,
    /// Background sweeper, cancelled on shutdown or drop
    sweeper: Option<SweepHandle>,
}

impl<K, V> CacheStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates a store with the default configuration: a sweep every 60 seconds.
    ///
    /// # Errors
    /// Returns [`CacheError::NoRuntime`] when called outside a Tokio runtime.
    pub fn new() -> Result<Self> {
        Self::with_config(&Config::default())
    }

    /// Creates a store from `config`, spawning the sweeper on the current
    /// runtime if `auto_sweep` is set.
    ///
    /// # Errors
    /// Returns [`CacheError::NoRuntime`] when `auto_sweep` is set and there
    /// is no Tokio runtime to spawn the sweeper on.
    pub fn with_config(config: &Config) -> Result<Self> {
        let entries = Arc::new(DashMap::new());

        let sweeper = if config.auto_sweep {
            let runtime = Handle::try_current()?;
            Some(spawn_sweep_task(
                &runtime,
                Arc::downgrade(&entries),
                config.effective_sweep_interval(),
            ))
        } else {
            None
        };

        Ok(Self { entries, sweeper })
    }
}

impl<K, V> CacheStore<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Creates a store with no background sweeper. Needs no runtime; expired
    /// entries stay in the map until [`sweep_expired`](Self::sweep_expired)
    /// or an explicit removal.
    pub fn without_sweeper() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            sweeper: None,
        }
    }

    // == Get ==
    /// Returns the value for `key` if present and still valid.
    ///
    /// An expired entry reads as absent but stays in the map until the next
    /// sweep or removal.
    pub fn get<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries
            .get(key)
            .filter(|entry| entry.is_valid())
            .map(|entry| Arc::clone(entry.value().value()))
    }

    // == Contains ==
    /// Returns true if `key` is physically present, expired or not.
    ///
    /// This does not predict whether [`get`](Self::get) will succeed.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    // == Set ==
    /// Inserts or replaces the entry for `key`.
    ///
    /// `ttl` of `None` means the entry never expires.
    pub fn set(&self, key: K, value: V, ttl: Option<Duration>) {
        self.entries.insert(key, CacheEntry::new(value, ttl));
    }

    // == Get Or Compute ==
    /// Returns the cached value, or runs `producer` and caches its result.
    ///
    /// # Errors
    /// [`CacheError::EmptyProducerResult`] if `producer` returns `None`;
    /// nothing is stored in that case.
    pub fn get_or_compute<F>(&self, key: K, producer: F, ttl: Option<Duration>) -> Result<Arc<V>>
    where
        F: FnOnce() -> Option<V>,
    {
        self.get_or_try_compute(key, || Ok::<_, CacheError>(producer()), ttl)
    }

    /// Like [`get_or_compute`](Self::get_or_compute), but returns `None`
    /// instead of failing when `producer` comes back empty.
    pub fn try_get_or_compute<F>(
        &self,
        key: K,
        producer: F,
        ttl: Option<Duration>,
    ) -> Option<Arc<V>>
    where
        F: FnOnce() -> Option<V>,
    {
        if let Some(value) = self.get(&key) {
            return Some(value);
        }

        trace!("cache miss; invoking producer");
        match producer() {
            Some(value) => Some(self.store_produced(key, value, ttl)),
            None => {
                trace!("producer returned no value; nothing cached");
                None
            }
        }
    }

    /// Compute-if-absent with a fallible producer.
    ///
    /// Producer errors are returned as-is and nothing is cached. An empty
    /// result is reported as [`CacheError::EmptyProducerResult`] converted
    /// into the caller's error type.
    pub fn get_or_try_compute<F, E>(
        &self,
        key: K,
        producer: F,
        ttl: Option<Duration>,
    ) -> std::result::Result<Arc<V>, E>
    where
        F: FnOnce() -> std::result::Result<Option<V>, E>,
        E: From<CacheError>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        trace!("cache miss; invoking producer");
        match producer()? {
            Some(value) => Ok(self.store_produced(key, value, ttl)),
            None => {
                trace!("producer returned no value; nothing cached");
                Err(CacheError::EmptyProducerResult.into())
            }
        }
    }

    // == Get Or Compute (async) ==
    /// Async form of [`get_or_compute`](Self::get_or_compute). The calling task
    /// is suspended while the producer runs; no map lock is held meanwhile.
    ///
    /// There is no timeout: a producer that never completes never returns.
    pub async fn get_or_compute_async<F, Fut>(
        &self,
        key: K,
        producer: F,
        ttl: Option<Duration>,
    ) -> Result<Arc<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<V>>,
    {
        self.get_or_try_compute_async(
            key,
            move || async move { Ok::<_, CacheError>(producer().await) },
            ttl,
        )
        .await
    }

    /// Async form of [`try_get_or_compute`](Self::try_get_or_compute).
    pub async fn try_get_or_compute_async<F, Fut>(
        &self,
        key: K,
        producer: F,
        ttl: Option<Duration>,
    ) -> Option<Arc<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<V>>,
    {
        if let Some(value) = self.get(&key) {
            return Some(value);
        }

        trace!("cache miss; awaiting producer");
        match producer().await {
            Some(value) => Some(self.store_produced(key, value, ttl)),
            None => {
                trace!("producer returned no value; nothing cached");
                None
            }
        }
    }

    /// Async form of [`get_or_try_compute`](Self::get_or_try_compute).
    pub async fn get_or_try_compute_async<F, Fut, E>(
        &self,
        key: K,
        producer: F,
        ttl: Option<Duration>,
    ) -> std::result::Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<V>, E>>,
        E: From<CacheError>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        trace!("cache miss; awaiting producer");
        match producer().await? {
            Some(value) => Ok(self.store_produced(key, value, ttl)),
            None => {
                trace!("producer returned no value; nothing cached");
                Err(CacheError::EmptyProducerResult.into())
            }
        }
    }

    // == Add Or Update ==
    /// Atomically inserts `add` if `key` is absent, or replaces the present
    /// entry (valid or not) with `update(key, existing)`.
    ///
    /// `update` runs while the key's shard is write-locked and must not call
    /// back into this store. Returns the value now stored.
    pub fn add_or_update<F>(&self, key: K, add: CacheEntry<V>, update: F) -> Arc<V>
    where
        F: FnOnce(&K, &CacheEntry<V>) -> CacheEntry<V>,
    {
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                let updated = update(occupied.key(), occupied.get());
                let value = Arc::clone(updated.value());
                occupied.insert(updated);
                value
            }
            Entry::Vacant(vacant) => {
                let value = Arc::clone(add.value());
                vacant.insert(add);
                value
            }
        }
    }

    // == Try Remove ==
    /// Removes `key` and returns its value if the removed entry was still valid.
    pub fn try_remove<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries
            .remove(key)
            .filter(|(_, entry)| entry.is_valid())
            .map(|(_, entry)| entry.into_value())
    }

    /// Removes `key`, discarding whatever it held.
    pub fn remove<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(key);
    }

    // == Sweep ==
    /// Runs one sweep pass now. Returns the number of entries removed.
    pub fn sweep_expired(&self) -> usize {
        sweep(&self.entries)
    }

    // == Shutdown ==
    /// Stops the background sweeper. Idempotent; a stopped sweeper never
    /// runs again. The store itself stays usable.
    pub fn shutdown(&self) {
        if let Some(sweeper) = &self.sweeper {
            sweeper.cancel();
        }
    }

    /// Returns true while a background sweeper is scheduled.
    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .as_ref()
            .is_some_and(|sweeper| !sweeper.is_stopped())
    }

    // == Length ==
    /// Returns the number of physically present entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    // == Is Empty ==
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn store_produced(&self, key: K, value: V, ttl: Option<Duration>) -> Arc<V> {
        let entry = CacheEntry::new(value, ttl);
        let value = Arc::clone(entry.value());
        self.entries.insert(key, entry);
        value
    }
}

/// Deletes every invalid entry from `entries`.
///
/// Works on a snapshot of the keys: keys added meanwhile wait for the next
/// pass, and each removal re-checks validity under the shard lock so an entry
/// replaced since the snapshot is left alone.
pub(crate) fn sweep<K, V>(entries: &DashMap<K, CacheEntry<V>>) -> usize
where
    K: Eq + Hash + Clone,
{
    let keys = snapshot_keys(entries);
    remove_expired(entries, &keys)
}

fn snapshot_keys<K, V>(entries: &DashMap<K, CacheEntry<V>>) -> Vec<K>
where
    K: Eq + Hash + Clone,
{
    entries.iter().map(|entry| entry.key().clone()).collect()
}

/// Removes each of `keys` whose current entry is invalid. Keys already gone
/// are skipped.
fn remove_expired<K, V>(entries: &DashMap<K, CacheEntry<V>>, keys: &[K]) -> usize
where
    K: Eq + Hash + Clone,
{
    keys.iter()
        .filter(|key| {
            entries
                .remove_if(*key, |_, entry| !entry.is_valid())
                .is_some()
        })
        .count()
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store() -> CacheStore<String, String> {
        CacheStore::without_sweeper()
    }

    #[test]
    fn test_store_new() {
        let store = store();
        assert_eq!(store.len(), 0);
        assert!(store.is_empty());
        assert!(!store.is_sweeping());
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        let result = CacheStore::<String, String>::new();
        assert!(matches!(result, Err(CacheError::NoRuntime(_))));
    }

    #[test]
    fn test_config_without_auto_sweep_needs_no_runtime() {
        let store =
            CacheStore::<String, u32>::with_config(&Config::default().without_auto_sweep())
                .unwrap();
        assert!(!store.is_sweeping());
    }

    #[test]
    fn test_store_set_and_get() {
        let store = store();

        store.set("key1".to_string(), "value1".to_string(), None);
        let value = store.get("key1").unwrap();

        assert_eq!(value.as_str(), "value1");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_get_nonexistent() {
        assert!(store().get("nonexistent").is_none());
    }

    #[test]
    fn test_store_overwrite() {
        let store = store();

        store.set("key1".to_string(), "value1".to_string(), None);
        store.set("key1".to_string(), "value2".to_string(), None);

        assert_eq!(store.get("key1").unwrap().as_str(), "value2");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_ttl_expiration() {
        let store = store();
        store.set("key1".to_string(), "value1".to_string(), Some(Duration::from_secs(1)));

        assert!(store.get("key1").is_some());

        tokio::time::advance(Duration::from_secs(1)).await;

        assert!(store.get("key1").is_none());
        assert!(store.contains("key1"), "get must not physically remove");
    }

    #[test]
    fn test_contains_ignores_validity() {
        let store = store();
        store.add_or_update(
            "stale".to_string(),
            CacheEntry::with_expiry("v".to_string(), Some(tokio::time::Instant::now())),
            |_, existing| existing.clone(),
        );

        assert!(store.contains("stale"));
        assert!(store.get("stale").is_none());
    }

    #[test]
    fn test_get_or_compute_runs_producer_once() {
        let store = store();
        let calls = AtomicUsize::new(0);
        let producer = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Some("computed".to_string())
        };

        let first = store.get_or_compute("k".to_string(), producer, None).unwrap();
        let second = store.get_or_compute("k".to_string(), producer, None).unwrap();

        assert_eq!(first.as_str(), "computed");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_get_or_compute_empty_result() {
        let store = store();

        let result = store.get_or_compute("k".to_string(), || None, None);

        assert!(matches!(result, Err(CacheError::EmptyProducerResult)));
        assert!(!store.contains("k"));
    }

    #[test]
    fn test_try_get_or_compute_empty_result() {
        let store = store();

        assert!(store.try_get_or_compute("k".to_string(), || None, None).is_none());
        assert!(!store.contains("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_or_compute_replaces_expired_entry() {
        let store = store();
        store.set("k".to_string(), "old".to_string(), Some(Duration::from_millis(10)));
        tokio::time::advance(Duration::from_millis(10)).await;

        let value = store
            .get_or_compute("k".to_string(), || Some("new".to_string()), None)
            .unwrap();

        assert_eq!(value.as_str(), "new");
        assert_eq!(store.get("k").unwrap().as_str(), "new");
    }

    #[test]
    fn test_get_or_try_compute_propagates_producer_error() {
        #[derive(Debug, PartialEq)]
        enum LoadError {
            Backend,
            Cache,
        }
        impl From<CacheError> for LoadError {
            fn from(_: CacheError) -> Self {
                LoadError::Cache
            }
        }

        let store = store();

        let failed = store.get_or_try_compute("k".to_string(), || Err(LoadError::Backend), None);
        assert_eq!(failed.unwrap_err(), LoadError::Backend);
        assert!(!store.contains("k"));

        let empty = store.get_or_try_compute::<_, LoadError>("k".to_string(), || Ok(None), None);
        assert_eq!(empty.unwrap_err(), LoadError::Cache);
    }

    #[tokio::test]
    async fn test_get_or_compute_async() {
        let store = store();

        let value = store
            .get_or_compute_async("k".to_string(), || async { Some("async".to_string()) }, None)
            .await
            .unwrap();
        assert_eq!(value.as_str(), "async");

        let cached = store
            .get_or_compute_async("k".to_string(), || async { None }, None)
            .await
            .unwrap();
        assert_eq!(cached.as_str(), "async");
    }

    #[tokio::test]
    async fn test_get_or_compute_async_empty_result() {
        let store = store();

        let strict = store
            .get_or_compute_async("k".to_string(), || async { None }, None)
            .await;
        assert!(matches!(strict, Err(CacheError::EmptyProducerResult)));

        let lenient = store
            .try_get_or_compute_async("k".to_string(), || async { None }, None)
            .await;
        assert!(lenient.is_none());
        assert!(!store.contains("k"));
    }

    #[test]
    fn test_add_or_update() {
        let store = store();

        let added = store.add_or_update(
            "k".to_string(),
            CacheEntry::new("first".to_string(), None),
            |_, _| panic!("update must not run for an absent key"),
        );
        assert_eq!(added.as_str(), "first");

        let updated = store.add_or_update(
            "k".to_string(),
            CacheEntry::new("unused".to_string(), None),
            |key, existing| CacheEntry::new(format!("{key}:{}", existing.value()), None),
        );
        assert_eq!(updated.as_str(), "k:first");
        assert_eq!(store.get("k").unwrap().as_str(), "k:first");
    }

    #[test]
    fn test_try_remove_valid_entry() {
        let store = store();
        store.set("k".to_string(), "v".to_string(), None);

        assert_eq!(store.try_remove("k").unwrap().as_str(), "v");
        assert!(store.get("k").is_none());
        assert!(!store.contains("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_remove_expired_entry() {
        let store = store();
        store.set("k".to_string(), "v".to_string(), Some(Duration::from_millis(5)));
        tokio::time::advance(Duration::from_millis(5)).await;

        assert!(store.try_remove("k").is_none());
        assert!(!store.contains("k"), "expired entry is still removed");
    }

    #[test]
    fn test_remove() {
        let store = store();
        store.set("k".to_string(), "v".to_string(), None);
        store.remove("k");
        store.remove("missing");
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_expired() {
        let store = store();
        store.set("short".to_string(), "v".to_string(), Some(Duration::from_secs(1)));
        store.set("long".to_string(), "v".to_string(), Some(Duration::from_secs(10)));
        store.set("forever".to_string(), "v".to_string(), None);

        tokio::time::advance(Duration::from_secs(1)).await;

        assert_eq!(store.sweep_expired(), 1);
        assert_eq!(store.len(), 2);
        assert!(!store.contains("short"));
        assert!(store.get("long").is_some());
        assert!(store.get("forever").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_entry_refreshed_after_snapshot() {
        let store = store();
        store.set("refreshed".to_string(), "old".to_string(), Some(Duration::from_millis(10)));
        store.set("stale".to_string(), "old".to_string(), Some(Duration::from_millis(10)));
        store.set("gone".to_string(), "old".to_string(), Some(Duration::from_millis(10)));
        tokio::time::advance(Duration::from_millis(10)).await;

        let keys = snapshot_keys(&store.entries);
        assert_eq!(keys.len(), 3);

        store.set("refreshed".to_string(), "new".to_string(), Some(Duration::from_secs(60)));
        store.remove("gone");

        assert_eq!(remove_expired(&store.entries, &keys), 1);
        assert_eq!(store.get("refreshed").unwrap().as_str(), "new");
        assert!(!store.contains("stale"));
        assert!(!store.contains("gone"));
    }

    #[tokio::test]
    async fn test_drop_cancels_sweeper() {
        let store = CacheStore::<String, String>::new().unwrap();
        let token = store.sweeper.as_ref().unwrap().token();
        assert!(store.is_sweeping());

        drop(store);

        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let store = CacheStore::<String, String>::new().unwrap();

        store.shutdown();
        store.shutdown();

        assert!(!store.is_sweeping());
        store.set("k".to_string(), "v".to_string(), None);
        assert!(store.get("k").is_some(), "store stays usable after shutdown");
    }
}
