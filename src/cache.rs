//! Namespaced, TTL'd, process-wide cache with glob invalidation and an
//! optional write-through remote tier.
//!
//! Internals are guarded by `parking_lot` locks for the short critical
//! sections (map lookups, stat bumps) since `parking_lot::RwLock` is
//! cheaper than an async lock when nothing ever holds it across an await
//! point. `get_or_set` additionally serializes concurrent
//! callers of the same key on a `tokio::sync::Mutex` so an expensive factory
//! (a correlation computation, a Monte Carlo run) executes at most once.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex as SyncMutex, RwLock as SyncRwLock};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::CoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Correlation,
    Factor,
    Copula,
    MonteCarlo,
    Optimization,
    Edge,
    Prop,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Correlation => "correlation",
            Namespace::Factor => "factor",
            Namespace::Copula => "copula",
            Namespace::MonteCarlo => "monte_carlo",
            Namespace::Optimization => "optimization",
            Namespace::Edge => "edge",
            Namespace::Prop => "prop",
        }
    }
}

/// Pluggable write-through tier. The default `Cache::new` runs with no
/// remote tier configured; a remote client (Redis or otherwise) can be
/// plugged in by implementing this trait.
pub trait RemoteTier: Send + Sync {
    fn get(&self, full_key: &str) -> Option<Vec<u8>>;
    fn set(&self, full_key: &str, value: &[u8], ttl: Duration);
    fn delete(&self, full_key: &str);
    fn scan(&self, namespace_prefix: &str) -> Vec<String>;
}

struct CacheEntry {
    value: Vec<u8>,
    created_at: Instant,
    expires_at: Instant,
    last_accessed: Instant,
    hit_count: u64,
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub memory_usage_bytes: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct Cache {
    entries: SyncRwLock<HashMap<String, CacheEntry>>,
    stats: SyncRwLock<HashMap<&'static str, CacheStats>>,
    key_locks: SyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    max_memory_entries: usize,
    remote: Option<Arc<dyn RemoteTier>>,
}

fn full_key(namespace: Namespace, key: &str) -> String {
    format!("{}:{}", namespace.as_str(), key)
}

const ALL_NAMESPACES: [Namespace; 7] = [
    Namespace::Correlation,
    Namespace::Factor,
    Namespace::Copula,
    Namespace::MonteCarlo,
    Namespace::Optimization,
    Namespace::Edge,
    Namespace::Prop,
];

fn namespace_of(full_key: &str) -> Option<Namespace> {
    let prefix = full_key.split_once(':').map(|(p, _)| p).unwrap_or(full_key);
    ALL_NAMESPACES.into_iter().find(|ns| ns.as_str() == prefix)
}

fn glob_match(pattern: &str, text: &str) -> bool {
    fn helper(p: &[u8], t: &[u8]) -> bool {
        match (p.first(), t.first()) {
            (None, None) => true,
            (Some(b'*'), _) => helper(&p[1..], t) || (!t.is_empty() && helper(p, &t[1..])),
            (Some(b'?'), Some(_)) => helper(&p[1..], &t[1..]),
            (Some(pc), Some(tc)) if pc == tc => helper(&p[1..], &t[1..]),
            _ => false,
        }
    }
    helper(pattern.as_bytes(), text.as_bytes())
}

impl Cache {
    pub fn new(max_memory_entries: usize) -> Self {
        Self {
            entries: SyncRwLock::new(HashMap::new()),
            stats: SyncRwLock::new(HashMap::new()),
            key_locks: SyncMutex::new(HashMap::new()),
            max_memory_entries,
            remote: None,
        }
    }

    pub fn from_config(config: &crate::config::CacheConfig) -> Self {
        Self::new(config.max_memory_entries)
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteTier>) -> Self {
        self.remote = Some(remote);
        self
    }

    fn bump_stat(&self, namespace: Namespace, f: impl FnOnce(&mut CacheStats)) {
        let mut stats = self.stats.write();
        let entry = stats.entry(namespace.as_str()).or_default();
        f(entry);
    }

    pub fn get<V: DeserializeOwned>(&self, key: &str, namespace: Namespace) -> Option<V> {
        let full = full_key(namespace, key);
        let now = Instant::now();

        {
            let mut entries = self.entries.write();
            if let Some(entry) = entries.get_mut(&full) {
                if entry.expires_at <= now {
                    entries.remove(&full);
                } else {
                    entry.last_accessed = now;
                    entry.hit_count += 1;
                    let value = entry.value.clone();
                    drop(entries);
                    self.bump_stat(namespace, |s| s.hits += 1);
                    return serde_json::from_slice(&value).ok();
                }
            }
        }

        if let Some(remote) = &self.remote {
            if let Some(bytes) = remote.get(&full) {
                self.bump_stat(namespace, |s| s.hits += 1);
                self.set_memory_only(&full, bytes.clone(), Duration::from_secs(300));
                return serde_json::from_slice(&bytes).ok();
            }
        }

        self.bump_stat(namespace, |s| s.misses += 1);
        None
    }

    fn set_memory_only(&self, full: &str, bytes: Vec<u8>, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.write();
        entries.insert(
            full.to_string(),
            CacheEntry {
                value: bytes,
                created_at: now,
                expires_at: now + ttl,
                last_accessed: now,
                hit_count: 0,
            },
        );
        if entries.len() > self.max_memory_entries {
            self.evict_lru_locked(&mut entries);
        }
    }

    fn evict_lru_locked(&self, entries: &mut HashMap<String, CacheEntry>) {
        let target = (entries.len() as f64 * 0.9).ceil() as usize;
        let mut by_access: Vec<(String, Instant)> = entries
            .iter()
            .map(|(k, v)| (k.clone(), v.last_accessed))
            .collect();
        by_access.sort_by_key(|(_, t)| *t);
        let evict_count = entries.len().saturating_sub(target);
        for (key, _) in by_access.into_iter().take(evict_count) {
            entries.remove(&key);
            if let Some(namespace) = namespace_of(&key) {
                self.bump_stat(namespace, |s| s.evictions += 1);
            }
        }
    }

    pub fn set<V: Serialize>(
        &self,
        key: &str,
        value: &V,
        ttl: Duration,
        namespace: Namespace,
    ) -> CoreResult<()> {
        let full = full_key(namespace, key);
        let bytes = serde_json::to_vec(value).map_err(|e| crate::error::CoreError::internal(e.to_string()))?;
        let size = bytes.len();

        self.set_memory_only(&full, bytes.clone(), ttl);
        if let Some(remote) = &self.remote {
            remote.set(&full, &bytes, ttl);
        }

        self.bump_stat(namespace, |s| {
            s.sets += 1;
            s.memory_usage_bytes += size;
        });
        Ok(())
    }

    pub fn delete(&self, key: &str, namespace: Namespace) {
        let full = full_key(namespace, key);
        self.entries.write().remove(&full);
        if let Some(remote) = &self.remote {
            remote.delete(&full);
        }
        self.bump_stat(namespace, |s| s.deletes += 1);
    }

    /// Removes every key matching `pattern` (`*`/`?` globs) within
    /// `namespace`, or across all namespaces when `namespace` is `None`.
    pub fn invalidate(&self, pattern: &str, namespace: Option<Namespace>) -> usize {
        let prefix = namespace.map(|n| format!("{}:", n.as_str()));
        let mut removed = 0;
        {
            let mut entries = self.entries.write();
            let to_remove: Vec<String> = entries
                .keys()
                .filter(|full| {
                    let matches_ns = prefix.as_ref().map_or(true, |p| full.starts_with(p.as_str()));
                    if !matches_ns {
                        return false;
                    }
                    let stripped = prefix
                        .as_ref()
                        .and_then(|p| full.strip_prefix(p.as_str()))
                        .unwrap_or(full.as_str());
                    glob_match(pattern, stripped)
                })
                .cloned()
                .collect();
            for key in to_remove {
                entries.remove(&key);
                removed += 1;
            }
        }
        if let Some(remote) = &self.remote {
            let scan_prefix = prefix.as_deref().unwrap_or("");
            for full in remote.scan(scan_prefix) {
                remote.delete(&full);
            }
        }
        removed
    }

    /// Returns the cached value for `key`, or computes it via `factory` and
    /// stores the result. Concurrent callers for the same key serialize on a
    /// per-key lock so `factory` runs at most once.
    pub async fn get_or_set<V, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        namespace: Namespace,
        factory: F,
    ) -> CoreResult<V>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoreResult<V>>,
    {
        if let Some(v) = self.get::<V>(key, namespace) {
            return Ok(v);
        }

        let full = full_key(namespace, key);
        let lock = {
            let mut locks = self.key_locks.lock();
            locks
                .entry(full.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;

        // Re-check: another caller may have populated the entry while we
        // waited for the per-key lock.
        if let Some(v) = self.get::<V>(key, namespace) {
            return Ok(v);
        }

        let value = factory().await?;
        self.set(key, &value, ttl, namespace)?;

        {
            let mut locks = self.key_locks.lock();
            locks.remove(&full);
        }

        Ok(value)
    }

    pub fn clear_namespace(&self, namespace: Namespace) {
        self.invalidate("*", Some(namespace));
    }

    pub fn clear_all(&self) {
        self.entries.write().clear();
    }

    pub fn warm<V: Serialize>(&self, entries: &[(String, V, Duration)], namespace: Namespace) -> CoreResult<()> {
        for (key, value, ttl) in entries {
            self.set(key, value, *ttl, namespace)?;
        }
        Ok(())
    }

    pub fn stats(&self, namespace: Namespace) -> CacheStats {
        self.stats
            .read()
            .get(namespace.as_str())
            .cloned()
            .unwrap_or_default()
    }

    pub fn all_stats(&self) -> HashMap<&'static str, CacheStats> {
        self.stats.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn glob_matching() {
        assert!(glob_match("corr_*", "corr_abc123"));
        assert!(glob_match("corr_???", "corr_123"));
        assert!(!glob_match("corr_???", "corr_1234"));
        assert!(glob_match("*", "anything"));
    }

    #[test]
    fn set_then_get_roundtrip() {
        let cache = Cache::new(100);
        cache
            .set("k1", &42i64, Duration::from_secs(60), Namespace::Prop)
            .unwrap();
        let v: Option<i64> = cache.get("k1", Namespace::Prop);
        assert_eq!(v, Some(42));
        assert_eq!(cache.stats(Namespace::Prop).hits, 1);
    }

    #[test]
    fn miss_increments_misses() {
        let cache = Cache::new(100);
        let v: Option<i64> = cache.get("missing", Namespace::Prop);
        assert_eq!(v, None);
        assert_eq!(cache.stats(Namespace::Prop).misses, 1);
    }

    #[test]
    fn expired_entries_are_removed_on_access() {
        let cache = Cache::new(100);
        cache
            .set("k1", &1i64, Duration::from_millis(1), Namespace::Prop)
            .unwrap();
        std::thread::sleep(Duration::from_millis(10));
        let v: Option<i64> = cache.get("k1", Namespace::Prop);
        assert_eq!(v, None);
    }

    #[test]
    fn invalidate_by_pattern_scoped_to_namespace() {
        let cache = Cache::new(100);
        cache
            .set("corr_a", &1i64, Duration::from_secs(60), Namespace::Correlation)
            .unwrap();
        cache
            .set("corr_b", &1i64, Duration::from_secs(60), Namespace::Correlation)
            .unwrap();
        cache
            .set("corr_a", &1i64, Duration::from_secs(60), Namespace::Prop)
            .unwrap();

        let removed = cache.invalidate("corr_*", Some(Namespace::Correlation));
        assert_eq!(removed, 2);
        let still_there: Option<i64> = cache.get("corr_a", Namespace::Prop);
        assert_eq!(still_there, Some(1));
    }

    #[test]
    fn lru_eviction_by_last_access() {
        let cache = Cache::new(2);
        cache
            .set("a", &1i64, Duration::from_secs(60), Namespace::Prop)
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));
        cache
            .set("b", &1i64, Duration::from_secs(60), Namespace::Prop)
            .unwrap();
        // touch `a` so it is more recently accessed than `b`
        std::thread::sleep(Duration::from_millis(5));
        let _: Option<i64> = cache.get("a", Namespace::Prop);
        std::thread::sleep(Duration::from_millis(5));
        cache
            .set("c", &1i64, Duration::from_secs(60), Namespace::Prop)
            .unwrap();

        let a: Option<i64> = cache.get("a", Namespace::Prop);
        assert_eq!(a, Some(1), "recently accessed entry should survive eviction");
        let stats = cache.stats(Namespace::Prop);
        assert!(stats.evictions >= 1, "evicting the LRU entry should bump the namespace's eviction counter");
    }

    #[tokio::test]
    async fn get_or_set_runs_factory_once_under_concurrency() {
        let cache = Arc::new(Cache::new(100));
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = vec![];
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_set("shared", Duration::from_secs(60), Namespace::Correlation, || {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            Ok::<i64, crate::error::CoreError>(7)
                        }
                    })
                    .await
                    .unwrap()
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
