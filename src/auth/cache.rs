use moka::future::Cache;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::accessor::{Accessor, AccessorStore};
use crate::config::AccessorConfig;

/// Cache entries are keyed by the identity looked up and the address that asked
type CacheKey = (String, Option<IpAddr>);

/// Resolves identities to accessors through a TTL cache in front of the store.
///
/// Only hits are cached. Store failures count as "not found" and are never cached.
/// Concurrent misses for the same key may both reach the store. A lookup that overlaps
/// an invalidation is returned to its caller but never cached.
#[derive(Clone)]
pub struct AccessorResolver {
    cache: Cache<CacheKey, Accessor>,
    store: Arc<dyn AccessorStore>,
    /// Bumped by every invalidation
    generation: Arc<AtomicU64>,
}

impl AccessorResolver {
    pub fn new(store: Arc<dyn AccessorStore>, ttl: Duration, capacity: u64) -> Self {
        let cache = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(capacity)
            .support_invalidation_closures()
            .build();
        Self {
            cache,
            store,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn from_config(store: Arc<dyn AccessorStore>, config: &AccessorConfig) -> Self {
        Self::new(store, config.expire(), config.capacity)
    }

    pub async fn resolve(&self, identity: &str, caller: Option<IpAddr>) -> Option<Accessor> {
        let key = (identity.to_string(), caller);
        if let Some(accessor) = self.cache.get(&key).await {
            return Some(accessor);
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let accessor = match self.store.lookup(identity).await {
            Ok(Some(accessor)) => accessor,
            Ok(None) => return None,
            Err(e) => {
                error!("Accessor lookup failed for {}: {}", identity, e);
                return None;
            }
        };

        // so we know who is using the service
        if let Err(e) = self.store.touch(accessor.accid).await {
            warn!("Unable to update last_used for accessor {}: {}", accessor.accid, e);
        }

        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("Accessor {} changed during lookup, not caching", accessor.name);
            return Some(accessor);
        }
        debug!("Caching accessor {} ({})", accessor.name, accessor.kind);
        self.cache.insert(key.clone(), accessor.clone()).await;
        // an invalidation may have slipped in between the check and the insert
        if self.generation.load(Ordering::SeqCst) != generation {
            self.cache.invalidate(&key).await;
        }
        Some(accessor)
    }

    /// Drop every cached entry for `identity`, whichever address looked it up
    pub fn invalidate(&self, identity: &str) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let identity = identity.to_string();
        if let Err(e) = self.cache.invalidate_entries_if(move |key, _| key.0 == identity) {
            warn!("Unable to invalidate accessor cache: {}", e);
        }
    }

    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cache.invalidate_all();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::accessor::{AccessorKind, StoreError};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// In-memory store that counts how often it is consulted
    #[derive(Default)]
    pub(crate) struct CountingStore {
        pub accessors: Mutex<HashMap<String, Accessor>>,
        pub lookups: AtomicUsize,
        pub touches: AtomicUsize,
        pub fail_lookups: bool,
        pub fail_touches: bool,
        /// When set, each lookup reads its row, signals `entered`, then waits here
        pub gate: Option<Arc<Notify>>,
        pub entered: Notify,
    }

    impl CountingStore {
        pub fn with(accessors: impl IntoIterator<Item = Accessor>) -> Self {
            let store = Self::default();
            {
                let mut map = store.accessors.lock().unwrap();
                for accessor in accessors {
                    map.insert(accessor.name.clone(), accessor);
                }
            }
            store
        }

        pub fn lookups(&self) -> usize {
            self.lookups.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AccessorStore for CountingStore {
        async fn lookup(&self, name: &str) -> Result<Option<Accessor>, StoreError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.fail_lookups {
                return Err(StoreError::Unavailable("store offline".to_string()));
            }
            let found = self.accessors.lock().unwrap().get(name).cloned();
            if let Some(gate) = &self.gate {
                self.entered.notify_one();
                gate.notified().await;
            }
            Ok(found)
        }

        async fn touch(&self, _accid: i64) -> Result<(), StoreError> {
            self.touches.fetch_add(1, Ordering::SeqCst);
            if self.fail_touches {
                return Err(StoreError::Unavailable("read only".to_string()));
            }
            Ok(())
        }
    }

    pub(crate) fn accessor(accid: i64, name: &str, kind: AccessorKind, write: bool) -> Accessor {
        Accessor {
            accid,
            name: name.to_string(),
            active: true,
            write,
            kind,
            username: None,
        }
    }

    fn resolver(store: Arc<CountingStore>) -> AccessorResolver {
        AccessorResolver::new(store, Duration::from_secs(60), 100)
    }

    fn caller() -> Option<IpAddr> {
        Some("10.0.0.1".parse().unwrap())
    }

    #[tokio::test]
    async fn second_resolution_is_served_from_cache() {
        let store = Arc::new(CountingStore::with([accessor(1, "10.0.0.1", AccessorKind::IpRole, false)]));
        let resolver = resolver(store.clone());

        assert!(resolver.resolve("10.0.0.1", caller()).await.is_some());
        assert!(resolver.resolve("10.0.0.1", caller()).await.is_some());
        assert_eq!(store.lookups(), 1);
        assert_eq!(store.touches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cache_key_includes_caller_address() {
        let store = Arc::new(CountingStore::with([accessor(1, "svc", AccessorKind::JwtRole, true)]));
        let resolver = resolver(store.clone());

        resolver.resolve("svc", caller()).await;
        resolver.resolve("svc", Some("10.0.0.2".parse().unwrap())).await;
        assert_eq!(store.lookups(), 2);
    }

    #[tokio::test]
    async fn misses_are_not_cached() {
        let store = Arc::new(CountingStore::default());
        let resolver = resolver(store.clone());

        assert!(resolver.resolve("nobody", caller()).await.is_none());
        assert!(resolver.resolve("nobody", caller()).await.is_none());
        assert_eq!(store.lookups(), 2);
    }

    #[tokio::test]
    async fn store_errors_fail_closed() {
        let store = Arc::new(CountingStore {
            fail_lookups: true,
            ..CountingStore::with([accessor(1, "svc", AccessorKind::JwtRole, true)])
        });
        let resolver = resolver(store.clone());

        assert!(resolver.resolve("svc", caller()).await.is_none());
        assert!(resolver.resolve("svc", caller()).await.is_none());
        assert_eq!(store.lookups(), 2);
    }

    #[tokio::test]
    async fn touch_failure_does_not_deny() {
        let store = Arc::new(CountingStore {
            fail_touches: true,
            ..CountingStore::with([accessor(1, "svc", AccessorKind::JwtRole, true)])
        });
        let resolver = resolver(store.clone());

        assert!(resolver.resolve("svc", caller()).await.is_some());
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let store = Arc::new(CountingStore::with([accessor(1, "svc", AccessorKind::JwtRole, true)]));
        let resolver = AccessorResolver::new(store.clone(), Duration::from_millis(50), 100);

        resolver.resolve("svc", caller()).await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        resolver.resolve("svc", caller()).await;
        assert_eq!(store.lookups(), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_a_fresh_lookup() {
        let store = Arc::new(CountingStore::with([accessor(1, "svc", AccessorKind::JwtRole, true)]));
        let resolver = resolver(store.clone());

        resolver.resolve("svc", caller()).await;
        resolver.invalidate("svc");
        resolver.resolve("svc", caller()).await;
        assert_eq!(store.lookups(), 2);
    }

    #[tokio::test]
    async fn lookup_overlapping_invalidation_is_not_cached() {
        let gate = Arc::new(Notify::new());
        let store = Arc::new(CountingStore {
            gate: Some(gate.clone()),
            ..CountingStore::with([accessor(1, "svc", AccessorKind::JwtRole, true)])
        });
        let resolver = resolver(store.clone());

        let pending = {
            let resolver = resolver.clone();
            tokio::spawn(async move { resolver.resolve("svc", caller()).await })
        };
        store.entered.notified().await;

        // the row changes and is invalidated while the lookup above holds the old copy
        store
            .accessors
            .lock()
            .unwrap()
            .insert("svc".to_string(), accessor(1, "svc", AccessorKind::JwtRole, false));
        resolver.invalidate("svc");
        gate.notify_one();

        let stale = pending.await.unwrap().unwrap();
        assert!(stale.write);

        gate.notify_one();
        let fresh = resolver.resolve("svc", caller()).await.unwrap();
        assert!(!fresh.write);
        assert_eq!(store.lookups(), 2);
    }
}
