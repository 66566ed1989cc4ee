//! Remote-first store with an offline cache underneath

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use super::{Connectivity, Fetched, LocalCache, PlateRecord, PlateStore, RemoteStore, SourcePreference};
use crate::{Error, Result};

/// Tracks remote reachability from request outcomes and a background probe
#[derive(Debug)]
pub struct NetworkMonitor {
    online: AtomicBool,
}

impl NetworkMonitor {
    /// Create a monitor with an initial reachability guess
    #[must_use]
    pub const fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    /// Record the outcome of a remote interaction
    pub fn set_online(&self, online: bool) {
        let was = self.online.swap(online, Ordering::Relaxed);
        if was != online {
            if online {
                tracing::info!("remote store reachable again");
            } else {
                tracing::warn!("remote store unreachable, serving from offline cache");
            }
        }
    }

    /// Periodically ping the remote so an offline monitor can recover
    #[must_use]
    pub fn watch(self: &Arc<Self>, remote: RemoteStore, interval: Duration) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match remote.ping().await {
                    Ok(()) => monitor.set_online(true),
                    Err(e) => {
                        tracing::debug!(error = %e, "store health probe failed");
                        monitor.set_online(false);
                    }
                }
            }
        })
    }
}

impl Connectivity for NetworkMonitor {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }
}

/// [`PlateStore`] backed by an optional remote and a local cache
pub struct TieredStore {
    remote: Option<RemoteStore>,
    cache: LocalCache,
    network: Arc<NetworkMonitor>,
    min_keyword_len: usize,
}

impl TieredStore {
    /// Create a store; without a remote it runs entirely from the cache
    #[must_use]
    pub fn new(remote: Option<RemoteStore>, cache: LocalCache, min_keyword_len: usize) -> Self {
        let network = Arc::new(NetworkMonitor::new(remote.is_some()));
        Self {
            remote,
            cache,
            network,
            min_keyword_len,
        }
    }

    /// Reachability tracker shared with the resolver
    #[must_use]
    pub fn network(&self) -> Arc<NetworkMonitor> {
        Arc::clone(&self.network)
    }

    /// The offline cache
    #[must_use]
    pub const fn cache(&self) -> &LocalCache {
        &self.cache
    }

    /// Start the background reachability probe, if there is a remote
    #[must_use]
    pub fn watch_network(&self, interval: Duration) -> Option<JoinHandle<()>> {
        self.remote
            .as_ref()
            .map(|remote| self.network.watch(remote.clone(), interval))
    }

    /// Pull a whole collection from the remote into the cache
    ///
    /// # Errors
    ///
    /// Returns error if there is no remote or the download fails
    pub async fn sync_collection(&self, collection: &str) -> Result<usize> {
        let remote = self.remote_or_unavailable()?;
        let mut records = self.observe(remote.list(collection).await)?;
        for record in &mut records {
            record.ensure_keywords(self.min_keyword_len);
        }
        self.cache.store_collection(collection, &records, "remote")
    }

    fn remote_or_unavailable(&self) -> Result<&RemoteStore> {
        self.remote
            .as_ref()
            .ok_or_else(|| Error::StoreUnavailable("no remote store configured".to_string()))
    }

    /// Feed a remote outcome into the network monitor
    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.network.set_online(true),
            Err(e) if e.is_unreachable() => self.network.set_online(false),
            Err(_) => {}
        }
        result
    }

    fn write_through(&self, collection: &str, record: &PlateRecord) {
        let mut record = record.clone();
        record.ensure_keywords(self.min_keyword_len);
        if let Err(e) = self.cache.upsert(collection, &record) {
            tracing::warn!(collection, plate = %record.plate, error = %e, "cache write-through failed");
        }
    }

    fn should_try_remote(&self) -> bool {
        self.remote.is_some() && self.network.is_online()
    }

    async fn fetch_remote(&self, collection: &str, key: &str) -> Result<Option<PlateRecord>> {
        let remote = self.remote_or_unavailable()?;
        let record = self.observe(remote.get(collection, key).await)?;
        if let Some(record) = &record {
            self.write_through(collection, record);
        }
        Ok(record)
    }

    async fn query_remote(&self, collection: &str, field: &str, value: &str) -> Result<Vec<PlateRecord>> {
        let remote = self.remote_or_unavailable()?;
        let records = self.observe(remote.query(collection, field, value).await)?;
        for record in &records {
            self.write_through(collection, record);
        }
        Ok(records)
    }

    fn no_usable_cache(collection: &str) -> Error {
        Error::StoreUnavailable(format!("remote unreachable and no offline copy of {collection}"))
    }
}

#[async_trait]
impl PlateStore for TieredStore {
    async fn get(
        &self,
        collection: &str,
        key: &str,
        preference: SourcePreference,
    ) -> Result<Fetched<Option<PlateRecord>>> {
        if preference == SourcePreference::ForceRemote {
            return self.fetch_remote(collection, key).await.map(Fetched::remote);
        }

        if self.should_try_remote() {
            match self.fetch_remote(collection, key).await {
                Ok(record) => return Ok(Fetched::remote(record)),
                Err(e) => tracing::warn!(collection, key, error = %e, "remote get failed, trying cache"),
            }
        }

        let record = self.cache.get(collection, key)?;
        if record.is_none() && !self.cache.has_collection(collection)? {
            return Err(Self::no_usable_cache(collection));
        }
        Ok(Fetched::local(record))
    }

    async fn query(
        &self,
        collection: &str,
        field: &str,
        value: &str,
        preference: SourcePreference,
    ) -> Result<Fetched<Vec<PlateRecord>>> {
        if field != super::KEYWORDS_FIELD {
            return Err(Error::Store(format!("unsupported query field: {field}")));
        }

        if preference == SourcePreference::ForceRemote {
            return self.query_remote(collection, field, value).await.map(Fetched::remote);
        }

        if self.should_try_remote() {
            match self.query_remote(collection, field, value).await {
                Ok(records) => return Ok(Fetched::remote(records)),
                Err(e) => tracing::warn!(collection, value, error = %e, "remote query failed, trying cache"),
            }
        }

        let records = self.cache.find_by_keyword(collection, value)?;
        if records.is_empty() && !self.cache.has_collection(collection)? {
            return Err(Self::no_usable_cache(collection));
        }
        Ok(Fetched::local(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KEYWORDS_FIELD, Origin};

    fn offline_store() -> TieredStore {
        let cache = LocalCache::in_memory().unwrap();
        cache
            .store_collection(
                "lige",
                &[
                    PlateRecord::new("ABC1234", "A棟 3樓", "", 2),
                    PlateRecord::new("XY8888", "B棟 5樓", "", 2),
                ],
                "import",
            )
            .unwrap();
        TieredStore::new(None, cache, 2)
    }

    #[tokio::test]
    async fn test_offline_get_reads_cache() {
        let store = offline_store();
        assert!(!store.network().is_online());

        let hit = store.get("lige", "ABC1234", SourcePreference::PreferLocal).await.unwrap();
        assert_eq!(hit.origin, Origin::Local);
        assert_eq!(hit.value.unwrap().household, "A棟 3樓");

        let miss = store.get("lige", "NOPE", SourcePreference::PreferLocal).await.unwrap();
        assert_eq!(miss.origin, Origin::Local);
        assert!(miss.value.is_none());
    }

    #[tokio::test]
    async fn test_uncached_collection_is_unavailable() {
        let store = offline_store();
        let err = store
            .get("fengshi", "ABC1234", SourcePreference::PreferLocal)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));

        let err = store
            .query("fengshi", KEYWORDS_FIELD, "88", SourcePreference::PreferLocal)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_force_remote_without_remote() {
        let store = offline_store();
        let err = store
            .get("lige", "ABC1234", SourcePreference::ForceRemote)
            .await
            .unwrap_err();
        assert!(err.is_unreachable());
    }

    #[tokio::test]
    async fn test_offline_keyword_query() {
        let store = offline_store();
        let found = store
            .query("lige", KEYWORDS_FIELD, "8888", SourcePreference::PreferLocal)
            .await
            .unwrap();
        assert_eq!(found.origin, Origin::Local);
        assert_eq!(found.value.len(), 1);
        assert_eq!(found.value[0].plate, "XY8888");
    }

    #[tokio::test]
    async fn test_unreachable_remote_falls_back_and_goes_offline() {
        let remote = RemoteStore::new("http://127.0.0.1:9", None, Duration::from_millis(500)).unwrap();
        let cache = LocalCache::in_memory().unwrap();
        cache
            .store_collection("lige", &[PlateRecord::new("ABC1234", "A棟 3樓", "", 2)], "import")
            .unwrap();
        let store = TieredStore::new(Some(remote), cache, 2);
        assert!(store.network().is_online());

        let hit = store.get("lige", "ABC1234", SourcePreference::PreferLocal).await.unwrap();
        assert_eq!(hit.origin, Origin::Local);
        assert!(hit.value.is_some());
        assert!(!store.network().is_online());
    }
}
