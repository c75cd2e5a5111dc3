//! Fetch strategies.
//!
//! - **network-first** for API-like requests: live data when the network
//!   answers 2xx, the dynamic generation otherwise, then a 408 fallback.
//! - **cache-first** for assets: the asset generation when it holds the
//!   request, the network when it answers 2xx, then a 404 fallback.
//!
//! Both strategies always resolve to a [`FetchResponse`]. Successful network
//! responses are written back on a detached task; the response path never
//! waits for that write.

use std::sync::Arc;

use cachekit_common::with_timeout;
use cachekit_net::{Fetcher, Request};
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn};

use crate::classify::{CacheClassifier, RequestClass};
use crate::config::WorkerConfig;
use crate::fallback::{FallbackKind, FallbackProvider};
use crate::store::{CacheEntry, CacheStorage, FetchResponse, RequestKey, ResponseSource};
use crate::ServiceWorkerError;

/// Runs the cache strategies against the store and the network.
pub struct StrategyEngine {
    config: Arc<WorkerConfig>,
    storage: CacheStorage,
    fetcher: Arc<dyn Fetcher>,
    classifier: CacheClassifier,
    fallback: FallbackProvider,
    writes: TaskTracker,
    settling: Mutex<()>,
}

impl StrategyEngine {
    pub fn new(
        config: Arc<WorkerConfig>,
        storage: CacheStorage,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, ServiceWorkerError> {
        let offline_key = RequestKey::get(&config.offline_page_url()?);
        let classifier = CacheClassifier::new(&config.api_url_patterns);
        let fallback = FallbackProvider::new(storage.clone(), offline_key);

        Ok(Self {
            config,
            storage,
            fetcher,
            classifier,
            fallback,
            writes: TaskTracker::new(),
            settling: Mutex::new(()),
        })
    }

    pub fn classifier(&self) -> &CacheClassifier {
        &self.classifier
    }

    pub fn fallback(&self) -> &FallbackProvider {
        &self.fallback
    }

    /// Classify the request and run the matching strategy.
    pub async fn respond(&self, request: &Request) -> FetchResponse {
        match self.classifier.classify(&request.url) {
            RequestClass::ApiLike => self.network_first(request).await,
            RequestClass::AssetLike => self.cache_first(request).await,
        }
    }

    /// Network, then the dynamic generation, then a fallback.
    pub async fn network_first(&self, request: &Request) -> FetchResponse {
        let cache_name = &self.config.dynamic_cache_name;

        match self.fetch_snapshot(request).await {
            Ok(entry) if entry.is_success() => {
                debug!(url = %request.url, status = entry.status, "network-first: network hit");
                self.store_in_background(cache_name, RequestKey::from_request(request), entry.clone());
                return FetchResponse::from_entry(entry, ResponseSource::Network);
            }
            Ok(entry) => {
                debug!(url = %request.url, status = entry.status, "network-first: non-success status, trying cache");
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "network-first: network failed, trying cache");
            }
        }

        if let Some(entry) = self.lookup(cache_name, request).await {
            debug!(url = %request.url, "network-first: cache hit");
            return FetchResponse::from_entry(entry, ResponseSource::Cache);
        }

        self.fallback
            .exhausted(request, FallbackKind::NetworkError)
            .await
    }

    /// The asset generation, then the network, then a fallback.
    pub async fn cache_first(&self, request: &Request) -> FetchResponse {
        let cache_name = &self.config.asset_cache_name;

        if let Some(entry) = self.lookup(cache_name, request).await {
            debug!(url = %request.url, "cache-first: cache hit");
            return FetchResponse::from_entry(entry, ResponseSource::Cache);
        }

        match self.fetch_snapshot(request).await {
            Ok(entry) if entry.is_success() => {
                debug!(url = %request.url, status = entry.status, "cache-first: fetched from network");
                self.store_in_background(cache_name, RequestKey::from_request(request), entry.clone());
                return FetchResponse::from_entry(entry, ResponseSource::Network);
            }
            Ok(entry) => {
                debug!(url = %request.url, status = entry.status, "cache-first: non-success status");
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "cache-first: network failed");
            }
        }

        self.fallback
            .exhausted(request, FallbackKind::NotAvailableOffline)
            .await
    }

    /// Wait for every background write started so far. Concurrent callers
    /// settle one after another.
    pub async fn settle(&self) {
        let _guard = self.settling.lock().await;
        self.writes.close();
        self.writes.wait().await;
        self.writes.reopen();
    }

    /// Number of background writes still running.
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    /// Fetch and read the whole body into a snapshot, whatever the status.
    async fn fetch_snapshot(&self, request: &Request) -> Result<CacheEntry, ServiceWorkerError> {
        let response = match self.config.network_timeout() {
            Some(timeout) => with_timeout(timeout, || self.fetcher.fetch(request)).await??,
            None => self.fetcher.fetch(request).await?,
        };

        trace!(url = %request.url, status = %response.status, "Network response");

        let key = RequestKey::from_request(request);
        let status = response.status;
        let headers = response.headers.clone();
        Ok(CacheEntry::capture(&key, status, &headers, response.bytes()))
    }

    /// Store lookup; a failing store reads as a miss.
    async fn lookup(&self, cache_name: &str, request: &Request) -> Option<CacheEntry> {
        let key = RequestKey::from_request(request);
        let result = match self.storage.open(cache_name).await {
            Ok(cache) => cache.get(&key).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(hit) => hit,
            Err(e) => {
                warn!(cache = cache_name, key = %key, error = %e, "Cache lookup failed");
                None
            }
        }
    }

    fn store_in_background(&self, cache_name: &str, key: RequestKey, entry: CacheEntry) {
        let storage = self.storage.clone();
        let cache_name = cache_name.to_string();

        self.writes.spawn(async move {
            let result = match storage.open(&cache_name).await {
                Ok(cache) => cache.put(key.clone(), entry).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => trace!(cache = %cache_name, key = %key, "Stored response"),
                Err(e) => {
                    warn!(cache = %cache_name, key = %key, error = %e, "Background cache write failed")
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CacheBackend, MemoryBackend};
    use async_trait::async_trait;
    use bytes::Bytes;
    use cachekit_net::{StaticFetcher, StaticRoute, SwitchableFetcher};
    use http::{HeaderMap, StatusCode};
    use std::time::Duration;
    use tokio::sync::Notify;
    use url::Url;

    const FEED: &str = "http://localhost:8080/api/feed";
    const LOGO: &str = "http://localhost:8080/icons/icon-192x192.png";

    fn engine(
        fetcher: StaticFetcher,
    ) -> (StrategyEngine, Arc<SwitchableFetcher<StaticFetcher>>, CacheStorage) {
        let fetcher = Arc::new(SwitchableFetcher::new(fetcher));
        let storage = CacheStorage::in_memory();
        let engine = StrategyEngine::new(
            Arc::new(WorkerConfig::default()),
            storage.clone(),
            fetcher.clone(),
        )
        .unwrap();
        (engine, fetcher, storage)
    }

    fn get(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    #[tokio::test]
    async fn test_respond_routes_by_class() {
        let (engine, fetcher, _) = engine(
            StaticFetcher::new()
                .with_route(FEED, StaticRoute::ok("application/json", "[1]"))
                .with_route(LOGO, StaticRoute::ok("image/png", "png")),
        );

        engine.respond(&get(FEED)).await;
        engine.respond(&get(LOGO)).await;
        engine.settle().await;

        // Both cached; the API is still refetched, the asset is not
        engine.respond(&get(FEED)).await;
        engine.respond(&get(LOGO)).await;
        assert_eq!(fetcher.inner().calls_for(FEED).await, 2);
        assert_eq!(fetcher.inner().calls_for(LOGO).await, 1);
    }

    #[tokio::test]
    async fn test_network_first_stores_in_dynamic_generation() {
        let (engine, _, storage) =
            engine(StaticFetcher::new().with_route(FEED, StaticRoute::ok("application/json", "[1]")));

        let response = engine.network_first(&get(FEED)).await;
        assert_eq!(response.source, ResponseSource::Network);
        engine.settle().await;

        let dynamic = storage.open("tiktok-player-dynamic-v2").await.unwrap();
        let stored = dynamic.match_request(&get(FEED)).await.unwrap().unwrap();
        assert_eq!(stored.body, b"[1]");
        assert!(!storage.has("tiktok-player-static-v2").await.unwrap());
    }

    #[tokio::test]
    async fn test_network_first_prefers_fresh_network_data() {
        let (engine, fetcher, _) =
            engine(StaticFetcher::new().with_route(FEED, StaticRoute::ok("application/json", "old")));

        engine.network_first(&get(FEED)).await;
        engine.settle().await;

        fetcher
            .inner()
            .set_route(FEED, StaticRoute::ok("application/json", "new"))
            .await;
        let response = engine.network_first(&get(FEED)).await;
        assert_eq!(response.text(), "new");
        assert_eq!(response.source, ResponseSource::Network);
    }

    #[tokio::test]
    async fn test_network_first_non_success_falls_back_to_cache() {
        let (engine, fetcher, _) =
            engine(StaticFetcher::new().with_route(FEED, StaticRoute::ok("application/json", "cached")));

        engine.network_first(&get(FEED)).await;
        engine.settle().await;

        fetcher.inner().set_route(FEED, StaticRoute::status(503)).await;
        let response = engine.network_first(&get(FEED)).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.text(), "cached");
        assert_eq!(response.source, ResponseSource::Cache);
    }

    #[tokio::test]
    async fn test_network_first_does_not_store_errors() {
        let (engine, _, storage) = engine(StaticFetcher::new().with_route(FEED, StaticRoute::status(500)));

        let response = engine.network_first(&get(FEED)).await;
        engine.settle().await;

        assert_eq!(response.status, 408);
        let dynamic = storage.open("tiktok-player-dynamic-v2").await.unwrap();
        assert!(dynamic.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cache_first_server_error_falls_back() {
        let (engine, _, storage) = engine(StaticFetcher::new().with_route(LOGO, StaticRoute::status(500)));

        let response = engine.cache_first(&get(LOGO)).await;
        engine.settle().await;

        assert_eq!(response.status, 404);
        assert_eq!(response.text(), "Resource not available offline");
        assert_eq!(response.source, ResponseSource::Fallback);
        let assets = storage.open("tiktok-player-static-v2").await.unwrap();
        assert!(assets.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cache_first_navigation_error_gets_offline_page() {
        const ABOUT: &str = "http://localhost:8080/about";
        let (engine, _, storage) = engine(StaticFetcher::new().with_route(ABOUT, StaticRoute::status(503)));

        let root = RequestKey::get(&Url::parse("http://localhost:8080/").unwrap());
        let shell = CacheEntry::capture(
            &root,
            StatusCode::OK,
            &HeaderMap::new(),
            Bytes::from_static(b"<h1>shell</h1>"),
        );
        let assets = storage.open("tiktok-player-static-v2").await.unwrap();
        assets.put(root, shell).await.unwrap();

        let response = engine
            .cache_first(&Request::navigate(Url::parse(ABOUT).unwrap()))
            .await;
        assert_eq!(response.status, 200);
        assert_eq!(response.text(), "<h1>shell</h1>");
        assert_eq!(response.source, ResponseSource::Fallback);
    }

    #[tokio::test]
    async fn test_cache_first_hit_skips_network() {
        let (engine, fetcher, _) =
            engine(StaticFetcher::new().with_route(LOGO, StaticRoute::ok("image/png", "png")));

        let first = engine.cache_first(&get(LOGO)).await;
        assert_eq!(first.source, ResponseSource::Network);
        engine.settle().await;

        let second = engine.cache_first(&get(LOGO)).await;
        assert_eq!(second.source, ResponseSource::Cache);
        assert_eq!(second.body, first.body);
        assert_eq!(fetcher.inner().calls(), 1);
    }

    #[tokio::test]
    async fn test_network_timeout_falls_back() {
        let fetcher = Arc::new(SwitchableFetcher::new(StaticFetcher::new().with_route(
            FEED,
            StaticRoute::ok("application/json", "late").with_delay(std::time::Duration::from_secs(5)),
        )));
        let config = WorkerConfig {
            network_timeout_ms: Some(20),
            ..Default::default()
        };
        let engine =
            StrategyEngine::new(Arc::new(config), CacheStorage::in_memory(), fetcher).unwrap();

        let response = engine.network_first(&get(FEED)).await;
        assert_eq!(response.status, 408);
        assert_eq!(response.source, ResponseSource::Fallback);
    }

    #[tokio::test]
    async fn test_settle_with_nothing_pending() {
        let (engine, _, _) = engine(StaticFetcher::new());
        engine.settle().await;
        assert_eq!(engine.pending_writes(), 0);
    }

    /// Memory backend whose writes block until the gate opens.
    struct GatedBackend {
        inner: MemoryBackend,
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl CacheBackend for GatedBackend {
        async fn open(&self, name: &str) -> Result<(), ServiceWorkerError> {
            self.inner.open(name).await
        }

        async fn has(&self, name: &str) -> Result<bool, ServiceWorkerError> {
            self.inner.has(name).await
        }

        async fn get(
            &self,
            name: &str,
            key: &RequestKey,
        ) -> Result<Option<CacheEntry>, ServiceWorkerError> {
            self.inner.get(name, key).await
        }

        async fn put(
            &self,
            name: &str,
            key: RequestKey,
            entry: CacheEntry,
        ) -> Result<(), ServiceWorkerError> {
            self.gate.notified().await;
            self.inner.put(name, key, entry).await
        }

        async fn entries(&self, name: &str) -> Result<Vec<RequestKey>, ServiceWorkerError> {
            self.inner.entries(name).await
        }

        async fn keys(&self) -> Result<Vec<String>, ServiceWorkerError> {
            self.inner.keys().await
        }

        async fn delete(&self, name: &str) -> Result<bool, ServiceWorkerError> {
            self.inner.delete(name).await
        }
    }

    #[tokio::test]
    async fn test_response_does_not_wait_for_cache_write() {
        let gate = Arc::new(Notify::new());
        let storage = CacheStorage::new(Arc::new(GatedBackend {
            inner: MemoryBackend::default(),
            gate: gate.clone(),
        }));
        let fetcher = Arc::new(SwitchableFetcher::new(
            StaticFetcher::new().with_route(FEED, StaticRoute::ok("application/json", "[1]")),
        ));
        let engine =
            StrategyEngine::new(Arc::new(WorkerConfig::default()), storage.clone(), fetcher).unwrap();

        let response = tokio::time::timeout(Duration::from_secs(1), engine.network_first(&get(FEED)))
            .await
            .expect("response blocked on the cache write");
        assert_eq!(response.source, ResponseSource::Network);
        assert_eq!(response.text(), "[1]");
        assert_eq!(engine.pending_writes(), 1);

        gate.notify_one();
        engine.settle().await;
        assert_eq!(engine.pending_writes(), 0);

        let dynamic = storage.open("tiktok-player-dynamic-v2").await.unwrap();
        assert!(dynamic.match_request(&get(FEED)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_settles_both_return() {
        let (engine, _, storage) =
            engine(StaticFetcher::new().with_route(LOGO, StaticRoute::ok("image/png", "png")));

        engine.cache_first(&get(LOGO)).await;
        tokio::time::timeout(Duration::from_secs(1), async {
            tokio::join!(engine.settle(), engine.settle());
        })
        .await
        .expect("concurrent settle hung");
        assert_eq!(engine.pending_writes(), 0);

        // The tracker is open again: later writes are still awaited
        engine.network_first(&get(LOGO)).await;
        engine.settle().await;
        let dynamic = storage.open("tiktok-player-dynamic-v2").await.unwrap();
        assert_eq!(dynamic.keys().await.unwrap().len(), 1);
    }
}
