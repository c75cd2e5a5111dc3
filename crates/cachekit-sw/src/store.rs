//! Cache storage: named generations of request → response snapshots.
//!
//! ```text
//! CacheStorage (caches)
//!     └── CacheHandle (one generation)
//!             └── RequestKey → CacheEntry
//! ```
//!
//! The storage itself is a [`CacheBackend`]; [`MemoryBackend`] is the
//! in-process implementation. A lookup miss is `Ok(None)`, never an error.

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use cachekit_net::Request;
use hashbrown::HashMap;
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use url::Url;

use crate::ServiceWorkerError;

// ==================== Keys and entries ====================

/// Canonical request identity: method plus URL, query significant,
/// fragment ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    /// Key for a GET of the given URL.
    pub fn get(url: &Url) -> Self {
        Self::new("GET", url)
    }

    pub fn new(method: &str, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.to_ascii_uppercase(),
            url: url.into(),
        }
    }

    pub fn from_request(request: &Request) -> Self {
        Self::new(request.method.as_str(), &request.url)
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A stored response snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers, lowercase names; repeated headers joined with ", ".
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Capture a snapshot of a response to `key`.
    pub fn capture(key: &RequestKey, status: StatusCode, headers: &HeaderMap, body: Bytes) -> Self {
        let mut flat: HashMap<String, String> = HashMap::new();
        for (name, value) in headers {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            flat.entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }

        Self {
            url: key.url.clone(),
            method: key.method.clone(),
            status: status.as_u16(),
            headers: flat,
            body: body.to_vec(),
            cached_at: now_millis(),
        }
    }

    /// Whether the snapshot may be stored.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ==================== Responses ====================

/// Where a response handed to the page came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Network,
    Cache,
    Fallback,
}

/// Response returned to the page for an intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// Status code.
    pub status: u16,

    /// Status text.
    pub status_text: String,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Where the response came from.
    pub source: ResponseSource,
}

impl FetchResponse {
    /// Build a response from a snapshot. The snapshot is consumed; clone it
    /// first if it is also being stored.
    pub fn from_entry(entry: CacheEntry, source: ResponseSource) -> Self {
        Self {
            status: entry.status,
            status_text: status_text(entry.status),
            headers: entry.headers,
            body: entry.body,
            source,
        }
    }

    /// A synthesized plain-text response.
    pub fn synthetic(status: u16, body: &str) -> Self {
        let mut headers = HashMap::new();
        headers.insert(
            http::header::CONTENT_TYPE.as_str().to_string(),
            "text/plain; charset=utf-8".to_string(),
        );

        Self {
            status,
            status_text: status_text(status),
            headers,
            body: body.as_bytes().to_vec(),
            source: ResponseSource::Fallback,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Body as text, lossy.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn status_text(status: u16) -> String {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
        .to_string()
}

// ==================== Backend ====================

/// Host key-value cache storage.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Create the generation if it does not exist.
    async fn open(&self, name: &str) -> Result<(), ServiceWorkerError>;

    async fn has(&self, name: &str) -> Result<bool, ServiceWorkerError>;

    /// Look up a key. A missing generation is a miss.
    async fn get(&self, name: &str, key: &RequestKey)
        -> Result<Option<CacheEntry>, ServiceWorkerError>;

    /// Store an entry, creating the generation if needed. Last write wins.
    async fn put(&self, name: &str, key: RequestKey, entry: CacheEntry)
        -> Result<(), ServiceWorkerError>;

    /// Keys stored in one generation.
    async fn entries(&self, name: &str) -> Result<Vec<RequestKey>, ServiceWorkerError>;

    /// All generation names.
    async fn keys(&self) -> Result<Vec<String>, ServiceWorkerError>;

    /// Delete a generation. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool, ServiceWorkerError>;
}

/// A cache generation held in memory.
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Cached entries.
    entries: HashMap<RequestKey, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request.
    pub fn match_request(&self, key: &RequestKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Add entry.
    pub fn put(&mut self, key: RequestKey, entry: CacheEntry) {
        self.entries.insert(key, entry);
    }

    /// Get all keys.
    pub fn keys(&self) -> Vec<&RequestKey> {
        self.entries.keys().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// In-process [`CacheBackend`].
#[derive(Debug, Default)]
pub struct MemoryBackend {
    caches: RwLock<HashMap<String, Cache>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn open(&self, name: &str) -> Result<(), ServiceWorkerError> {
        self.caches
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name));
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool, ServiceWorkerError> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn get(
        &self,
        name: &str,
        key: &RequestKey,
    ) -> Result<Option<CacheEntry>, ServiceWorkerError> {
        let caches = self.caches.read().await;
        Ok(caches
            .get(name)
            .and_then(|cache| cache.match_request(key))
            .cloned())
    }

    async fn put(
        &self,
        name: &str,
        key: RequestKey,
        entry: CacheEntry,
    ) -> Result<(), ServiceWorkerError> {
        self.caches
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
            .put(key, entry);
        Ok(())
    }

    async fn entries(&self, name: &str) -> Result<Vec<RequestKey>, ServiceWorkerError> {
        let caches = self.caches.read().await;
        let mut keys: Vec<RequestKey> = caches
            .get(name)
            .map(|cache| cache.keys().into_iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }

    async fn keys(&self) -> Result<Vec<String>, ServiceWorkerError> {
        Ok(self.caches.read().await.keys().cloned().collect())
    }

    async fn delete(&self, name: &str) -> Result<bool, ServiceWorkerError> {
        Ok(self.caches.write().await.remove(name).is_some())
    }
}

// ==================== Handles ====================

/// Cache storage (the `caches` global).
#[derive(Clone)]
pub struct CacheStorage {
    backend: Arc<dyn CacheBackend>,
}

impl CacheStorage {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Storage over a fresh [`MemoryBackend`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Open a generation, creating it if needed.
    pub async fn open(&self, name: &str) -> Result<CacheHandle, ServiceWorkerError> {
        self.backend.open(name).await?;
        Ok(CacheHandle {
            name: name.to_string(),
            backend: Arc::clone(&self.backend),
        })
    }

    pub async fn has(&self, name: &str) -> Result<bool, ServiceWorkerError> {
        self.backend.has(name).await
    }

    /// All generation names, sorted.
    pub async fn keys(&self) -> Result<Vec<String>, ServiceWorkerError> {
        let mut names = self.backend.keys().await?;
        names.sort();
        Ok(names)
    }

    /// Delete a generation.
    pub async fn delete(&self, name: &str) -> Result<bool, ServiceWorkerError> {
        self.backend.delete(name).await
    }

    /// Match across all generations, in name order.
    pub async fn match_any(
        &self,
        key: &RequestKey,
    ) -> Result<Option<CacheEntry>, ServiceWorkerError> {
        for name in self.keys().await? {
            if let Some(entry) = self.backend.get(&name, key).await? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }
}

impl fmt::Debug for CacheStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStorage").finish_non_exhaustive()
    }
}

/// Handle to one open generation.
#[derive(Clone)]
pub struct CacheHandle {
    name: String,
    backend: Arc<dyn CacheBackend>,
}

impl CacheHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Match a request by canonical identity.
    pub async fn match_request(
        &self,
        request: &Request,
    ) -> Result<Option<CacheEntry>, ServiceWorkerError> {
        self.get(&RequestKey::from_request(request)).await
    }

    pub async fn get(&self, key: &RequestKey) -> Result<Option<CacheEntry>, ServiceWorkerError> {
        self.backend.get(&self.name, key).await
    }

    /// Store a snapshot for a request. Callers only store 2xx snapshots.
    pub async fn put_request(
        &self,
        request: &Request,
        entry: CacheEntry,
    ) -> Result<(), ServiceWorkerError> {
        self.put(RequestKey::from_request(request), entry).await
    }

    pub async fn put(&self, key: RequestKey, entry: CacheEntry) -> Result<(), ServiceWorkerError> {
        self.backend.put(&self.name, key, entry).await
    }

    /// Keys stored in this generation, sorted.
    pub async fn keys(&self) -> Result<Vec<RequestKey>, ServiceWorkerError> {
        self.backend.entries(&self.name).await
    }
}

impl fmt::Debug for CacheHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheHandle")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
