//! Responses of last resort.

use cachekit_net::Request;
use tracing::{debug, warn};

use crate::store::{CacheStorage, FetchResponse, RequestKey, ResponseSource};

/// Which strategy ran out of options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackKind {
    /// Network-first: network and dynamic cache both failed.
    NetworkError,
    /// Cache-first: asset not cached and network failed.
    NotAvailableOffline,
}

impl FallbackKind {
    pub fn status(self) -> u16 {
        match self {
            FallbackKind::NetworkError => 408,
            FallbackKind::NotAvailableOffline => 404,
        }
    }

    pub fn body(self) -> &'static str {
        match self {
            FallbackKind::NetworkError => "Network error happened",
            FallbackKind::NotAvailableOffline => "Resource not available offline",
        }
    }
}

/// Produces the offline page and synthesized error responses.
#[derive(Debug, Clone)]
pub struct FallbackProvider {
    storage: CacheStorage,
    offline_key: RequestKey,
}

impl FallbackProvider {
    pub fn new(storage: CacheStorage, offline_key: RequestKey) -> Self {
        Self {
            storage,
            offline_key,
        }
    }

    /// The precached root document, from whichever generation holds it.
    pub async fn offline_page(&self) -> Option<FetchResponse> {
        match self.storage.match_any(&self.offline_key).await {
            Ok(Some(entry)) => Some(FetchResponse::from_entry(entry, ResponseSource::Fallback)),
            Ok(None) => {
                warn!(key = %self.offline_key, "Offline page is not cached");
                None
            }
            Err(e) => {
                warn!(key = %self.offline_key, error = %e, "Offline page lookup failed");
                None
            }
        }
    }

    /// A plain-text error response for `kind`.
    pub fn synthetic_error(&self, kind: FallbackKind) -> FetchResponse {
        FetchResponse::synthetic(kind.status(), kind.body())
    }

    /// Final answer once network and cache are exhausted. Navigations get the
    /// offline page when it is cached.
    pub async fn exhausted(&self, request: &Request, kind: FallbackKind) -> FetchResponse {
        if request.is_navigation() {
            if let Some(page) = self.offline_page().await {
                debug!(url = %request.url, "Serving offline page");
                return page;
            }
        }

        debug!(url = %request.url, status = kind.status(), "Serving synthetic error");
        self.synthetic_error(kind)
    }
}
