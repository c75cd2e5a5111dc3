//! Install and activate.
//!
//! Install precaches the asset set into the asset generation and asks for
//! immediate activation. Activate deletes every generation that is not
//! current, then claims the open pages.

use std::sync::Arc;

use cachekit_common::retry_with_backoff;
use cachekit_net::{Fetcher, Request};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::clients::Clients;
use crate::config::WorkerConfig;
use crate::store::{CacheEntry, CacheHandle, CacheStorage, RequestKey};
use crate::ServiceWorkerError;

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Initial state, nothing run yet.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed and waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Install could not open its store.
    Redundant,
}

impl ServiceWorkerState {
    /// Only an active worker intercepts fetches.
    pub fn can_intercept_fetch(&self) -> bool {
        matches!(self, ServiceWorkerState::Activated)
    }
}

/// Outcome of the install phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    /// Asset URLs now in the asset generation.
    pub cached: Vec<Url>,
    /// Asset URLs that could not be fetched, with the reason.
    pub failed: Vec<(Url, String)>,
    /// Whether activation was requested without waiting for old clients.
    pub skip_waiting: bool,
}

impl InstallReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outcome of the activate phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateReport {
    /// Stale generations removed.
    pub deleted: Vec<String>,
    /// Pages newly brought under control.
    pub claimed: usize,
}

/// Drives the worker through install and activate.
pub struct LifecycleController {
    config: Arc<WorkerConfig>,
    storage: CacheStorage,
    fetcher: Arc<dyn Fetcher>,
    clients: Arc<RwLock<Clients>>,
    state: RwLock<ServiceWorkerState>,
}

impl LifecycleController {
    pub fn new(
        config: Arc<WorkerConfig>,
        storage: CacheStorage,
        fetcher: Arc<dyn Fetcher>,
        clients: Arc<RwLock<Clients>>,
    ) -> Self {
        Self {
            config,
            storage,
            fetcher,
            clients,
            state: RwLock::new(ServiceWorkerState::Parsed),
        }
    }

    pub async fn state(&self) -> ServiceWorkerState {
        *self.state.read().await
    }

    async fn set_state(&self, state: ServiceWorkerState) {
        let mut current = self.state.write().await;
        debug!(from = ?*current, to = ?state, "Worker state change");
        *current = state;
    }

    /// Precache the asset set. Individual asset failures are reported, not
    /// raised; only failing to open the asset generation is an error.
    ///
    /// An active worker re-precaches in place and keeps intercepting fetches.
    pub async fn install(&self) -> Result<InstallReport, ServiceWorkerError> {
        let refreshing = self.state().await == ServiceWorkerState::Activated;
        if refreshing {
            info!(cache = %self.config.asset_cache_name, "Refreshing precache while active");
        } else {
            self.set_state(ServiceWorkerState::Installing).await;
            info!(cache = %self.config.asset_cache_name, "Installing");
        }

        let cache = match self.storage.open(&self.config.asset_cache_name).await {
            Ok(cache) => cache,
            Err(e) => {
                if !refreshing {
                    self.set_state(ServiceWorkerState::Redundant).await;
                }
                return Err(e);
            }
        };
        let urls = self.config.asset_urls()?;
        let retry = self.config.precache_retry();

        let results = join_all(urls.into_iter().map(|url| {
            let cache = cache.clone();
            let retry = retry.clone();
            async move {
                let result =
                    retry_with_backoff(&retry, || self.precache_one(&cache, url.clone())).await;
                (url, result)
            }
        }))
        .await;

        let mut report = InstallReport {
            cached: Vec::new(),
            failed: Vec::new(),
            skip_waiting: true,
        };
        for (url, result) in results {
            match result {
                Ok(()) => report.cached.push(url),
                Err(e) => report.failed.push((url, e.to_string())),
            }
        }

        if !report.is_complete() {
            warn!(
                cached = report.cached.len(),
                failed = report.failed.len(),
                "Install finished with missing assets"
            );
            for (url, reason) in &report.failed {
                warn!(url = %url, reason = %reason, "Asset not precached");
            }
        }

        if !refreshing {
            self.set_state(ServiceWorkerState::Installed).await;
        }
        info!(cached = report.cached.len(), "Installed, skipping wait");
        Ok(report)
    }

    async fn precache_one(&self, cache: &CacheHandle, url: Url) -> Result<(), ServiceWorkerError> {
        let request = Request::get(url);
        let response = self.fetcher.fetch(&request).await?;
        if !response.ok() {
            return Err(ServiceWorkerError::NetworkError(format!(
                "{} answered {}",
                request.url, response.status
            )));
        }

        let key = RequestKey::from_request(&request);
        let status = response.status;
        let headers = response.headers.clone();
        let entry = CacheEntry::capture(&key, status, &headers, response.bytes());
        cache.put(key, entry).await
    }

    /// Prune stale generations, then claim every open page. An already
    /// active worker may activate again after a refresh.
    pub async fn activate(&self) -> Result<ActivateReport, ServiceWorkerError> {
        let state = self.state().await;
        if !matches!(
            state,
            ServiceWorkerState::Installed | ServiceWorkerState::Activated
        ) {
            return Err(ServiceWorkerError::StateError(format!(
                "cannot activate from {state:?}"
            )));
        }

        if state == ServiceWorkerState::Installed {
            self.set_state(ServiceWorkerState::Activating).await;
        }

        let mut deleted = Vec::new();
        for name in self.storage.keys().await? {
            if self.config.is_current_generation(&name) {
                continue;
            }
            if self.storage.delete(&name).await? {
                info!(cache = %name, "Deleted stale cache generation");
                deleted.push(name);
            }
        }

        let claimed = self.clients.write().await.claim();

        self.set_state(ServiceWorkerState::Activated).await;
        info!(deleted = deleted.len(), claimed, "Activated");
        Ok(ActivateReport { deleted, claimed })
    }
}
