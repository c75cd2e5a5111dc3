//! Worker configuration.
//!
//! Every constant the worker shares between install-time precaching and
//! activate-time pruning lives here, in one immutable value.

use std::path::Path;
use std::time::Duration;

use cachekit_common::RetryConfig;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::ServiceWorkerError;

/// Worker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Base URL the worker controls; relative URLs resolve against it.
    pub scope: String,

    /// Generation holding the application shell and static assets.
    pub asset_cache_name: String,

    /// Generation holding network-first (API) responses.
    pub dynamic_cache_name: String,

    /// Root document served to navigations that cannot be satisfied.
    pub offline_url: String,

    /// URLs precached at install, in order.
    pub asset_set: Vec<String>,

    /// Host/path substrings marking dynamic endpoints.
    pub api_url_patterns: Vec<String>,

    /// Optional bound on each network call, in milliseconds.
    pub network_timeout_ms: Option<u64>,

    /// Attempts per asset during install.
    pub precache_attempts: u32,

    /// Background sync tag that triggers a data resync.
    pub sync_tag: String,

    /// Push notification defaults.
    pub notification: NotificationConfig,
}

/// Defaults used when a push payload omits fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub default_title: String,
    pub default_body: String,
    pub icon: String,
    pub badge: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scope: "http://localhost:8080/".to_string(),
            asset_cache_name: "tiktok-player-static-v2".to_string(),
            dynamic_cache_name: "tiktok-player-dynamic-v2".to_string(),
            offline_url: "/".to_string(),
            asset_set: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/manifest.json".to_string(),
                "/icons/icon-192x192.png".to_string(),
                "/icons/icon-512x512.png".to_string(),
            ],
            api_url_patterns: vec![
                "/api/".to_string(),
                "tiktok.com".to_string(),
                "tikwm.com".to_string(),
            ],
            network_timeout_ms: None,
            precache_attempts: 1,
            sync_tag: "sync-tiktok-data".to_string(),
            notification: NotificationConfig::default(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            default_title: "TikTok Player".to_string(),
            default_body: "New content available!".to_string(),
            icon: "/icons/icon-192x192.png".to_string(),
            badge: "/icons/icon-72x72.png".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Parse a JSON configuration. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ServiceWorkerError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ServiceWorkerError> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    /// Check the invariants the lifecycle relies on.
    pub fn validate(&self) -> Result<(), ServiceWorkerError> {
        if self.asset_cache_name.trim().is_empty() || self.dynamic_cache_name.trim().is_empty() {
            return Err(ServiceWorkerError::Config(
                "cache generation names must not be empty".to_string(),
            ));
        }
        if self.asset_cache_name == self.dynamic_cache_name {
            return Err(ServiceWorkerError::Config(format!(
                "asset and dynamic generations share the name {}",
                self.asset_cache_name
            )));
        }
        self.scope_url()?;
        self.offline_page_url()?;
        self.asset_urls()?;
        Ok(())
    }

    /// The parsed scope URL.
    pub fn scope_url(&self) -> Result<Url, ServiceWorkerError> {
        Url::parse(&self.scope)
            .map_err(|e| ServiceWorkerError::Config(format!("invalid scope {}: {e}", self.scope)))
    }

    /// Resolve a possibly relative URL against the scope.
    pub fn resolve(&self, url: &str) -> Result<Url, ServiceWorkerError> {
        self.scope_url()?
            .join(url)
            .map_err(|e| ServiceWorkerError::Config(format!("invalid url {url}: {e}")))
    }

    /// Absolute URL of the offline fallback document.
    pub fn offline_page_url(&self) -> Result<Url, ServiceWorkerError> {
        self.resolve(&self.offline_url)
    }

    /// Absolute URLs of the asset set, in order.
    pub fn asset_urls(&self) -> Result<Vec<Url>, ServiceWorkerError> {
        self.asset_set.iter().map(|u| self.resolve(u)).collect()
    }

    /// Generation names retained at activate.
    pub fn current_generations(&self) -> [&str; 2] {
        [
            self.dynamic_cache_name.as_str(),
            self.asset_cache_name.as_str(),
        ]
    }

    /// Whether a generation name is one of the current ones.
    pub fn is_current_generation(&self, name: &str) -> bool {
        self.current_generations().contains(&name)
    }

    pub fn network_timeout(&self) -> Option<Duration> {
        self.network_timeout_ms.map(Duration::from_millis)
    }

    /// Retry policy for precaching one asset.
    pub fn precache_retry(&self) -> RetryConfig {
        RetryConfig::attempts(self.precache_attempts)
    }
}
