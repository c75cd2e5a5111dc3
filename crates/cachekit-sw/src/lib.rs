//! # CacheKit Service Worker
//!
//! Offline request interception for an installable web app.
//!
//! ## Features
//!
//! - **Lifecycle**: install precaches the app shell, activate prunes stale
//!   cache generations and claims open pages
//! - **Fetch Interception**: network-first for API traffic, cache-first for
//!   static assets, offline page and synthesized errors as last resort
//! - **Cache API**: named generations over a pluggable backend
//! - **Clients / Notifications / Sync**: push display, click focus, and a
//!   resync hook
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorker::handle(WorkerEvent)
//!     │
//!     ├── Install / Activate ──► LifecycleController
//!     │                              └── CacheStorage (asset generation)
//!     │
//!     ├── Fetch ──► StrategyEngine
//!     │                 ├── CacheClassifier  (api-like / asset-like)
//!     │                 ├── network-first    (dynamic generation)
//!     │                 ├── cache-first      (asset generation)
//!     │                 └── FallbackProvider (offline page, 408 / 404)
//!     │
//!     └── Push / NotificationClick / Sync ──► Notifications, Clients, SyncHook
//! ```

mod classify;
mod clients;
mod config;
mod fallback;
mod lifecycle;
mod notify;
mod store;
mod strategy;

pub use classify::{CacheClassifier, RequestClass};
pub use clients::{Client, ClientMatchOptions, ClientType, Clients};
pub use config::{NotificationConfig, WorkerConfig};
pub use fallback::{FallbackKind, FallbackProvider};
pub use lifecycle::{ActivateReport, InstallReport, LifecycleController, ServiceWorkerState};
pub use notify::{NoopSync, Notification, Notifications, PushPayload, SyncHook};
pub use store::{
    Cache, CacheBackend, CacheEntry, CacheHandle, CacheStorage, FetchResponse, MemoryBackend,
    RequestKey, ResponseSource,
};
pub use strategy::StrategyEngine;

use std::sync::Arc;

use cachekit_common::CacheKitError;
use cachekit_net::{Fetcher, NetError, Request};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<NetError> for ServiceWorkerError {
    fn from(e: NetError) -> Self {
        ServiceWorkerError::NetworkError(e.to_string())
    }
}

impl From<CacheKitError> for ServiceWorkerError {
    fn from(e: CacheKitError) -> Self {
        match e {
            CacheKitError::Timeout(_) => ServiceWorkerError::NetworkError(e.to_string()),
        }
    }
}

// ==================== Events ====================

/// A fetch from a controlled page.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub request: Request,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self { request }
    }
}

/// A push message, with its raw payload if any.
#[derive(Debug, Clone, Default)]
pub struct PushEvent {
    pub data: Option<Vec<u8>>,
}

impl PushEvent {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Some(data.into()),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// A click on a shown notification.
#[derive(Debug, Clone)]
pub struct NotificationClickEvent {
    pub notification_id: String,
}

/// A background sync firing for a tag.
#[derive(Debug, Clone)]
pub struct SyncEvent {
    pub tag: String,
}

/// Everything the host can dispatch to the worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(FetchEvent),
    Push(PushEvent),
    NotificationClick(NotificationClickEvent),
    Sync(SyncEvent),
}

/// What the worker did with an event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventResponse {
    Installed(InstallReport),
    Activated(ActivateReport),
    /// Answer for an intercepted fetch.
    Respond(FetchResponse),
    /// Not intercepted; the host performs the request itself.
    Passthrough,
    ShowNotification(Notification),
    FocusedClient(Client),
    OpenedClient(Client),
    SyncCompleted(String),
    Ignored,
}

// ==================== Worker ====================

/// The worker: one entry point for every event kind.
pub struct ServiceWorker {
    config: Arc<WorkerConfig>,
    storage: CacheStorage,
    lifecycle: LifecycleController,
    strategies: StrategyEngine,
    clients: Arc<RwLock<Clients>>,
    notifications: RwLock<Notifications>,
    sync_hook: Arc<dyn SyncHook>,
}

impl ServiceWorker {
    /// Build a worker. The configuration is validated first.
    pub fn new(
        config: WorkerConfig,
        storage: CacheStorage,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, ServiceWorkerError> {
        config.validate()?;
        let config = Arc::new(config);
        let clients = Arc::new(RwLock::new(Clients::new()));

        let lifecycle = LifecycleController::new(
            Arc::clone(&config),
            storage.clone(),
            Arc::clone(&fetcher),
            Arc::clone(&clients),
        );
        let strategies = StrategyEngine::new(Arc::clone(&config), storage.clone(), fetcher)?;

        Ok(Self {
            config,
            storage,
            lifecycle,
            strategies,
            clients,
            notifications: RwLock::new(Notifications::new()),
            sync_hook: Arc::new(NoopSync),
        })
    }

    pub fn with_sync_hook(mut self, hook: Arc<dyn SyncHook>) -> Self {
        self.sync_hook = hook;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    pub fn strategies(&self) -> &StrategyEngine {
        &self.strategies
    }

    pub fn clients(&self) -> &Arc<RwLock<Clients>> {
        &self.clients
    }

    pub async fn state(&self) -> ServiceWorkerState {
        self.lifecycle.state().await
    }

    pub async fn notification(&self, id: &str) -> Option<Notification> {
        self.notifications.read().await.get(id).cloned()
    }

    /// Wait for background cache writes to finish.
    pub async fn settle(&self) {
        self.strategies.settle().await;
    }

    /// Dispatch one event.
    pub async fn handle(&self, event: WorkerEvent) -> Result<EventResponse, ServiceWorkerError> {
        match event {
            WorkerEvent::Install => Ok(EventResponse::Installed(self.lifecycle.install().await?)),
            WorkerEvent::Activate => Ok(EventResponse::Activated(self.lifecycle.activate().await?)),
            WorkerEvent::Fetch(fetch) => Ok(self.on_fetch(fetch).await),
            WorkerEvent::Push(push) => self.on_push(push).await,
            WorkerEvent::NotificationClick(click) => self.on_notification_click(click).await,
            WorkerEvent::Sync(sync) => self.on_sync(sync).await,
        }
    }

    async fn on_fetch(&self, event: FetchEvent) -> EventResponse {
        let request = &event.request;

        if !self.lifecycle.state().await.can_intercept_fetch() {
            debug!(url = %request.url, "Worker not active, passing through");
            return EventResponse::Passthrough;
        }
        if request.method != http::Method::GET
            || !matches!(request.url.scheme(), "http" | "https")
        {
            debug!(method = %request.method, url = %request.url, "Not intercepted");
            return EventResponse::Passthrough;
        }

        EventResponse::Respond(self.strategies.respond(request).await)
    }

    async fn on_push(&self, event: PushEvent) -> Result<EventResponse, ServiceWorkerError> {
        let payload = PushPayload::parse(event.data.as_deref());
        let url = self.config.resolve(&self.config.offline_url)?;

        let mut notifications = self.notifications.write().await;
        let id = notifications.next_id();
        let notification =
            Notification::from_push(id, payload, &self.config.notification, url.as_str());
        notifications.show(notification.clone());
        Ok(EventResponse::ShowNotification(notification))
    }

    async fn on_notification_click(
        &self,
        event: NotificationClickEvent,
    ) -> Result<EventResponse, ServiceWorkerError> {
        let closed = self
            .notifications
            .write()
            .await
            .close(&event.notification_id);
        let target = match closed {
            Some(notification) => self.config.resolve(&notification.url)?,
            None => {
                warn!(id = %event.notification_id, "Clicked notification is not shown");
                self.config.resolve(&self.config.offline_url)?
            }
        };

        let mut clients = self.clients.write().await;
        let existing = clients.find_window(&target).map(|c| c.id.clone());
        match existing {
            Some(id) => {
                let client = clients.focus(&id)?;
                info!(client = %client.id, url = %target, "Focused existing window");
                Ok(EventResponse::FocusedClient(client))
            }
            None => {
                let client = clients.open_window(target);
                info!(client = %client.id, url = %client.url, "Opened window");
                Ok(EventResponse::OpenedClient(client))
            }
        }
    }

    async fn on_sync(&self, event: SyncEvent) -> Result<EventResponse, ServiceWorkerError> {
        if event.tag != self.config.sync_tag {
            debug!(tag = %event.tag, "Ignoring sync tag");
            return Ok(EventResponse::Ignored);
        }

        info!(tag = %event.tag, "Background sync");
        self.sync_hook.resync(&event.tag).await?;
        Ok(EventResponse::SyncCompleted(event.tag))
    }
}

impl std::fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("scope", &self.config.scope)
            .finish_non_exhaustive()
    }
}
