//! In-memory and switchable fetchers.
//!
//! [`StaticFetcher`] answers from a fixed route table and records every call,
//! which makes it the fetcher of choice for tests. [`SwitchableFetcher`] wraps
//! any fetcher with an online flag to simulate losing connectivity.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::{Fetcher, NetError, Request, Response};

/// A canned response for one URL.
#[derive(Debug, Clone)]
pub struct StaticRoute {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    /// Simulated latency before answering.
    pub delay: Option<Duration>,
    /// Fail at the transport level instead of answering.
    pub unreachable: bool,
}

impl StaticRoute {
    /// A 200 response with the given content type and body.
    pub fn ok(content_type: &str, body: impl Into<Bytes>) -> Self {
        Self {
            status: 200,
            headers: vec![("content-type".to_string(), content_type.to_string())],
            body: body.into(),
            delay: None,
            unreachable: false,
        }
    }

    /// An empty response with the given status.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
            delay: None,
            unreachable: false,
        }
    }

    /// A route whose fetch fails with a transport error.
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::status(0)
        }
    }

    /// Add a header.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Delay the answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn to_response(&self, request: &Request) -> Result<Response, NetError> {
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::try_from(name.as_str())
                .map_err(|e| NetError::RequestFailed(e.to_string()))?;
            let value = HeaderValue::try_from(value.as_str())
                .map_err(|e| NetError::RequestFailed(e.to_string()))?;
            headers.append(name, value);
        }

        Ok(Response::new(
            request.url.clone(),
            status,
            headers,
            self.body.clone(),
        ))
    }
}

/// Fetcher answering from a fixed route table keyed by absolute URL.
///
/// Unknown URLs answer 404 with an empty body.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    routes: RwLock<HashMap<String, StaticRoute>>,
    calls: RwLock<Vec<String>>,
    total_calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route while building the fetcher.
    pub fn with_route(mut self, url: &str, route: StaticRoute) -> Self {
        self.routes.get_mut().insert(url.to_string(), route);
        self
    }

    /// Add or replace a route on a shared fetcher.
    pub async fn set_route(&self, url: &str, route: StaticRoute) {
        self.routes.write().await.insert(url.to_string(), route);
    }

    /// Total number of fetches performed.
    pub fn calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    /// Number of fetches performed for one URL.
    pub async fn calls_for(&self, url: &str) -> usize {
        self.calls.read().await.iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        let url = request.url.as_str().to_string();
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        self.calls.write().await.push(url.clone());

        let route = self.routes.read().await.get(&url).cloned();
        let Some(route) = route else {
            trace!(url = %url, "No static route, answering 404");
            return Ok(Response::new(
                request.url.clone(),
                StatusCode::NOT_FOUND,
                HeaderMap::new(),
                Bytes::new(),
            ));
        };

        if let Some(delay) = route.delay {
            tokio::time::sleep(delay).await;
        }

        if route.unreachable {
            return Err(NetError::RequestFailed(format!("connection refused: {url}")));
        }

        route.to_response(request)
    }
}

/// Wraps a fetcher with an online/offline switch.
#[derive(Debug)]
pub struct SwitchableFetcher<F> {
    inner: F,
    online: AtomicBool,
}

impl<F: Fetcher> SwitchableFetcher<F> {
    /// Wrap a fetcher; starts online.
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            online: AtomicBool::new(true),
        }
    }

    pub fn set_online(&self, online: bool) {
        debug!(online, "Network switched");
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// The wrapped fetcher.
    pub fn inner(&self) -> &F {
        &self.inner
    }
}

#[async_trait]
impl<F: Fetcher> Fetcher for SwitchableFetcher<F> {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        if !self.is_online() {
            return Err(NetError::Offline(request.url.to_string()));
        }
        self.inner.fetch(request).await
    }
}
