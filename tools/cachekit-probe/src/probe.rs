//! Probe runs: install, activate, fetch, optionally replay offline.

use std::path::Path;
use std::sync::Arc;

use cachekit_net::{Fetcher, Request, SwitchableFetcher};
use cachekit_sw::{
    CacheStorage, EventResponse, FetchEvent, ResponseSource, ServiceWorker, ServiceWorkerError,
    WorkerConfig, WorkerEvent,
};
use serde::Serialize;
use tracing::{info, warn};

/// One printed result line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeLine {
    pub url: String,
    pub network: &'static str,
    pub status: u16,
    /// `None` when the worker passed the request through.
    pub source: Option<ResponseSource>,
    pub bytes: usize,
}

/// Options for a probe run.
#[derive(Debug, Clone, Default)]
pub struct ProbeOptions {
    pub urls: Vec<String>,
    pub navigate: bool,
    pub offline_replay: bool,
}

/// Configuration from `path`, or the built-in defaults.
pub fn load_config(path: Option<&Path>) -> Result<WorkerConfig, ServiceWorkerError> {
    match path {
        Some(path) => WorkerConfig::from_path(path),
        None => Ok(WorkerConfig::default()),
    }
}

/// Install and activate a worker over `fetcher`, then fetch every URL.
pub async fn run<F>(
    config: WorkerConfig,
    fetcher: F,
    options: &ProbeOptions,
) -> Result<Vec<ProbeLine>, ServiceWorkerError>
where
    F: Fetcher + 'static,
{
    let network = Arc::new(SwitchableFetcher::new(fetcher));
    let worker = ServiceWorker::new(config, CacheStorage::in_memory(), network.clone())?;

    if let EventResponse::Installed(report) = worker.handle(WorkerEvent::Install).await? {
        info!(cached = report.cached.len(), failed = report.failed.len(), "Install finished");
    }
    worker.handle(WorkerEvent::Activate).await?;

    let mut lines = fetch_all(&worker, options, "online").await?;
    worker.settle().await;

    if options.offline_replay {
        network.set_online(false);
        lines.extend(fetch_all(&worker, options, "offline").await?);
    }

    Ok(lines)
}

async fn fetch_all(
    worker: &ServiceWorker,
    options: &ProbeOptions,
    network: &'static str,
) -> Result<Vec<ProbeLine>, ServiceWorkerError> {
    let mut lines = Vec::with_capacity(options.urls.len());

    for raw in &options.urls {
        let url = worker.config().resolve(raw)?;
        let request = if options.navigate {
            Request::navigate(url.clone())
        } else {
            Request::get(url.clone())
        };

        let line = match worker
            .handle(WorkerEvent::Fetch(FetchEvent::new(request)))
            .await?
        {
            EventResponse::Respond(response) => ProbeLine {
                url: url.to_string(),
                network,
                status: response.status,
                source: Some(response.source),
                bytes: response.body.len(),
            },
            other => {
                warn!(url = %url, response = ?other, "Request was not intercepted");
                ProbeLine {
                    url: url.to_string(),
                    network,
                    status: 0,
                    source: None,
                    bytes: 0,
                }
            }
        };
        lines.push(line);
    }

    Ok(lines)
}
