//! Push notifications and background sync.

use async_trait::async_trait;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::NotificationConfig;
use crate::ServiceWorkerError;

/// Fields a push message may carry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PushPayload {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

impl PushPayload {
    /// Read a push message body. A JSON object supplies `title` and `body`;
    /// any other non-empty text becomes the body as-is.
    pub fn parse(data: Option<&[u8]>) -> Self {
        let Some(data) = data else {
            return Self::default();
        };

        if let Ok(payload) = serde_json::from_slice::<PushPayload>(data) {
            return payload;
        }

        let text = String::from_utf8_lossy(data).trim().to_string();
        debug!(len = text.len(), "Push payload is not a JSON object, using it as body");
        Self {
            title: None,
            body: (!text.is_empty()).then_some(text),
        }
    }
}

/// A shown system notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    /// Page opened or focused when the notification is clicked.
    pub url: String,
}

impl Notification {
    /// Fill missing payload fields from the configured defaults.
    pub fn from_push(
        id: impl Into<String>,
        payload: PushPayload,
        defaults: &NotificationConfig,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: payload
                .title
                .unwrap_or_else(|| defaults.default_title.clone()),
            body: payload.body.unwrap_or_else(|| defaults.default_body.clone()),
            icon: defaults.icon.clone(),
            badge: defaults.badge.clone(),
            url: url.into(),
        }
    }
}

/// Notifications currently on screen.
#[derive(Debug, Default)]
pub struct Notifications {
    shown: HashMap<String, Notification>,
    next_id: u64,
}

impl Notifications {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next notification id.
    pub fn next_id(&mut self) -> String {
        self.next_id += 1;
        format!("notification-{}", self.next_id)
    }

    pub fn show(&mut self, notification: Notification) {
        info!(id = %notification.id, title = %notification.title, "Showing notification");
        self.shown.insert(notification.id.clone(), notification);
    }

    pub fn close(&mut self, id: &str) -> Option<Notification> {
        self.shown.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&Notification> {
        self.shown.get(id)
    }

    pub fn len(&self) -> usize {
        self.shown.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shown.is_empty()
    }
}

/// Resynchronizes application data when a background sync fires.
#[async_trait]
pub trait SyncHook: Send + Sync {
    async fn resync(&self, tag: &str) -> Result<(), ServiceWorkerError>;
}

/// Sync hook that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSync;

#[async_trait]
impl SyncHook for NoopSync {
    async fn resync(&self, tag: &str) -> Result<(), ServiceWorkerError> {
        debug!(tag, "No resync hook installed");
        Ok(())
    }
}
