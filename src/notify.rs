//! Inventory service notifications.
//!
//! After every actionable classification the result is posted to
//! `<base>/api/items/create/<category>` with body `{"name": ...}`. The
//! inventory service names two categories differently from the classifier:
//! `cold storage` is filed as `toxic` and `other chemicals` as `others`.
//!
//! Failures are returned to the caller, which logs them as warnings. Nothing
//! here touches the serial link.

use crate::config::NotificationConfig;
use crate::error::NotifyError;
use async_trait::async_trait;
use reqwest::Url;
use serde::Serialize;
use std::time::Duration;

/// A successful post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyReceipt {
    /// Endpoint posted to
    pub url: String,
    /// HTTP status returned
    pub status: u16,
}

/// Somewhere classification results are reported.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Report `category` (a normalized classifier label) with the text
    /// extracted from the label, if any.
    async fn notify(&self, category: &str, text: Option<&str>)
        -> Result<NotifyReceipt, NotifyError>;
}

/// Inventory category for a classifier label.
pub fn inventory_category(label: &str) -> String {
    let lower = label.to_lowercase();
    match lower.as_str() {
        "cold storage" => "toxic".to_string(),
        "other chemicals" => "others".to_string(),
        _ => lower,
    }
}

/// `<base>/api/items/create/<category>`, keeping any path prefix on `base`.
pub fn item_endpoint(base: &Url, category: &str) -> Result<Url, NotifyError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| NotifyError::InvalidUrl(base.to_string()))?
        .pop_if_empty()
        .extend(["api", "items", "create", category]);
    Ok(url)
}

#[derive(Debug, Serialize)]
struct ItemPayload<'a> {
    name: &'a str,
}

/// Posts results to the inventory HTTP API.
#[derive(Debug, Clone)]
pub struct InventoryNotifier {
    http_client: reqwest::Client,
    base_url: Option<Url>,
}

impl InventoryNotifier {
    /// Create a notifier; with no base URL every notify is `NotConfigured`.
    pub fn new(config: &NotificationConfig) -> Result<Self, NotifyError> {
        let base_url = config
            .base_url
            .as_deref()
            .map(|raw| Url::parse(raw).map_err(|e| NotifyError::InvalidUrl(format!("{raw}: {e}"))))
            .transpose()?;
        let http_client = Self::client(config.timeout)?;
        Ok(Self {
            http_client,
            base_url,
        })
    }

    fn client(timeout: Duration) -> Result<reqwest::Client, NotifyError> {
        reqwest::Client::builder()
            .user_agent(concat!("sortgate/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Network(e.to_string()))
    }

    /// Configured base URL.
    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }
}

#[async_trait]
impl NotificationSink for InventoryNotifier {
    async fn notify(
        &self,
        category: &str,
        text: Option<&str>,
    ) -> Result<NotifyReceipt, NotifyError> {
        let Some(base) = self.base_url.as_ref() else {
            tracing::debug!("Inventory base URL not configured; skipping notification");
            return Err(NotifyError::NotConfigured);
        };

        let category = inventory_category(category);
        let url = item_endpoint(base, &category)?;
        let name = text.filter(|t| !t.trim().is_empty()).unwrap_or(category.as_str());

        tracing::debug!(url = %url, name, "Posting classification to inventory");

        let response = self
            .http_client
            .post(url.clone())
            .json(&ItemPayload { name })
            .send()
            .await
            .map_err(|e| NotifyError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        tracing::info!(url = %url, status = status.as_u16(), "Sent classification to inventory");
        Ok(NotifyReceipt {
            url: url.to_string(),
            status: status.as_u16(),
        })
    }
}
