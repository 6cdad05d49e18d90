//! Channel senders.

use crate::channels::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),
}

/// A rendered freeze rejection notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreezeNotice {
    pub account_id: String,
    pub app_id: String,
    pub window_ids: Vec<String>,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub trigger_url: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, notice: &FreezeNotice) -> Result<(), NotifyError>;
}

pub struct SlackSender {
    config: SlackConfig,
    client: reqwest::Client,
}

impl SlackSender {
    pub fn new(config: SlackConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn build_message(&self, notice: &FreezeNotice) -> serde_json::Value {
        let mut fields = vec![serde_json::json!({
            "title": "Freeze windows",
            "value": notice.window_ids.join(", "),
            "short": false
        })];
        if let Some(url) = &notice.trigger_url {
            fields.push(serde_json::json!({"title": "Trigger", "value": url, "short": false}));
        }

        let mut message = serde_json::json!({
            "username": self.config.username,
            "icon_emoji": self.config.icon_emoji,
            "attachments": [{
                "color": "#0366d6",
                "title": notice.title,
                "text": notice.message,
                "fields": fields,
                "ts": notice.timestamp.timestamp()
            }]
        });
        if let Some(channel) = &self.config.channel {
            message["channel"] = serde_json::json!(channel);
        }
        message
    }
}

#[async_trait]
impl ChannelSender for SlackSender {
    async fn send(&self, notice: &FreezeNotice) -> Result<(), NotifyError> {
        debug!(webhook = %self.config.webhook_url, "Sending Slack notification");

        let response = self
            .client
            .post(&self.config.webhook_url)
            .json(&self.build_message(notice))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::DeliveryFailed(format!(
                "Slack returned {status}: {body}"
            )));
        }

        info!("Slack notification sent");
        Ok(())
    }
}

/// Posts the notice as JSON.
pub struct WebhookSender {
    config: WebhookConfig,
    client: reqwest::Client,
}

impl WebhookSender {
    pub fn new(config: WebhookConfig) -> Self {
        let timeout = config.timeout_seconds;
        Self {
            config,
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(timeout as u64))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl ChannelSender for WebhookSender {
    async fn send(&self, notice: &FreezeNotice) -> Result<(), NotifyError> {
        debug!(url = %self.config.url, "Sending webhook notification");

        let mut request = match self.config.method {
            HttpMethod::Post => self.client.post(&self.config.url),
            HttpMethod::Put => self.client.put(&self.config.url),
        };
        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }
        if let Some(auth) = &self.config.auth {
            request = match auth.auth_type {
                AuthType::Bearer => request.bearer_auth(&auth.token),
                AuthType::Basic => request.basic_auth(&auth.token, None::<&str>),
            };
        }

        let response = request.json(notice).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::DeliveryFailed(format!(
                "Webhook returned {status}: {body}"
            )));
        }

        info!("Webhook notification sent");
        Ok(())
    }
}

pub fn create_sender(config: &ChannelConfig) -> Box<dyn ChannelSender> {
    match config {
        ChannelConfig::Slack(c) => Box::new(SlackSender::new(c.clone())),
        ChannelConfig::Webhook(c) => Box::new(WebhookSender::new(c.clone())),
    }
}
