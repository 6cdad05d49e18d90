//! Notification channel configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Where freeze notices go.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelConfig {
    Slack(SlackConfig),
    Webhook(WebhookConfig),
}

/// Slack incoming webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlackConfig {
    pub webhook_url: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_icon")]
    pub icon_emoji: String,
}

fn default_username() -> String {
    "Flare".to_string()
}

fn default_icon() -> String {
    ":snowflake:".to_string()
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            channel: None,
            username: default_username(),
            icon_emoji: default_icon(),
        }
    }
}

/// Generic JSON webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub auth: Option<WebhookAuth>,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u32,
}

fn default_timeout() -> u32 {
    30
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: HttpMethod::default(),
            headers: HashMap::new(),
            auth: None,
            timeout_seconds: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Post,
    Put,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookAuth {
    pub auth_type: AuthType,
    pub token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    Bearer,
    Basic,
}

/// Notifier configuration: channels plus the message template.
///
/// Templates reference `${TRIGGER_NAME}`, `${APP_NAME}`, `${WORKFLOW_NAME}`
/// and `${TRIGGER_URL}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    #[serde(default = "default_title")]
    pub title_template: String,
    #[serde(default = "default_message")]
    pub message_template: String,
}

fn default_title() -> String {
    "Deployment rejected by freeze window".to_string()
}

fn default_message() -> String {
    "Trigger ${TRIGGER_NAME} could not deploy ${WORKFLOW_NAME} in application ${APP_NAME} \
     because a deployment freeze window is active. ${TRIGGER_URL}"
        .to_string()
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            title_template: default_title(),
            message_template: default_message(),
        }
    }
}

impl NotifyConfig {
    pub fn with_channel(mut self, channel: ChannelConfig) -> Self {
        self.channels.push(channel);
        self
    }
}
