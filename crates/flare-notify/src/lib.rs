//! Freeze rejection notifications for Flare.
//!
//! [`FreezeNotifier`] renders the configured templates with the placeholders
//! the engine supplies and fans the notice out to every channel.

pub mod channels;
pub mod sender;

pub use channels::{
    AuthType, ChannelConfig, HttpMethod, NotifyConfig, SlackConfig, WebhookAuth, WebhookConfig,
};
pub use sender::{
    ChannelSender, FreezeNotice, NotifyError, SlackSender, WebhookSender, create_sender,
};

use async_trait::async_trait;
use chrono::Utc;
use flare_core::ids::{AccountId, AppId};
use flare_core::interpolation::substitute;
use flare_core::ports::NotificationSender;
use flare_core::{Error, Result};
use std::collections::HashMap;
use tracing::warn;

const TRIGGER_URL: &str = "TRIGGER_URL";

pub struct FreezeNotifier {
    title_template: String,
    message_template: String,
    senders: Vec<Box<dyn ChannelSender>>,
}

impl FreezeNotifier {
    pub fn new(config: &NotifyConfig) -> Self {
        Self {
            title_template: config.title_template.clone(),
            message_template: config.message_template.clone(),
            senders: config.channels.iter().map(create_sender).collect(),
        }
    }

    pub fn with_sender(mut self, sender: Box<dyn ChannelSender>) -> Self {
        self.senders.push(sender);
        self
    }

    pub fn render(
        &self,
        account_id: AccountId,
        app_id: AppId,
        window_ids: &[String],
        placeholders: &HashMap<String, String>,
    ) -> FreezeNotice {
        FreezeNotice {
            account_id: account_id.to_string(),
            app_id: app_id.to_string(),
            window_ids: window_ids.to_vec(),
            title: substitute(&self.title_template, placeholders),
            message: substitute(&self.message_template, placeholders),
            trigger_url: placeholders.get(TRIGGER_URL).cloned(),
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
impl NotificationSender for FreezeNotifier {
    /// Deliver to every channel. One failing channel does not stop the rest.
    async fn notify_freeze_rejection(
        &self,
        account_id: AccountId,
        app_id: AppId,
        window_ids: &[String],
        placeholders: &HashMap<String, String>,
    ) -> Result<()> {
        let notice = self.render(account_id, app_id, window_ids, placeholders);
        let mut failures = Vec::new();
        for sender in &self.senders {
            if let Err(e) = sender.send(&notice).await {
                warn!(error = %e, "Freeze notification channel failed");
                failures.push(e.to_string());
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Notification(failures.join("; ")))
        }
    }
}
