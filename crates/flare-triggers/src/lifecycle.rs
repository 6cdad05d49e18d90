//! Trigger save and delete.

use crate::validation::TriggerValidator;
use crate::webhook::WebhookPayloadBuilder;
use flare_core::ids::{AppId, TriggerId};
use flare_core::ports::{CronScheduler, TriggerStore};
use flare_core::trigger::{Trigger, TriggerCondition};
use flare_core::{Error, Result};
use std::sync::Arc;
use tracing::{info, warn};

pub struct TriggerLifecycle {
    store: Arc<dyn TriggerStore>,
    validator: TriggerValidator,
    webhooks: WebhookPayloadBuilder,
    scheduler: Arc<dyn CronScheduler>,
}

impl TriggerLifecycle {
    pub fn new(
        store: Arc<dyn TriggerStore>,
        validator: TriggerValidator,
        webhooks: WebhookPayloadBuilder,
        scheduler: Arc<dyn CronScheduler>,
    ) -> Self {
        Self {
            store,
            validator,
            webhooks,
            scheduler,
        }
    }

    /// Validate and persist a trigger.
    ///
    /// Webhook triggers get their payload regenerated on every save; the
    /// token string only changes when `rotate_token` is set.
    pub async fn save(&self, mut trigger: Trigger, rotate_token: bool) -> Result<Trigger> {
        let existing = self.store.get(trigger.app_id, trigger.id).await?;
        self.validator.validate(&trigger, existing.as_ref()).await?;

        if matches!(trigger.condition, TriggerCondition::Webhook(_)) {
            let previous = existing
                .as_ref()
                .and_then(Trigger::webhook_condition)
                .and_then(|c| c.token.clone());
            let token = self
                .webhooks
                .build(&trigger, previous.as_ref(), rotate_token)
                .await?;
            if let TriggerCondition::Webhook(condition) = &mut trigger.condition {
                condition.token = Some(token);
            }
        }

        let previous_schedule = existing.as_ref().and_then(Trigger::cron_expression);
        self.sync_schedule(&trigger, trigger.cron_expression(), previous_schedule)
            .await?;
        if let Err(e) = self.store.save(&trigger).await {
            if let Err(restore) = self
                .sync_schedule(&trigger, previous_schedule, trigger.cron_expression())
                .await
            {
                warn!(trigger_id = %trigger.id, error = %restore, "Failed to restore trigger schedule");
            }
            return Err(e);
        }

        info!(
            trigger_id = %trigger.id,
            kind = %trigger.condition_kind(),
            created = existing.is_none(),
            "Trigger saved"
        );
        Ok(trigger)
    }

    /// Move the scheduler from `previous` to `next` for this trigger.
    async fn sync_schedule(
        &self,
        trigger: &Trigger,
        next: Option<&str>,
        previous: Option<&str>,
    ) -> Result<()> {
        match next {
            Some(expression) => {
                self.scheduler
                    .register(trigger.id, trigger.app_id, expression)
                    .await
            }
            None if previous.is_some() => self.scheduler.unregister(trigger.id).await,
            None => Ok(()),
        }
    }

    pub async fn delete(&self, app_id: AppId, trigger_id: TriggerId) -> Result<()> {
        let trigger = self
            .store
            .get(app_id, trigger_id)
            .await?
            .ok_or_else(|| Error::TriggerNotFound(trigger_id.to_string()))?;
        self.store.delete(app_id, trigger_id).await?;
        if trigger.cron_expression().is_some() {
            self.scheduler.unregister(trigger_id).await?;
        }
        info!(trigger_id = %trigger_id, "Trigger deleted");
        Ok(())
    }
}
