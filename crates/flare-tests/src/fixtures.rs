//! Test fixtures for creating sample triggers.

use flare_core::ids::*;
use flare_core::trigger::*;
use std::collections::HashMap;

/// Factory for creating test triggers.
pub struct TriggerFixture;

impl TriggerFixture {
    /// A trigger of `app_id` deploying a fresh workflow.
    pub fn with_condition(app_id: AppId, name: &str, condition: TriggerCondition) -> Trigger {
        Trigger {
            id: TriggerId::new(),
            account_id: AccountId::new(),
            app_id,
            name: name.to_string(),
            description: Some("Created by integration tests".to_string()),
            condition,
            action: ActionTarget::Workflow {
                workflow_id: WorkflowId::new(),
            },
            artifact_selections: vec![],
            manifest_selections: vec![],
            workflow_variables: HashMap::new(),
            disabled: false,
            continue_with_default_values: false,
            exclude_hosts_with_same_artifact: false,
            require_all_artifacts: false,
            service_infra_workflows: vec![],
        }
    }

    pub fn scheduled(app_id: AppId, expression: &str) -> Trigger {
        Self::with_condition(
            app_id,
            "nightly",
            TriggerCondition::Scheduled(ScheduledCondition {
                cron_expression: expression.to_string(),
                on_new_artifact_only: false,
            }),
        )
    }

    pub fn on_artifact(app_id: AppId, stream: ArtifactStreamId, filter: &str) -> Trigger {
        let mut trigger = Self::with_condition(
            app_id,
            "on-artifact",
            TriggerCondition::NewArtifact(ArtifactCondition {
                artifact_stream_id: stream,
                artifact_filter: Some(filter.to_string()),
                regex: true,
            }),
        );
        trigger.artifact_selections.push(ArtifactSelection {
            service_id: ServiceId::new(),
            service_name: Some("Catalog".to_string()),
            kind: ArtifactSelectionKind::ArtifactSource,
        });
        trigger
    }

    pub fn webhook(app_id: AppId, token: &str) -> Trigger {
        Self::with_condition(
            app_id,
            "hook",
            TriggerCondition::Webhook(WebhookCondition {
                token: Some(WebhookToken {
                    token: token.to_string(),
                    http_method: "POST".to_string(),
                    payload: format!(r#"{{"application":"{app_id}","parameters":{{}}}}"#),
                }),
                ..Default::default()
            }),
        )
    }
}
