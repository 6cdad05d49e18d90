//! Save-time trigger validation.
//!
//! Everything classified as a configuration error is caught here so that
//! it never surfaces while an event is being processed.

use crate::cron::CronValidator;
use crate::filter::FilterMatcher;
use crate::target::load_target;
use flare_core::deployment::DeploymentTarget;
use flare_core::interpolation;
use flare_core::ports::{ArtifactStreamStore, ManifestRegistryClient, PipelineStore, WorkflowStore};
use flare_core::trigger::{
    ActionTarget, ArtifactSelectionKind, ConditionKind, ManifestSelectionKind, Trigger,
    TriggerCondition, WebhookCondition, WebhookEventType,
};
use flare_core::{Error, Result};
use std::sync::Arc;
use tracing::debug;

pub struct TriggerValidator {
    filter: FilterMatcher,
    cron: CronValidator,
    artifact_streams: Arc<dyn ArtifactStreamStore>,
    manifests: Arc<dyn ManifestRegistryClient>,
    pipelines: Arc<dyn PipelineStore>,
    workflows: Arc<dyn WorkflowStore>,
}

impl TriggerValidator {
    pub fn new(
        cron: CronValidator,
        artifact_streams: Arc<dyn ArtifactStreamStore>,
        manifests: Arc<dyn ManifestRegistryClient>,
        pipelines: Arc<dyn PipelineStore>,
        workflows: Arc<dyn WorkflowStore>,
    ) -> Self {
        Self {
            filter: FilterMatcher::new(),
            cron,
            artifact_streams,
            manifests,
            pipelines,
            workflows,
        }
    }

    /// Validate a trigger about to be saved. `existing` is the stored
    /// version when this is an update.
    pub async fn validate(&self, trigger: &Trigger, existing: Option<&Trigger>) -> Result<()> {
        if trigger.name.trim().is_empty() {
            return Err(Error::InvalidTrigger("Trigger name is required".to_string()));
        }
        self.validate_condition(trigger, existing).await?;

        let target = load_target(
            self.pipelines.as_ref(),
            self.workflows.as_ref(),
            trigger.app_id,
            trigger.action,
        )
        .await?;
        self.validate_selections(trigger, &target).await?;
        validate_variables(trigger, &target)?;

        debug!(trigger_id = %trigger.id, kind = %trigger.condition_kind(), "Trigger validated");
        Ok(())
    }

    async fn validate_condition(&self, trigger: &Trigger, existing: Option<&Trigger>) -> Result<()> {
        match &trigger.condition {
            TriggerCondition::NewArtifact(condition) => {
                if let Some(filter) = condition.artifact_filter.as_deref().filter(|f| !f.is_empty()) {
                    self.filter.validate(filter, condition.regex)?;
                }
                let stream = self
                    .artifact_streams
                    .get(condition.artifact_stream_id)
                    .await?
                    .ok_or_else(|| Error::ArtifactStreamNotFound(condition.artifact_stream_id.to_string()))?;
                if stream.parameterized {
                    return Err(Error::ParameterizedSource(
                        "Parameterized artifact source cannot be used as a value for artifact condition"
                            .to_string(),
                    ));
                }
            }
            TriggerCondition::NewManifest(condition) => {
                if let Some(regex) = condition.version_regex.as_deref().filter(|r| !r.is_empty()) {
                    self.filter.validate_version_regex(regex)?;
                }
                if !self.manifests.is_polling_enabled(condition.app_manifest_id).await? {
                    let service = condition
                        .service_name
                        .clone()
                        .unwrap_or_else(|| condition.app_manifest_id.to_string());
                    return Err(Error::ManifestPollingDisabled(service));
                }
            }
            TriggerCondition::Scheduled(condition) if trigger.disabled => {
                self.cron.validate_syntax(&condition.cron_expression)?;
            }
            TriggerCondition::Scheduled(condition) => {
                self.cron.validate(&condition.cron_expression)?;
            }
            TriggerCondition::Webhook(condition) => {
                validate_file_change_gate(condition, existing.and_then(Trigger::webhook_condition))?;
            }
            TriggerCondition::NewInstance(_) => {
                if trigger.service_infra_workflows.is_empty() {
                    return Err(Error::InvalidTrigger(
                        "At least one service infrastructure workflow mapping is required".to_string(),
                    ));
                }
            }
            TriggerCondition::PipelineCompletion(_) => {}
        }
        Ok(())
    }

    async fn validate_selections(&self, trigger: &Trigger, target: &DeploymentTarget) -> Result<()> {
        let kind = trigger.condition_kind();
        let services = target.service_ids();

        for selection in &trigger.artifact_selections {
            let name = selection.service_name.as_deref().unwrap_or_default();
            if !services.contains(&selection.service_id) {
                return Err(Error::InvalidTrigger(format!(
                    "Service [{name}] of artifact selection is not part of {} [{}]",
                    target.action().kind_name(),
                    target.name()
                )));
            }
            check_compatibility(
                selection.kind.type_name(),
                artifact_selection_allowed(&selection.kind, kind),
                kind,
            )?;
            match &selection.kind {
                ArtifactSelectionKind::LastCollected {
                    artifact_stream_id,
                    artifact_filter,
                    regex,
                } => {
                    if let Some(filter) = artifact_filter.as_deref().filter(|f| !f.is_empty()) {
                        self.filter.validate(filter, *regex)?;
                    }
                    let stream = self
                        .artifact_streams
                        .get(*artifact_stream_id)
                        .await?
                        .ok_or_else(|| Error::ArtifactStreamNotFound(artifact_stream_id.to_string()))?;
                    if stream.parameterized {
                        return Err(parameterized(selection.kind.type_name()));
                    }
                }
                ArtifactSelectionKind::LastDeployed { source } => {
                    self.check_source_exists(trigger, *source).await?;
                }
                ArtifactSelectionKind::PipelineSource | ArtifactSelectionKind::ArtifactSource => {
                    let streams = self
                        .artifact_streams
                        .list_for_service(trigger.app_id, selection.service_id)
                        .await?;
                    if streams.iter().any(|s| s.parameterized) {
                        return Err(parameterized(selection.kind.type_name()));
                    }
                }
                ArtifactSelectionKind::WebhookVariable { .. } => {}
            }
        }

        for selection in &trigger.manifest_selections {
            if !services.contains(&selection.service_id) {
                return Err(Error::InvalidTrigger(format!(
                    "Service [{}] of manifest selection is not part of {} [{}]",
                    selection.service_name.as_deref().unwrap_or_default(),
                    target.action().kind_name(),
                    target.name()
                )));
            }
            check_compatibility(
                selection.kind.type_name(),
                manifest_selection_allowed(&selection.kind, kind),
                kind,
            )?;
            match &selection.kind {
                ManifestSelectionKind::LastCollected { version_regex, .. } => {
                    if let Some(regex) = version_regex.as_deref().filter(|r| !r.is_empty()) {
                        self.filter.validate_version_regex(regex)?;
                    }
                }
                ManifestSelectionKind::LastDeployed { source } => {
                    self.check_source_exists(trigger, *source).await?;
                }
                ManifestSelectionKind::PipelineSource
                | ManifestSelectionKind::ArtifactSource
                | ManifestSelectionKind::WebhookVariable { .. }
                | ManifestSelectionKind::FromAppManifest => {}
            }
        }
        Ok(())
    }

    async fn check_source_exists(&self, trigger: &Trigger, source: ActionTarget) -> Result<()> {
        load_target(
            self.pipelines.as_ref(),
            self.workflows.as_ref(),
            trigger.app_id,
            source,
        )
        .await
        .map(|_| ())
        .map_err(|_| {
            Error::InvalidTrigger(format!(
                "{} [{}] of last deployed selection does not exist",
                source.kind_name(),
                source
            ))
        })
    }
}

fn artifact_selection_allowed(selection: &ArtifactSelectionKind, condition: ConditionKind) -> bool {
    match selection {
        ArtifactSelectionKind::LastCollected { .. } | ArtifactSelectionKind::LastDeployed { .. } => {
            true
        }
        ArtifactSelectionKind::PipelineSource => condition == ConditionKind::PipelineCompletion,
        ArtifactSelectionKind::ArtifactSource => matches!(
            condition,
            ConditionKind::NewArtifact | ConditionKind::NewManifest
        ),
        ArtifactSelectionKind::WebhookVariable { .. } => condition == ConditionKind::Webhook,
    }
}

fn manifest_selection_allowed(selection: &ManifestSelectionKind, condition: ConditionKind) -> bool {
    match selection {
        ManifestSelectionKind::LastCollected { .. }
        | ManifestSelectionKind::LastDeployed { .. }
        | ManifestSelectionKind::FromAppManifest => true,
        ManifestSelectionKind::PipelineSource => condition == ConditionKind::PipelineCompletion,
        ManifestSelectionKind::ArtifactSource => matches!(
            condition,
            ConditionKind::NewArtifact | ConditionKind::NewManifest
        ),
        ManifestSelectionKind::WebhookVariable { .. } => condition == ConditionKind::Webhook,
    }
}

fn check_compatibility(selection: &str, allowed: bool, condition: ConditionKind) -> Result<()> {
    if allowed {
        Ok(())
    } else {
        Err(Error::IncompatibleSelection(format!(
            "{selection} selection is not supported for {condition} triggers"
        )))
    }
}

fn parameterized(selection: &str) -> Error {
    Error::ParameterizedSource(format!(
        "Cannot select parameterized artifact source for {selection} selection"
    ))
}

fn validate_file_change_gate(
    condition: &WebhookCondition,
    previous: Option<&WebhookCondition>,
) -> Result<()> {
    if let Some(before) = previous.and_then(|p| p.file_change.as_ref()) {
        if condition.file_change.as_ref() != Some(before) {
            return Err(Error::InvalidTrigger(
                "File content change settings cannot be changed once saved".to_string(),
            ));
        }
    }
    let Some(gate) = &condition.file_change else {
        return Ok(());
    };
    if gate.file_paths.iter().all(|p| p.trim().is_empty()) {
        return Err(Error::InvalidTrigger("File paths are required".to_string()));
    }
    if gate.git_connector_id.trim().is_empty() {
        return Err(Error::InvalidTrigger("Git connector is required".to_string()));
    }
    if gate.branch.trim().is_empty() {
        return Err(Error::InvalidTrigger("Branch name is required".to_string()));
    }
    if !condition.event_types.contains(&WebhookEventType::Push) {
        return Err(Error::InvalidTrigger(
            "File content change check requires the PUSH event".to_string(),
        ));
    }
    Ok(())
}

fn validate_variables(trigger: &Trigger, target: &DeploymentTarget) -> Result<()> {
    if trigger.condition_kind() != ConditionKind::Webhook {
        for variable in target.variables().iter().filter(|v| v.entity_type.is_some()) {
            if let Some(value) = trigger.workflow_variables.get(&variable.name) {
                if interpolation::contains_expression(value) {
                    return Err(Error::ExpressionNotAllowed {
                        variable: variable.name.clone(),
                        value: value.clone(),
                    });
                }
            }
        }
    }

    if trigger.continue_with_default_values {
        let missing: Vec<&str> = target
            .variables()
            .iter()
            .filter(|v| v.mandatory && v.default_value.is_none())
            .filter(|v| {
                trigger
                    .workflow_variables
                    .get(&v.name)
                    .is_none_or(|value| value.trim().is_empty())
            })
            .map(|v| v.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(Error::InvalidTrigger(format!(
                "Mandatory variables {missing:?} have no default value to continue with"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flare_core::deployment::{EntityType, Variable, Workflow, WorkflowKind};
    use flare_core::ids::*;
    use flare_core::trigger::{FileChangeGate, PipelineCondition};
    use std::collections::HashMap;

    fn workflow(variables: Vec<Variable>) -> DeploymentTarget {
        DeploymentTarget::Workflow(Workflow {
            id: WorkflowId::new(),
            app_id: AppId::new(),
            name: "rolling".into(),
            env_id: None,
            kind: WorkflowKind::Standard,
            services: vec![],
            variables,
        })
    }

    fn env_variable() -> Variable {
        Variable {
            name: "Environment".into(),
            entity_type: Some(EntityType::Environment),
            mandatory: true,
            runtime_input: false,
            allow_multiple_values: false,
            default_value: None,
        }
    }

    fn trigger(condition: TriggerCondition) -> Trigger {
        Trigger {
            id: TriggerId::new(),
            account_id: AccountId::new(),
            app_id: AppId::new(),
            name: "t".into(),
            description: None,
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

    #[test]
    fn test_artifact_selection_compatibility() {
        use ConditionKind::*;
        let last_collected = ArtifactSelectionKind::LastCollected {
            artifact_stream_id: ArtifactStreamId::new(),
            artifact_filter: None,
            regex: false,
        };
        let webhook_variable = ArtifactSelectionKind::WebhookVariable {
            artifact_stream_id: None,
            artifact_source_name: None,
        };

        assert!(artifact_selection_allowed(&ArtifactSelectionKind::PipelineSource, PipelineCompletion));
        assert!(!artifact_selection_allowed(&ArtifactSelectionKind::PipelineSource, Webhook));
        assert!(artifact_selection_allowed(&ArtifactSelectionKind::ArtifactSource, NewManifest));
        assert!(!artifact_selection_allowed(&ArtifactSelectionKind::ArtifactSource, Scheduled));
        assert!(artifact_selection_allowed(&webhook_variable, Webhook));
        assert!(!artifact_selection_allowed(&webhook_variable, NewArtifact));
        for condition in [NewArtifact, NewManifest, PipelineCompletion, Scheduled, Webhook] {
            assert!(artifact_selection_allowed(&last_collected, condition));
        }
    }

    #[test]
    fn test_manifest_selection_compatibility() {
        use ConditionKind::*;
        let webhook_variable = ManifestSelectionKind::WebhookVariable { app_manifest_id: None };

        assert!(!manifest_selection_allowed(&ManifestSelectionKind::PipelineSource, Scheduled));
        assert!(manifest_selection_allowed(&ManifestSelectionKind::ArtifactSource, NewArtifact));
        assert!(!manifest_selection_allowed(&ManifestSelectionKind::ArtifactSource, Webhook));
        assert!(!manifest_selection_allowed(&webhook_variable, Scheduled));
        assert!(manifest_selection_allowed(&ManifestSelectionKind::FromAppManifest, Scheduled));

        let err = check_compatibility(
            webhook_variable.type_name(),
            manifest_selection_allowed(&webhook_variable, NewManifest),
            NewManifest,
        )
        .unwrap_err();
        assert!(matches!(err, Error::IncompatibleSelection(_)));
    }

    #[test]
    fn test_expressions_only_for_webhook_triggers() {
        let target = workflow(vec![env_variable()]);
        let mut pipeline_trigger = trigger(TriggerCondition::PipelineCompletion(PipelineCondition {
            pipeline_id: PipelineId::new(),
        }));
        pipeline_trigger
            .workflow_variables
            .insert("Environment".into(), "${env}".into());
        let err = validate_variables(&pipeline_trigger, &target).unwrap_err();
        assert!(matches!(err, Error::ExpressionNotAllowed { .. }));

        let mut webhook_trigger = trigger(TriggerCondition::Webhook(WebhookCondition::default()));
        webhook_trigger.workflow_variables = pipeline_trigger.workflow_variables.clone();
        assert!(validate_variables(&webhook_trigger, &target).is_ok());
    }

    #[test]
    fn test_defaults_required_to_continue() {
        let target = workflow(vec![env_variable()]);
        let mut t = trigger(TriggerCondition::Webhook(WebhookCondition::default()));
        t.continue_with_default_values = true;
        assert!(validate_variables(&t, &target).is_err());
        t.workflow_variables.insert("Environment".into(), "prod".into());
        assert!(validate_variables(&t, &target).is_ok());
    }

    #[test]
    fn test_file_change_gate() {
        let gate = FileChangeGate {
            repo_name: None,
            branch: "main".into(),
            git_connector_id: "git-1".into(),
            file_paths: vec!["deploy/values.yaml".into()],
        };
        let mut condition = WebhookCondition {
            file_change: Some(gate.clone()),
            ..Default::default()
        };
        assert!(validate_file_change_gate(&condition, None).is_err());

        condition.event_types.push(WebhookEventType::Push);
        assert!(validate_file_change_gate(&condition, None).is_ok());

        let mut changed = condition.clone();
        if let Some(gate) = changed.file_change.as_mut() {
            gate.branch = "release".into();
        }
        assert!(validate_file_change_gate(&changed, Some(&condition)).is_err());
        assert!(validate_file_change_gate(&condition, Some(&condition)).is_ok());

        let mut no_paths = condition.clone();
        no_paths.file_change = Some(FileChangeGate {
            file_paths: vec![],
            ..gate
        });
        assert!(validate_file_change_gate(&no_paths, None).is_err());
    }
}
