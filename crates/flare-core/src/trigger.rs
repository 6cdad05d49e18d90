//! Trigger definitions.
//!
//! A trigger binds exactly one [`TriggerCondition`] to a deployment
//! [`ActionTarget`]. Artifact and manifest selections describe, per service,
//! which version accompanies a firing.

use crate::ids::*;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Trigger {
    pub id: TriggerId,
    pub account_id: AccountId,
    pub app_id: AppId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub condition: TriggerCondition,
    pub action: ActionTarget,
    #[serde(default)]
    pub artifact_selections: Vec<ArtifactSelection>,
    #[serde(default)]
    pub manifest_selections: Vec<ManifestSelection>,
    /// Template variable name to literal value or `${...}` expression.
    #[serde(default)]
    pub workflow_variables: HashMap<String, String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub continue_with_default_values: bool,
    #[serde(default)]
    pub exclude_hosts_with_same_artifact: bool,
    /// Every service of the target must resolve an artifact before dispatch.
    #[serde(default)]
    pub require_all_artifacts: bool,
    /// Pairings consulted by new-instance conditions.
    #[serde(default)]
    pub service_infra_workflows: Vec<ServiceInfraWorkflow>,
}

impl Trigger {
    pub fn condition_kind(&self) -> ConditionKind {
        self.condition.kind()
    }

    pub fn webhook_condition(&self) -> Option<&WebhookCondition> {
        match &self.condition {
            TriggerCondition::Webhook(condition) => Some(condition),
            _ => None,
        }
    }

    pub fn cron_expression(&self) -> Option<&str> {
        match &self.condition {
            TriggerCondition::Scheduled(condition) => Some(condition.cron_expression.as_str()),
            _ => None,
        }
    }

    pub fn has_selections(&self) -> bool {
        !self.artifact_selections.is_empty() || !self.manifest_selections.is_empty()
    }

    /// The artifact selection that wins for a service: the last configured one.
    pub fn artifact_selection_for(&self, service_id: ServiceId) -> Option<&ArtifactSelection> {
        self.artifact_selections
            .iter()
            .rev()
            .find(|s| s.service_id == service_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerCondition {
    NewArtifact(ArtifactCondition),
    NewManifest(ManifestCondition),
    PipelineCompletion(PipelineCondition),
    Scheduled(ScheduledCondition),
    Webhook(WebhookCondition),
    NewInstance(NewInstanceCondition),
}

impl TriggerCondition {
    pub fn kind(&self) -> ConditionKind {
        match self {
            TriggerCondition::NewArtifact(_) => ConditionKind::NewArtifact,
            TriggerCondition::NewManifest(_) => ConditionKind::NewManifest,
            TriggerCondition::PipelineCompletion(_) => ConditionKind::PipelineCompletion,
            TriggerCondition::Scheduled(_) => ConditionKind::Scheduled,
            TriggerCondition::Webhook(_) => ConditionKind::Webhook,
            TriggerCondition::NewInstance(_) => ConditionKind::NewInstance,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    NewArtifact,
    NewManifest,
    PipelineCompletion,
    Scheduled,
    Webhook,
    NewInstance,
}

impl ConditionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionKind::NewArtifact => "new_artifact",
            ConditionKind::NewManifest => "new_manifest",
            ConditionKind::PipelineCompletion => "pipeline_completion",
            ConditionKind::Scheduled => "scheduled",
            ConditionKind::Webhook => "webhook",
            ConditionKind::NewInstance => "new_instance",
        }
    }
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactCondition {
    pub artifact_stream_id: ArtifactStreamId,
    /// Build number filter, literal unless `regex` is set.
    #[serde(default)]
    pub artifact_filter: Option<String>,
    #[serde(default)]
    pub regex: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ManifestCondition {
    pub app_manifest_id: AppManifestId,
    #[serde(default)]
    pub service_id: Option<ServiceId>,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub version_regex: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PipelineCondition {
    pub pipeline_id: PipelineId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScheduledCondition {
    /// Minute-first cron expression, e.g. `0/15 * ? * *`.
    pub cron_expression: String,
    /// Only fire when the resolved artifacts differ from the last deployment.
    #[serde(default)]
    pub on_new_artifact_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WebhookCondition {
    #[serde(default)]
    pub token: Option<WebhookToken>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub source: Option<WebhookSource>,
    #[serde(default)]
    pub event_types: Vec<WebhookEventType>,
    /// Declared webhook parameters with optional defaults.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    #[serde(default)]
    pub file_change: Option<FileChangeGate>,
}

/// Gate a webhook firing on a change to tracked files in a repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FileChangeGate {
    #[serde(default)]
    pub repo_name: Option<String>,
    pub branch: String,
    pub git_connector_id: String,
    pub file_paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct WebhookToken {
    pub token: String,
    #[serde(default = "default_http_method")]
    pub http_method: String,
    pub payload: String,
}

fn default_http_method() -> String {
    "POST".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WebhookSource {
    Github,
    Gitlab,
    Bitbucket,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    Push,
    PullRequest,
    Release,
    Package,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NewInstanceCondition {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct ServiceInfraWorkflow {
    pub infra_mapping_id: InfraMappingId,
    pub workflow_id: WorkflowId,
}

/// The pipeline or workflow a trigger deploys, or a selection reads history from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "workflow_type", rename_all = "snake_case")]
pub enum ActionTarget {
    Pipeline { pipeline_id: PipelineId },
    Workflow { workflow_id: WorkflowId },
}

impl ActionTarget {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ActionTarget::Pipeline { .. } => "Pipeline",
            ActionTarget::Workflow { .. } => "Workflow",
        }
    }
}

impl fmt::Display for ActionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionTarget::Pipeline { pipeline_id } => write!(f, "{pipeline_id}"),
            ActionTarget::Workflow { workflow_id } => write!(f, "{workflow_id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactSelection {
    pub service_id: ServiceId,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(flatten)]
    pub kind: ArtifactSelectionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArtifactSelectionKind {
    LastCollected {
        artifact_stream_id: ArtifactStreamId,
        #[serde(default)]
        artifact_filter: Option<String>,
        #[serde(default)]
        regex: bool,
    },
    LastDeployed {
        source: ActionTarget,
    },
    PipelineSource,
    ArtifactSource,
    WebhookVariable {
        #[serde(default)]
        artifact_stream_id: Option<ArtifactStreamId>,
        #[serde(default)]
        artifact_source_name: Option<String>,
    },
}

impl ArtifactSelectionKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ArtifactSelectionKind::LastCollected { .. } => "LAST_COLLECTED",
            ArtifactSelectionKind::LastDeployed { .. } => "LAST_DEPLOYED",
            ArtifactSelectionKind::PipelineSource => "PIPELINE_SOURCE",
            ArtifactSelectionKind::ArtifactSource => "ARTIFACT_SOURCE",
            ArtifactSelectionKind::WebhookVariable { .. } => "WEBHOOK_VARIABLE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ManifestSelection {
    pub service_id: ServiceId,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(flatten)]
    pub kind: ManifestSelectionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ManifestSelectionKind {
    LastCollected {
        app_manifest_id: AppManifestId,
        #[serde(default)]
        version_regex: Option<String>,
    },
    LastDeployed {
        source: ActionTarget,
    },
    PipelineSource,
    ArtifactSource,
    WebhookVariable {
        #[serde(default)]
        app_manifest_id: Option<AppManifestId>,
    },
    FromAppManifest,
}

impl ManifestSelectionKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ManifestSelectionKind::LastCollected { .. } => "LAST_COLLECTED",
            ManifestSelectionKind::LastDeployed { .. } => "LAST_DEPLOYED",
            ManifestSelectionKind::PipelineSource => "PIPELINE_SOURCE",
            ManifestSelectionKind::ArtifactSource => "ARTIFACT_SOURCE",
            ManifestSelectionKind::WebhookVariable { .. } => "WEBHOOK_VARIABLE",
            ManifestSelectionKind::FromAppManifest => "FROM_APP_MANIFEST",
        }
    }
}
