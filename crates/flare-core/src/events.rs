//! Events that drive trigger evaluation.

use crate::artifact::{Artifact, HelmChart};
use crate::ids::*;
use crate::trigger::{ConditionKind, WebhookEventType};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An event the engine evaluates triggers against.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerEvent {
    ArtifactsCollected(ArtifactsCollectedPayload),
    PipelineCompleted(PipelineCompletedPayload),
    CronTick(CronTickPayload),
    Webhook(WebhookPayload),
    ManifestsCollected(ManifestsCollectedPayload),
    NewInstance(NewInstancePayload),
}

impl TriggerEvent {
    /// The condition kind this event is evaluated against.
    pub fn condition_kind(&self) -> ConditionKind {
        match self {
            TriggerEvent::ArtifactsCollected(_) => ConditionKind::NewArtifact,
            TriggerEvent::PipelineCompleted(_) => ConditionKind::PipelineCompletion,
            TriggerEvent::CronTick(_) => ConditionKind::Scheduled,
            TriggerEvent::Webhook(_) => ConditionKind::Webhook,
            TriggerEvent::ManifestsCollected(_) => ConditionKind::NewManifest,
            TriggerEvent::NewInstance(_) => ConditionKind::NewInstance,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactsCollectedPayload {
    pub app_id: AppId,
    pub artifact_stream_id: ArtifactStreamId,
    pub artifacts: Vec<Artifact>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PipelineCompletedPayload {
    pub app_id: AppId,
    pub pipeline_id: PipelineId,
    #[serde(default)]
    pub execution_id: Option<ExecutionId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CronTickPayload {
    pub app_id: AppId,
    pub trigger_id: TriggerId,
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WebhookPayload {
    pub token: String,
    pub request: WebhookRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ManifestsCollectedPayload {
    pub app_id: AppId,
    pub app_manifest_id: AppManifestId,
    pub helm_charts: Vec<HelmChart>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NewInstancePayload {
    pub app_id: AppId,
    pub infra_mapping_id: InfraMappingId,
    pub service_id: ServiceId,
    pub env_id: EnvironmentId,
}

/// A parsed inbound webhook call.
///
/// The body mirrors the payload handed out with the webhook token. Transport
/// details (secret, event type) are filled in by the HTTP layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WebhookRequest {
    #[serde(default)]
    pub application: Option<String>,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactInput>,
    #[serde(default)]
    pub manifests: Vec<ManifestInput>,
    #[serde(default, skip_serializing)]
    pub secret: Option<String>,
    #[serde(default, skip_serializing)]
    pub event_type: Option<WebhookEventType>,
}

impl WebhookRequest {
    pub fn artifact_for(&self, service: &str) -> Option<&ArtifactInput> {
        self.artifacts.iter().find(|a| a.service == service)
    }

    pub fn manifest_for(&self, service: &str) -> Option<&ManifestInput> {
        self.manifests.iter().find(|m| m.service == service)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactInput {
    pub service: String,
    #[serde(default)]
    pub build_number: Option<String>,
    #[serde(default)]
    pub artifact_source_name: Option<String>,
    /// Runtime inputs for parameterized artifact sources.
    #[serde(default)]
    pub artifact_variables: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManifestInput {
    pub service: String,
    #[serde(default)]
    pub version_number: Option<String>,
    #[serde(default)]
    pub app_manifest_name: Option<String>,
}
