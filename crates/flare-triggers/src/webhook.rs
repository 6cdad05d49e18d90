//! Webhook token and placeholder payload generation.
//!
//! The rendered payload is handed to users as the body of a sample curl
//! call. Key names, key order and placeholder spellings are consumed by
//! external tooling and must stay stable.

use crate::target::load_target;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use flare_core::deployment::{DeploymentTarget, EntityType};
use flare_core::interpolation::VariableValue;
use flare_core::ports::{ArtifactStreamStore, ManifestRegistryClient, PipelineStore, WorkflowStore};
use flare_core::trigger::{Trigger, WebhookToken};
use flare_core::Result;
use rand::RngCore;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::sync::Arc;
use tracing::debug;

const TOKEN_BYTES: usize = 24;

#[derive(Serialize)]
struct PayloadDocument {
    application: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    manifests: Vec<ManifestEntry>,
    #[serde(serialize_with = "ordered_map")]
    parameters: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    artifacts: Vec<ArtifactEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    artifact_source_name: Option<String>,
    service: String,
    build_number: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct ManifestEntry {
    service: String,
    app_manifest_name: String,
    version_number: String,
}

fn ordered_map<S: Serializer>(entries: &[(String, String)], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(entries.len()))?;
    for (key, value) in entries {
        map.serialize_entry(key, value)?;
    }
    map.end()
}

/// One service entry of the payload before rendering.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServicePlaceholder {
    pub service: String,
    /// Include `artifactSourceName`.
    #[serde(default)]
    pub needs_source_name: bool,
    /// Include a manifest entry.
    #[serde(default)]
    pub has_manifests: bool,
}

/// Pure inputs of the rendered payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PayloadPlan {
    pub application: String,
    pub parameters: Vec<(String, String)>,
    pub artifact_services: Vec<ServicePlaceholder>,
    pub manifest_services: Vec<ServicePlaceholder>,
    /// Names of service variables left open by the trigger.
    pub templatized_services: Vec<String>,
    pub include_artifacts: bool,
    pub include_manifests: bool,
}

impl PayloadPlan {
    /// Render the placeholder JSON document.
    pub fn render(&self) -> Result<String> {
        let mut artifacts = Vec::new();
        let mut manifests = Vec::new();

        if self.include_artifacts {
            for entry in &self.artifact_services {
                artifacts.push(ArtifactEntry {
                    artifact_source_name: entry
                        .needs_source_name
                        .then(|| format!("{}_ARTIFACT_SOURCE_NAME_PLACE_HOLDER", entry.service)),
                    service: entry.service.clone(),
                    build_number: format!("{}_BUILD_NUMBER_PLACE_HOLDER", entry.service),
                });
            }
            for var in &self.templatized_services {
                artifacts.push(ArtifactEntry {
                    artifact_source_name: Some(format!("{var}_ARTIFACT_SOURCE_NAME_PLACE_HOLDER")),
                    service: format!("{var}_PLACEHOLDER"),
                    build_number: format!("{var}_BUILD_NUMBER_PLACE_HOLDER"),
                });
            }
        }

        if self.include_manifests {
            for entry in self.manifest_services.iter().filter(|e| e.has_manifests) {
                manifests.push(ManifestEntry {
                    service: entry.service.clone(),
                    app_manifest_name: format!("{}_APPLICATION_MANIFEST_NAME_PLACE_HOLDER", entry.service),
                    version_number: format!("{}_VERSION_NUMBER_PLACE_HOLDER", entry.service),
                });
            }
            for var in &self.templatized_services {
                manifests.push(ManifestEntry {
                    service: format!("{var}_PLACEHOLDER"),
                    app_manifest_name: format!("{var}_APPLICATION_MANIFEST_NAME_PLACE_HOLDER"),
                    version_number: format!("{var}_VERSION_NUMBER_PLACE_HOLDER"),
                });
            }
        }

        let document = PayloadDocument {
            application: self.application.clone(),
            manifests,
            parameters: self.parameters.clone(),
            artifacts,
        };
        Ok(serde_json::to_string(&document)?)
    }
}

/// Builds the webhook token handed out for a webhook trigger.
pub struct WebhookPayloadBuilder {
    pipelines: Arc<dyn PipelineStore>,
    workflows: Arc<dyn WorkflowStore>,
    artifact_streams: Arc<dyn ArtifactStreamStore>,
    manifests: Arc<dyn ManifestRegistryClient>,
}

impl WebhookPayloadBuilder {
    pub fn new(
        pipelines: Arc<dyn PipelineStore>,
        workflows: Arc<dyn WorkflowStore>,
        artifact_streams: Arc<dyn ArtifactStreamStore>,
        manifests: Arc<dyn ManifestRegistryClient>,
    ) -> Self {
        Self {
            pipelines,
            workflows,
            artifact_streams,
            manifests,
        }
    }

    /// Build the token for `trigger`, keeping the existing token string
    /// unless `rotate` is set.
    pub async fn build(
        &self,
        trigger: &Trigger,
        existing: Option<&WebhookToken>,
        rotate: bool,
    ) -> Result<WebhookToken> {
        let target = load_target(
            self.pipelines.as_ref(),
            self.workflows.as_ref(),
            trigger.app_id,
            trigger.action,
        )
        .await?;
        let plan = self.plan(trigger, &target).await?;
        let payload = plan.render()?;

        let (token, http_method) = match existing {
            Some(existing) if !rotate => (existing.token.clone(), existing.http_method.clone()),
            Some(existing) => (generate_token(), existing.http_method.clone()),
            None => (generate_token(), "POST".to_string()),
        };
        debug!(trigger_id = %trigger.id, rotated = rotate || existing.is_none(), "Built webhook token");

        Ok(WebhookToken {
            token,
            http_method,
            payload,
        })
    }

    /// Collect everything the payload depends on.
    pub async fn plan(&self, trigger: &Trigger, target: &DeploymentTarget) -> Result<PayloadPlan> {
        let declared = trigger
            .webhook_condition()
            .map(|c| c.parameters.clone())
            .unwrap_or_default();

        let mut parameters: Vec<(String, String)> = Vec::new();
        for variable in target.variables() {
            let value = declared
                .get(&variable.name)
                .filter(|v| !v.is_empty())
                .cloned()
                .unwrap_or_else(|| format!("{}_placeholder", variable.name));
            parameters.push((variable.name.clone(), value));
        }
        let mut extra: Vec<(&String, &String)> = declared
            .iter()
            .filter(|(name, _)| !parameters.iter().any(|(known, _)| known == *name))
            .collect();
        extra.sort();
        for (name, value) in extra {
            let value = if value.is_empty() {
                format!("{name}_placeholder")
            } else {
                value.clone()
            };
            parameters.push((name.clone(), value));
        }

        let templatized_services: Vec<String> = target
            .variables()
            .iter()
            .filter(|v| v.is_entity(EntityType::Service))
            .filter(|v| {
                let value = trigger.workflow_variables.get(&v.name).map(String::as_str);
                !matches!(VariableValue::classify(value), VariableValue::Literal(_))
            })
            .map(|v| v.name.clone())
            .collect();

        let needs_artifacts = target.needs_artifacts();
        let has_templatized = !templatized_services.is_empty();
        let include_artifacts =
            needs_artifacts && (!trigger.artifact_selections.is_empty() || has_templatized);
        let include_manifests =
            needs_artifacts && (!trigger.manifest_selections.is_empty() || has_templatized);

        let mut artifact_services = Vec::new();
        let mut manifest_services = Vec::new();
        for service in target.services() {
            if include_artifacts {
                let streams = self
                    .artifact_streams
                    .list_for_service(trigger.app_id, service.id)
                    .await?;
                artifact_services.push(ServicePlaceholder {
                    service: service.name.clone(),
                    needs_source_name: streams.len() > 1 || streams.iter().any(|s| s.parameterized),
                    has_manifests: false,
                });
            }
            if include_manifests {
                let manifests = self
                    .manifests
                    .manifests_for_service(trigger.app_id, service.id)
                    .await?;
                manifest_services.push(ServicePlaceholder {
                    service: service.name.clone(),
                    needs_source_name: false,
                    has_manifests: !manifests.is_empty(),
                });
            }
        }

        Ok(PayloadPlan {
            application: trigger.app_id.to_string(),
            parameters,
            artifact_services,
            manifest_services,
            templatized_services,
            include_artifacts,
            include_manifests,
        })
    }
}

/// Opaque random token, URL safe.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Sample invocation shown next to the token.
pub fn curl_example(portal_url: &str, token: &WebhookToken) -> String {
    format!(
        "curl -X {} -H 'content-type: application/json' --url {}/api/webhooks/{} -d '{}'",
        token.http_method,
        portal_url.trim_end_matches('/'),
        token.token,
        token.payload
    )
}
