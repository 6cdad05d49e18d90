//! Resolution of artifact and manifest selections.
//!
//! Each selection resolves independently and the results are unioned by
//! service. A selection replaces whatever an earlier selection or the
//! triggering event contributed for its service.

use flare_core::artifact::{ApplicationManifest, Artifact, ArtifactStream, HelmChart};
use flare_core::deployment::DeploymentTarget;
use flare_core::events::{ArtifactInput, ManifestInput, WebhookRequest};
use flare_core::flags::FeatureFlags;
use flare_core::ids::*;
use flare_core::ports::{
    ArtifactRegistryClient, ArtifactStreamStore, DeploymentHistory, EntityLookup,
    ManifestRegistryClient,
};
use flare_core::trigger::{
    ActionTarget, ArtifactSelection, ArtifactSelectionKind, ManifestSelection,
    ManifestSelectionKind, Trigger,
};
use flare_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// What the triggering event contributes to resolution.
#[derive(Debug, Clone, Default)]
pub enum EventInputs {
    #[default]
    None,
    /// Triggering artifacts that passed the condition filter.
    Artifacts(Vec<Artifact>),
    /// Triggering manifest versions that passed the condition filter.
    Manifests(Vec<HelmChart>),
    SourcePipeline(PipelineId),
    Webhook(WebhookRequest),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedInputs {
    pub artifacts: Vec<Artifact>,
    pub helm_charts: Vec<HelmChart>,
}

/// Per-service slots in first-seen order.
struct ServiceSlots<T> {
    slots: Vec<(ServiceId, Vec<T>)>,
}

impl<T> ServiceSlots<T> {
    fn new() -> Self {
        Self { slots: Vec::new() }
    }

    fn position(&self, service_id: ServiceId) -> Option<usize> {
        self.slots.iter().position(|(id, _)| *id == service_id)
    }

    fn push(&mut self, service_id: ServiceId, item: T) {
        match self.position(service_id) {
            Some(idx) => self.slots[idx].1.push(item),
            None => self.slots.push((service_id, vec![item])),
        }
    }

    fn assign(&mut self, service_id: ServiceId, items: Vec<T>) {
        match self.position(service_id) {
            Some(idx) => self.slots[idx].1 = items,
            None => self.slots.push((service_id, items)),
        }
    }

    fn into_vec(self) -> Vec<T> {
        self.slots.into_iter().flat_map(|(_, items)| items).collect()
    }
}

pub struct SelectionResolver {
    artifact_streams: Arc<dyn ArtifactStreamStore>,
    artifacts: Arc<dyn ArtifactRegistryClient>,
    manifests: Arc<dyn ManifestRegistryClient>,
    history: Arc<dyn DeploymentHistory>,
    entities: Arc<dyn EntityLookup>,
}

impl SelectionResolver {
    pub fn new(
        artifact_streams: Arc<dyn ArtifactStreamStore>,
        artifacts: Arc<dyn ArtifactRegistryClient>,
        manifests: Arc<dyn ManifestRegistryClient>,
        history: Arc<dyn DeploymentHistory>,
        entities: Arc<dyn EntityLookup>,
    ) -> Self {
        Self {
            artifact_streams,
            artifacts,
            manifests,
            history,
            entities,
        }
    }

    /// Resolve the artifact and manifest set for one firing.
    pub async fn resolve(
        &self,
        trigger: &Trigger,
        target: &DeploymentTarget,
        inputs: &EventInputs,
        flags: &FeatureFlags,
    ) -> Result<ResolvedInputs> {
        let mut artifacts = ServiceSlots::new();
        let mut charts = ServiceSlots::new();

        self.seed(trigger, target, inputs, flags, &mut artifacts, &mut charts)
            .await?;

        for selection in &trigger.artifact_selections {
            let resolved = self
                .resolve_artifact_selection(trigger, target, selection, inputs)
                .await?;
            debug!(
                trigger_id = %trigger.id,
                service_id = %selection.service_id,
                selection = selection.kind.type_name(),
                count = resolved.len(),
                "Resolved artifact selection"
            );
            artifacts.assign(selection.service_id, resolved);
        }

        for selection in &trigger.manifest_selections {
            let resolved = self
                .resolve_manifest_selection(trigger, target, selection, inputs)
                .await?;
            debug!(
                trigger_id = %trigger.id,
                service_id = %selection.service_id,
                selection = selection.kind.type_name(),
                count = resolved.len(),
                "Resolved manifest selection"
            );
            charts.assign(selection.service_id, resolved);
        }

        Ok(ResolvedInputs {
            artifacts: artifacts.into_vec(),
            helm_charts: charts.into_vec(),
        })
    }

    /// Inputs the event contributes before any selection runs.
    async fn seed(
        &self,
        trigger: &Trigger,
        target: &DeploymentTarget,
        inputs: &EventInputs,
        flags: &FeatureFlags,
        artifacts: &mut ServiceSlots<Artifact>,
        charts: &mut ServiceSlots<HelmChart>,
    ) -> Result<()> {
        match inputs {
            EventInputs::None => {}
            EventInputs::Artifacts(triggering) => {
                if flags.prefer_artifact_selection && !trigger.artifact_selections.is_empty() {
                    return Ok(());
                }
                for artifact in triggering {
                    artifacts.push(artifact.service_id, artifact.clone());
                }
            }
            EventInputs::Manifests(triggering) => {
                for chart in triggering {
                    charts.push(chart.service_id, chart.clone());
                }
            }
            EventInputs::SourcePipeline(pipeline_id) => {
                if trigger.has_selections() {
                    return Ok(());
                }
                let source = ActionTarget::Pipeline {
                    pipeline_id: *pipeline_id,
                };
                for artifact in self.history.last_good_artifacts(trigger.app_id, source).await? {
                    artifacts.push(artifact.service_id, artifact);
                }
                for chart in self.history.last_good_helm_charts(trigger.app_id, source).await? {
                    charts.push(chart.service_id, chart);
                }
            }
            EventInputs::Webhook(request) => {
                for input in &request.artifacts {
                    let service = self.service_named(trigger, target, &input.service).await?;
                    if trigger.artifact_selections.iter().any(|s| s.service_id == service) {
                        continue;
                    }
                    let artifact = self
                        .artifact_from_webhook(trigger, service, &input.service, input, None, None)
                        .await?;
                    artifacts.push(service, artifact);
                }
                for input in &request.manifests {
                    let service = self.service_named(trigger, target, &input.service).await?;
                    if trigger.manifest_selections.iter().any(|s| s.service_id == service) {
                        continue;
                    }
                    let chart = self
                        .chart_from_webhook(trigger, service, &input.service, input, None)
                        .await?;
                    charts.push(service, chart);
                }
            }
        }
        Ok(())
    }

    async fn resolve_artifact_selection(
        &self,
        trigger: &Trigger,
        target: &DeploymentTarget,
        selection: &ArtifactSelection,
        inputs: &EventInputs,
    ) -> Result<Vec<Artifact>> {
        let service_id = selection.service_id;
        match &selection.kind {
            ArtifactSelectionKind::LastCollected {
                artifact_stream_id,
                artifact_filter,
                regex,
            } => {
                let stream = self.stream(*artifact_stream_id).await?;
                if stream.service_id != service_id {
                    return Err(Error::ServiceNotBound(self.service_label(
                        target,
                        service_id,
                        selection.service_name.as_deref(),
                    )));
                }
                if stream.parameterized {
                    return Err(Error::ParameterizedSource(
                        "Cannot select parameterized artifact source for last collected type"
                            .to_string(),
                    ));
                }
                let artifact = match artifact_filter.as_deref().filter(|f| !f.is_empty()) {
                    None => self.artifacts.collect_latest(stream.id).await?,
                    Some(filter) => {
                        self.artifacts
                            .get_by_build_number(stream.id, filter, *regex)
                            .await?
                    }
                };
                let artifact = artifact.ok_or_else(|| {
                    Error::ArtifactNotFound(format!(
                        "No collected artifact in stream [{}] for the last collected selection",
                        stream.name
                    ))
                })?;
                Ok(vec![artifact])
            }
            ArtifactSelectionKind::LastDeployed { source } => {
                let deployed: Vec<Artifact> = self
                    .history
                    .last_good_artifacts(trigger.app_id, *source)
                    .await?
                    .into_iter()
                    .filter(|a| a.service_id == service_id)
                    .collect();
                if deployed.is_empty() {
                    return Err(Error::ArtifactNotFound(format!(
                        "No last deployed artifact of {} {} for service [{}]",
                        source.kind_name(),
                        source,
                        self.service_label(target, service_id, selection.service_name.as_deref())
                    )));
                }
                Ok(deployed)
            }
            ArtifactSelectionKind::PipelineSource => {
                let EventInputs::SourcePipeline(pipeline_id) = inputs else {
                    return Err(incompatible(selection.kind.type_name(), "pipeline completion"));
                };
                let source = ActionTarget::Pipeline {
                    pipeline_id: *pipeline_id,
                };
                let deployed: Vec<Artifact> = self
                    .history
                    .last_good_artifacts(trigger.app_id, source)
                    .await?
                    .into_iter()
                    .filter(|a| a.service_id == service_id)
                    .collect();
                if deployed.is_empty() {
                    return Err(Error::ArtifactNotFound(format!(
                        "Source pipeline {pipeline_id} deployed no artifact for service [{}]",
                        self.service_label(target, service_id, selection.service_name.as_deref())
                    )));
                }
                Ok(deployed)
            }
            ArtifactSelectionKind::ArtifactSource => {
                let EventInputs::Artifacts(triggering) = inputs else {
                    return Err(incompatible(selection.kind.type_name(), "artifact collection"));
                };
                let matched: Vec<Artifact> = triggering
                    .iter()
                    .filter(|a| a.service_id == service_id)
                    .cloned()
                    .collect();
                if matched.is_empty() {
                    return Err(Error::ArtifactNotFound(format!(
                        "Triggering artifacts do not belong to service [{}]",
                        self.service_label(target, service_id, selection.service_name.as_deref())
                    )));
                }
                Ok(matched)
            }
            ArtifactSelectionKind::WebhookVariable {
                artifact_stream_id,
                artifact_source_name,
            } => {
                let EventInputs::Webhook(request) = inputs else {
                    return Err(incompatible(selection.kind.type_name(), "webhook"));
                };
                let name = self
                    .service_name(trigger, target, service_id, selection.service_name.as_deref())
                    .await?;
                let input = request
                    .artifact_for(&name)
                    .ok_or_else(|| Error::ServiceNotBound(name.clone()))?;
                let artifact = self
                    .artifact_from_webhook(
                        trigger,
                        service_id,
                        &name,
                        input,
                        *artifact_stream_id,
                        artifact_source_name.as_deref(),
                    )
                    .await?;
                Ok(vec![artifact])
            }
        }
    }

    async fn resolve_manifest_selection(
        &self,
        trigger: &Trigger,
        target: &DeploymentTarget,
        selection: &ManifestSelection,
        inputs: &EventInputs,
    ) -> Result<Vec<HelmChart>> {
        let service_id = selection.service_id;
        let label = || self.service_label(target, service_id, selection.service_name.as_deref());
        match &selection.kind {
            ManifestSelectionKind::LastCollected {
                app_manifest_id,
                version_regex,
            } => {
                let manifest = self
                    .manifests
                    .get_manifest(trigger.app_id, *app_manifest_id)
                    .await?
                    .ok_or_else(|| Error::ManifestNotFound(app_manifest_id.to_string()))?;
                if manifest.service_id != service_id {
                    return Err(Error::ServiceNotBound(label()));
                }
                if !self.manifests.is_polling_enabled(manifest.id).await? {
                    return Err(Error::ManifestPollingDisabled(label()));
                }
                let chart = match version_regex.as_deref().filter(|r| !r.is_empty()) {
                    None => self.manifests.collect_latest(manifest.id).await?,
                    Some(regex) => self.manifests.get_by_version(manifest.id, regex, true).await?,
                };
                let chart = chart.ok_or_else(|| {
                    Error::ManifestNotFound(format!(
                        "No collected version of manifest [{}]",
                        manifest.name
                    ))
                })?;
                Ok(vec![chart])
            }
            ManifestSelectionKind::LastDeployed { source } => {
                let deployed = self.deployed_charts(trigger.app_id, *source, service_id).await?;
                if deployed.is_empty() {
                    return Err(Error::ManifestNotFound(format!(
                        "No last deployed manifest of {} {} for service [{}]",
                        source.kind_name(),
                        source,
                        label()
                    )));
                }
                Ok(deployed)
            }
            ManifestSelectionKind::PipelineSource => {
                let EventInputs::SourcePipeline(pipeline_id) = inputs else {
                    return Err(incompatible(selection.kind.type_name(), "pipeline completion"));
                };
                let source = ActionTarget::Pipeline {
                    pipeline_id: *pipeline_id,
                };
                let deployed = self.deployed_charts(trigger.app_id, source, service_id).await?;
                if deployed.is_empty() {
                    return Err(Error::ManifestNotFound(format!(
                        "Source pipeline {pipeline_id} deployed no manifest for service [{}]",
                        label()
                    )));
                }
                Ok(deployed)
            }
            ManifestSelectionKind::ArtifactSource => {
                let EventInputs::Manifests(triggering) = inputs else {
                    return Err(incompatible(selection.kind.type_name(), "manifest collection"));
                };
                let matched: Vec<HelmChart> = triggering
                    .iter()
                    .filter(|c| c.service_id == service_id)
                    .cloned()
                    .collect();
                if matched.is_empty() {
                    return Err(Error::ManifestNotFound(format!(
                        "Triggering manifests do not belong to service [{}]",
                        label()
                    )));
                }
                Ok(matched)
            }
            ManifestSelectionKind::WebhookVariable { app_manifest_id } => {
                let EventInputs::Webhook(request) = inputs else {
                    return Err(incompatible(selection.kind.type_name(), "webhook"));
                };
                let name = self
                    .service_name(trigger, target, service_id, selection.service_name.as_deref())
                    .await?;
                let input = request
                    .manifest_for(&name)
                    .ok_or_else(|| Error::ManifestNotFound(format!("Service {name} requires manifests")))?;
                let chart = self
                    .chart_from_webhook(trigger, service_id, &name, input, *app_manifest_id)
                    .await?;
                Ok(vec![chart])
            }
            ManifestSelectionKind::FromAppManifest => {
                let manifest = self
                    .manifests
                    .manifests_for_service(trigger.app_id, service_id)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| {
                        Error::ManifestNotFound(format!(
                            "No application manifest bound to service [{}]",
                            label()
                        ))
                    })?;
                let chart = self
                    .manifests
                    .collect_latest(manifest.id)
                    .await?
                    .ok_or_else(|| {
                        Error::ManifestNotFound(format!(
                            "No collected version of manifest [{}]",
                            manifest.name
                        ))
                    })?;
                Ok(vec![chart])
            }
        }
    }

    /// Resolve one webhook artifact input to a collected artifact.
    async fn artifact_from_webhook(
        &self,
        trigger: &Trigger,
        service_id: ServiceId,
        service_name: &str,
        input: &ArtifactInput,
        stream_id: Option<ArtifactStreamId>,
        source_name: Option<&str>,
    ) -> Result<Artifact> {
        let build_number = input
            .build_number
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .ok_or_else(|| Error::MissingBuildNumber(service_name.to_string()))?;

        let stream = match stream_id {
            Some(id) => self.stream(id).await?,
            None => {
                let name = input.artifact_source_name.as_deref().or(source_name);
                self.stream_for_service(trigger.app_id, service_id, service_name, name)
                    .await?
            }
        };

        let artifact = if stream.parameterized {
            let missing: Vec<&str> = stream
                .parameters
                .iter()
                .map(String::as_str)
                .filter(|p| !input.artifact_variables.contains_key(*p))
                .collect();
            if input.artifact_variables.is_empty() || !missing.is_empty() {
                return Err(Error::UnresolvedParameterizedInput(format!(
                    "Parameterized artifact stream [{}] found in service [{service_name}] \
                     however parameter values not provided: {missing:?}",
                    stream.name
                )));
            }
            self.artifacts
                .collect_with_parameters(stream.id, build_number, &input.artifact_variables)
                .await?
        } else {
            match self
                .artifacts
                .get_by_build_number(stream.id, build_number, false)
                .await?
            {
                Some(artifact) => Some(artifact),
                None => {
                    self.artifacts
                        .collect_with_parameters(stream.id, build_number, &HashMap::new())
                        .await?
                }
            }
        };

        artifact.ok_or_else(|| {
            Error::ArtifactNotFound(format!(
                "Build [{build_number}] not found in artifact source [{}] of service [{service_name}]",
                stream.name
            ))
        })
    }

    /// Resolve one webhook manifest input to a collected chart version.
    async fn chart_from_webhook(
        &self,
        trigger: &Trigger,
        service_id: ServiceId,
        service_name: &str,
        input: &ManifestInput,
        manifest_id: Option<AppManifestId>,
    ) -> Result<HelmChart> {
        let version = input
            .version_number
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::MissingVersionNumber(service_name.to_string()))?;

        let manifest = match manifest_id {
            Some(id) => self
                .manifests
                .get_manifest(trigger.app_id, id)
                .await?
                .ok_or_else(|| Error::ManifestNotFound(id.to_string()))?,
            None => {
                self.manifest_for_service(
                    trigger.app_id,
                    service_id,
                    service_name,
                    input.app_manifest_name.as_deref(),
                )
                .await?
            }
        };

        if !self.manifests.is_polling_enabled(manifest.id).await? {
            return Err(Error::ManifestPollingDisabled(service_name.to_string()));
        }

        let chart = match self.manifests.get_by_version(manifest.id, version, false).await? {
            Some(chart) => Some(chart),
            None => self.manifests.collect_version(manifest.id, version).await?,
        };
        chart.ok_or_else(|| {
            Error::ManifestNotFound(format!(
                "Version [{version}] not found for manifest [{}] of service [{service_name}]",
                manifest.name
            ))
        })
    }

    async fn stream(&self, id: ArtifactStreamId) -> Result<ArtifactStream> {
        self.artifact_streams
            .get(id)
            .await?
            .ok_or_else(|| Error::ArtifactStreamNotFound(id.to_string()))
    }

    /// Pick a service's artifact stream by name, or its only stream.
    async fn stream_for_service(
        &self,
        app_id: AppId,
        service_id: ServiceId,
        service_name: &str,
        source_name: Option<&str>,
    ) -> Result<ArtifactStream> {
        let mut streams = self
            .artifact_streams
            .list_for_service(app_id, service_id)
            .await?;
        if streams.is_empty() {
            return Err(Error::ArtifactStreamNotFound(format!(
                "No artifact sources defined for the service [{service_name}]"
            )));
        }
        match source_name {
            Some(name) => streams.into_iter().find(|s| s.name == name).ok_or_else(|| {
                Error::ArtifactStreamNotFound(format!(
                    "Artifact source [{name}] is not defined for the service [{service_name}]"
                ))
            }),
            None if streams.len() == 1 => Ok(streams.remove(0)),
            None => Err(Error::ArtifactStreamNotFound(format!(
                "More than one artifact source defined for the service [{service_name}]. \
                 Please provide artifact source name"
            ))),
        }
    }

    async fn manifest_for_service(
        &self,
        app_id: AppId,
        service_id: ServiceId,
        service_name: &str,
        manifest_name: Option<&str>,
    ) -> Result<ApplicationManifest> {
        let mut manifests = self
            .manifests
            .manifests_for_service(app_id, service_id)
            .await?;
        match manifest_name {
            Some(name) => manifests.into_iter().find(|m| m.name == name).ok_or_else(|| {
                Error::ManifestNotFound(format!(
                    "Application manifest [{name}] is not defined for service {service_name}"
                ))
            }),
            None if manifests.len() == 1 => Ok(manifests.remove(0)),
            None => Err(Error::ManifestNotFound(format!(
                "Application Manifest name has to be provided for service {service_name}"
            ))),
        }
    }

    async fn deployed_charts(
        &self,
        app_id: AppId,
        source: ActionTarget,
        service_id: ServiceId,
    ) -> Result<Vec<HelmChart>> {
        Ok(self
            .history
            .last_good_helm_charts(app_id, source)
            .await?
            .into_iter()
            .filter(|c| c.service_id == service_id)
            .collect())
    }

    /// Service id for a webhook service name: target services first, then the app.
    async fn service_named(
        &self,
        trigger: &Trigger,
        target: &DeploymentTarget,
        name: &str,
    ) -> Result<ServiceId> {
        if let Some(service) = target.services().iter().find(|s| s.name == name) {
            return Ok(service.id);
        }
        self.entities
            .service_by_name(trigger.app_id, name)
            .await?
            .map(|s| s.id)
            .ok_or_else(|| Error::ServiceNotBound(name.to_string()))
    }

    async fn service_name(
        &self,
        trigger: &Trigger,
        target: &DeploymentTarget,
        service_id: ServiceId,
        configured: Option<&str>,
    ) -> Result<String> {
        if let Some(service) = target.services().iter().find(|s| s.id == service_id) {
            return Ok(service.name.clone());
        }
        if let Some(name) = configured {
            return Ok(name.to_string());
        }
        self.entities
            .service(trigger.app_id, service_id)
            .await?
            .map(|s| s.name)
            .ok_or_else(|| Error::EntityNotFound {
                kind: "Service",
                name: service_id.to_string(),
            })
    }

    fn service_label(
        &self,
        target: &DeploymentTarget,
        service_id: ServiceId,
        configured: Option<&str>,
    ) -> String {
        target
            .services()
            .iter()
            .find(|s| s.id == service_id)
            .map(|s| s.name.clone())
            .or_else(|| configured.map(str::to_string))
            .unwrap_or_else(|| service_id.to_string())
    }
}

fn incompatible(selection: &str, event: &str) -> Error {
    Error::IncompatibleSelection(format!(
        "{selection} selection can only be resolved for a {event} event"
    ))
}
