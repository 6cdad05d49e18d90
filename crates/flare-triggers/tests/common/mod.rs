//! In-memory fakes of every engine port.
//!
//! Each fake records the calls the scenario tests assert on.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use flare_core::artifact::{ApplicationManifest, Artifact, ArtifactStream, HelmChart};
use flare_core::deployment::*;
use flare_core::flags::FeatureFlags;
use flare_core::ids::*;
use flare_core::ports::*;
use flare_core::trigger::*;
use flare_core::{Error, Result};
use flare_triggers::{EngineConfig, EnginePorts, InMemoryIdempotencyStore, TriggerEngine};
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("flare_triggers=debug")
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
pub struct FakeTriggers {
    pub triggers: Mutex<Vec<Trigger>>,
    /// Fail every `save` while set.
    pub reject_saves: AtomicBool,
}

impl FakeTriggers {
    pub fn insert(&self, trigger: Trigger) {
        self.triggers.lock().unwrap().push(trigger);
    }
}

#[async_trait]
impl TriggerStore for FakeTriggers {
    async fn get(&self, app_id: AppId, id: TriggerId) -> Result<Option<Trigger>> {
        Ok(self
            .triggers
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.app_id == app_id && t.id == id)
            .cloned())
    }

    async fn find_by_webhook_token(&self, token: &str) -> Result<Option<Trigger>> {
        Ok(self
            .triggers
            .lock()
            .unwrap()
            .iter()
            .find(|t| {
                t.webhook_condition()
                    .and_then(|c| c.token.as_ref())
                    .is_some_and(|tok| tok.token == token)
            })
            .cloned())
    }

    async fn list_by_condition(&self, app_id: AppId, kind: ConditionKind) -> Result<Vec<Trigger>> {
        Ok(self
            .triggers
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.app_id == app_id && t.condition_kind() == kind)
            .cloned()
            .collect())
    }

    async fn save(&self, trigger: &Trigger) -> Result<()> {
        if self.reject_saves.load(Ordering::SeqCst) {
            return Err(Error::Internal("trigger store unavailable".into()));
        }
        let mut triggers = self.triggers.lock().unwrap();
        triggers.retain(|t| t.id != trigger.id);
        triggers.push(trigger.clone());
        Ok(())
    }

    async fn delete(&self, app_id: AppId, id: TriggerId) -> Result<bool> {
        let mut triggers = self.triggers.lock().unwrap();
        let before = triggers.len();
        triggers.retain(|t| !(t.app_id == app_id && t.id == id));
        Ok(triggers.len() != before)
    }
}

/// Artifact streams plus the artifacts collected from them.
#[derive(Default)]
pub struct FakeArtifacts {
    pub streams: Mutex<Vec<ArtifactStream>>,
    pub collected: Mutex<Vec<Artifact>>,
    pub parameterized_collections: Mutex<Vec<(ArtifactStreamId, String, HashMap<String, String>)>>,
}

#[async_trait]
impl ArtifactStreamStore for FakeArtifacts {
    async fn get(&self, id: ArtifactStreamId) -> Result<Option<ArtifactStream>> {
        Ok(self.streams.lock().unwrap().iter().find(|s| s.id == id).cloned())
    }

    async fn list_for_service(&self, app_id: AppId, service_id: ServiceId) -> Result<Vec<ArtifactStream>> {
        Ok(self
            .streams
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.app_id == app_id && s.service_id == service_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ArtifactRegistryClient for FakeArtifacts {
    async fn collect_latest(&self, stream_id: ArtifactStreamId) -> Result<Option<Artifact>> {
        Ok(self
            .collected
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|a| a.artifact_stream_id == stream_id)
            .cloned())
    }

    async fn collect_with_parameters(
        &self,
        stream_id: ArtifactStreamId,
        build_number: &str,
        parameters: &HashMap<String, String>,
    ) -> Result<Option<Artifact>> {
        self.parameterized_collections.lock().unwrap().push((
            stream_id,
            build_number.to_string(),
            parameters.clone(),
        ));
        self.get_by_build_number(stream_id, build_number, false).await
    }

    async fn get_by_build_number(
        &self,
        stream_id: ArtifactStreamId,
        build_number: &str,
        regex: bool,
    ) -> Result<Option<Artifact>> {
        let pattern = if regex {
            Some(Regex::new(build_number).map_err(|_| Error::InvalidArtifactFilter(build_number.into()))?)
        } else {
            None
        };
        Ok(self
            .collected
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|a| a.artifact_stream_id == stream_id)
            .find(|a| match &pattern {
                Some(p) => p.is_match(&a.build_no),
                None => a.build_no == build_number,
            })
            .cloned())
    }
}

#[derive(Default)]
pub struct FakeManifests {
    pub manifests: Mutex<Vec<ApplicationManifest>>,
    pub charts: Mutex<Vec<HelmChart>>,
}

#[async_trait]
impl ManifestRegistryClient for FakeManifests {
    async fn collect_latest(&self, manifest_id: AppManifestId) -> Result<Option<HelmChart>> {
        Ok(self
            .charts
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|c| c.app_manifest_id == manifest_id)
            .cloned())
    }

    async fn get_by_version(
        &self,
        manifest_id: AppManifestId,
        version: &str,
        regex: bool,
    ) -> Result<Option<HelmChart>> {
        let pattern = if regex {
            Some(Regex::new(version).map_err(|_| Error::InvalidVersionRegex(version.into()))?)
        } else {
            None
        };
        Ok(self
            .charts
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|c| c.app_manifest_id == manifest_id)
            .find(|c| match &pattern {
                Some(p) => p.is_match(&c.version),
                None => c.version == version,
            })
            .cloned())
    }

    async fn collect_version(&self, manifest_id: AppManifestId, version: &str) -> Result<Option<HelmChart>> {
        self.get_by_version(manifest_id, version, false).await
    }

    async fn is_polling_enabled(&self, manifest_id: AppManifestId) -> Result<bool> {
        Ok(self
            .manifests
            .lock()
            .unwrap()
            .iter()
            .any(|m| m.id == manifest_id && m.poll_for_changes))
    }

    async fn get_manifest(&self, app_id: AppId, manifest_id: AppManifestId) -> Result<Option<ApplicationManifest>> {
        Ok(self
            .manifests
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.app_id == app_id && m.id == manifest_id)
            .cloned())
    }

    async fn manifests_for_service(&self, app_id: AppId, service_id: ServiceId) -> Result<Vec<ApplicationManifest>> {
        Ok(self
            .manifests
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.app_id == app_id && m.service_id == service_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct FakeTargets {
    pub pipelines: Mutex<Vec<Pipeline>>,
    pub workflows: Mutex<Vec<Workflow>>,
}

#[async_trait]
impl PipelineStore for FakeTargets {
    async fn get(&self, app_id: AppId, id: PipelineId) -> Result<Option<Pipeline>> {
        Ok(self
            .pipelines
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.app_id == app_id && p.id == id)
            .cloned())
    }
}

#[async_trait]
impl WorkflowStore for FakeTargets {
    async fn get(&self, app_id: AppId, id: WorkflowId) -> Result<Option<Workflow>> {
        Ok(self
            .workflows
            .lock()
            .unwrap()
            .iter()
            .find(|w| w.app_id == app_id && w.id == id)
            .cloned())
    }
}

pub struct FakeEntities {
    pub application: Application,
    pub environments: Vec<Environment>,
    pub services: Vec<Service>,
    pub infra: Vec<InfraDefinition>,
}

#[async_trait]
impl EntityLookup for FakeEntities {
    async fn application(&self, app_id: AppId) -> Result<Option<Application>> {
        Ok((app_id == self.application.id).then(|| self.application.clone()))
    }

    async fn environment(&self, _: AppId, id: EnvironmentId) -> Result<Option<Environment>> {
        Ok(self.environments.iter().find(|e| e.id == id).cloned())
    }

    async fn environment_by_name(&self, _: AppId, name: &str) -> Result<Option<Environment>> {
        Ok(self.environments.iter().find(|e| e.name == name).cloned())
    }

    async fn service(&self, _: AppId, id: ServiceId) -> Result<Option<Service>> {
        Ok(self.services.iter().find(|s| s.id == id).cloned())
    }

    async fn service_by_name(&self, _: AppId, name: &str) -> Result<Option<Service>> {
        Ok(self.services.iter().find(|s| s.name == name).cloned())
    }

    async fn infra_definition(
        &self,
        _: AppId,
        env_id: EnvironmentId,
        id: InfraDefinitionId,
    ) -> Result<Option<InfraDefinition>> {
        Ok(self
            .infra
            .iter()
            .find(|i| i.id == id && i.env_id == env_id)
            .cloned())
    }

    async fn infra_definition_by_name(
        &self,
        _: AppId,
        env_id: EnvironmentId,
        name: &str,
    ) -> Result<Option<InfraDefinition>> {
        Ok(self
            .infra
            .iter()
            .find(|i| i.name == name && i.env_id == env_id)
            .cloned())
    }
}

#[derive(Default)]
pub struct FakeHistory {
    pub artifacts: Mutex<HashMap<ActionTarget, Vec<Artifact>>>,
    pub charts: Mutex<HashMap<ActionTarget, Vec<HelmChart>>>,
    pub executions: Mutex<HashMap<(WorkflowId, ServiceId, EnvironmentId), ExecutionArgs>>,
}

#[async_trait]
impl DeploymentHistory for FakeHistory {
    async fn last_good_artifacts(&self, _: AppId, target: ActionTarget) -> Result<Vec<Artifact>> {
        Ok(self
            .artifacts
            .lock()
            .unwrap()
            .get(&target)
            .cloned()
            .unwrap_or_default())
    }

    async fn last_good_helm_charts(&self, _: AppId, target: ActionTarget) -> Result<Vec<HelmChart>> {
        Ok(self
            .charts
            .lock()
            .unwrap()
            .get(&target)
            .cloned()
            .unwrap_or_default())
    }

    async fn last_execution_args(
        &self,
        _: AppId,
        workflow_id: WorkflowId,
        service_id: ServiceId,
        env_id: EnvironmentId,
    ) -> Result<Option<ExecutionArgs>> {
        Ok(self
            .executions
            .lock()
            .unwrap()
            .get(&(workflow_id, service_id, env_id))
            .cloned())
    }
}

#[derive(Debug, Clone)]
pub enum ExecutorBehavior {
    Succeed,
    Freeze { master: bool, windows: Vec<String> },
    Fail(String),
    Hang(Duration),
}

pub struct RecordingExecutor {
    pub behavior: Mutex<ExecutorBehavior>,
    pub calls: Mutex<Vec<ExecutionArgs>>,
}

impl RecordingExecutor {
    pub fn set(&self, behavior: ExecutorBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn calls(&self) -> Vec<ExecutionArgs> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for RecordingExecutor {
    fn default() -> Self {
        Self {
            behavior: Mutex::new(ExecutorBehavior::Succeed),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DeploymentExecutor for RecordingExecutor {
    async fn trigger_execution(
        &self,
        app_id: AppId,
        env_id: Option<EnvironmentId>,
        args: &ExecutionArgs,
        _trigger: &Trigger,
    ) -> Result<Execution> {
        self.calls.lock().unwrap().push(args.clone());
        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            ExecutorBehavior::Succeed => {}
            ExecutorBehavior::Freeze { master, windows } => return Err(Error::freeze(master, windows)),
            ExecutorBehavior::Fail(message) => return Err(Error::DispatchFailed(message)),
            ExecutorBehavior::Hang(delay) => tokio::time::sleep(delay).await,
        }
        Ok(Execution {
            id: ExecutionId::new(),
            app_id,
            env_id,
            status: ExecutionStatus::Running,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FreezeNotice {
    pub account_id: AccountId,
    pub app_id: AppId,
    pub window_ids: Vec<String>,
    pub placeholders: HashMap<String, String>,
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub notices: Mutex<Vec<FreezeNotice>>,
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    async fn notify_freeze_rejection(
        &self,
        account_id: AccountId,
        app_id: AppId,
        window_ids: &[String],
        placeholders: &HashMap<String, String>,
    ) -> Result<()> {
        self.notices.lock().unwrap().push(FreezeNotice {
            account_id,
            app_id,
            window_ids: window_ids.to_vec(),
            placeholders: placeholders.clone(),
        });
        Ok(())
    }
}

pub struct StaticFlags(pub FeatureFlags);

#[async_trait]
impl FeatureFlagSource for StaticFlags {
    async fn flags(&self, _: AccountId) -> Result<FeatureFlags> {
        Ok(self.0)
    }
}

#[derive(Default)]
pub struct RecordingScheduler {
    pub registered: Mutex<Vec<(TriggerId, String)>>,
    pub unregistered: Mutex<Vec<TriggerId>>,
    /// Fail every `register` while set.
    pub unavailable: AtomicBool,
}

#[async_trait]
impl CronScheduler for RecordingScheduler {
    async fn register(&self, trigger_id: TriggerId, _: AppId, expression: &str) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Internal("scheduler unavailable".into()));
        }
        self.registered
            .lock()
            .unwrap()
            .push((trigger_id, expression.to_string()));
        Ok(())
    }

    async fn unregister(&self, trigger_id: TriggerId) -> Result<()> {
        self.unregistered.lock().unwrap().push(trigger_id);
        Ok(())
    }
}

/// File-change verdicts handed out in order, then `Changed`.
#[derive(Default)]
pub struct FakeContentChanges {
    pub verdicts: Mutex<Vec<ContentChange>>,
    pub rechecks: Mutex<Vec<(TriggerId, ExecutionArgs)>>,
}

impl FakeContentChanges {
    pub fn answer(&self, verdict: ContentChange) {
        self.verdicts.lock().unwrap().push(verdict);
    }

    pub fn rechecks(&self) -> Vec<(TriggerId, ExecutionArgs)> {
        self.rechecks.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentChangeChecker for FakeContentChanges {
    async fn check(&self, _: &Trigger, _: &FileChangeGate) -> Result<ContentChange> {
        let mut verdicts = self.verdicts.lock().unwrap();
        if verdicts.is_empty() {
            return Ok(ContentChange::Changed);
        }
        Ok(verdicts.remove(0))
    }

    async fn schedule_recheck(&self, trigger: &Trigger, args: &ExecutionArgs) -> Result<()> {
        self.rechecks.lock().unwrap().push((trigger.id, args.clone()));
        Ok(())
    }
}

/// An application with one workflow deploying two services.
pub struct World {
    pub account_id: AccountId,
    pub app_id: AppId,
    pub catalog: Service,
    pub order: Service,
    pub catalog_stream: ArtifactStream,
    pub order_stream: ArtifactStream,
    pub workflow: Workflow,
    pub pipeline: Pipeline,
    pub triggers: Arc<FakeTriggers>,
    pub artifacts: Arc<FakeArtifacts>,
    pub manifests: Arc<FakeManifests>,
    pub targets: Arc<FakeTargets>,
    pub entities: Arc<FakeEntities>,
    pub history: Arc<FakeHistory>,
    pub executor: Arc<RecordingExecutor>,
    pub notifier: Arc<RecordingNotifier>,
    pub idempotency: Arc<InMemoryIdempotencyStore>,
    pub content_changes: Arc<FakeContentChanges>,
}

impl World {
    pub fn new() -> Self {
        init_tracing();
        let account_id = AccountId::new();
        let app_id = AppId::new();
        let catalog = Service {
            id: ServiceId::new(),
            name: "Catalog".into(),
        };
        let order = Service {
            id: ServiceId::new(),
            name: "Order".into(),
        };
        let stream = |service: &Service, name: &str| ArtifactStream {
            id: ArtifactStreamId::new(),
            app_id,
            service_id: service.id,
            name: name.into(),
            source_type: "DOCKER".into(),
            parameterized: false,
            parameters: vec![],
        };
        let catalog_stream = stream(&catalog, "catalog-image");
        let order_stream = stream(&order, "order-image");

        let workflow = Workflow {
            id: WorkflowId::new(),
            app_id,
            name: "rolling-deploy".into(),
            env_id: Some(EnvironmentId::new()),
            kind: WorkflowKind::Standard,
            services: vec![catalog.clone(), order.clone()],
            variables: vec![],
        };
        let pipeline = Pipeline {
            id: PipelineId::new(),
            app_id,
            name: "build-and-test".into(),
            services: vec![catalog.clone(), order.clone()],
            variables: vec![],
            has_build_workflow: false,
        };

        let artifacts = FakeArtifacts::default();
        artifacts
            .streams
            .lock()
            .unwrap()
            .extend([catalog_stream.clone(), order_stream.clone()]);
        let targets = FakeTargets::default();
        targets.workflows.lock().unwrap().push(workflow.clone());
        targets.pipelines.lock().unwrap().push(pipeline.clone());

        let entities = FakeEntities {
            application: Application {
                id: app_id,
                account_id,
                name: "Shop".into(),
            },
            environments: vec![Environment {
                id: EnvironmentId::new(),
                name: "prod".into(),
            }],
            services: vec![catalog.clone(), order.clone()],
            infra: vec![],
        };

        Self {
            account_id,
            app_id,
            catalog,
            order,
            catalog_stream,
            order_stream,
            workflow,
            pipeline,
            triggers: Arc::new(FakeTriggers::default()),
            artifacts: Arc::new(artifacts),
            manifests: Arc::new(FakeManifests::default()),
            targets: Arc::new(targets),
            entities: Arc::new(entities),
            history: Arc::new(FakeHistory::default()),
            executor: Arc::new(RecordingExecutor::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            idempotency: Arc::new(InMemoryIdempotencyStore::new()),
            content_changes: Arc::new(FakeContentChanges::default()),
        }
    }

    pub fn ports(&self, flags: FeatureFlags) -> EnginePorts {
        EnginePorts {
            triggers: self.triggers.clone(),
            artifact_streams: self.artifacts.clone(),
            artifacts: self.artifacts.clone(),
            manifests: self.manifests.clone(),
            pipelines: self.targets.clone(),
            workflows: self.targets.clone(),
            entities: self.entities.clone(),
            history: self.history.clone(),
            executor: self.executor.clone(),
            notifier: self.notifier.clone(),
            idempotency: self.idempotency.clone(),
            content_changes: Some(self.content_changes.clone()),
            flag_source: Some(Arc::new(StaticFlags(flags))),
        }
    }

    pub fn engine(&self) -> Arc<TriggerEngine> {
        self.engine_with(FeatureFlags::default(), EngineConfig::default())
    }

    pub fn engine_with(&self, flags: FeatureFlags, config: EngineConfig) -> Arc<TriggerEngine> {
        TriggerEngine::new(self.ports(flags), config)
    }

    /// A trigger deploying the world's workflow.
    pub fn trigger(&self, name: &str, condition: TriggerCondition) -> Trigger {
        Trigger {
            id: TriggerId::new(),
            account_id: self.account_id,
            app_id: self.app_id,
            name: name.into(),
            description: None,
            condition,
            action: ActionTarget::Workflow {
                workflow_id: self.workflow.id,
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

    pub fn artifact(&self, stream: &ArtifactStream, build_no: &str) -> Artifact {
        Artifact {
            id: ArtifactId::new(),
            app_id: self.app_id,
            artifact_stream_id: stream.id,
            service_id: stream.service_id,
            build_no: build_no.into(),
            source_name: stream.name.clone(),
            metadata: HashMap::new(),
            duplicate: false,
            created_at: Utc::now(),
        }
    }

    /// Record an artifact as collected in the registry.
    pub fn collect(&self, stream: &ArtifactStream, build_no: &str) -> Artifact {
        let artifact = self.artifact(stream, build_no);
        self.artifacts.collected.lock().unwrap().push(artifact.clone());
        artifact
    }

    /// Register an application manifest for `service`.
    pub fn manifest(&self, service: &Service, name: &str, poll_for_changes: bool) -> ApplicationManifest {
        let manifest = ApplicationManifest {
            id: AppManifestId::new(),
            app_id: self.app_id,
            service_id: service.id,
            name: name.into(),
            poll_for_changes,
        };
        self.manifests.manifests.lock().unwrap().push(manifest.clone());
        manifest
    }

    pub fn chart(&self, manifest: &ApplicationManifest, version: &str) -> HelmChart {
        HelmChart {
            id: HelmChartId::new(),
            app_id: self.app_id,
            app_manifest_id: manifest.id,
            service_id: manifest.service_id,
            version: version.into(),
            name: manifest.name.clone(),
            created_at: Utc::now(),
        }
    }

    /// Record a chart version as collected in the registry.
    pub fn collect_chart(&self, manifest: &ApplicationManifest, version: &str) -> HelmChart {
        let chart = self.chart(manifest, version);
        self.manifests.charts.lock().unwrap().push(chart.clone());
        chart
    }

    pub fn workflow_action(&self) -> ActionTarget {
        ActionTarget::Workflow {
            workflow_id: self.workflow.id,
        }
    }
}
