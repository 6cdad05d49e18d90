//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the trigger engine and the
//! collaborators it drives: registries, stores, the deployment executor,
//! and notification delivery.

use crate::artifact::{ApplicationManifest, Artifact, ArtifactStream, HelmChart};
use crate::deployment::{
    Application, Environment, Execution, ExecutionArgs, InfraDefinition, Pipeline, Service,
    Workflow,
};
use crate::flags::FeatureFlags;
use crate::idempotency::{Acquisition, IdempotencyRecord};
use crate::ids::*;
use crate::trigger::{ActionTarget, ConditionKind, FileChangeGate, Trigger};
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Artifact registry access.
#[async_trait]
pub trait ArtifactRegistryClient: Send + Sync {
    /// Request a collection now and return the newest approved artifact.
    async fn collect_latest(&self, stream_id: ArtifactStreamId) -> Result<Option<Artifact>>;

    /// Collect a specific build, passing runtime inputs for parameterized streams.
    async fn collect_with_parameters(
        &self,
        stream_id: ArtifactStreamId,
        build_number: &str,
        parameters: &HashMap<String, String>,
    ) -> Result<Option<Artifact>>;

    /// Newest collected artifact whose build number equals (or, with `regex`,
    /// contains a match of) `build_number`.
    async fn get_by_build_number(
        &self,
        stream_id: ArtifactStreamId,
        build_number: &str,
        regex: bool,
    ) -> Result<Option<Artifact>>;
}

/// Manifest (Helm chart) registry access.
#[async_trait]
pub trait ManifestRegistryClient: Send + Sync {
    async fn collect_latest(&self, manifest_id: AppManifestId) -> Result<Option<HelmChart>>;

    /// Newest collected version equal to (or, with `regex`, matching) `version`.
    async fn get_by_version(
        &self,
        manifest_id: AppManifestId,
        version: &str,
        regex: bool,
    ) -> Result<Option<HelmChart>>;

    /// Collect a specific version on demand.
    async fn collect_version(
        &self,
        manifest_id: AppManifestId,
        version: &str,
    ) -> Result<Option<HelmChart>>;

    async fn is_polling_enabled(&self, manifest_id: AppManifestId) -> Result<bool>;

    async fn get_manifest(
        &self,
        app_id: AppId,
        manifest_id: AppManifestId,
    ) -> Result<Option<ApplicationManifest>>;

    async fn manifests_for_service(
        &self,
        app_id: AppId,
        service_id: ServiceId,
    ) -> Result<Vec<ApplicationManifest>>;
}

/// Starts deployments.
#[async_trait]
pub trait DeploymentExecutor: Send + Sync {
    /// Start an execution. Freeze windows surface as `Error::FreezeRejected`.
    async fn trigger_execution(
        &self,
        app_id: AppId,
        env_id: Option<EnvironmentId>,
        args: &ExecutionArgs,
        trigger: &Trigger,
    ) -> Result<Execution>;
}

/// Records of previous successful deployments.
#[async_trait]
pub trait DeploymentHistory: Send + Sync {
    async fn last_good_artifacts(
        &self,
        app_id: AppId,
        target: ActionTarget,
    ) -> Result<Vec<Artifact>>;

    async fn last_good_helm_charts(
        &self,
        app_id: AppId,
        target: ActionTarget,
    ) -> Result<Vec<HelmChart>>;

    /// Arguments of the last successful run of a workflow for a service and environment.
    async fn last_execution_args(
        &self,
        app_id: AppId,
        workflow_id: WorkflowId,
        service_id: ServiceId,
        env_id: EnvironmentId,
    ) -> Result<Option<ExecutionArgs>>;
}

/// Trigger persistence.
#[async_trait]
pub trait TriggerStore: Send + Sync {
    async fn get(&self, app_id: AppId, id: TriggerId) -> Result<Option<Trigger>>;

    async fn find_by_webhook_token(&self, token: &str) -> Result<Option<Trigger>>;

    /// All triggers of an application with the given condition kind.
    async fn list_by_condition(&self, app_id: AppId, kind: ConditionKind) -> Result<Vec<Trigger>>;

    async fn save(&self, trigger: &Trigger) -> Result<()>;

    async fn delete(&self, app_id: AppId, id: TriggerId) -> Result<bool>;
}

#[async_trait]
pub trait ArtifactStreamStore: Send + Sync {
    async fn get(&self, id: ArtifactStreamId) -> Result<Option<ArtifactStream>>;

    async fn list_for_service(
        &self,
        app_id: AppId,
        service_id: ServiceId,
    ) -> Result<Vec<ArtifactStream>>;
}

#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn get(&self, app_id: AppId, id: PipelineId) -> Result<Option<Pipeline>>;
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn get(&self, app_id: AppId, id: WorkflowId) -> Result<Option<Workflow>>;
}

/// Lookups used to resolve entity-typed template variables.
#[async_trait]
pub trait EntityLookup: Send + Sync {
    async fn application(&self, app_id: AppId) -> Result<Option<Application>>;

    async fn environment(&self, app_id: AppId, id: EnvironmentId) -> Result<Option<Environment>>;

    async fn environment_by_name(&self, app_id: AppId, name: &str)
    -> Result<Option<Environment>>;

    async fn service(&self, app_id: AppId, id: ServiceId) -> Result<Option<Service>>;

    async fn service_by_name(&self, app_id: AppId, name: &str) -> Result<Option<Service>>;

    async fn infra_definition(
        &self,
        app_id: AppId,
        env_id: EnvironmentId,
        id: InfraDefinitionId,
    ) -> Result<Option<InfraDefinition>>;

    async fn infra_definition_by_name(
        &self,
        app_id: AppId,
        env_id: EnvironmentId,
        name: &str,
    ) -> Result<Option<InfraDefinition>>;
}

/// Create-once key store backing the idempotency guard.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically create a pending record unless an unexpired, non-failed one exists.
    async fn try_create(&self, key: &str, ttl: Duration) -> Result<Acquisition>;

    async fn mark_succeeded(&self, key: &str, execution_id: Option<ExecutionId>) -> Result<()>;

    async fn mark_failed(&self, key: &str) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>>;
}

/// Delivers freeze rejection notices.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn notify_freeze_rejection(
        &self,
        account_id: AccountId,
        app_id: AppId,
        window_ids: &[String],
        placeholders: &HashMap<String, String>,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentChange {
    Changed,
    Unchanged,
    /// No verdict yet; a background re-check must decide.
    NeedsRecheck,
}

/// Tracks whether files gated by a webhook trigger changed.
#[async_trait]
pub trait ContentChangeChecker: Send + Sync {
    async fn check(&self, trigger: &Trigger, gate: &FileChangeGate) -> Result<ContentChange>;

    /// Re-check asynchronously, then report back via the engine.
    async fn schedule_recheck(&self, trigger: &Trigger, args: &ExecutionArgs) -> Result<()>;
}

/// External cron scheduler that delivers ticks.
#[async_trait]
pub trait CronScheduler: Send + Sync {
    async fn register(&self, trigger_id: TriggerId, app_id: AppId, expression: &str)
    -> Result<()>;

    async fn unregister(&self, trigger_id: TriggerId) -> Result<()>;
}

#[async_trait]
pub trait FeatureFlagSource: Send + Sync {
    async fn flags(&self, account_id: AccountId) -> Result<FeatureFlags>;
}
