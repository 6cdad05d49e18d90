//! Event entry point.
//!
//! The engine looks up candidate triggers for an event and processes each
//! of them on its own task: condition evaluation, selection resolution,
//! idempotency and dispatch. A failure in one trigger is reported as that
//! trigger's outcome and never affects the others.

use crate::conditions::{ConditionEvaluator, Evaluation};
use crate::config::EngineConfig;
use crate::cron::CronValidator;
use crate::dispatch::DispatchCoordinator;
use crate::idempotency::{Fingerprint, IdempotencyGuard};
use crate::lifecycle::TriggerLifecycle;
use crate::selection::{EventInputs, SelectionResolver};
use crate::target::load_target;
use crate::validation::TriggerValidator;
use crate::webhook::WebhookPayloadBuilder;
use chrono::{DateTime, Utc};
use flare_core::artifact::{Artifact, HelmChart};
use flare_core::deployment::{DeploymentTarget, ExecutionArgs, TriggeredBy};
use flare_core::events::*;
use flare_core::flags::FeatureFlags;
use flare_core::idempotency::Acquisition;
use flare_core::ids::*;
use flare_core::ports::*;
use flare_core::trigger::{
    ActionTarget, ConditionKind, ServiceInfraWorkflow, Trigger, TriggerCondition,
};
use flare_core::{Error, Result};
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Collaborators the engine drives.
#[derive(Clone)]
pub struct EnginePorts {
    pub triggers: Arc<dyn TriggerStore>,
    pub artifact_streams: Arc<dyn ArtifactStreamStore>,
    pub artifacts: Arc<dyn ArtifactRegistryClient>,
    pub manifests: Arc<dyn ManifestRegistryClient>,
    pub pipelines: Arc<dyn PipelineStore>,
    pub workflows: Arc<dyn WorkflowStore>,
    pub entities: Arc<dyn EntityLookup>,
    pub history: Arc<dyn DeploymentHistory>,
    pub executor: Arc<dyn DeploymentExecutor>,
    pub notifier: Arc<dyn NotificationSender>,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub content_changes: Option<Arc<dyn ContentChangeChecker>>,
    pub flag_source: Option<Arc<dyn FeatureFlagSource>>,
}

/// What happened to one trigger (or one fan-out group) for an event.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    NotApplicable,
    Skipped {
        reason: String,
    },
    /// The same firing was already acquired by an earlier or concurrent call.
    Duplicate {
        fingerprint: String,
        previous: Option<ExecutionId>,
    },
    /// Waiting for a background file-change check.
    Deferred,
    Dispatched {
        execution_id: ExecutionId,
        fingerprint: String,
    },
    /// Configuration or resolution error.
    Rejected {
        error: String,
    },
    Frozen {
        error: String,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerResult {
    pub trigger_id: TriggerId,
    pub trigger_name: String,
    pub outcome: TriggerOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventReport {
    pub kind: ConditionKind,
    pub results: Vec<TriggerResult>,
}

impl EventReport {
    /// True when at least one trigger matched, whatever happened next.
    pub fn matched(&self) -> bool {
        self.results
            .iter()
            .any(|r| r.outcome != TriggerOutcome::NotApplicable)
    }

    pub fn dispatched(&self) -> Vec<ExecutionId> {
        self.results
            .iter()
            .filter_map(|r| match &r.outcome {
                TriggerOutcome::Dispatched { execution_id, .. } => Some(*execution_id),
                _ => None,
            })
            .collect()
    }

    pub fn outcomes_for(&self, trigger_id: TriggerId) -> Vec<&TriggerOutcome> {
        self.results
            .iter()
            .filter(|r| r.trigger_id == trigger_id)
            .map(|r| &r.outcome)
            .collect()
    }
}

pub struct TriggerEngine {
    ports: EnginePorts,
    config: EngineConfig,
    evaluator: ConditionEvaluator,
    resolver: SelectionResolver,
    dispatcher: DispatchCoordinator,
    guard: IdempotencyGuard,
    semaphore: Arc<Semaphore>,
}

impl TriggerEngine {
    pub fn new(ports: EnginePorts, config: EngineConfig) -> Arc<Self> {
        let evaluator =
            ConditionEvaluator::new(ports.manifests.clone(), ports.content_changes.clone());
        let resolver = SelectionResolver::new(
            ports.artifact_streams.clone(),
            ports.artifacts.clone(),
            ports.manifests.clone(),
            ports.history.clone(),
            ports.entities.clone(),
        );
        let dispatcher = DispatchCoordinator::new(
            ports.executor.clone(),
            ports.notifier.clone(),
            ports.entities.clone(),
            config.dispatch_timeout(),
            config.portal_url.clone(),
        );
        let guard = IdempotencyGuard::new(ports.idempotency.clone());
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_dispatches.max(1)));

        Arc::new(Self {
            ports,
            config,
            evaluator,
            resolver,
            dispatcher,
            guard,
            semaphore,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Save-time counterpart sharing this engine's collaborators.
    pub fn lifecycle(&self, scheduler: Arc<dyn CronScheduler>) -> TriggerLifecycle {
        let validator = TriggerValidator::new(
            CronValidator::new(self.config.min_cron_interval_secs, self.config.cron_lookahead),
            self.ports.artifact_streams.clone(),
            self.ports.manifests.clone(),
            self.ports.pipelines.clone(),
            self.ports.workflows.clone(),
        );
        let webhooks = WebhookPayloadBuilder::new(
            self.ports.pipelines.clone(),
            self.ports.workflows.clone(),
            self.ports.artifact_streams.clone(),
            self.ports.manifests.clone(),
        );
        TriggerLifecycle::new(self.ports.triggers.clone(), validator, webhooks, scheduler)
    }

    pub async fn on_artifacts_collected(
        self: &Arc<Self>,
        app_id: AppId,
        artifact_stream_id: ArtifactStreamId,
        artifacts: Vec<Artifact>,
    ) -> Result<EventReport> {
        self.handle(TriggerEvent::ArtifactsCollected(ArtifactsCollectedPayload {
            app_id,
            artifact_stream_id,
            artifacts,
        }))
        .await
    }

    pub async fn on_pipeline_completed(
        self: &Arc<Self>,
        app_id: AppId,
        pipeline_id: PipelineId,
        execution_id: Option<ExecutionId>,
    ) -> Result<EventReport> {
        self.handle(TriggerEvent::PipelineCompleted(PipelineCompletedPayload {
            app_id,
            pipeline_id,
            execution_id,
        }))
        .await
    }

    pub async fn on_cron_tick(
        self: &Arc<Self>,
        app_id: AppId,
        trigger_id: TriggerId,
        scheduled_at: DateTime<Utc>,
    ) -> Result<EventReport> {
        self.handle(TriggerEvent::CronTick(CronTickPayload {
            app_id,
            trigger_id,
            scheduled_at,
        }))
        .await
    }

    pub async fn on_webhook(
        self: &Arc<Self>,
        token: impl Into<String>,
        request: WebhookRequest,
    ) -> Result<EventReport> {
        self.handle(TriggerEvent::Webhook(WebhookPayload {
            token: token.into(),
            request,
        }))
        .await
    }

    pub async fn on_manifests_collected(
        self: &Arc<Self>,
        app_id: AppId,
        app_manifest_id: AppManifestId,
        helm_charts: Vec<HelmChart>,
    ) -> Result<EventReport> {
        self.handle(TriggerEvent::ManifestsCollected(ManifestsCollectedPayload {
            app_id,
            app_manifest_id,
            helm_charts,
        }))
        .await
    }

    pub async fn on_new_instance(
        self: &Arc<Self>,
        app_id: AppId,
        infra_mapping_id: InfraMappingId,
        service_id: ServiceId,
        env_id: EnvironmentId,
    ) -> Result<EventReport> {
        self.handle(TriggerEvent::NewInstance(NewInstancePayload {
            app_id,
            infra_mapping_id,
            service_id,
            env_id,
        }))
        .await
    }

    /// Finish a webhook firing that waited on a file-change check.
    pub async fn on_content_check_complete(
        &self,
        app_id: AppId,
        trigger_id: TriggerId,
        args: ExecutionArgs,
        changed: bool,
    ) -> Result<EventReport> {
        let trigger = self
            .ports
            .triggers
            .get(app_id, trigger_id)
            .await?
            .ok_or_else(|| Error::TriggerNotFound(trigger_id.to_string()))?;

        let outcome = if changed {
            self.dispatch_deferred(&trigger, &args)
                .await
                .unwrap_or_else(|e| outcome_for_error(&trigger, e))
        } else {
            TriggerOutcome::Skipped {
                reason: "No change in tracked files".to_string(),
            }
        };
        Ok(EventReport {
            kind: ConditionKind::Webhook,
            results: vec![TriggerResult {
                trigger_id: trigger.id,
                trigger_name: trigger.name,
                outcome,
            }],
        })
    }

    /// Process an event with the flags of the owning account.
    ///
    /// Workers run on a detached task: dropping the returned future stops
    /// waiting for the report but lets started dispatches finish and settle
    /// their idempotency records.
    pub async fn handle(self: &Arc<Self>, event: TriggerEvent) -> Result<EventReport> {
        let candidates = self.candidates(&event).await?;
        let flags = match candidates.first() {
            Some(trigger) => self.flags_for(trigger.account_id).await,
            None => FeatureFlags::default(),
        };
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.run(event, candidates, flags).await })
            .await
            .map_err(|e| Error::Internal(format!("event worker did not complete: {e}")))
    }

    async fn candidates(&self, event: &TriggerEvent) -> Result<Vec<Trigger>> {
        let triggers = &self.ports.triggers;
        let kind = event.condition_kind();
        match event {
            TriggerEvent::ArtifactsCollected(p) => triggers.list_by_condition(p.app_id, kind).await,
            TriggerEvent::PipelineCompleted(p) => triggers.list_by_condition(p.app_id, kind).await,
            TriggerEvent::ManifestsCollected(p) => triggers.list_by_condition(p.app_id, kind).await,
            TriggerEvent::NewInstance(p) => triggers.list_by_condition(p.app_id, kind).await,
            TriggerEvent::CronTick(p) => triggers
                .get(p.app_id, p.trigger_id)
                .await?
                .map(|t| vec![t])
                .ok_or_else(|| Error::TriggerNotFound(p.trigger_id.to_string())),
            TriggerEvent::Webhook(p) => triggers
                .find_by_webhook_token(&p.token)
                .await?
                .map(|t| vec![t])
                .ok_or_else(|| Error::TriggerNotFound("No trigger bound to the webhook token".to_string())),
        }
    }

    async fn flags_for(&self, account_id: AccountId) -> FeatureFlags {
        let Some(source) = &self.ports.flag_source else {
            return FeatureFlags::default();
        };
        match source.flags(account_id).await {
            Ok(flags) => flags,
            Err(e) => {
                warn!(account_id = %account_id, error = %e, "Failed to read feature flags, using defaults");
                FeatureFlags::default()
            }
        }
    }

    async fn run(
        self: &Arc<Self>,
        event: TriggerEvent,
        candidates: Vec<Trigger>,
        flags: FeatureFlags,
    ) -> EventReport {
        let kind = event.condition_kind();
        let event = Arc::new(event);
        debug!(event = %kind, candidates = candidates.len(), "Evaluating triggers");

        let mut pending: HashMap<usize, (TriggerId, String)> = HashMap::new();
        let mut tasks = JoinSet::new();
        for (index, trigger) in candidates.into_iter().enumerate() {
            pending.insert(index, (trigger.id, trigger.name.clone()));
            let engine = Arc::clone(self);
            let event = Arc::clone(&event);
            let semaphore = Arc::clone(&self.semaphore);
            let span = info_span!("trigger", trigger_id = %trigger.id, event = %kind);
            tasks.spawn(
                async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    let outcomes = AssertUnwindSafe(engine.fire(&trigger, &event, flags))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| {
                            let message = panic
                                .downcast_ref::<&str>()
                                .map(|s| s.to_string())
                                .or_else(|| panic.downcast_ref::<String>().cloned())
                                .unwrap_or_else(|| "trigger worker panicked".to_string());
                            error!(error = %message, "Trigger worker panicked");
                            vec![TriggerOutcome::Failed { error: message }]
                        });
                    (index, outcomes)
                }
                .instrument(span),
            );
        }

        let mut collected: Vec<(usize, TriggerResult)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcomes)) => {
                    let Some((trigger_id, trigger_name)) = pending.remove(&index) else {
                        continue;
                    };
                    for outcome in outcomes {
                        collected.push((
                            index,
                            TriggerResult {
                                trigger_id,
                                trigger_name: trigger_name.clone(),
                                outcome,
                            },
                        ));
                    }
                }
                Err(e) => error!(error = %e, "Trigger worker did not complete"),
            }
        }
        for (index, (trigger_id, trigger_name)) in pending {
            collected.push((
                index,
                TriggerResult {
                    trigger_id,
                    trigger_name,
                    outcome: TriggerOutcome::Failed {
                        error: "trigger worker did not complete".to_string(),
                    },
                },
            ));
        }
        collected.sort_by_key(|(index, _)| *index);

        EventReport {
            kind,
            results: collected.into_iter().map(|(_, result)| result).collect(),
        }
    }

    async fn fire(
        &self,
        trigger: &Trigger,
        event: &TriggerEvent,
        flags: FeatureFlags,
    ) -> Vec<TriggerOutcome> {
        let evaluation = match self.evaluator.evaluate(trigger, event, &flags).await {
            Ok(evaluation) => evaluation,
            Err(e) => return vec![outcome_for_error(trigger, e)],
        };

        match evaluation {
            Evaluation::NotApplicable => vec![TriggerOutcome::NotApplicable],
            Evaluation::Skipped(reason) => {
                info!(trigger_id = %trigger.id, reason = %reason, "Trigger skipped");
                vec![TriggerOutcome::Skipped { reason }]
            }
            Evaluation::Rerun(pairings) => {
                let mut outcomes = Vec::with_capacity(pairings.len());
                for pairing in pairings {
                    let outcome = self
                        .rerun(trigger, event, pairing)
                        .await
                        .unwrap_or_else(|e| outcome_for_error(trigger, e));
                    outcomes.push(outcome);
                }
                outcomes
            }
            Evaluation::AwaitingContentCheck(inputs) => {
                let outcome = self
                    .defer(trigger, &inputs, flags)
                    .await
                    .unwrap_or_else(|e| outcome_for_error(trigger, e));
                vec![outcome]
            }
            Evaluation::Matched(groups) => {
                let target = match self.target(trigger.app_id, trigger.action).await {
                    Ok(target) => target,
                    Err(e) => return vec![outcome_for_error(trigger, e)],
                };
                let mut outcomes = Vec::with_capacity(groups.len());
                for inputs in groups {
                    let outcome = self
                        .fire_group(trigger, &target, event, &inputs, flags)
                        .await
                        .unwrap_or_else(|e| outcome_for_error(trigger, e));
                    outcomes.push(outcome);
                }
                outcomes
            }
        }
    }

    async fn fire_group(
        &self,
        trigger: &Trigger,
        target: &DeploymentTarget,
        event: &TriggerEvent,
        inputs: &EventInputs,
        flags: FeatureFlags,
    ) -> Result<TriggerOutcome> {
        let resolved = self.resolver.resolve(trigger, target, inputs, &flags).await?;

        if let TriggerCondition::Scheduled(condition) = &trigger.condition {
            if condition.on_new_artifact_only && !resolved.artifacts.is_empty() {
                let deployed: HashSet<ArtifactId> = self
                    .ports
                    .history
                    .last_good_artifacts(trigger.app_id, trigger.action)
                    .await?
                    .iter()
                    .map(|a| a.id)
                    .collect();
                if resolved.artifacts.iter().all(|a| deployed.contains(&a.id)) {
                    return Ok(TriggerOutcome::Skipped {
                        reason: "No new artifacts since the last successful deployment".to_string(),
                    });
                }
            }
        }

        let parameters = match inputs {
            EventInputs::Webhook(request) => request.parameters.clone(),
            _ => HashMap::new(),
        };
        let args = self
            .dispatcher
            .prepare(trigger, target, resolved, &parameters)
            .await?;
        let fingerprint = Fingerprint::derive(
            trigger.id,
            trigger.condition_kind(),
            &args.artifacts,
            &args.helm_charts,
            discriminator(event).as_deref(),
        );
        let ttl = match event {
            TriggerEvent::CronTick(_) => self.config.scheduled_idempotency_ttl(),
            _ => self.config.idempotency_ttl(),
        };
        self.dispatch_once(trigger, target, &args, fingerprint, ttl).await
    }

    /// Run the last successful execution of a paired workflow again.
    async fn rerun(
        &self,
        trigger: &Trigger,
        event: &TriggerEvent,
        pairing: ServiceInfraWorkflow,
    ) -> Result<TriggerOutcome> {
        let TriggerEvent::NewInstance(payload) = event else {
            return Err(Error::Internal(
                "new instance pairing evaluated for another event".to_string(),
            ));
        };
        let Some(mut args) = self
            .ports
            .history
            .last_execution_args(
                trigger.app_id,
                pairing.workflow_id,
                payload.service_id,
                payload.env_id,
            )
            .await?
        else {
            return Ok(TriggerOutcome::Skipped {
                reason: format!(
                    "No successful execution of workflow {} found for the service and environment",
                    pairing.workflow_id
                ),
            });
        };

        let action = ActionTarget::Workflow {
            workflow_id: pairing.workflow_id,
        };
        let target = self.target(trigger.app_id, action).await?;
        args.target = action;
        args.triggered_by = TriggeredBy {
            trigger_id: trigger.id,
            trigger_name: trigger.name.clone(),
        };

        let discriminator = format!(
            "{}:{}:{}",
            payload.infra_mapping_id, payload.env_id, pairing.workflow_id
        );
        let fingerprint = Fingerprint::derive(
            trigger.id,
            ConditionKind::NewInstance,
            &args.artifacts,
            &args.helm_charts,
            Some(&discriminator),
        );
        self.dispatch_once(trigger, &target, &args, fingerprint, self.config.idempotency_ttl())
            .await
    }

    async fn defer(
        &self,
        trigger: &Trigger,
        inputs: &EventInputs,
        flags: FeatureFlags,
    ) -> Result<TriggerOutcome> {
        let checker = self.ports.content_changes.as_ref().ok_or_else(|| {
            Error::Internal("file change gate configured without a content checker".to_string())
        })?;
        let target = self.target(trigger.app_id, trigger.action).await?;
        let resolved = self.resolver.resolve(trigger, &target, inputs, &flags).await?;
        let parameters = match inputs {
            EventInputs::Webhook(request) => request.parameters.clone(),
            _ => HashMap::new(),
        };
        let args = self
            .dispatcher
            .prepare(trigger, &target, resolved, &parameters)
            .await?;
        checker.schedule_recheck(trigger, &args).await?;
        info!(trigger_id = %trigger.id, "Deferred until tracked file changes are known");
        Ok(TriggerOutcome::Deferred)
    }

    async fn dispatch_deferred(&self, trigger: &Trigger, args: &ExecutionArgs) -> Result<TriggerOutcome> {
        let target = self.target(trigger.app_id, trigger.action).await?;
        let mut variables: Vec<String> = args
            .workflow_variables
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        variables.sort();
        let fingerprint = Fingerprint::derive(
            trigger.id,
            ConditionKind::Webhook,
            &args.artifacts,
            &args.helm_charts,
            Some(&variables.join("&")),
        );
        self.dispatch_once(trigger, &target, args, fingerprint, self.config.idempotency_ttl())
            .await
    }

    async fn dispatch_once(
        &self,
        trigger: &Trigger,
        target: &DeploymentTarget,
        args: &ExecutionArgs,
        fingerprint: Fingerprint,
        ttl: Duration,
    ) -> Result<TriggerOutcome> {
        if let Acquisition::Present(record) = self.guard.with_lock(&fingerprint, ttl).await? {
            return Ok(TriggerOutcome::Duplicate {
                fingerprint: fingerprint.to_string(),
                previous: record.execution_id,
            });
        }

        match self.dispatcher.execute(trigger, target, args).await {
            Ok(execution) => {
                if let Err(e) = self.guard.on_success(&fingerprint, Some(execution.id)).await {
                    warn!(fingerprint = %fingerprint, error = %e, "Failed to record dispatch result");
                }
                Ok(TriggerOutcome::Dispatched {
                    execution_id: execution.id,
                    fingerprint: fingerprint.to_string(),
                })
            }
            Err(e) => {
                if let Err(release) = self.guard.on_failure(&fingerprint).await {
                    error!(fingerprint = %fingerprint, error = %release, "Failed to release firing lock");
                }
                Err(e)
            }
        }
    }

    async fn target(&self, app_id: AppId, action: ActionTarget) -> Result<DeploymentTarget> {
        load_target(
            self.ports.pipelines.as_ref(),
            self.ports.workflows.as_ref(),
            app_id,
            action,
        )
        .await
    }
}

/// Separates occurrences that resolve identical payloads.
fn discriminator(event: &TriggerEvent) -> Option<String> {
    match event {
        TriggerEvent::CronTick(p) => Some(p.scheduled_at.timestamp_millis().to_string()),
        TriggerEvent::PipelineCompleted(p) => p.execution_id.map(|id| id.to_string()),
        TriggerEvent::Webhook(p) if !p.request.parameters.is_empty() => {
            let mut parameters: Vec<String> = p
                .request
                .parameters
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            parameters.sort();
            Some(parameters.join("&"))
        }
        _ => None,
    }
}

fn outcome_for_error(trigger: &Trigger, err: Error) -> TriggerOutcome {
    if err.is_freeze_rejection() {
        return TriggerOutcome::Frozen {
            error: err.to_string(),
        };
    }
    if err.is_configuration_error() || err.is_resolution_error() {
        warn!(trigger_id = %trigger.id, error = %err, "Trigger rejected");
        return TriggerOutcome::Rejected {
            error: err.to_string(),
        };
    }
    error!(trigger_id = %trigger.id, error = %err, "Trigger dispatch failed");
    TriggerOutcome::Failed {
        error: err.to_string(),
    }
}
