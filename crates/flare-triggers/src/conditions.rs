//! Per-condition matching of triggers against events.

use crate::filter::FilterMatcher;
use crate::selection::EventInputs;
use flare_core::events::{TriggerEvent, WebhookPayload};
use flare_core::flags::FeatureFlags;
use flare_core::ports::{ContentChange, ContentChangeChecker, ManifestRegistryClient};
use flare_core::trigger::{
    ArtifactCondition, ArtifactSelectionKind, ServiceInfraWorkflow, Trigger, TriggerCondition,
    WebhookCondition,
};
use flare_core::{Error, Result};
use std::sync::Arc;
use tracing::debug;

/// Result of evaluating one trigger against one event.
#[derive(Debug, Clone)]
pub enum Evaluation {
    NotApplicable,
    /// One entry per dispatch the trigger fires.
    Matched(Vec<EventInputs>),
    /// New-instance pairings whose last execution should run again.
    Rerun(Vec<ServiceInfraWorkflow>),
    Skipped(String),
    /// The file-change gate has no verdict yet.
    AwaitingContentCheck(EventInputs),
}

impl Evaluation {
    pub fn is_applicable(&self) -> bool {
        !matches!(self, Evaluation::NotApplicable)
    }
}

pub struct ConditionEvaluator {
    filter: FilterMatcher,
    manifests: Arc<dyn ManifestRegistryClient>,
    content_changes: Option<Arc<dyn ContentChangeChecker>>,
}

impl ConditionEvaluator {
    pub fn new(
        manifests: Arc<dyn ManifestRegistryClient>,
        content_changes: Option<Arc<dyn ContentChangeChecker>>,
    ) -> Self {
        Self {
            filter: FilterMatcher::new(),
            manifests,
            content_changes,
        }
    }

    /// Decide whether `trigger` fires for `event`.
    ///
    /// Errors are scoped to this trigger: an invalid filter or a rejected
    /// webhook call never affects other candidates of the same event.
    pub async fn evaluate(
        &self,
        trigger: &Trigger,
        event: &TriggerEvent,
        flags: &FeatureFlags,
    ) -> Result<Evaluation> {
        if trigger.disabled {
            debug!(trigger_id = %trigger.id, "Trigger rejected due to being disabled");
            return Ok(Evaluation::NotApplicable);
        }

        match (&trigger.condition, event) {
            (TriggerCondition::NewArtifact(condition), TriggerEvent::ArtifactsCollected(payload)) => {
                if condition.artifact_stream_id != payload.artifact_stream_id {
                    return Ok(Evaluation::NotApplicable);
                }
                let matched = self.filter.matching_artifacts(
                    &payload.artifacts,
                    condition.artifact_filter.as_deref(),
                    condition.regex,
                )?;
                if matched.is_empty() {
                    debug!(
                        trigger_id = %trigger.id,
                        filter = ?condition.artifact_filter,
                        "No collected artifact matched the filter"
                    );
                    return Ok(Evaluation::NotApplicable);
                }
                let matched: Vec<_> = matched.into_iter().cloned().collect();
                Ok(Evaluation::Matched(artifact_groups(trigger, condition, matched, flags)))
            }
            (TriggerCondition::NewManifest(condition), TriggerEvent::ManifestsCollected(payload)) => {
                if condition.app_manifest_id != payload.app_manifest_id {
                    return Ok(Evaluation::NotApplicable);
                }
                if !self.manifests.is_polling_enabled(payload.app_manifest_id).await? {
                    debug!(trigger_id = %trigger.id, "Manifest polling disabled");
                    return Ok(Evaluation::NotApplicable);
                }
                let matched = self
                    .filter
                    .matching_charts(&payload.helm_charts, condition.version_regex.as_deref())?;
                if matched.is_empty() {
                    return Ok(Evaluation::NotApplicable);
                }
                let charts = matched.into_iter().cloned().collect();
                Ok(Evaluation::Matched(vec![EventInputs::Manifests(charts)]))
            }
            (
                TriggerCondition::PipelineCompletion(condition),
                TriggerEvent::PipelineCompleted(payload),
            ) => {
                if condition.pipeline_id != payload.pipeline_id {
                    return Ok(Evaluation::NotApplicable);
                }
                Ok(Evaluation::Matched(vec![EventInputs::SourcePipeline(
                    payload.pipeline_id,
                )]))
            }
            (TriggerCondition::Scheduled(_), TriggerEvent::CronTick(payload)) => {
                if trigger.id != payload.trigger_id {
                    return Ok(Evaluation::NotApplicable);
                }
                Ok(Evaluation::Matched(vec![EventInputs::None]))
            }
            (TriggerCondition::Webhook(condition), TriggerEvent::Webhook(payload)) => {
                self.evaluate_webhook(trigger, condition, payload, flags).await
            }
            (TriggerCondition::NewInstance(_), TriggerEvent::NewInstance(payload)) => {
                let pairings: Vec<ServiceInfraWorkflow> = trigger
                    .service_infra_workflows
                    .iter()
                    .filter(|p| p.infra_mapping_id == payload.infra_mapping_id)
                    .copied()
                    .collect();
                if pairings.is_empty() {
                    return Ok(Evaluation::NotApplicable);
                }
                Ok(Evaluation::Rerun(pairings))
            }
            _ => Ok(Evaluation::NotApplicable),
        }
    }

    async fn evaluate_webhook(
        &self,
        trigger: &Trigger,
        condition: &WebhookCondition,
        payload: &WebhookPayload,
        flags: &FeatureFlags,
    ) -> Result<Evaluation> {
        if let Some(token) = &condition.token {
            if token.token != payload.token {
                return Ok(Evaluation::NotApplicable);
            }
        }

        let request = &payload.request;
        if let Some(event_type) = request.event_type {
            if !condition.event_types.is_empty() && !condition.event_types.contains(&event_type) {
                debug!(trigger_id = %trigger.id, event_type = ?event_type, "Webhook event type not tracked");
                return Ok(Evaluation::NotApplicable);
            }
        }

        if flags.webhook_authentication {
            if let Some(secret) = condition.secret.as_deref().filter(|s| !s.is_empty()) {
                if request.secret.as_deref() != Some(secret) {
                    return Err(Error::WebhookRejected(format!(
                        "Secret mismatch for trigger [{}]",
                        trigger.name
                    )));
                }
            }
        }

        let inputs = EventInputs::Webhook(request.clone());
        let Some(gate) = &condition.file_change else {
            return Ok(Evaluation::Matched(vec![inputs]));
        };
        let checker = self.content_changes.as_ref().ok_or_else(|| {
            Error::Internal("file change gate configured without a content checker".to_string())
        })?;
        match checker.check(trigger, gate).await? {
            ContentChange::Changed => Ok(Evaluation::Matched(vec![inputs])),
            ContentChange::Unchanged => Ok(Evaluation::Skipped(format!(
                "No change in tracked files on branch {}",
                gate.branch
            ))),
            ContentChange::NeedsRecheck => Ok(Evaluation::AwaitingContentCheck(inputs)),
        }
    }
}

/// Split matched artifacts into dispatch groups.
///
/// Without fan-out every match travels in one dispatch. With fan-out each
/// artifact gets its own dispatch, unless an explicit selection other than
/// `ARTIFACT_SOURCE` already decides the artifact for the triggering service.
fn artifact_groups(
    trigger: &Trigger,
    condition: &ArtifactCondition,
    matched: Vec<flare_core::artifact::Artifact>,
    flags: &FeatureFlags,
) -> Vec<EventInputs> {
    if !flags.trigger_for_all_artifacts || matched.len() < 2 {
        return vec![EventInputs::Artifacts(matched)];
    }
    let overridden = matched.iter().any(|a| {
        trigger.artifact_selection_for(a.service_id).is_some_and(|s| {
            !matches!(s.kind, ArtifactSelectionKind::ArtifactSource)
        })
    });
    if overridden {
        debug!(
            trigger_id = %trigger.id,
            stream_id = %condition.artifact_stream_id,
            "Explicit selection covers the triggering service, firing once"
        );
        return vec![EventInputs::Artifacts(matched)];
    }
    matched
        .into_iter()
        .map(|a| EventInputs::Artifacts(vec![a]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use flare_core::artifact::{ApplicationManifest, Artifact, HelmChart};
    use flare_core::events::{ArtifactsCollectedPayload, CronTickPayload, WebhookRequest};
    use flare_core::ids::*;
    use flare_core::trigger::{ActionTarget, ArtifactSelection, WebhookEventType, WebhookToken};
    use std::collections::HashMap;

    struct NoManifests;

    #[async_trait]
    impl ManifestRegistryClient for NoManifests {
        async fn collect_latest(&self, _: AppManifestId) -> Result<Option<HelmChart>> {
            Ok(None)
        }
        async fn get_by_version(&self, _: AppManifestId, _: &str, _: bool) -> Result<Option<HelmChart>> {
            Ok(None)
        }
        async fn collect_version(&self, _: AppManifestId, _: &str) -> Result<Option<HelmChart>> {
            Ok(None)
        }
        async fn is_polling_enabled(&self, _: AppManifestId) -> Result<bool> {
            Ok(false)
        }
        async fn get_manifest(&self, _: AppId, _: AppManifestId) -> Result<Option<ApplicationManifest>> {
            Ok(None)
        }
        async fn manifests_for_service(&self, _: AppId, _: ServiceId) -> Result<Vec<ApplicationManifest>> {
            Ok(vec![])
        }
    }

    fn evaluator() -> ConditionEvaluator {
        ConditionEvaluator::new(Arc::new(NoManifests), None)
    }

    fn trigger(condition: TriggerCondition) -> Trigger {
        Trigger {
            id: TriggerId::new(),
            account_id: AccountId::new(),
            app_id: AppId::new(),
            name: "deploy-catalog".into(),
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

    fn artifact(stream: ArtifactStreamId, service: ServiceId, build_no: &str) -> Artifact {
        Artifact {
            id: ArtifactId::new(),
            app_id: AppId::new(),
            artifact_stream_id: stream,
            service_id: service,
            build_no: build_no.into(),
            source_name: "docker".into(),
            metadata: HashMap::new(),
            duplicate: false,
            created_at: Utc::now(),
        }
    }

    fn collected(stream: ArtifactStreamId, artifacts: Vec<Artifact>) -> TriggerEvent {
        TriggerEvent::ArtifactsCollected(ArtifactsCollectedPayload {
            app_id: AppId::new(),
            artifact_stream_id: stream,
            artifacts,
        })
    }

    fn release_trigger(stream: ArtifactStreamId) -> Trigger {
        trigger(TriggerCondition::NewArtifact(ArtifactCondition {
            artifact_stream_id: stream,
            artifact_filter: Some("^release".into()),
            regex: true,
        }))
    }

    #[tokio::test]
    async fn test_union_without_fan_out() {
        let stream = ArtifactStreamId::new();
        let service = ServiceId::new();
        let event = collected(
            stream,
            vec![
                artifact(stream, service, "release23"),
                artifact(stream, service, "release456"),
                artifact(stream, service, "snapshot"),
            ],
        );
        let evaluation = evaluator()
            .evaluate(&release_trigger(stream), &event, &FeatureFlags::default())
            .await
            .unwrap();
        let Evaluation::Matched(groups) = evaluation else {
            panic!("expected a match");
        };
        assert_eq!(groups.len(), 1);
        let EventInputs::Artifacts(artifacts) = &groups[0] else {
            panic!("expected artifacts");
        };
        assert_eq!(artifacts.len(), 2);
    }

    #[tokio::test]
    async fn test_fan_out_per_artifact() {
        let stream = ArtifactStreamId::new();
        let service = ServiceId::new();
        let event = collected(
            stream,
            vec![
                artifact(stream, service, "release23"),
                artifact(stream, service, "release456"),
            ],
        );
        let flags = FeatureFlags::default().with_trigger_for_all_artifacts(true);
        let evaluation = evaluator()
            .evaluate(&release_trigger(stream), &event, &flags)
            .await
            .unwrap();
        let Evaluation::Matched(groups) = evaluation else {
            panic!("expected a match");
        };
        assert_eq!(groups.len(), 2);
    }

    #[tokio::test]
    async fn test_explicit_selection_suppresses_fan_out() {
        let stream = ArtifactStreamId::new();
        let service = ServiceId::new();
        let mut trigger = release_trigger(stream);
        trigger.artifact_selections.push(ArtifactSelection {
            service_id: service,
            service_name: None,
            kind: ArtifactSelectionKind::LastCollected {
                artifact_stream_id: stream,
                artifact_filter: None,
                regex: false,
            },
        });
        let event = collected(
            stream,
            vec![
                artifact(stream, service, "release23"),
                artifact(stream, service, "release456"),
            ],
        );
        let flags = FeatureFlags::default().with_trigger_for_all_artifacts(true);
        let Evaluation::Matched(groups) = evaluator().evaluate(&trigger, &event, &flags).await.unwrap()
        else {
            panic!("expected a match");
        };
        assert_eq!(groups.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_regex_is_an_error() {
        let stream = ArtifactStreamId::new();
        let trigger = trigger(TriggerCondition::NewArtifact(ArtifactCondition {
            artifact_stream_id: stream,
            artifact_filter: Some("[release".into()),
            regex: true,
        }));
        let event = collected(stream, vec![artifact(stream, ServiceId::new(), "release1")]);
        let err = evaluator()
            .evaluate(&trigger, &event, &FeatureFlags::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArtifactFilter(_)));
    }

    #[tokio::test]
    async fn test_disabled_and_foreign_ticks_do_not_apply() {
        let mut scheduled = trigger(TriggerCondition::Scheduled(
            flare_core::trigger::ScheduledCondition {
                cron_expression: "0/15 * ? * *".into(),
                on_new_artifact_only: false,
            },
        ));
        let tick = |trigger_id| {
            TriggerEvent::CronTick(CronTickPayload {
                app_id: AppId::new(),
                trigger_id,
                scheduled_at: Utc::now(),
            })
        };
        let flags = FeatureFlags::default();
        let own = evaluator().evaluate(&scheduled, &tick(scheduled.id), &flags).await.unwrap();
        assert!(own.is_applicable());
        let foreign = evaluator().evaluate(&scheduled, &tick(TriggerId::new()), &flags).await.unwrap();
        assert!(!foreign.is_applicable());

        scheduled.disabled = true;
        let disabled = evaluator().evaluate(&scheduled, &tick(scheduled.id), &flags).await.unwrap();
        assert!(!disabled.is_applicable());
    }

    #[tokio::test]
    async fn test_webhook_secret_and_event_type() {
        let trigger = trigger(TriggerCondition::Webhook(WebhookCondition {
            token: Some(WebhookToken {
                token: "tok".into(),
                http_method: "POST".into(),
                payload: "{}".into(),
            }),
            secret: Some("s3cret".into()),
            event_types: vec![WebhookEventType::Push],
            ..Default::default()
        }));
        let event = |secret: Option<&str>, event_type| {
            TriggerEvent::Webhook(WebhookPayload {
                token: "tok".into(),
                request: WebhookRequest {
                    secret: secret.map(str::to_string),
                    event_type,
                    ..Default::default()
                },
            })
        };
        let flags = FeatureFlags::default().with_webhook_authentication(true);

        let ok = evaluator()
            .evaluate(&trigger, &event(Some("s3cret"), Some(WebhookEventType::Push)), &flags)
            .await
            .unwrap();
        assert!(matches!(ok, Evaluation::Matched(_)));

        let err = evaluator()
            .evaluate(&trigger, &event(Some("nope"), Some(WebhookEventType::Push)), &flags)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::WebhookRejected(_)));

        let other = evaluator()
            .evaluate(&trigger, &event(Some("s3cret"), Some(WebhookEventType::Release)), &flags)
            .await
            .unwrap();
        assert!(!other.is_applicable());
    }
}
