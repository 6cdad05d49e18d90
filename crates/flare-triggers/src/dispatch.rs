//! Dispatch of resolved firings to the deployment executor.

use crate::selection::ResolvedInputs;
use crate::variables::VariableResolver;
use flare_core::artifact::{Artifact, HelmChart};
use flare_core::deployment::{DeploymentTarget, Execution, ExecutionArgs, TriggeredBy};
use flare_core::ports::{DeploymentExecutor, EntityLookup, NotificationSender};
use flare_core::trigger::Trigger;
use flare_core::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub const TRIGGER_NAME: &str = "TRIGGER_NAME";
pub const APP_NAME: &str = "APP_NAME";
pub const WORKFLOW_NAME: &str = "WORKFLOW_NAME";
pub const TRIGGER_URL: &str = "TRIGGER_URL";

/// Builds execution arguments and hands them to the executor.
pub struct DispatchCoordinator {
    executor: Arc<dyn DeploymentExecutor>,
    notifier: Arc<dyn NotificationSender>,
    entities: Arc<dyn EntityLookup>,
    variables: VariableResolver,
    timeout: Duration,
    portal_url: String,
}

impl DispatchCoordinator {
    pub fn new(
        executor: Arc<dyn DeploymentExecutor>,
        notifier: Arc<dyn NotificationSender>,
        entities: Arc<dyn EntityLookup>,
        timeout: Duration,
        portal_url: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            notifier,
            variables: VariableResolver::new(entities.clone()),
            entities,
            timeout,
            portal_url: portal_url.into(),
        }
    }

    /// Resolve variables and build execution arguments for one firing.
    pub async fn prepare(
        &self,
        trigger: &Trigger,
        target: &DeploymentTarget,
        resolved: ResolvedInputs,
        parameters: &HashMap<String, String>,
    ) -> Result<ExecutionArgs> {
        if trigger.require_all_artifacts {
            check_required_artifacts(trigger, target, &resolved.artifacts)?;
        }
        let variables = self.variables.resolve(trigger, target, parameters).await?;

        Ok(ExecutionArgs {
            target: trigger.action,
            env_id: variables.env_id.or(target.env_id()),
            artifacts: dedup_artifacts(resolved.artifacts),
            helm_charts: dedup_charts(resolved.helm_charts),
            workflow_variables: variables.values,
            triggered_by: TriggeredBy {
                trigger_id: trigger.id,
                trigger_name: trigger.name.clone(),
            },
            continue_with_default_values: trigger.continue_with_default_values,
            exclude_hosts_with_same_artifact: trigger.exclude_hosts_with_same_artifact,
        })
    }

    /// Start the deployment.
    ///
    /// Freeze rejections are returned unchanged after a window-scoped
    /// rejection has been reported to the notification sender.
    pub async fn execute(
        &self,
        trigger: &Trigger,
        target: &DeploymentTarget,
        args: &ExecutionArgs,
    ) -> Result<Execution> {
        let call = self
            .executor
            .trigger_execution(trigger.app_id, args.env_id, args, trigger);
        let outcome = match tokio::time::timeout(self.timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(
                    trigger_id = %trigger.id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Deployment executor timed out"
                );
                return Err(Error::DispatchTimeout {
                    millis: self.timeout.as_millis() as u64,
                });
            }
        };

        match outcome {
            Ok(execution) => {
                info!(
                    trigger_id = %trigger.id,
                    execution_id = %execution.id,
                    artifacts = args.artifacts.len(),
                    helm_charts = args.helm_charts.len(),
                    "Deployment triggered"
                );
                Ok(execution)
            }
            Err(Error::FreezeRejected {
                master_freeze,
                window_ids,
                message,
            }) => {
                warn!(
                    trigger_id = %trigger.id,
                    master_freeze,
                    windows = ?window_ids,
                    "Deployment rejected by freeze window"
                );
                if !master_freeze {
                    self.notify_freeze(trigger, target, &window_ids).await;
                }
                Err(Error::FreezeRejected {
                    master_freeze,
                    window_ids,
                    message,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn notify_freeze(&self, trigger: &Trigger, target: &DeploymentTarget, window_ids: &[String]) {
        let app_name = match self.entities.application(trigger.app_id).await {
            Ok(Some(app)) => app.name,
            _ => trigger.app_id.to_string(),
        };
        let mut placeholders = HashMap::new();
        placeholders.insert(TRIGGER_NAME.to_string(), trigger.name.clone());
        placeholders.insert(APP_NAME.to_string(), app_name);
        placeholders.insert(WORKFLOW_NAME.to_string(), target.name().to_string());
        placeholders.insert(
            TRIGGER_URL.to_string(),
            trigger_url(&self.portal_url, trigger),
        );

        // the rejection is what the caller acts on; delivery problems are only logged
        if let Err(e) = self
            .notifier
            .notify_freeze_rejection(trigger.account_id, trigger.app_id, window_ids, &placeholders)
            .await
        {
            warn!(trigger_id = %trigger.id, error = %e, "Failed to send freeze notification");
        }
    }
}

pub fn trigger_url(portal_url: &str, trigger: &Trigger) -> String {
    format!(
        "{}/#/account/{}/app/{}/triggers",
        portal_url.trim_end_matches('/'),
        trigger.account_id,
        trigger.app_id
    )
}

fn check_required_artifacts(
    trigger: &Trigger,
    target: &DeploymentTarget,
    artifacts: &[Artifact],
) -> Result<()> {
    let kind = target.action().kind_name();
    if !target.needs_artifacts() {
        if artifacts.is_empty() {
            return Ok(());
        }
        return Err(Error::UnexpectedArtifacts {
            trigger: trigger.name.clone(),
            reason: format!(
                "{kind} [{}] does not need artifacts. However, trigger received with the artifacts",
                target.name()
            ),
        });
    }

    let resolved: HashSet<_> = artifacts.iter().map(|a| a.service_id).collect();
    let missing: Vec<String> = target
        .services()
        .iter()
        .filter(|s| !resolved.contains(&s.id))
        .map(|s| s.name.clone())
        .collect();
    if !missing.is_empty() {
        return Err(Error::MissingArtifacts {
            trigger: trigger.name.clone(),
            services: missing,
        });
    }

    let required = target.service_ids();
    if artifacts.iter().any(|a| !required.contains(&a.service_id)) {
        return Err(Error::UnexpectedArtifacts {
            trigger: trigger.name.clone(),
            reason: format!(
                "More artifacts received than required artifacts for {kind} [{}]",
                target.name()
            ),
        });
    }
    Ok(())
}

fn dedup_artifacts(artifacts: Vec<Artifact>) -> Vec<Artifact> {
    let mut seen = HashSet::new();
    artifacts.into_iter().filter(|a| seen.insert(a.id)).collect()
}

fn dedup_charts(charts: Vec<HelmChart>) -> Vec<HelmChart> {
    let mut seen = HashSet::new();
    charts.into_iter().filter(|c| seen.insert(c.id)).collect()
}
