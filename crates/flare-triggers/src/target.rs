//! Loading the pipeline or workflow a trigger deploys.

use flare_core::deployment::DeploymentTarget;
use flare_core::ids::AppId;
use flare_core::ports::{PipelineStore, WorkflowStore};
use flare_core::trigger::ActionTarget;
use flare_core::{Error, Result};

pub async fn load_target(
    pipelines: &dyn PipelineStore,
    workflows: &dyn WorkflowStore,
    app_id: AppId,
    action: ActionTarget,
) -> Result<DeploymentTarget> {
    match action {
        ActionTarget::Pipeline { pipeline_id } => pipelines
            .get(app_id, pipeline_id)
            .await?
            .map(DeploymentTarget::Pipeline)
            .ok_or_else(|| Error::TargetNotFound {
                kind: "Pipeline",
                id: pipeline_id.to_string(),
            }),
        ActionTarget::Workflow { workflow_id } => workflows
            .get(app_id, workflow_id)
            .await?
            .map(DeploymentTarget::Workflow)
            .ok_or_else(|| Error::TargetNotFound {
                kind: "Workflow",
                id: workflow_id.to_string(),
            }),
    }
}
