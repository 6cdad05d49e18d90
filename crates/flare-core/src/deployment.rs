//! Deployment targets, entities, and the arguments handed to the executor.

use crate::artifact::{Artifact, HelmChart};
use crate::ids::*;
use crate::trigger::ActionTarget;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Application {
    pub id: AppId,
    pub account_id: AccountId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Service {
    pub id: ServiceId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Environment {
    pub id: EnvironmentId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InfraDefinition {
    pub id: InfraDefinitionId,
    pub env_id: EnvironmentId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InfraMapping {
    pub id: InfraMappingId,
    pub env_id: EnvironmentId,
    pub service_id: ServiceId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Environment,
    Service,
    InfraDefinition,
}

impl EntityType {
    pub fn label(&self) -> &'static str {
        match self {
            EntityType::Environment => "Environment",
            EntityType::Service => "Service",
            EntityType::InfraDefinition => "Infrastructure definition",
        }
    }
}

/// A user variable declared on a pipeline or workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Variable {
    pub name: String,
    #[serde(default)]
    pub entity_type: Option<EntityType>,
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default)]
    pub runtime_input: bool,
    #[serde(default)]
    pub allow_multiple_values: bool,
    #[serde(default)]
    pub default_value: Option<String>,
}

impl Variable {
    pub fn is_entity(&self, entity_type: EntityType) -> bool {
        self.entity_type == Some(entity_type)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    #[default]
    Standard,
    Build,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Pipeline {
    pub id: PipelineId,
    pub app_id: AppId,
    pub name: String,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub has_build_workflow: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Workflow {
    pub id: WorkflowId,
    pub app_id: AppId,
    pub name: String,
    #[serde(default)]
    pub env_id: Option<EnvironmentId>,
    #[serde(default)]
    pub kind: WorkflowKind,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub variables: Vec<Variable>,
}

/// A loaded pipeline or workflow.
#[derive(Debug, Clone, PartialEq)]
pub enum DeploymentTarget {
    Pipeline(Pipeline),
    Workflow(Workflow),
}

impl DeploymentTarget {
    pub fn name(&self) -> &str {
        match self {
            DeploymentTarget::Pipeline(p) => &p.name,
            DeploymentTarget::Workflow(w) => &w.name,
        }
    }

    pub fn action(&self) -> ActionTarget {
        match self {
            DeploymentTarget::Pipeline(p) => ActionTarget::Pipeline { pipeline_id: p.id },
            DeploymentTarget::Workflow(w) => ActionTarget::Workflow { workflow_id: w.id },
        }
    }

    pub fn services(&self) -> &[Service] {
        match self {
            DeploymentTarget::Pipeline(p) => &p.services,
            DeploymentTarget::Workflow(w) => &w.services,
        }
    }

    pub fn variables(&self) -> &[Variable] {
        match self {
            DeploymentTarget::Pipeline(p) => &p.variables,
            DeploymentTarget::Workflow(w) => &w.variables,
        }
    }

    pub fn env_id(&self) -> Option<EnvironmentId> {
        match self {
            DeploymentTarget::Pipeline(_) => None,
            DeploymentTarget::Workflow(w) => w.env_id,
        }
    }

    /// Build pipelines and workflows produce artifacts instead of consuming them.
    pub fn needs_artifacts(&self) -> bool {
        match self {
            DeploymentTarget::Pipeline(p) => !p.has_build_workflow,
            DeploymentTarget::Workflow(w) => w.kind != WorkflowKind::Build,
        }
    }

    pub fn service_ids(&self) -> HashSet<ServiceId> {
        self.services().iter().map(|s| s.id).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TriggeredBy {
    pub trigger_id: TriggerId,
    pub trigger_name: String,
}

/// Everything the executor needs to start one deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionArgs {
    pub target: ActionTarget,
    #[serde(default)]
    pub env_id: Option<EnvironmentId>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub helm_charts: Vec<HelmChart>,
    #[serde(default)]
    pub workflow_variables: HashMap<String, String>,
    pub triggered_by: TriggeredBy,
    #[serde(default)]
    pub continue_with_default_values: bool,
    #[serde(default)]
    pub exclude_hosts_with_same_artifact: bool,
}

impl ExecutionArgs {
    pub fn artifact_ids(&self) -> Vec<ArtifactId> {
        self.artifacts.iter().map(|a| a.id).collect()
    }

    pub fn helm_chart_ids(&self) -> Vec<HelmChartId> {
        self.helm_charts.iter().map(|c| c.id).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    New,
    Queued,
    Running,
    Success,
    Failed,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Execution {
    pub id: ExecutionId,
    pub app_id: AppId,
    #[serde(default)]
    pub env_id: Option<EnvironmentId>,
    pub status: ExecutionStatus,
}
