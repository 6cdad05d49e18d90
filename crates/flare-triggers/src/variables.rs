//! Resolution of trigger workflow variables.
//!
//! Runs in two passes. The first merges request parameters over the
//! trigger's values, substitutes `${...}` references, and classifies each
//! value. The second turns entity-typed values (environment, service,
//! infrastructure definition) into ids by id or name lookup.

use flare_core::deployment::{DeploymentTarget, EntityType, Variable};
use flare_core::ids::*;
use flare_core::interpolation::{self, VariableValue};
use flare_core::ports::EntityLookup;
use flare_core::trigger::Trigger;
use flare_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedVariables {
    pub values: HashMap<String, String>,
    /// Environment selected through a templatized environment variable.
    pub env_id: Option<EnvironmentId>,
}

pub struct VariableResolver {
    entities: Arc<dyn EntityLookup>,
}

impl VariableResolver {
    pub fn new(entities: Arc<dyn EntityLookup>) -> Self {
        Self { entities }
    }

    pub async fn resolve(
        &self,
        trigger: &Trigger,
        target: &DeploymentTarget,
        parameters: &HashMap<String, String>,
    ) -> Result<ResolvedVariables> {
        let mut values = merge(trigger, target, parameters);

        let mut entity_vars: Vec<&Variable> = target
            .variables()
            .iter()
            .filter(|v| v.entity_type.is_some())
            .collect();
        // environments first, infrastructure lookups need them
        entity_vars.sort_by_key(|v| match v.entity_type {
            Some(EntityType::Environment) => 0,
            Some(EntityType::Service) => 1,
            _ => 2,
        });

        let mut env_id = target.env_id();
        for variable in entity_vars {
            let Some(entity_type) = variable.entity_type else {
                continue;
            };
            let raw = values.get(&variable.name).cloned();
            let resolved = match VariableValue::classify(raw.as_deref()) {
                VariableValue::Missing => {
                    if entity_type == EntityType::Environment && !variable.runtime_input {
                        return Err(Error::InvalidTrigger(format!(
                            "{} contains environment as variable [{}]. However, there is no \
                             mapping associated in the trigger. Please update the trigger",
                            target.action().kind_name(),
                            variable.name
                        )));
                    }
                    continue;
                }
                VariableValue::Expression(expression) => {
                    if variable.runtime_input {
                        continue;
                    }
                    return Err(Error::EntityNotFound {
                        kind: entity_type.label(),
                        name: expression.to_string(),
                    });
                }
                VariableValue::Literal(value) => match entity_type {
                    EntityType::Environment => {
                        let id = self.environment(trigger.app_id, value).await?;
                        env_id = Some(id);
                        id.to_string()
                    }
                    EntityType::Service => self.service(trigger.app_id, value).await?.to_string(),
                    EntityType::InfraDefinition => {
                        let env_id = env_id.ok_or_else(|| Error::EntityNotFound {
                            kind: "Environment",
                            name: format!("for infrastructure variable {}", variable.name),
                        })?;
                        self.infra_definitions(trigger.app_id, env_id, variable, value)
                            .await?
                    }
                },
            };
            debug!(variable = %variable.name, value = %resolved, "Resolved entity variable");
            values.insert(variable.name.clone(), resolved);
        }

        Ok(ResolvedVariables { values, env_id })
    }

    async fn environment(&self, app_id: AppId, value: &str) -> Result<EnvironmentId> {
        if let Ok(id) = value.parse::<EnvironmentId>() {
            if let Some(env) = self.entities.environment(app_id, id).await? {
                return Ok(env.id);
            }
        }
        self.entities
            .environment_by_name(app_id, value)
            .await?
            .map(|env| env.id)
            .ok_or_else(|| Error::EntityNotFound {
                kind: "Environment",
                name: value.to_string(),
            })
    }

    async fn service(&self, app_id: AppId, value: &str) -> Result<ServiceId> {
        if let Ok(id) = value.parse::<ServiceId>() {
            if let Some(service) = self.entities.service(app_id, id).await? {
                return Ok(service.id);
            }
        }
        self.entities
            .service_by_name(app_id, value)
            .await?
            .map(|service| service.id)
            .ok_or_else(|| Error::EntityNotFound {
                kind: "Service",
                name: value.to_string(),
            })
    }

    /// Resolve a comma-separated list of infrastructure definitions.
    async fn infra_definitions(
        &self,
        app_id: AppId,
        env_id: EnvironmentId,
        variable: &Variable,
        value: &str,
    ) -> Result<String> {
        let names: Vec<&str> = value
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .collect();
        if names.len() > 1 && !variable.allow_multiple_values {
            return Err(Error::InvalidTrigger(format!(
                "Multiple values provided for infra var {{ {} }}, but variable only allows one",
                variable.name
            )));
        }

        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            let by_id = match name.parse::<InfraDefinitionId>() {
                Ok(id) => self.entities.infra_definition(app_id, env_id, id).await?,
                Err(_) => None,
            };
            let infra = match by_id {
                Some(infra) => infra,
                None => self
                    .entities
                    .infra_definition_by_name(app_id, env_id, name)
                    .await?
                    .ok_or_else(|| Error::EntityNotFound {
                        kind: "Infrastructure definition",
                        name: name.to_string(),
                    })?,
            };
            ids.push(infra.id.to_string());
        }
        Ok(ids.join(","))
    }
}

/// First pass: request parameters win over trigger values, expressions are
/// substituted from the parameters, and defaults fill mandatory gaps when
/// the trigger continues with default values.
fn merge(
    trigger: &Trigger,
    target: &DeploymentTarget,
    parameters: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut values = trigger.workflow_variables.clone();
    for (name, value) in parameters {
        values.insert(name.clone(), value.clone());
    }
    for value in values.values_mut() {
        if interpolation::contains_expression(value) {
            *value = interpolation::substitute(value, parameters);
        }
    }
    if trigger.continue_with_default_values {
        for variable in target.variables() {
            let missing = VariableValue::classify(values.get(&variable.name).map(String::as_str))
                == VariableValue::Missing;
            if missing {
                if let Some(default) = &variable.default_value {
                    values.insert(variable.name.clone(), default.clone());
                }
            }
        }
    }
    values
}
