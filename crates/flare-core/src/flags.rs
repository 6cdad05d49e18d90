//! Per-account feature flags.
//!
//! Flags are resolved once per event and passed explicitly through the engine.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FeatureFlags {
    /// Fire once per matching artifact instead of once per event.
    #[serde(default)]
    pub trigger_for_all_artifacts: bool,
    /// Let explicit selections replace the triggering artifact.
    #[serde(default)]
    pub prefer_artifact_selection: bool,
    /// Require the webhook secret on inbound calls.
    #[serde(default)]
    pub webhook_authentication: bool,
}

impl FeatureFlags {
    pub fn with_trigger_for_all_artifacts(mut self, enabled: bool) -> Self {
        self.trigger_for_all_artifacts = enabled;
        self
    }

    pub fn with_prefer_artifact_selection(mut self, enabled: bool) -> Self {
        self.prefer_artifact_selection = enabled;
        self
    }

    pub fn with_webhook_authentication(mut self, enabled: bool) -> Self {
        self.webhook_authentication = enabled;
        self
    }
}
