//! Artifacts, artifact streams, and manifest versions.

use crate::ids::*;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A collected build from an artifact stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Artifact {
    pub id: ArtifactId,
    pub app_id: AppId,
    pub artifact_stream_id: ArtifactStreamId,
    pub service_id: ServiceId,
    pub build_no: String,
    #[serde(default)]
    pub source_name: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Re-collection of a build that was already known.
    #[serde(default)]
    pub duplicate: bool,
    pub created_at: DateTime<Utc>,
}

/// A registry source bound to a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactStream {
    pub id: ArtifactStreamId,
    pub app_id: AppId,
    pub service_id: ServiceId,
    pub name: String,
    pub source_type: String,
    /// Collection needs runtime inputs such as `${groupId}`.
    #[serde(default)]
    pub parameterized: bool,
    #[serde(default)]
    pub parameters: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ApplicationManifest {
    pub id: AppManifestId,
    pub app_id: AppId,
    pub service_id: ServiceId,
    pub name: String,
    #[serde(default)]
    pub poll_for_changes: bool,
}

/// A collected manifest (Helm chart) version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HelmChart {
    pub id: HelmChartId,
    pub app_id: AppId,
    pub app_manifest_id: AppManifestId,
    pub service_id: ServiceId,
    pub version: String,
    #[serde(default)]
    pub name: String,
    pub created_at: DateTime<Utc>,
}
