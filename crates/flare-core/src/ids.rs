//! Strongly-typed identifiers for domain entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! define_id {
    ($name:ident, $prefix:expr) => {
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            Serialize,
            Deserialize,
            schemars::JsonSchema,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            pub const PREFIX: &'static str = $prefix;
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                let uuid_str = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(uuid_str)?))
            }
        }
    };
}

define_id!(AccountId, "acc");
define_id!(AppId, "app");
define_id!(TriggerId, "trg");
define_id!(ServiceId, "svc");
define_id!(EnvironmentId, "env");
define_id!(InfraDefinitionId, "inf");
define_id!(InfraMappingId, "ifm");
define_id!(ArtifactStreamId, "ast");
define_id!(ArtifactId, "art");
define_id!(AppManifestId, "mft");
define_id!(HelmChartId, "hlm");
define_id!(PipelineId, "pip");
define_id!(WorkflowId, "wfl");
define_id!(ExecutionId, "exe");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_id_display() {
        let id = TriggerId::new();
        assert!(id.to_string().starts_with("trg_"));
    }

    #[test]
    fn test_id_parse_with_and_without_prefix() {
        let id = ArtifactStreamId::new();
        let prefixed: ArtifactStreamId = id.to_string().parse().unwrap();
        let bare: ArtifactStreamId = id.as_uuid().to_string().parse().unwrap();
        assert_eq!(id, prefixed);
        assert_eq!(id, bare);
    }
}
