//! Error types for the Flare trigger engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors, raised when a trigger is saved
    #[error("Invalid Build/Tag Filter, Please provide a valid regex: {0}")]
    InvalidArtifactFilter(String),

    #[error("Invalid versionRegex, Please provide a valid regex: {0}")]
    InvalidVersionRegex(String),

    #[error("Invalid cron expression {expression}: {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error(
        "Deployments must be triggered at intervals greater than or equal to 5 minutes. \
         Cron Expression should evaluate to time intervals of at least {min_seconds} seconds."
    )]
    CronIntervalTooShort { min_seconds: u64 },

    #[error("Incompatible selection: {0}")]
    IncompatibleSelection(String),

    #[error("Parameterized artifact source not allowed: {0}")]
    ParameterizedSource(String),

    #[error("Expressions are not allowed for Entity Variables for Workflow Variables. Offending value: {value}")]
    ExpressionNotAllowed { variable: String, value: String },

    #[error("Invalid trigger: {0}")]
    InvalidTrigger(String),

    // Resolution errors, fatal to a single trigger firing
    #[error("Trigger not found: {0}")]
    TriggerNotFound(String),

    #[error("{kind} not found: {id}")]
    TargetNotFound { kind: &'static str, id: String },

    #[error("Artifact stream not found: {0}")]
    ArtifactStreamNotFound(String),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Manifest not found: {0}")]
    ManifestNotFound(String),

    #[error("Artifact Service not matching with Trigger Service [{0}]")]
    ServiceNotBound(String),

    #[error("Polling not enabled for service: {0}")]
    ManifestPollingDisabled(String),

    #[error("Build Number is Mandatory for service [{0}]")]
    MissingBuildNumber(String),

    #[error("Version Number is Mandatory for service [{0}]")]
    MissingVersionNumber(String),

    #[error("Unresolved parameterized input: {0}")]
    UnresolvedParameterizedInput(String),

    #[error("Webhook call rejected: {0}")]
    WebhookRejected(String),

    #[error("{kind} [{name}] does not exist")]
    EntityNotFound { kind: &'static str, name: String },

    #[error("Trigger [{trigger}] rejected. Reason: Artifacts are missing for service name(s) {services:?}")]
    MissingArtifacts { trigger: String, services: Vec<String> },

    #[error("Trigger [{trigger}] rejected. Reason: {reason}")]
    UnexpectedArtifacts { trigger: String, reason: String },

    // Dispatch errors
    #[error("{message}")]
    FreezeRejected {
        master_freeze: bool,
        window_ids: Vec<String>,
        message: String,
    },

    #[error("Dispatch failed: {0}")]
    DispatchFailed(String),

    #[error("Dispatch timed out after {millis} ms")]
    DispatchTimeout { millis: u64 },

    // Infrastructure errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Build a freeze rejection with the message operators see.
    pub fn freeze(master_freeze: bool, window_ids: Vec<String>) -> Self {
        let message = if master_freeze {
            "Master Deployment Freeze is active. No deployments are allowed.".to_string()
        } else {
            format!(
                "Deployment Freeze Windows {} are active for the environment. \
                 No deployments are allowed to proceed.",
                window_ids.join(", ")
            )
        };
        Error::FreezeRejected {
            master_freeze,
            window_ids,
            message,
        }
    }

    /// Errors a trigger document can only produce when it is saved.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidArtifactFilter(_)
                | Error::InvalidVersionRegex(_)
                | Error::InvalidCronExpression { .. }
                | Error::CronIntervalTooShort { .. }
                | Error::IncompatibleSelection(_)
                | Error::ParameterizedSource(_)
                | Error::ExpressionNotAllowed { .. }
                | Error::InvalidTrigger(_)
        )
    }

    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            Error::TriggerNotFound(_)
                | Error::TargetNotFound { .. }
                | Error::ArtifactStreamNotFound(_)
                | Error::ArtifactNotFound(_)
                | Error::ManifestNotFound(_)
                | Error::ServiceNotBound(_)
                | Error::ManifestPollingDisabled(_)
                | Error::MissingBuildNumber(_)
                | Error::MissingVersionNumber(_)
                | Error::UnresolvedParameterizedInput(_)
                | Error::WebhookRejected(_)
                | Error::EntityNotFound { .. }
                | Error::MissingArtifacts { .. }
                | Error::UnexpectedArtifacts { .. }
        )
    }

    pub fn is_freeze_rejection(&self) -> bool {
        matches!(self, Error::FreezeRejected { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
