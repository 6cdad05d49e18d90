//! Trigger evaluation and deployment dispatch for Flare.
//!
//! Events enter through [`TriggerEngine`]. Save-time checks live in
//! [`TriggerValidator`] and [`TriggerLifecycle`].

pub mod conditions;
pub mod config;
pub mod cron;
pub mod dispatch;
pub mod engine;
pub mod filter;
pub mod idempotency;
pub mod lifecycle;
pub mod selection;
pub mod target;
pub mod validation;
pub mod variables;
pub mod webhook;

pub use conditions::{ConditionEvaluator, Evaluation};
pub use config::EngineConfig;
pub use cron::CronValidator;
pub use dispatch::DispatchCoordinator;
pub use engine::{EnginePorts, EventReport, TriggerEngine, TriggerOutcome, TriggerResult};
pub use filter::FilterMatcher;
pub use idempotency::{Fingerprint, IdempotencyGuard, InMemoryIdempotencyStore};
pub use lifecycle::TriggerLifecycle;
pub use selection::{EventInputs, ResolvedInputs, SelectionResolver};
pub use validation::TriggerValidator;
pub use variables::{ResolvedVariables, VariableResolver};
pub use webhook::WebhookPayloadBuilder;
