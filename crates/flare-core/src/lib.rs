//! Flare Core
//!
//! Domain types, ports, and error handling for the Flare trigger engine.
//! Triggers, their conditions and selections, the artifacts and manifests
//! they resolve, and the collaborator traits the engine drives all live here.

pub mod artifact;
pub mod deployment;
pub mod error;
pub mod events;
pub mod flags;
pub mod idempotency;
pub mod ids;
pub mod interpolation;
pub mod ports;
pub mod trigger;

pub use error::{Error, Result};
pub use ids::*;
