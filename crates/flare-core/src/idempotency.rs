//! Idempotency records shared by the guard and its stores.

use crate::ids::ExecutionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyState {
    /// Acquired, dispatch in flight.
    Pending,
    Succeeded,
    /// Dispatch failed; the key may be acquired again.
    Failed,
}

impl IdempotencyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdempotencyState::Pending => "pending",
            IdempotencyState::Succeeded => "succeeded",
            IdempotencyState::Failed => "failed",
        }
    }
}

impl fmt::Display for IdempotencyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IdempotencyState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(IdempotencyState::Pending),
            "succeeded" => Ok(IdempotencyState::Succeeded),
            "failed" => Ok(IdempotencyState::Failed),
            other => Err(format!("unknown idempotency state: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub state: IdempotencyState,
    pub execution_id: Option<ExecutionId>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// A record blocks acquisition until it fails or expires.
    pub fn blocks_acquire(&self, now: DateTime<Utc>) -> bool {
        self.state != IdempotencyState::Failed && !self.is_expired(now)
    }
}

/// Outcome of a create-once attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    Acquired,
    Present(IdempotencyRecord),
}
