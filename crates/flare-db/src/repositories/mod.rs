//! Store implementations for PostgreSQL.

mod idempotency;
mod trigger;

pub use idempotency::PgIdempotencyStore;
pub use trigger::PgTriggerStore;
