//! Integration test infrastructure for Flare.
//!
//! Starts PostgreSQL in a container and hands out migrated stores.
//!
//! ```ignore
//! use flare_tests::TestContext;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let ctx = TestContext::postgres_only().await.unwrap();
//!     let store = ctx.db.triggers();
//! }
//! ```

pub mod containers;
pub mod context;
pub mod fixtures;

pub use context::TestContext;
pub use fixtures::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,flare_db=debug,flare_tests=debug")),
        )
        .with_test_writer()
        .try_init();
}
