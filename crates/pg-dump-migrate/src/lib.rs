//! # pg-dump-migrate
//!
//! One-shot PostgreSQL to PostgreSQL migration built on the stock client tools.
//!
//! A migration dumps the source with `pg_dump` into a custom-format archive,
//! drops every relation in the target's `public` schema and loads the
//! archive with `pg_restore`. Around that the library provides:
//!
//! - **Preflight checks** for local tools, connectivity and version compatibility
//! - **Connection probes** and approximate database statistics
//! - **Phase-tagged progress events** delivered through an [`EventSink`]
//! - **Saved connection profiles** in a local SQLite store
//!
//! Credentials reach the child processes only through `PGPASSWORD`, never
//! on the command line, and are redacted from captured output.
//!
//! ## Example
//!
//! ```rust,no_run
//! use pg_dump_migrate::{Config, Orchestrator, TracingSink};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> pg_dump_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config)?;
//!
//!     let report = orchestrator.preflight().await;
//!     if !report.all_passed() {
//!         return Ok(());
//!     }
//!
//!     let result = orchestrator.run(&TracingSink, &CancellationToken::new()).await;
//!     println!("{}", result.message);
//!     Ok(())
//! }
//! ```

pub mod artifact;
pub mod config;
pub mod connect;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod preflight;
pub mod prepare;
pub mod probe;
pub mod process;
pub mod profiles;
pub mod stats;
pub mod tools;

// Re-exports for convenient access
pub use config::{Config, ConnectionConfig, MigrationConfig};
pub use error::{MigrateError, Result};
pub use events::{
    ChannelSink, EventRecord, EventSink, FnSink, MemorySink, MigrationEvent, MigrationPhase,
    TracingSink,
};
pub use orchestrator::{MigrationResult, Orchestrator};
pub use preflight::{CheckStatus, CompatibilityChecker, PreflightCheck, PreflightReport};
pub use prepare::{PgTargetPreparer, TargetPreparer};
pub use probe::{test_connection, DatabaseProbe, PgProbe, ProbeResult, ServerVersion};
pub use profiles::{ConnectionProfile, NewProfile, ProfileStore};
pub use stats::{get_stats, DbStats};
pub use tools::{check_compatibility, LocalTools, ToolInspector, ToolVersion};
