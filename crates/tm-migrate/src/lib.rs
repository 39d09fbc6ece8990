//! # tm-migrate
//!
//! Test-management artifact migration engine.
//!
//! This library moves test cases, cycles, executions and attachments
//! between test-management platforms, translating fields through a
//! user-defined mapping. It provides:
//!
//! - **Field mapping** with validation, value tables, templates and
//!   custom hooks
//! - **Batched transfers** with a bounded worker pool
//! - **Retry with backoff** for transient provider failures
//! - **Live progress and statistics** for polling or push subscription
//! - **Pause/resume/cancel** with snapshot-based restart
//!
//! Provider clients are supplied externally behind the
//! [`Provider`](provider::Provider) trait.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tm_migrate::{MigrationConfig, Orchestrator};
//! # fn connect() -> (Arc<dyn tm_migrate::Provider>, Arc<dyn tm_migrate::Provider>) { unimplemented!() }
//!
//! #[tokio::main]
//! async fn main() -> tm_migrate::Result<()> {
//!     let config = MigrationConfig::load("migration.yaml")?;
//!     let (source, target) = connect();
//!     let status = Orchestrator::new(config, source, target)?.run().await?;
//!     println!("migrated {} artifacts", status.processed_items);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod mapping;
pub mod orchestrator;
pub mod progress;
pub mod provider;
pub mod retry;
pub mod state;

// Re-exports for convenient access
pub use config::{ErrorHandlingStrategy, MigrationConfig, MigrationScope};
pub use error::{ErrorClass, FieldError, MigrateError, Result, ValidationError};
pub use mapping::{resolve, FieldMapping, MappingConfig, TransformPlan, TransformRegistry,
    Transformation};
pub use orchestrator::{Decision, DecisionHandler, MigrationHandle, Orchestrator};
pub use progress::{EntityStatistics, LogEntry, LogLevel, MigrationState, MigrationStatistics,
    MigrationStatus, Outcome, ProgressTracker};
pub use provider::{Artifact, ArtifactType, Capabilities, ConnectionConfig, Field, FieldType,
    Provider, ProviderInfo, WriteResult};
pub use state::RunSnapshot;
