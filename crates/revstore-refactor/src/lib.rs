//! # revstore-refactor
//!
//! Structural migration processors for a branch- and revision-versioned
//! relational object store. Every row of the store carries a branch id and
//! an inclusive lifetime `[REV_MIN, REV_MAX]`; the processors in this
//! library rewrite such rows (moving objects between tables, reshaping
//! links, converting attribute storage, synthesizing order values and
//! missing links, removing duplicate assignments) while preserving those
//! lifetime and branch invariants.
//!
//! Processors are configured declaratively and sequenced by a
//! [`MigrationRunner`]; each processor is one independent unit of work.
//!
//! ## Example
//!
//! ```rust,no_run
//! use revstore_refactor::{EngineConfig, MigrationRunner};
//!
//! #[tokio::main]
//! async fn main() -> revstore_refactor::Result<()> {
//!     let config = EngineConfig::load("migration.yaml")?;
//!     let pool = revstore_refactor::store::connect(&config.store).await?;
//!     let runner = MigrationRunner::new(pool, config.schema, config.model);
//!     let report = runner.run(&config.script).await?;
//!     println!("{} step(s) applied", report.applied);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod dialect;
pub mod error;
pub mod interval;
pub mod processors;
pub mod resolver;
pub mod runner;
pub mod store;

// Re-exports for convenient access
pub use crate::config::{EngineConfig, MigrationScript, ProcessorConfig};
pub use crate::core::{BranchId, ObjectId, QualifiedName, RowValue, SchemaRepository, TypePartId};
pub use crate::error::{MigrationError, Result};
pub use crate::interval::{Lifetime, Revision, CURRENT_REV};
pub use crate::resolver::ModelIndex;
pub use crate::runner::{MigrationRunner, RunReport};
pub use crate::store::{StoreConfig, StoreConnection, StorePool};
