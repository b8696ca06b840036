//! Store access: connection traits, plans, batching and backends.
//!
//! Processors never build SQL themselves; they hand dialect-independent
//! plans (see [`plan`]) to a [`StoreConnection`]. Three backends exist:
//!
//! - [`postgres`]: live PostgreSQL store (pooled via deadpool).
//! - [`script`]: renders every write as SQL text into a review file.
//! - [`memory`]: in-memory plan interpreter for tests and dry runs.

pub mod batch;
pub mod memory;
pub mod plan;
pub mod postgres;
pub mod script;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::core::{RowBatch, RowValue};
use crate::error::Result;
use plan::{DdlOp, DeletePlan, InsertPlan, SelectPlan, UpdatePlan, WriteOp};

/// One borrowed connection to the row store.
///
/// All writes participate in the connection's current transaction until
/// [`commit`](StoreConnection::commit) publishes them. A failed statement
/// aborts the calling processor; writes already committed stay (processors
/// are independent units of work).
#[async_trait]
pub trait StoreConnection: Send + Sync {
    /// Execute a select plan and collect all result rows.
    async fn select(&self, plan: &SelectPlan) -> Result<Vec<Vec<RowValue>>>;

    /// Execute a batched insert. Returns the number of inserted rows.
    async fn insert(&self, plan: &InsertPlan) -> Result<u64>;

    /// Execute an update. Returns the number of affected rows.
    async fn update(&self, plan: &UpdatePlan) -> Result<u64>;

    /// Execute a delete. Returns the number of deleted rows.
    async fn delete(&self, plan: &DeletePlan) -> Result<u64>;

    /// Execute a structured DDL operation.
    async fn execute_ddl(&self, op: &DdlOp) -> Result<()>;

    /// Allocate `count` fresh object identifiers; returns the first of a
    /// contiguous range.
    async fn allocate_ids(&self, count: u64) -> Result<i64>;

    /// Commit the current transaction, publishing a consistent view to
    /// readers on other connections.
    async fn commit(&self) -> Result<()>;

    /// Backend identifier for logging ("postgres", "memory", "script").
    fn backend(&self) -> &'static str;

    /// Maximum number of writes per flushed batch, bounded by the backing
    /// dialect.
    fn max_batch_size(&self) -> usize {
        1_000
    }

    /// Execute one queued write.
    async fn apply(&self, op: &WriteOp) -> Result<u64> {
        match op {
            WriteOp::Insert(plan) => self.insert(plan).await,
            WriteOp::Update(plan) => self.update(plan).await,
            WriteOp::Delete(plan) => self.delete(plan).await,
        }
    }
}

/// Connection pool of the row store.
///
/// [`select_stream`](StorePool::select_stream) is the second-connection
/// read side of the read-while-write pattern: it borrows an independent
/// pooled connection, moves it into a producer task and streams result
/// batches through a bounded channel. The connection is returned to the
/// pool when the stream ends, on every exit path.
#[async_trait]
pub trait StorePool: Send + Sync {
    /// Borrow a connection from the pool.
    async fn acquire(&self) -> Result<Box<dyn StoreConnection>>;

    /// Stream a select over an independently borrowed connection.
    ///
    /// Rows arrive in the plan's order, chunked into batches of at most
    /// `batch_rows` rows; the final batch is marked. The reader sees the
    /// state last committed on writer connections.
    async fn select_stream(
        &self,
        plan: SelectPlan,
        batch_rows: usize,
    ) -> Result<mpsc::Receiver<Result<RowBatch>>>;
}

/// Store backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StoreConfig {
    /// Live PostgreSQL store.
    Postgres(postgres::PostgresConfig),

    /// In-memory store (dry runs; starts empty).
    Memory,

    /// SQL review script output.
    Script(script::ScriptConfig),
}

/// Open a store pool from configuration.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn StorePool>> {
    match config {
        StoreConfig::Postgres(cfg) => Ok(Arc::new(postgres::PgStore::connect(cfg).await?)),
        StoreConfig::Memory => Ok(Arc::new(memory::MemoryStore::new())),
        StoreConfig::Script(cfg) => Ok(Arc::new(script::ScriptStore::create(cfg)?)),
    }
}
