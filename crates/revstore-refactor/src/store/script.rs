//! SQL review-script backend.
//!
//! Renders every write plan through a chosen dialect into an SQL text file
//! instead of executing it, so an operator can inspect (or hand-apply) a
//! migration offline. Write-only: read plans fail with a configuration
//! error, so only processors without read plans can run against it.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::core::{RowBatch, RowValue};
use crate::dialect::{Dialect, DialectImpl};
use crate::error::{MigrationError, Result};
use crate::store::plan::{DdlOp, DeletePlan, InsertPlan, SelectPlan, UpdatePlan, WriteOp};
use crate::store::{StoreConnection, StorePool};

/// Script backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Output file path.
    pub path: PathBuf,

    /// Dialect the script is rendered for ("postgres" or "mssql").
    #[serde(default = "default_dialect")]
    pub dialect: String,

    /// First identifier handed out for synthesized rows. Scripts cannot
    /// consult the store's id sequence, so the operator picks a free range.
    #[serde(default = "default_start_id")]
    pub start_id: i64,
}

fn default_dialect() -> String {
    "postgres".to_string()
}

fn default_start_id() -> i64 {
    1_000_000
}

/// Store backend writing SQL text instead of executing it.
#[derive(Clone)]
pub struct ScriptStore {
    dialect: DialectImpl,
    out: Arc<Mutex<Box<dyn Write + Send>>>,
    next_id: Arc<AtomicI64>,
}

impl ScriptStore {
    /// Create a script store writing to the configured file.
    pub fn create(config: &ScriptConfig) -> Result<Self> {
        let file = std::fs::File::create(&config.path)?;
        Ok(Self::with_writer(
            Box::new(std::io::BufWriter::new(file)),
            DialectImpl::from_name(&config.dialect)?,
            config.start_id,
        ))
    }

    /// Create a script store writing to an arbitrary sink.
    pub fn with_writer(out: Box<dyn Write + Send>, dialect: DialectImpl, start_id: i64) -> Self {
        Self {
            dialect,
            out: Arc::new(Mutex::new(out)),
            next_id: Arc::new(AtomicI64::new(start_id)),
        }
    }

    fn write_statements(&self, table: &str, op: &'static str, statements: &[String]) -> Result<()> {
        let mut out = self.out.lock().expect("script writer poisoned");
        for statement in statements {
            writeln!(out, "{};", statement)
                .map_err(|e| MigrationError::sql(table, op, e.to_string()))?;
        }
        out.flush()
            .map_err(|e| MigrationError::sql(table, op, e.to_string()))?;
        Ok(())
    }

    fn read_unsupported(table: &str) -> MigrationError {
        MigrationError::Config(format!(
            "The script backend is write-only; cannot read from table '{}'",
            table
        ))
    }
}

#[async_trait]
impl StoreConnection for ScriptStore {
    async fn select(&self, plan: &SelectPlan) -> Result<Vec<Vec<RowValue>>> {
        Err(Self::read_unsupported(&plan.table))
    }

    async fn insert(&self, plan: &InsertPlan) -> Result<u64> {
        let statements = self.dialect.render_insert_literal(plan);
        self.write_statements(&plan.table, "insert", &statements)?;
        Ok(plan.rows.len() as u64)
    }

    async fn update(&self, plan: &UpdatePlan) -> Result<u64> {
        let statements = self
            .dialect
            .render_write_literal(&WriteOp::Update(plan.clone()));
        self.write_statements(&plan.table, "update", &statements)?;
        // Affected row counts are unknown until the script is applied.
        Ok(0)
    }

    async fn delete(&self, plan: &DeletePlan) -> Result<u64> {
        let statements = self
            .dialect
            .render_write_literal(&WriteOp::Delete(plan.clone()));
        self.write_statements(&plan.table, "delete", &statements)?;
        Ok(0)
    }

    async fn execute_ddl(&self, op: &DdlOp) -> Result<()> {
        let statements = self.dialect.render_ddl(op);
        self.write_statements(op.table(), "ddl", &statements)
    }

    async fn allocate_ids(&self, count: u64) -> Result<i64> {
        Ok(self.next_id.fetch_add(count as i64, Ordering::SeqCst))
    }

    async fn commit(&self) -> Result<()> {
        self.write_statements("-", "commit", &["COMMIT".to_string()])
    }

    fn backend(&self) -> &'static str {
        "script"
    }

    fn max_batch_size(&self) -> usize {
        self.dialect.max_batch_size()
    }
}

#[async_trait]
impl StorePool for ScriptStore {
    async fn acquire(&self) -> Result<Box<dyn StoreConnection>> {
        Ok(Box::new(self.clone()))
    }

    async fn select_stream(
        &self,
        plan: SelectPlan,
        _batch_rows: usize,
    ) -> Result<mpsc::Receiver<Result<RowBatch>>> {
        Err(Self::read_unsupported(&plan.table))
    }
}
