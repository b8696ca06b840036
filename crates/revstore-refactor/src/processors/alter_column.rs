//! Rename, retype or change the NULL-ability of a column.
//!
//! Executes the dialect-specific DDL and updates the schema repository so
//! the persisted schema description and the physical table stay in sync.
//! Renames leave data untouched; retypes are a best-effort cast by the
//! database engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::schema::DbType;
use crate::error::{MigrationError, Result};
use crate::store::batch::WriteStats;
use crate::store::plan::DdlOp;

use super::{MigrationProcessor, ProcessorContext, ProcessorOutcome};

/// Configuration of [`AlterColumn`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlterColumnConfig {
    /// Table holding the column.
    pub table: String,

    /// Current column name.
    pub column: String,

    /// New column name, when renaming.
    #[serde(default)]
    pub rename_to: Option<String>,

    /// New column type, when retyping.
    #[serde(default)]
    pub new_type: Option<DbType>,

    /// New maximum length (string/binary retypes).
    #[serde(default)]
    pub new_len: Option<u32>,

    /// New mandatory-ness: `true` forbids NULL.
    #[serde(default)]
    pub mandatory: Option<bool>,
}

/// Alters one column definition via DDL and mirrors the change into the
/// schema repository.
pub struct AlterColumn {
    config: AlterColumnConfig,
}

impl AlterColumn {
    /// Create the processor from its configuration.
    pub fn new(config: AlterColumnConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MigrationProcessor for AlterColumn {
    fn name(&self) -> &'static str {
        "alter-column"
    }

    async fn run(&self, ctx: &ProcessorContext) -> Result<ProcessorOutcome> {
        let config = &self.config;
        let Some(table) = ctx.table_schema(&config.table) else {
            warn!(
                "Table '{}' does not exist; nothing to alter.",
                config.table
            );
            return Ok(ProcessorOutcome::skipped(format!(
                "table '{}' not found",
                config.table
            )));
        };
        if !table.has_column(&config.column) {
            warn!(
                "Column '{}' does not exist in table '{}'; nothing to alter.",
                config.column, config.table
            );
            return Ok(ProcessorOutcome::skipped(format!(
                "column '{}' not found in table '{}'",
                config.column, config.table
            )));
        }

        let mut ops = Vec::new();
        if let Some(new_type) = config.new_type {
            ops.push(DdlOp::RetypeColumn {
                table: config.table.clone(),
                column: config.column.clone(),
                db_type: new_type,
                len: config.new_len,
            });
        }
        if let Some(mandatory) = config.mandatory {
            ops.push(DdlOp::SetNullable {
                table: config.table.clone(),
                column: config.column.clone(),
                nullable: !mandatory,
            });
        }
        if let Some(rename_to) = &config.rename_to {
            ops.push(DdlOp::RenameColumn {
                table: config.table.clone(),
                from: config.column.clone(),
                to: rename_to.clone(),
            });
        }
        if ops.is_empty() {
            return Err(MigrationError::Config(format!(
                "Alter-column for '{}.{}' specifies no change",
                config.table, config.column
            )));
        }

        let conn = ctx.connection();
        for op in &ops {
            conn.execute_ddl(op).await?;
        }

        // Mirror the executed DDL into the schema description.
        ctx.update_schema(|repo| -> Result<()> {
            let table = repo.require_mut(&config.table)?;
            if let Some(col) = table
                .columns
                .iter_mut()
                .find(|c| c.name == config.column)
            {
                if let Some(new_type) = config.new_type {
                    col.db_type = new_type;
                    col.len = config.new_len;
                }
                if let Some(mandatory) = config.mandatory {
                    col.nullable = !mandatory;
                }
                if let Some(rename_to) = &config.rename_to {
                    col.name = rename_to.clone();
                }
            }
            Ok(())
        })?;

        info!(
            "Altered column '{}.{}' ({} change(s)).",
            config.table,
            config.column,
            ops.len()
        );
        Ok(ProcessorOutcome::applied(WriteStats::default()))
    }
}
