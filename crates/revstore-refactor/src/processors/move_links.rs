//! Move, delete and invert association rows.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::schema;
use crate::core::{QualifiedName, RowValue};
use crate::error::Result;
use crate::store::batch::BatchWriter;
use crate::store::plan::{DeletePlan, Filter, SelectPlan, UpdatePlan};

use super::{
    link_columns, maybe_register_xref, touch, LinkRow, MigrationProcessor, ProcessorContext,
    ProcessorOutcome, TouchedRevisions,
};

fn scope_filter(
    ctx: &ProcessorContext,
    reference: Option<&QualifiedName>,
    source_type: Option<&str>,
    dest_type: Option<&str>,
) -> Result<Filter> {
    let mut parts = Vec::new();
    if let Some(reference) = reference {
        let ref_id = ctx.model().resolve_part_id(reference)?;
        parts.push(Filter::Eq(
            schema::META_ATTRIBUTE_ID.to_string(),
            RowValue::Int(ref_id.0),
        ));
    }
    if let Some(source_type) = source_type {
        parts.push(Filter::Eq(
            schema::SOURCE_TYPE.to_string(),
            RowValue::Text(source_type.to_string()),
        ));
    }
    if let Some(dest_type) = dest_type {
        parts.push(Filter::Eq(
            schema::DEST_TYPE.to_string(),
            RowValue::Text(dest_type.to_string()),
        ));
    }
    Ok(Filter::and(parts))
}

/// Configuration of [`MoveLinks`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveLinksConfig {
    /// Association table the rows currently live in.
    pub source_table: String,

    /// Association table the rows move to.
    pub target_table: String,

    /// Only move links of this reference; all references when absent.
    #[serde(default)]
    pub reference: Option<QualifiedName>,

    /// Only move links whose source end lives in this table.
    #[serde(default)]
    pub source_type: Option<String>,

    /// Only move links whose destination end lives in this table.
    #[serde(default)]
    pub dest_type: Option<String>,
}

/// Moves association rows from one link table to another, preserving
/// identity, endpoints and lifetimes, then deletes the originals.
pub struct MoveLinks {
    config: MoveLinksConfig,
}

impl MoveLinks {
    /// Create the processor from its configuration.
    pub fn new(config: MoveLinksConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MigrationProcessor for MoveLinks {
    fn name(&self) -> &'static str {
        "move-links"
    }

    async fn run(&self, ctx: &ProcessorContext) -> Result<ProcessorOutcome> {
        let config = &self.config;
        if ctx.table_schema(&config.source_table).is_none() {
            warn!(
                "Link table '{}' does not exist; nothing to move.",
                config.source_table
            );
            return Ok(ProcessorOutcome::skipped(format!(
                "table '{}' not found",
                config.source_table
            )));
        }
        ctx.require_table(&config.target_table)?;

        let filter = scope_filter(
            ctx,
            config.reference.as_ref(),
            config.source_type.as_deref(),
            config.dest_type.as_deref(),
        )?;

        info!(
            "Moving links from '{}' to '{}'.",
            config.source_table, config.target_table
        );

        let conn = ctx.connection();
        let columns = link_columns();
        let rows = conn
            .select(
                &SelectPlan::new(&config.source_table, columns.clone())
                    .with_filter(filter.clone())
                    .ordered_by_owner(schema::IDENTIFIER),
            )
            .await?;

        let mut touched = TouchedRevisions::new();
        let mut writer = BatchWriter::new(conn, self.name(), conn.max_batch_size());
        let rows_read = rows.len() as u64;
        for row in rows {
            let link = LinkRow::from_row(&config.source_table, &row)?;
            touch(&mut touched, link.branch, link.lifetime.rev_min);
            writer
                .queue_insert(&config.target_table, &columns, row)
                .await?;
        }
        writer.flush().await?;
        let deleted = conn
            .delete(&DeletePlan {
                table: config.source_table.clone(),
                filter,
            })
            .await?;
        maybe_register_xref(ctx, conn, &config.target_table, &touched).await?;

        let mut stats = writer.finish().await?;
        stats.rows_read = rows_read;
        stats.deleted += deleted;
        info!(
            "Moved {} links from '{}' to '{}'.",
            stats.inserted, config.source_table, config.target_table
        );
        Ok(ProcessorOutcome::applied(stats))
    }
}

/// Configuration of [`DeleteLinks`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteLinksConfig {
    /// Association table to delete from.
    pub table: String,

    /// Reference whose links are deleted.
    pub reference: QualifiedName,

    /// Only delete links whose source end lives in this table.
    #[serde(default)]
    pub source_type: Option<String>,

    /// Only delete links whose destination end lives in this table.
    #[serde(default)]
    pub dest_type: Option<String>,
}

/// Deletes all rows of one reference from an association table.
pub struct DeleteLinks {
    config: DeleteLinksConfig,
}

impl DeleteLinks {
    /// Create the processor from its configuration.
    pub fn new(config: DeleteLinksConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MigrationProcessor for DeleteLinks {
    fn name(&self) -> &'static str {
        "delete-links"
    }

    async fn run(&self, ctx: &ProcessorContext) -> Result<ProcessorOutcome> {
        let config = &self.config;
        if ctx.table_schema(&config.table).is_none() {
            warn!(
                "Link table '{}' does not exist; nothing to delete.",
                config.table
            );
            return Ok(ProcessorOutcome::skipped(format!(
                "table '{}' not found",
                config.table
            )));
        }
        let filter = scope_filter(
            ctx,
            Some(&config.reference),
            config.source_type.as_deref(),
            config.dest_type.as_deref(),
        )?;

        let conn = ctx.connection();
        let deleted = conn
            .delete(&DeletePlan {
                table: config.table.clone(),
                filter,
            })
            .await?;
        info!(
            "Deleted {} links of reference '{}' from '{}'.",
            deleted, config.reference, config.table
        );
        let mut stats = crate::store::batch::WriteStats::default();
        stats.deleted = deleted;
        Ok(ProcessorOutcome::applied(stats))
    }
}

/// Configuration of [`InvertLinks`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvertLinksConfig {
    /// Association table holding the links.
    pub table: String,

    /// Reference whose link direction flips.
    pub reference: QualifiedName,
}

/// Swaps source and destination ends of all links of one reference in
/// place. Identity, lifetime and reference id stay untouched.
pub struct InvertLinks {
    config: InvertLinksConfig,
}

impl InvertLinks {
    /// Create the processor from its configuration.
    pub fn new(config: InvertLinksConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MigrationProcessor for InvertLinks {
    fn name(&self) -> &'static str {
        "invert-links"
    }

    async fn run(&self, ctx: &ProcessorContext) -> Result<ProcessorOutcome> {
        let config = &self.config;
        if ctx.table_schema(&config.table).is_none() {
            warn!(
                "Link table '{}' does not exist; nothing to invert.",
                config.table
            );
            return Ok(ProcessorOutcome::skipped(format!(
                "table '{}' not found",
                config.table
            )));
        }
        let filter = scope_filter(ctx, Some(&config.reference), None, None)?;

        let conn = ctx.connection();
        let rows = conn
            .select(
                &SelectPlan::new(&config.table, link_columns())
                    .with_filter(filter)
                    .ordered_by_owner(schema::IDENTIFIER),
            )
            .await?;

        let mut writer = BatchWriter::new(conn, self.name(), conn.max_batch_size());
        let rows_read = rows.len() as u64;
        for row in rows {
            let link = LinkRow::from_row(&config.table, &row)?;
            writer
                .queue_update(UpdatePlan {
                    table: config.table.clone(),
                    assignments: vec![
                        (schema::SOURCE_ID.to_string(), RowValue::Int(link.dest_id.0)),
                        (
                            schema::SOURCE_TYPE.to_string(),
                            RowValue::Text(link.dest_type.clone()),
                        ),
                        (schema::DEST_ID.to_string(), RowValue::Int(link.source_id.0)),
                        (
                            schema::DEST_TYPE.to_string(),
                            RowValue::Text(link.source_type.clone()),
                        ),
                    ],
                    filter: Filter::row_key(link.branch, link.id, link.lifetime.rev_min),
                })
                .await?;
        }
        let mut stats = writer.finish().await?;
        stats.rows_read = rows_read;
        info!(
            "Inverted {} links of reference '{}' in '{}'.",
            stats.updated, config.reference, config.table
        );
        Ok(ProcessorOutcome::applied(stats))
    }
}
