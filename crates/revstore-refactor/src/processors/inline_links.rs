//! Synthesize direct links replacing a bridge object.
//!
//! For every pair of a `source → bridge` link and a `bridge → destination`
//! link whose lifetimes intersect, a direct `source → destination` link is
//! inserted with the intersected lifetime. Neither the bridge objects nor
//! their original links are deleted here; removing them is a later explicit
//! migration step.
//!
//! Read-while-write: the primary connection is committed first, then the
//! second-hop links are streamed over an independently borrowed pool
//! connection while the inserts flow through the primary one.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::schema;
use crate::core::{QualifiedName, RowValue};
use crate::error::Result;
use crate::store::batch::BatchWriter;
use crate::store::plan::{Filter, SelectPlan};

use super::{
    link_columns, maybe_register_xref, touch, IdAllocator, LinkRow, MigrationProcessor,
    ProcessorContext, ProcessorOutcome, TouchedRevisions,
};

/// Configuration of [`SynthesizeDirectLinks`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineLinksConfig {
    /// Association table holding both hops and receiving the direct links.
    pub table: String,

    /// Reference of the `source → bridge` links.
    pub source_reference: QualifiedName,

    /// Reference of the `bridge → destination` links.
    pub dest_reference: QualifiedName,

    /// Reference the synthesized direct links instantiate.
    pub new_reference: QualifiedName,

    /// Carry the first hop's sort order onto the direct link.
    #[serde(default)]
    pub copy_sort_order: bool,
}

/// Collapses two-hop bridge paths into direct links.
pub struct SynthesizeDirectLinks {
    config: InlineLinksConfig,
}

impl SynthesizeDirectLinks {
    /// Create the processor from its configuration.
    pub fn new(config: InlineLinksConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MigrationProcessor for SynthesizeDirectLinks {
    fn name(&self) -> &'static str {
        "synthesize-direct-links"
    }

    async fn run(&self, ctx: &ProcessorContext) -> Result<ProcessorOutcome> {
        let config = &self.config;
        if ctx.table_schema(&config.table).is_none() {
            warn!(
                "Link table '{}' does not exist; nothing to synthesize.",
                config.table
            );
            return Ok(ProcessorOutcome::skipped(format!(
                "table '{}' not found",
                config.table
            )));
        }
        let source_ref = ctx.model().resolve_part_id(&config.source_reference)?;
        let dest_ref = ctx.model().resolve_part_id(&config.dest_reference)?;
        let new_ref = ctx.model().resolve_part_id(&config.new_reference)?;

        info!(
            "Synthesizing direct '{}' links from '{}' + '{}' in '{}'.",
            config.new_reference, config.source_reference, config.dest_reference, config.table
        );

        let conn = ctx.connection();

        // First hop: source -> bridge, indexed by (branch, bridge id).
        let first_rows = conn
            .select(
                &SelectPlan::new(&config.table, link_columns())
                    .with_filter(Filter::Eq(
                        schema::META_ATTRIBUTE_ID.to_string(),
                        RowValue::Int(source_ref.0),
                    ))
                    .ordered_by_owner(schema::SOURCE_ID),
            )
            .await?;
        let mut first_hops: BTreeMap<(i64, i64), Vec<LinkRow>> = BTreeMap::new();
        let mut rows_read = first_rows.len() as u64;
        for row in &first_rows {
            let link = LinkRow::from_row(&config.table, row)?;
            first_hops
                .entry((link.branch.0, link.dest_id.0))
                .or_default()
                .push(link);
        }

        // Publish before streaming the same table through a second
        // connection.
        conn.commit().await?;

        let mut rx = ctx
            .pool()
            .select_stream(
                SelectPlan::new(&config.table, link_columns())
                    .with_filter(Filter::Eq(
                        schema::META_ATTRIBUTE_ID.to_string(),
                        RowValue::Int(dest_ref.0),
                    ))
                    .ordered_by_owner(schema::SOURCE_ID),
                conn.max_batch_size(),
            )
            .await?;

        let columns = link_columns();
        let mut writer = BatchWriter::new(conn, self.name(), conn.max_batch_size());
        let mut ids = IdAllocator::new(256);
        let mut touched = TouchedRevisions::new();
        while let Some(batch) = rx.recv().await {
            let batch = batch?;
            for row in &batch.rows {
                rows_read += 1;
                let second = LinkRow::from_row(&config.table, row)?;
                let Some(firsts) = first_hops.get(&(second.branch.0, second.source_id.0)) else {
                    continue;
                };
                for first in firsts {
                    let Some(lifetime) = first.lifetime.intersection(&second.lifetime) else {
                        continue;
                    };
                    let direct = LinkRow {
                        branch: second.branch,
                        id: ids.next(conn).await?,
                        lifetime,
                        rev_create: lifetime.rev_min,
                        source_id: first.source_id,
                        source_type: first.source_type.clone(),
                        dest_id: second.dest_id,
                        dest_type: second.dest_type.clone(),
                        reference: new_ref,
                        sort_order: if config.copy_sort_order {
                            first.sort_order
                        } else {
                            None
                        },
                    };
                    touch(&mut touched, direct.branch, lifetime.rev_min);
                    writer
                        .queue_insert(&config.table, &columns, direct.to_row())
                        .await?;
                }
            }
            if batch.is_last {
                break;
            }
        }
        writer.flush().await?;
        maybe_register_xref(ctx, conn, &config.table, &touched).await?;

        let mut stats = writer.finish().await?;
        stats.rows_read = rows_read;
        info!(
            "Synthesized {} direct link(s) in '{}'.",
            stats.inserted, config.table
        );
        Ok(ProcessorOutcome::applied(stats))
    }
}
