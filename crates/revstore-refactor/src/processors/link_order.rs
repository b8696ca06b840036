//! Synthesize sort-order values for an unordered link table.
//!
//! The "true" order of the links is recorded on an attribute of the linked
//! destination objects. Per `(branch, source)` group, links are sorted by
//! that attribute's value (compared with the value type's comparator, ties
//! keeping their stored order) and assigned strictly increasing sort orders
//! spaced by a fixed step factor.
//!
//! This is a read-while-write processor: the primary connection is
//! committed first, then the link rows are streamed over an independently
//! borrowed pool connection while updates flow through the primary one.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::core::schema;
use crate::core::{BranchId, ObjectId, QualifiedName, RowValue};
use crate::error::Result;
use crate::interval::Lifetime;
use crate::store::batch::BatchWriter;
use crate::store::plan::{Filter, SelectPlan, UpdatePlan};

use super::{
    link_columns, req_int, LinkRow, MigrationProcessor, ProcessorContext, ProcessorOutcome,
};

fn default_step() -> i64 {
    1024
}

/// Configuration of [`SynthesizeLinkOrder`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkOrderConfig {
    /// Association table holding the unordered links.
    pub table: String,

    /// Reference whose links receive sort orders.
    pub reference: QualifiedName,

    /// Object table of the link destinations carrying the order attribute.
    pub order_table: String,

    /// Column of `order_table` holding the order attribute value.
    pub order_column: String,

    /// Spacing between consecutive synthesized sort orders.
    #[serde(default = "default_step")]
    pub step: i64,
}

/// Derives sort orders for links from a destination-object attribute.
pub struct SynthesizeLinkOrder {
    config: LinkOrderConfig,
}

impl SynthesizeLinkOrder {
    /// Create the processor from its configuration.
    pub fn new(config: LinkOrderConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MigrationProcessor for SynthesizeLinkOrder {
    fn name(&self) -> &'static str {
        "synthesize-link-order"
    }

    async fn run(&self, ctx: &ProcessorContext) -> Result<ProcessorOutcome> {
        let config = &self.config;
        if ctx.table_schema(&config.table).is_none() {
            warn!(
                "Link table '{}' does not exist; nothing to order.",
                config.table
            );
            return Ok(ProcessorOutcome::skipped(format!(
                "table '{}' not found",
                config.table
            )));
        }
        let order_table = ctx.require_table(&config.order_table)?;
        if !order_table.has_column(&config.order_column) {
            return Err(crate::error::MigrationError::Config(format!(
                "Order column '{}' does not exist in table '{}'",
                config.order_column, config.order_table
            )));
        }
        let ref_id = ctx.model().resolve_part_id(&config.reference)?;

        info!(
            "Synthesizing sort orders for reference '{}' in '{}' from '{}.{}'.",
            config.reference, config.table, config.order_table, config.order_column
        );

        let conn = ctx.connection();

        // Order attribute values per destination object and lifetime.
        let value_rows = conn
            .select(
                &SelectPlan::new(
                    &config.order_table,
                    vec![
                        schema::BRANCH.to_string(),
                        schema::IDENTIFIER.to_string(),
                        schema::REV_MIN.to_string(),
                        schema::REV_MAX.to_string(),
                        config.order_column.clone(),
                    ],
                )
                .ordered_by_owner(schema::IDENTIFIER),
            )
            .await?;
        let mut order_values: BTreeMap<(i64, i64), Vec<(Lifetime, RowValue)>> = BTreeMap::new();
        for row in value_rows {
            let branch = req_int(&config.order_table, &row, 0)?;
            let id = req_int(&config.order_table, &row, 1)?;
            let lifetime = Lifetime::new(
                req_int(&config.order_table, &row, 2)?,
                req_int(&config.order_table, &row, 3)?,
            );
            order_values
                .entry((branch, id))
                .or_default()
                .push((lifetime, row[4].clone()));
        }

        // Publish a consistent snapshot before opening the read-side
        // connection on the same rows we are about to update.
        conn.commit().await?;

        let mut rx = ctx
            .pool()
            .select_stream(
                SelectPlan::new(&config.table, link_columns())
                    .with_filter(Filter::and(vec![
                        Filter::Eq(
                            schema::META_ATTRIBUTE_ID.to_string(),
                            RowValue::Int(ref_id.0),
                        ),
                        Filter::Eq(
                            schema::DEST_TYPE.to_string(),
                            RowValue::Text(config.order_table.clone()),
                        ),
                    ]))
                    .ordered_by_owner(schema::SOURCE_ID),
                conn.max_batch_size(),
            )
            .await?;

        let mut writer = BatchWriter::new(conn, self.name(), conn.max_batch_size());
        let mut rows_read = 0u64;
        let mut group_key: Option<(BranchId, ObjectId)> = None;
        let mut group: Vec<(RowValue, LinkRow)> = Vec::new();
        while let Some(batch) = rx.recv().await {
            let batch = batch?;
            for row in &batch.rows {
                rows_read += 1;
                let link = LinkRow::from_row(&config.table, row)?;
                let key = (link.branch, link.source_id);
                if group_key != Some(key) {
                    flush_group(&mut writer, config, &mut group).await?;
                    group_key = Some(key);
                }
                let value = lookup_order_value(&order_values, config, &link);
                group.push((value, link));
            }
            if batch.is_last {
                break;
            }
        }
        flush_group(&mut writer, config, &mut group).await?;

        let mut stats = writer.finish().await?;
        stats.rows_read = rows_read;
        info!(
            "Assigned sort orders to {} link(s) in '{}'.",
            stats.updated, config.table
        );
        Ok(ProcessorOutcome::applied(stats))
    }
}

/// The order value of the destination object version alive when the link
/// came into existence. Missing versions are dirty data: reported, then
/// sorted first via NULL.
fn lookup_order_value(
    order_values: &BTreeMap<(i64, i64), Vec<(Lifetime, RowValue)>>,
    config: &LinkOrderConfig,
    link: &LinkRow,
) -> RowValue {
    let versions = order_values.get(&(link.branch.0, link.dest_id.0));
    let value = versions.and_then(|versions| {
        versions
            .iter()
            .find(|(lifetime, _)| lifetime.contains(link.lifetime.rev_min))
            .map(|(_, value)| value.clone())
    });
    match value {
        Some(value) => value,
        None => {
            error!(
                "Link {} in '{}' has no '{}' row for destination {} alive at revision {}.",
                link.id.0, config.table, config.order_table, link.dest_id.0, link.lifetime.rev_min
            );
            RowValue::Null
        }
    }
}

/// Sort one `(branch, source)` group by order value and queue the updates.
async fn flush_group(
    writer: &mut BatchWriter<'_>,
    config: &LinkOrderConfig,
    group: &mut Vec<(RowValue, LinkRow)>,
) -> Result<()> {
    if group.is_empty() {
        return Ok(());
    }
    // Stable: ties keep their (branch, source, rev_min) stream order.
    group.sort_by(|(a, _), (b, _)| a.compare(b));
    for (idx, (_, link)) in group.iter().enumerate() {
        let sort_order = idx as i64 * config.step;
        writer
            .queue_update(UpdatePlan {
                table: config.table.clone(),
                assignments: vec![(schema::SORT_ORDER.to_string(), RowValue::Int(sort_order))],
                filter: Filter::row_key(link.branch, link.id, link.lifetime.rev_min),
            })
            .await?;
    }
    group.clear();
    Ok(())
}
