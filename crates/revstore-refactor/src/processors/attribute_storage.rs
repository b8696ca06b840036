//! Convert an attribute between column storage and flex storage.
//!
//! Column → flex moves every non-NULL column cell into the generic flex
//! table, coalescing contiguous row versions carrying the same value into
//! one flex row. Flex → column writes values back into a dedicated column,
//! splitting object row versions at value-interval boundaries when value
//! and row lifetimes do not align. Either way, each value's lifetime is
//! preserved and the value ends up in exactly one of the two stores.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::core::schema;
use crate::core::{BranchId, ObjectId, RowValue};
use crate::error::Result;
use crate::interval::Lifetime;
use crate::store::batch::BatchWriter;
use crate::store::plan::{DdlOp, DeletePlan, Filter, SelectPlan, UpdatePlan};

use super::{
    maybe_register_xref, req_int, touch, MigrationProcessor, ProcessorContext, ProcessorOutcome,
    TouchedRevisions,
};

fn default_true() -> bool {
    true
}

fn flex_columns() -> Vec<String> {
    [
        schema::FLEX_TYPE,
        schema::IDENTIFIER,
        schema::BRANCH,
        schema::REV_MIN,
        schema::REV_MAX,
        schema::FLEX_ATTR,
        schema::DATA_TYPE,
        schema::LONG_DATA,
        schema::DOUBLE_DATA,
        schema::VARCHAR_DATA,
    ]
    .iter()
    .map(|c| c.to_string())
    .collect()
}

/// Configuration of [`ColumnToFlex`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnToFlexConfig {
    /// Object table holding the column.
    pub table: String,

    /// Column whose values move to flex storage.
    pub column: String,

    /// Flex attribute name the values are stored under.
    pub attribute: String,

    /// Drop the column afterwards; when `false` the column is cleared to
    /// NULL and kept.
    #[serde(default = "default_true")]
    pub drop_column: bool,
}

/// Moves a column attribute into the generic flex table.
pub struct ColumnToFlex {
    config: ColumnToFlexConfig,
}

impl ColumnToFlex {
    /// Create the processor from its configuration.
    pub fn new(config: ColumnToFlexConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MigrationProcessor for ColumnToFlex {
    fn name(&self) -> &'static str {
        "column-to-flex"
    }

    async fn run(&self, ctx: &ProcessorContext) -> Result<ProcessorOutcome> {
        let config = &self.config;
        let Some(table) = ctx.table_schema(&config.table) else {
            warn!("Table '{}' does not exist; nothing to convert.", config.table);
            return Ok(ProcessorOutcome::skipped(format!(
                "table '{}' not found",
                config.table
            )));
        };
        if !table.has_column(&config.column) {
            warn!(
                "Column '{}.{}' does not exist; nothing to convert.",
                config.table, config.column
            );
            return Ok(ProcessorOutcome::skipped(format!(
                "column '{}' not found in table '{}'",
                config.column, config.table
            )));
        }
        ctx.require_table(schema::FLEX_DATA)?;

        info!(
            "Converting column '{}.{}' to flex attribute '{}'.",
            config.table, config.column, config.attribute
        );

        let conn = ctx.connection();
        let rows = conn
            .select(
                &SelectPlan::new(
                    &config.table,
                    vec![
                        schema::BRANCH.to_string(),
                        schema::IDENTIFIER.to_string(),
                        schema::REV_MIN.to_string(),
                        schema::REV_MAX.to_string(),
                        config.column.clone(),
                    ],
                )
                .with_filter(Filter::NotNull(config.column.clone()))
                .ordered_by_owner(schema::IDENTIFIER),
            )
            .await?;
        let rows_read = rows.len() as u64;

        let columns = flex_columns();
        let mut writer = BatchWriter::new(conn, self.name(), conn.max_batch_size());

        // Coalesce contiguous row versions with the same value into one
        // flex row per value interval.
        let mut pending: Option<(BranchId, ObjectId, Lifetime, RowValue)> = None;
        for row in rows {
            let branch = BranchId(req_int(&config.table, &row, 0)?);
            let id = ObjectId(req_int(&config.table, &row, 1)?);
            let lifetime = Lifetime::new(
                req_int(&config.table, &row, 2)?,
                req_int(&config.table, &row, 3)?,
            );
            let value = row[4].clone();

            pending = match pending.take() {
                Some((p_branch, p_id, p_lifetime, p_value))
                    if p_branch == branch
                        && p_id == id
                        && p_value == value
                        && p_lifetime.rev_max + 1 == lifetime.rev_min =>
                {
                    Some((
                        branch,
                        id,
                        Lifetime::new(p_lifetime.rev_min, lifetime.rev_max),
                        p_value,
                    ))
                }
                Some(previous) => {
                    emit_flex(&mut writer, config, &columns, previous).await?;
                    Some((branch, id, lifetime, value))
                }
                None => Some((branch, id, lifetime, value)),
            };
        }
        if let Some(previous) = pending {
            emit_flex(&mut writer, config, &columns, previous).await?;
        }
        writer.flush().await?;

        if config.drop_column {
            conn.execute_ddl(&DdlOp::DropColumn {
                table: config.table.clone(),
                column: config.column.clone(),
            })
            .await?;
            ctx.update_schema(|repo| {
                if let Ok(table) = repo.require_mut(&config.table) {
                    table.columns.retain(|c| c.name != config.column);
                }
            });
        } else {
            conn.update(&UpdatePlan {
                table: config.table.clone(),
                assignments: vec![(config.column.clone(), RowValue::Null)],
                filter: Filter::NotNull(config.column.clone()),
            })
            .await?;
        }

        let mut stats = writer.finish().await?;
        stats.rows_read = rows_read;
        info!(
            "Moved {} value interval(s) of '{}.{}' into flex storage.",
            stats.inserted, config.table, config.column
        );
        Ok(ProcessorOutcome::applied(stats))
    }
}

async fn emit_flex(
    writer: &mut BatchWriter<'_>,
    config: &ColumnToFlexConfig,
    columns: &[String],
    (branch, id, lifetime, value): (BranchId, ObjectId, Lifetime, RowValue),
) -> Result<()> {
    let (code, long_data, double_data, varchar_data) = value.to_flex()?;
    writer
        .queue_insert(
            schema::FLEX_DATA,
            columns,
            vec![
                RowValue::Text(config.table.clone()),
                RowValue::Int(id.0),
                RowValue::Int(branch.0),
                RowValue::Int(lifetime.rev_min),
                RowValue::Int(lifetime.rev_max),
                RowValue::Text(config.attribute.clone()),
                RowValue::Int(code),
                long_data,
                double_data,
                varchar_data,
            ],
        )
        .await
}

/// Configuration of [`FlexToColumn`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlexToColumnConfig {
    /// Object table receiving the column values.
    pub table: String,

    /// Flex attribute name the values are currently stored under.
    pub attribute: String,

    /// Column the values move into. Must already exist.
    pub column: String,

    /// Delete the flex rows afterwards.
    #[serde(default = "default_true")]
    pub delete_flex: bool,
}

/// Moves a flex attribute into a dedicated column, splitting row versions
/// where value intervals cross row-version boundaries.
pub struct FlexToColumn {
    config: FlexToColumnConfig,
}

impl FlexToColumn {
    /// Create the processor from its configuration.
    pub fn new(config: FlexToColumnConfig) -> Self {
        Self { config }
    }
}

#[derive(Debug)]
struct ValueSlice {
    lifetime: Lifetime,
    value: RowValue,
    used: bool,
}

/// Partition a row version's lifetime into segments carrying a value and
/// segments without one, consuming `values` (sorted by `rev_min`) through
/// `cursor`. A value reaching beyond the row stays current for the owner's
/// next row version.
fn segment_row(
    row: Lifetime,
    values: &mut [ValueSlice],
    cursor: &mut usize,
) -> Vec<(Lifetime, Option<RowValue>)> {
    let mut segments = Vec::new();
    let mut pos = row.rev_min;
    while *cursor < values.len() {
        let slice = &mut values[*cursor];
        if slice.lifetime.rev_max < row.rev_min {
            *cursor += 1;
            continue;
        }
        if slice.lifetime.rev_min > row.rev_max {
            break;
        }
        let overlap = match slice.lifetime.intersection(&row) {
            Some(overlap) => overlap,
            None => break,
        };
        slice.used = true;
        let seg_min = overlap.rev_min.max(pos);
        if seg_min <= overlap.rev_max {
            if seg_min > pos {
                segments.push((Lifetime::new(pos, seg_min - 1), None));
            }
            segments.push((
                Lifetime::new(seg_min, overlap.rev_max),
                Some(slice.value.clone()),
            ));
            pos = overlap.rev_max + 1;
        }
        if slice.lifetime.rev_max <= row.rev_max {
            *cursor += 1;
        } else {
            break;
        }
    }
    if pos <= row.rev_max {
        segments.push((Lifetime::new(pos, row.rev_max), None));
    }
    segments
}

#[async_trait]
impl MigrationProcessor for FlexToColumn {
    fn name(&self) -> &'static str {
        "flex-to-column"
    }

    async fn run(&self, ctx: &ProcessorContext) -> Result<ProcessorOutcome> {
        let config = &self.config;
        let Some(table) = ctx.table_schema(&config.table) else {
            warn!("Table '{}' does not exist; nothing to convert.", config.table);
            return Ok(ProcessorOutcome::skipped(format!(
                "table '{}' not found",
                config.table
            )));
        };
        // The column is a hard precondition: without it the values have
        // nowhere to go.
        if !table.has_column(&config.column) {
            return Err(crate::error::MigrationError::Config(format!(
                "Column '{}' does not exist in table '{}'; add it before converting",
                config.column, config.table
            )));
        }
        ctx.require_table(schema::FLEX_DATA)?;

        info!(
            "Converting flex attribute '{}' to column '{}.{}'.",
            config.attribute, config.table, config.column
        );

        let conn = ctx.connection();
        let flex_filter = Filter::and(vec![
            Filter::Eq(
                schema::FLEX_TYPE.to_string(),
                RowValue::Text(config.table.clone()),
            ),
            Filter::Eq(
                schema::FLEX_ATTR.to_string(),
                RowValue::Text(config.attribute.clone()),
            ),
        ]);
        let flex_rows = conn
            .select(
                &SelectPlan::new(
                    schema::FLEX_DATA,
                    vec![
                        schema::BRANCH.to_string(),
                        schema::IDENTIFIER.to_string(),
                        schema::REV_MIN.to_string(),
                        schema::REV_MAX.to_string(),
                        schema::DATA_TYPE.to_string(),
                        schema::LONG_DATA.to_string(),
                        schema::DOUBLE_DATA.to_string(),
                        schema::VARCHAR_DATA.to_string(),
                    ],
                )
                .with_filter(flex_filter.clone())
                .ordered_by_owner(schema::IDENTIFIER),
            )
            .await?;
        let rows_read = flex_rows.len() as u64;

        let mut values: BTreeMap<(i64, i64), Vec<ValueSlice>> = BTreeMap::new();
        for row in &flex_rows {
            let branch = req_int(schema::FLEX_DATA, row, 0)?;
            let id = req_int(schema::FLEX_DATA, row, 1)?;
            let lifetime = Lifetime::new(
                req_int(schema::FLEX_DATA, row, 2)?,
                req_int(schema::FLEX_DATA, row, 3)?,
            );
            let value = RowValue::from_flex(
                req_int(schema::FLEX_DATA, row, 4)?,
                &row[5],
                &row[6],
                &row[7],
            )?;
            values.entry((branch, id)).or_default().push(ValueSlice {
                lifetime,
                value,
                used: false,
            });
        }
        if values.is_empty() {
            info!(
                "No flex values stored for attribute '{}' on '{}'.",
                config.attribute, config.table
            );
            return Ok(ProcessorOutcome::applied(Default::default()));
        }

        let object_columns = table.column_names();
        let position = |name: &str| -> Result<usize> {
            object_columns
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| {
                    crate::error::MigrationError::Config(format!(
                        "Table '{}' has no '{}' column",
                        config.table, name
                    ))
                })
        };
        let column_idx = position(&config.column)?;
        let branch_idx = position(schema::BRANCH)?;
        let id_idx = position(schema::IDENTIFIER)?;
        let rev_min_idx = position(schema::REV_MIN)?;
        let rev_max_idx = position(schema::REV_MAX)?;
        let owner_ids: Vec<RowValue> = values
            .keys()
            .map(|(_, id)| RowValue::Int(*id))
            .collect();
        let object_rows = conn
            .select(
                &SelectPlan::new(&config.table, object_columns.clone())
                    .with_filter(Filter::In(schema::IDENTIFIER.to_string(), owner_ids))
                    .ordered_by_owner(schema::IDENTIFIER),
            )
            .await?;

        let mut writer = BatchWriter::new(conn, self.name(), conn.max_batch_size());
        let mut touched = TouchedRevisions::new();
        let mut cursors: BTreeMap<(i64, i64), usize> = BTreeMap::new();
        for row in &object_rows {
            let branch = req_int(&config.table, row, branch_idx)?;
            let id = req_int(&config.table, row, id_idx)?;
            let row_lifetime = Lifetime::new(
                req_int(&config.table, row, rev_min_idx)?,
                req_int(&config.table, row, rev_max_idx)?,
            );
            let Some(owner_values) = values.get_mut(&(branch, id)) else {
                continue;
            };
            let cursor = cursors.entry((branch, id)).or_insert(0);
            let segments = segment_row(row_lifetime, owner_values, cursor);
            if segments.len() == 1 {
                if let (_, Some(value)) = &segments[0] {
                    writer
                        .queue_update(UpdatePlan {
                            table: config.table.clone(),
                            assignments: vec![(config.column.clone(), value.clone())],
                            filter: Filter::row_key(
                                BranchId(branch),
                                ObjectId(id),
                                row_lifetime.rev_min,
                            ),
                        })
                        .await?;
                }
                continue;
            }

            // The original row keeps the last segment; earlier segments
            // become inserted copies.
            let (last, copies) = match segments.split_last() {
                Some(split) => split,
                None => continue,
            };
            for (lifetime, value) in copies {
                let mut copy = row.clone();
                copy[rev_min_idx] = RowValue::Int(lifetime.rev_min);
                copy[rev_max_idx] = RowValue::Int(lifetime.rev_max);
                if let Some(value) = value {
                    copy[column_idx] = value.clone();
                }
                if lifetime.rev_min != row_lifetime.rev_min {
                    touch(&mut touched, BranchId(branch), lifetime.rev_min);
                }
                writer
                    .queue_insert(&config.table, &object_columns, copy)
                    .await?;
            }
            let (last_lifetime, last_value) = last;
            let mut assignments = vec![(
                schema::REV_MIN.to_string(),
                RowValue::Int(last_lifetime.rev_min),
            )];
            if let Some(value) = last_value {
                assignments.push((config.column.clone(), value.clone()));
            }
            touch(&mut touched, BranchId(branch), last_lifetime.rev_min);
            writer
                .queue_update(UpdatePlan {
                    table: config.table.clone(),
                    assignments,
                    filter: Filter::row_key(BranchId(branch), ObjectId(id), row_lifetime.rev_min),
                })
                .await?;
        }
        writer.flush().await?;

        // Values that intersect no row version of their owner are dirty
        // legacy data; report and keep going.
        for ((branch, id), owner_values) in &values {
            for slice in owner_values.iter().filter(|s| !s.used) {
                error!(
                    "Flex value for '{}.{}' (branch {}, object {}) in {} has no matching object row version.",
                    config.table, config.attribute, branch, id, slice.lifetime
                );
            }
        }

        if config.delete_flex {
            conn.delete(&DeletePlan {
                table: schema::FLEX_DATA.to_string(),
                filter: flex_filter,
            })
            .await?;
        }
        maybe_register_xref(ctx, conn, &config.table, &touched).await?;

        let mut stats = writer.finish().await?;
        stats.rows_read = rows_read;
        info!(
            "Moved flex attribute '{}' into column '{}.{}' ({} update(s), {} split row(s)).",
            config.attribute, config.table, config.column, stats.updated, stats.inserted
        );
        Ok(ProcessorOutcome::applied(stats))
    }
}
