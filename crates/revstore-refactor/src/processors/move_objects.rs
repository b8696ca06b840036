//! Move all objects of given types from one table to another.
//!
//! Copies the row versions (identity, lifetime and attribute values
//! unchanged) into the destination table, re-homes the objects' flex values,
//! rewrites every polymorphic link endpoint pointing at the moved objects,
//! registers the touched revisions in the cross-reference table and deletes
//! the original rows. After the move every incoming reference still
//! resolves.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::schema;
use crate::core::{BranchId, QualifiedName, RowValue};
use crate::error::Result;
use crate::interval::Revision;
use crate::store::batch::BatchWriter;
use crate::store::plan::{DeletePlan, Filter, SelectPlan, UpdatePlan};

use super::{
    maybe_register_xref, req_int, MigrationProcessor, ProcessorContext, ProcessorOutcome,
    TouchedRevisions,
};

/// Configuration of [`MoveObjects`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveObjectsConfig {
    /// Table the objects currently live in.
    pub source_table: String,

    /// Table the objects move to.
    pub target_table: String,

    /// Types whose objects move.
    pub types: Vec<QualifiedName>,

    /// Association tables whose endpoints must be rewritten; all
    /// association tables of the schema when empty.
    #[serde(default)]
    pub link_tables: Vec<String>,
}

/// Moves object rows (and everything referring to them) between tables.
pub struct MoveObjects {
    config: MoveObjectsConfig,
}

impl MoveObjects {
    /// Create the processor from its configuration.
    pub fn new(config: MoveObjectsConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MigrationProcessor for MoveObjects {
    fn name(&self) -> &'static str {
        "move-objects"
    }

    async fn run(&self, ctx: &ProcessorContext) -> Result<ProcessorOutcome> {
        let config = &self.config;
        let Some(source) = ctx.table_schema(&config.source_table) else {
            warn!(
                "Table '{}' does not exist; nothing to move.",
                config.source_table
            );
            return Ok(ProcessorOutcome::skipped(format!(
                "table '{}' not found",
                config.source_table
            )));
        };
        let target = ctx.require_table(&config.target_table)?;

        let mut type_ids = Vec::with_capacity(config.types.len());
        for name in &config.types {
            type_ids.push(RowValue::Int(ctx.model().resolve_type_id(name)?.0));
        }

        info!(
            "Moving {} type(s) from '{}' to '{}'.",
            type_ids.len(),
            config.source_table,
            config.target_table
        );

        let source_columns = source.column_names();
        let target_columns = target.column_names();
        for dropped in source_columns
            .iter()
            .filter(|c| !target.has_column(c))
        {
            warn!(
                "Column '{}.{}' has no counterpart in '{}'; its values are dropped.",
                config.source_table, dropped, config.target_table
            );
        }
        let source_idx: HashMap<&str, usize> = source_columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i))
            .collect();
        let header = |name: &str| -> Result<usize> {
            source_idx.get(name).copied().ok_or_else(|| {
                crate::error::MigrationError::Config(format!(
                    "Table '{}' has no '{}' column",
                    config.source_table, name
                ))
            })
        };
        let branch_idx = header(schema::BRANCH)?;
        let id_idx = header(schema::IDENTIFIER)?;
        let rev_min_idx = header(schema::REV_MIN)?;

        let scope = Filter::In(schema::TYPE_ID.to_string(), type_ids);
        let conn = ctx.connection();
        let rows = conn
            .select(
                &SelectPlan::new(&config.source_table, source_columns.clone())
                    .with_filter(scope.clone())
                    .ordered_by_owner(schema::IDENTIFIER),
            )
            .await?;
        let rows_read = rows.len() as u64;

        let mut moved_ids: BTreeMap<BranchId, BTreeSet<i64>> = BTreeMap::new();
        let mut touched = TouchedRevisions::new();
        let mut writer = BatchWriter::new(conn, self.name(), conn.max_batch_size());
        for row in &rows {
            let branch = BranchId(req_int(&config.source_table, row, branch_idx)?);
            let id = req_int(&config.source_table, row, id_idx)?;
            let rev_min: Revision = req_int(&config.source_table, row, rev_min_idx)?;
            moved_ids.entry(branch).or_default().insert(id);
            touched.entry(branch).or_default().insert(rev_min);

            let target_row: Vec<RowValue> = target_columns
                .iter()
                .map(|col| {
                    source_idx
                        .get(col.as_str())
                        .map(|i| row[*i].clone())
                        .unwrap_or(RowValue::Null)
                })
                .collect();
            writer
                .queue_insert(&config.target_table, &target_columns, target_row)
                .await?;
        }
        writer.flush().await?;

        // Re-home flex values and rewrite polymorphic link endpoints.
        let chunk_size = conn.max_batch_size();
        let has_flex = ctx.table_schema(schema::FLEX_DATA).is_some();
        let link_tables = if config.link_tables.is_empty() {
            ctx.association_tables()
        } else {
            config.link_tables.clone()
        };
        for (branch, ids) in &moved_ids {
            let ids: Vec<i64> = ids.iter().copied().collect();
            for chunk in ids.chunks(chunk_size) {
                let id_set: Vec<RowValue> = chunk.iter().map(|id| RowValue::Int(*id)).collect();
                if has_flex {
                    retarget(
                        &mut writer,
                        schema::FLEX_DATA,
                        schema::FLEX_TYPE,
                        schema::IDENTIFIER,
                        *branch,
                        &id_set,
                        &config.source_table,
                        &config.target_table,
                    )
                    .await?;
                }
                for link_table in &link_tables {
                    retarget(
                        &mut writer,
                        link_table,
                        schema::SOURCE_TYPE,
                        schema::SOURCE_ID,
                        *branch,
                        &id_set,
                        &config.source_table,
                        &config.target_table,
                    )
                    .await?;
                    retarget(
                        &mut writer,
                        link_table,
                        schema::DEST_TYPE,
                        schema::DEST_ID,
                        *branch,
                        &id_set,
                        &config.source_table,
                        &config.target_table,
                    )
                    .await?;
                }
            }
        }
        writer.flush().await?;

        let deleted = conn
            .delete(&DeletePlan {
                table: config.source_table.clone(),
                filter: scope,
            })
            .await?;
        maybe_register_xref(ctx, conn, &config.target_table, &touched).await?;

        let mut stats = writer.finish().await?;
        stats.rows_read = rows_read;
        stats.deleted += deleted;
        info!(
            "Moved {} row version(s) from '{}' to '{}'.",
            stats.inserted, config.source_table, config.target_table
        );
        Ok(ProcessorOutcome::applied(stats))
    }
}

/// Queue an update relabeling `type_column` from the source to the target
/// table name for rows whose `id_column` is in the given set.
#[allow(clippy::too_many_arguments)]
async fn retarget(
    writer: &mut BatchWriter<'_>,
    table: &str,
    type_column: &str,
    id_column: &str,
    branch: BranchId,
    ids: &[RowValue],
    source_table: &str,
    target_table: &str,
) -> Result<()> {
    writer
        .queue_update(UpdatePlan {
            table: table.to_string(),
            assignments: vec![(
                type_column.to_string(),
                RowValue::Text(target_table.to_string()),
            )],
            filter: Filter::and(vec![
                Filter::Eq(schema::BRANCH.to_string(), RowValue::Int(branch.0)),
                Filter::Eq(
                    type_column.to_string(),
                    RowValue::Text(source_table.to_string()),
                ),
                Filter::In(id_column.to_string(), ids.to_vec()),
            ]),
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{ColumnDef, DbType, SchemaRepository, TableSchema};
    use crate::core::TypePartId;
    use crate::processors::testkit::{context, insert_link};
    use crate::resolver::{ModelIndex, TypeEntry};
    use crate::store::memory::MemoryStore;

    fn setup() -> (MemoryStore, SchemaRepository, ModelIndex) {
        let mut repo = SchemaRepository::new();
        let attrs = vec![ColumnDef::nullable("NAME", DbType::String)];
        repo.add(TableSchema::object("ITEM_A", attrs.clone()));
        repo.add(TableSchema::object("ITEM_B", attrs));
        repo.add(TableSchema::association("HAS_PARTS"));
        repo.add(TableSchema::flex());
        repo.add(TableSchema::xref());
        let store = MemoryStore::with_schema(&repo);

        let mut model = ModelIndex::new();
        let qn = QualifiedName::parse("tl.core:Special").unwrap();
        model.add_type(
            &qn,
            TypeEntry {
                id: TypePartId(7),
                table: "ITEM_A".to_string(),
            },
        );
        (store, repo, model)
    }

    fn insert_object(store: &MemoryStore, table: &str, id: i64, type_id: i64, name: &str) {
        store.insert_row(
            table,
            vec![
                (schema::BRANCH, RowValue::Int(1)),
                (schema::IDENTIFIER, RowValue::Int(id)),
                (schema::REV_MIN, RowValue::Int(2)),
                (schema::REV_MAX, RowValue::Int(9)),
                (schema::REV_CREATE, RowValue::Int(2)),
                (schema::TYPE_ID, RowValue::Int(type_id)),
                ("NAME", RowValue::Text(name.into())),
            ],
        );
    }

    fn move_config(from: &str, to: &str) -> MoveObjectsConfig {
        MoveObjectsConfig {
            source_table: from.into(),
            target_table: to.into(),
            types: vec![QualifiedName::parse("tl.core:Special").unwrap()],
            link_tables: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_move_objects_full_sweep() {
        let (store, repo, model) = setup();
        insert_object(&store, "ITEM_A", 10, 7, "moved");
        insert_object(&store, "ITEM_A", 11, 3, "stays");
        // Flex value of the moved object.
        store.insert_row(
            schema::FLEX_DATA,
            vec![
                (schema::FLEX_TYPE, RowValue::Text("ITEM_A".into())),
                (schema::IDENTIFIER, RowValue::Int(10)),
                (schema::BRANCH, RowValue::Int(1)),
                (schema::REV_MIN, RowValue::Int(2)),
                (schema::REV_MAX, RowValue::Int(9)),
                (schema::FLEX_ATTR, RowValue::Text("note".into())),
                (schema::DATA_TYPE, RowValue::Int(4)),
                (schema::VARCHAR_DATA, RowValue::Text("hello".into())),
            ],
        );
        // Link pointing at the moved object.
        insert_link(&store, "HAS_PARTS", 1, 500, 2, 9, 99, "OTHER", 10, "ITEM_A", 42, None);

        let ctx = context(&store, repo, model).await;
        let outcome = MoveObjects::new(move_config("ITEM_A", "ITEM_B"))
            .run(&ctx)
            .await
            .unwrap();
        match outcome {
            ProcessorOutcome::Applied { stats } => {
                assert_eq!(stats.inserted, 1);
                assert_eq!(stats.deleted, 1);
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        // The typed object moved; the other stayed.
        assert_eq!(store.row_count("ITEM_B"), 1);
        let moved = &store.rows("ITEM_B")[0];
        assert_eq!(moved[schema::IDENTIFIER], RowValue::Int(10));
        assert_eq!(moved[schema::REV_MIN], RowValue::Int(2));
        assert_eq!(moved["NAME"], RowValue::Text("moved".into()));
        assert_eq!(store.row_count("ITEM_A"), 1);

        // Flex value re-homed.
        let flex = &store.rows(schema::FLEX_DATA)[0];
        assert_eq!(flex[schema::FLEX_TYPE], RowValue::Text("ITEM_B".into()));

        // Incoming link endpoint rewritten.
        let link = &store.rows("HAS_PARTS")[0];
        assert_eq!(link[schema::DEST_TYPE], RowValue::Text("ITEM_B".into()));
        assert_eq!(link[schema::SOURCE_TYPE], RowValue::Text("OTHER".into()));

        // Touched revision registered for the destination table.
        let xref = store.rows(schema::REVISION_XREF);
        assert_eq!(xref.len(), 1);
        assert_eq!(xref[0][schema::XREF_TYPE], RowValue::Text("ITEM_B".into()));
        assert_eq!(xref[0][schema::XREF_REV], RowValue::Int(2));
    }

    #[tokio::test]
    async fn test_move_objects_round_trip() {
        let (store, repo, model) = setup();
        insert_object(&store, "ITEM_A", 10, 7, "alpha");
        store.insert_row(
            schema::FLEX_DATA,
            vec![
                (schema::FLEX_TYPE, RowValue::Text("ITEM_A".into())),
                (schema::IDENTIFIER, RowValue::Int(10)),
                (schema::BRANCH, RowValue::Int(1)),
                (schema::REV_MIN, RowValue::Int(2)),
                (schema::REV_MAX, RowValue::Int(9)),
                (schema::FLEX_ATTR, RowValue::Text("note".into())),
                (schema::DATA_TYPE, RowValue::Int(4)),
                (schema::VARCHAR_DATA, RowValue::Text("hello".into())),
            ],
        );
        let before_rows = store.rows("ITEM_A");
        let before_flex = store.rows(schema::FLEX_DATA);

        let ctx = context(&store, repo, model).await;
        MoveObjects::new(move_config("ITEM_A", "ITEM_B"))
            .run(&ctx)
            .await
            .unwrap();
        MoveObjects::new(move_config("ITEM_B", "ITEM_A"))
            .run(&ctx)
            .await
            .unwrap();

        assert_eq!(store.rows("ITEM_A"), before_rows);
        assert_eq!(store.row_count("ITEM_B"), 0);
        assert_eq!(store.rows(schema::FLEX_DATA), before_flex);
    }

    #[tokio::test]
    async fn test_unresolvable_type_aborts() {
        let (store, repo, _) = setup();
        let ctx = context(&store, repo, ModelIndex::new()).await;
        assert!(MoveObjects::new(move_config("ITEM_A", "ITEM_B"))
            .run(&ctx)
            .await
            .is_err());
    }
}
