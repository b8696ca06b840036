//! Synthesize links between two object sets (cross product).
//!
//! Inserts one link per `(source, target)` pair whose object lifetimes
//! intersect, carrying the intersected lifetime. Pairs already linked by
//! the configured reference are left alone, so every eligible pair ends up
//! with exactly one link.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::schema;
use crate::core::{BranchId, ObjectId, QualifiedName, RowValue, TypePartId};
use crate::error::Result;
use crate::interval::Lifetime;
use crate::store::batch::BatchWriter;
use crate::store::plan::{Filter, SelectPlan};
use crate::store::StoreConnection;

use super::{
    link_columns, maybe_register_xref, req_int, touch, IdAllocator, LinkRow, MigrationProcessor,
    ProcessorContext, ProcessorOutcome, TouchedRevisions,
};

/// Configuration of [`CreateLinks`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLinksConfig {
    /// Association table receiving the links.
    pub table: String,

    /// Reference the synthesized links instantiate.
    pub reference: QualifiedName,

    /// Table of the source objects.
    pub source_table: String,

    /// Restrict sources to this type.
    #[serde(default)]
    pub source_type: Option<QualifiedName>,

    /// Table of the target objects.
    pub dest_table: String,

    /// Restrict targets to this type.
    #[serde(default)]
    pub dest_type: Option<QualifiedName>,

    /// When set, assign monotonically increasing sort orders per source,
    /// spaced by this step.
    #[serde(default)]
    pub order_step: Option<i64>,
}

/// Inserts one link per eligible source/target pair.
pub struct CreateLinks {
    config: CreateLinksConfig,
}

impl CreateLinks {
    /// Create the processor from its configuration.
    pub fn new(config: CreateLinksConfig) -> Self {
        Self { config }
    }
}

/// Total existence interval per object: `(branch, id) -> lifetime`.
///
/// Successive row versions of one object are contiguous, so min/max over
/// the versions is the object's existence.
async fn load_objects(
    conn: &dyn StoreConnection,
    table: &str,
    type_id: Option<TypePartId>,
) -> Result<BTreeMap<(i64, i64), Lifetime>> {
    let filter = match type_id {
        Some(type_id) => Filter::Eq(schema::TYPE_ID.to_string(), RowValue::Int(type_id.0)),
        None => Filter::All,
    };
    let rows = conn
        .select(
            &SelectPlan::new(
                table,
                vec![
                    schema::BRANCH.to_string(),
                    schema::IDENTIFIER.to_string(),
                    schema::REV_MIN.to_string(),
                    schema::REV_MAX.to_string(),
                ],
            )
            .with_filter(filter)
            .ordered_by_owner(schema::IDENTIFIER),
        )
        .await?;
    let mut objects: BTreeMap<(i64, i64), Lifetime> = BTreeMap::new();
    for row in rows {
        let branch = req_int(table, &row, 0)?;
        let id = req_int(table, &row, 1)?;
        let lifetime = Lifetime::new(req_int(table, &row, 2)?, req_int(table, &row, 3)?);
        objects
            .entry((branch, id))
            .and_modify(|existing| {
                *existing = Lifetime::new(
                    existing.rev_min.min(lifetime.rev_min),
                    existing.rev_max.max(lifetime.rev_max),
                );
            })
            .or_insert(lifetime);
    }
    Ok(objects)
}

#[async_trait]
impl MigrationProcessor for CreateLinks {
    fn name(&self) -> &'static str {
        "create-links"
    }

    async fn run(&self, ctx: &ProcessorContext) -> Result<ProcessorOutcome> {
        let config = &self.config;
        if ctx.table_schema(&config.table).is_none() {
            warn!(
                "Link table '{}' does not exist; nothing to create.",
                config.table
            );
            return Ok(ProcessorOutcome::skipped(format!(
                "table '{}' not found",
                config.table
            )));
        }
        ctx.require_table(&config.source_table)?;
        ctx.require_table(&config.dest_table)?;
        let ref_id = ctx.model().resolve_part_id(&config.reference)?;
        let source_type = match &config.source_type {
            Some(name) => Some(ctx.model().resolve_type_id(name)?),
            None => None,
        };
        let dest_type = match &config.dest_type {
            Some(name) => Some(ctx.model().resolve_type_id(name)?),
            None => None,
        };

        info!(
            "Creating '{}' links for all intersecting pairs of '{}' x '{}'.",
            config.reference, config.source_table, config.dest_table
        );

        let conn = ctx.connection();
        let sources = load_objects(conn, &config.source_table, source_type).await?;
        let dests = load_objects(conn, &config.dest_table, dest_type).await?;
        let rows_read = (sources.len() + dests.len()) as u64;

        // Pairs already linked by this reference keep their link.
        let existing_rows = conn
            .select(
                &SelectPlan::new(&config.table, link_columns()).with_filter(Filter::Eq(
                    schema::META_ATTRIBUTE_ID.to_string(),
                    RowValue::Int(ref_id.0),
                )),
            )
            .await?;
        let mut existing: BTreeSet<(i64, i64, i64)> = BTreeSet::new();
        for row in &existing_rows {
            let link = LinkRow::from_row(&config.table, row)?;
            existing.insert((link.branch.0, link.source_id.0, link.dest_id.0));
        }

        let columns = link_columns();
        let mut writer = BatchWriter::new(conn, self.name(), conn.max_batch_size());
        let mut ids = IdAllocator::new(256);
        let mut touched = TouchedRevisions::new();
        for ((branch, source_id), source_lifetime) in &sources {
            let mut position: i64 = 0;
            for ((dest_branch, dest_id), dest_lifetime) in &dests {
                if dest_branch != branch {
                    continue;
                }
                let Some(lifetime) = source_lifetime.intersection(dest_lifetime) else {
                    continue;
                };
                if existing.contains(&(*branch, *source_id, *dest_id)) {
                    continue;
                }
                let link = LinkRow {
                    branch: BranchId(*branch),
                    id: ids.next(conn).await?,
                    lifetime,
                    rev_create: lifetime.rev_min,
                    source_id: ObjectId(*source_id),
                    source_type: config.source_table.clone(),
                    dest_id: ObjectId(*dest_id),
                    dest_type: config.dest_table.clone(),
                    reference: ref_id,
                    sort_order: config.order_step.map(|step| position * step),
                };
                position += 1;
                touch(&mut touched, link.branch, lifetime.rev_min);
                writer
                    .queue_insert(&config.table, &columns, link.to_row())
                    .await?;
            }
        }
        writer.flush().await?;
        maybe_register_xref(ctx, conn, &config.table, &touched).await?;

        let mut stats = writer.finish().await?;
        stats.rows_read = rows_read;
        info!(
            "Created {} link(s) of reference '{}' in '{}'.",
            stats.inserted, config.reference, config.table
        );
        Ok(ProcessorOutcome::applied(stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{SchemaRepository, TableSchema};
    use crate::processors::testkit::{add_reference, context, insert_link};
    use crate::resolver::ModelIndex;
    use crate::store::memory::MemoryStore;

    fn setup() -> (MemoryStore, SchemaRepository, ModelIndex) {
        let mut repo = SchemaRepository::new();
        repo.add(TableSchema::association("HAS_PARTS"));
        repo.add(TableSchema::object("SRC", Vec::new()));
        repo.add(TableSchema::object("DST", Vec::new()));
        let store = MemoryStore::with_schema(&repo);
        let mut model = ModelIndex::new();
        add_reference(&mut model, "tl.core:Item#parts", 42, "HAS_PARTS");
        (store, repo, model)
    }

    fn insert_object(store: &MemoryStore, table: &str, branch: i64, id: i64, min: i64, max: i64) {
        store.insert_row(
            table,
            vec![
                (schema::BRANCH, RowValue::Int(branch)),
                (schema::IDENTIFIER, RowValue::Int(id)),
                (schema::REV_MIN, RowValue::Int(min)),
                (schema::REV_MAX, RowValue::Int(max)),
                (schema::TYPE_ID, RowValue::Int(1)),
            ],
        );
    }

    fn processor(order_step: Option<i64>) -> CreateLinks {
        CreateLinks::new(CreateLinksConfig {
            table: "HAS_PARTS".into(),
            reference: QualifiedName::parse("tl.core:Item#parts").unwrap(),
            source_table: "SRC".into(),
            source_type: None,
            dest_table: "DST".into(),
            dest_type: None,
            order_step,
        })
    }

    fn links(store: &MemoryStore) -> Vec<(i64, i64, i64, i64)> {
        let mut result: Vec<(i64, i64, i64, i64)> = store
            .rows("HAS_PARTS")
            .iter()
            .map(|r| {
                (
                    r[schema::SOURCE_ID].as_int().unwrap(),
                    r[schema::DEST_ID].as_int().unwrap(),
                    r[schema::REV_MIN].as_int().unwrap(),
                    r[schema::REV_MAX].as_int().unwrap(),
                )
            })
            .collect();
        result.sort();
        result
    }

    #[tokio::test]
    async fn test_pair_link_gets_intersected_lifetime() {
        let (store, repo, model) = setup();
        insert_object(&store, "SRC", 0, 1, 1, 10);
        insert_object(&store, "DST", 0, 100, 5, 20);

        let ctx = context(&store, repo, model).await;
        processor(None).run(&ctx).await.unwrap();

        assert_eq!(links(&store), vec![(1, 100, 5, 10)]);
    }

    #[tokio::test]
    async fn test_no_link_for_disjoint_lifetimes() {
        let (store, repo, model) = setup();
        insert_object(&store, "SRC", 0, 1, 1, 4);
        insert_object(&store, "DST", 0, 100, 5, 20);

        let ctx = context(&store, repo, model).await;
        processor(None).run(&ctx).await.unwrap();
        assert!(links(&store).is_empty());
    }

    #[tokio::test]
    async fn test_multi_version_object_uses_total_existence() {
        let (store, repo, model) = setup();
        // Object exists [1,10] across two row versions.
        insert_object(&store, "SRC", 0, 1, 1, 6);
        insert_object(&store, "SRC", 0, 1, 7, 10);
        insert_object(&store, "DST", 0, 100, 8, 20);

        let ctx = context(&store, repo, model).await;
        processor(None).run(&ctx).await.unwrap();
        assert_eq!(links(&store), vec![(1, 100, 8, 10)]);
    }

    #[tokio::test]
    async fn test_existing_pairs_skipped_and_orders_assigned() {
        let (store, repo, model) = setup();
        insert_object(&store, "SRC", 0, 1, 1, 10);
        insert_object(&store, "DST", 0, 100, 1, 10);
        insert_object(&store, "DST", 0, 101, 1, 10);
        // Pair (1, 100) is already linked.
        insert_link(&store, "HAS_PARTS", 0, 900, 1, 10, 1, "SRC", 100, "DST", 42, Some(0));

        let ctx = context(&store, repo, model).await;
        let outcome = processor(Some(16)).run(&ctx).await.unwrap();
        match outcome {
            ProcessorOutcome::Applied { stats } => assert_eq!(stats.inserted, 1),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(store.row_count("HAS_PARTS"), 2);

        // Running again creates nothing new.
        let outcome = processor(Some(16)).run(&ctx).await.unwrap();
        match outcome {
            ProcessorOutcome::Applied { stats } => assert_eq!(stats.inserted, 0),
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
