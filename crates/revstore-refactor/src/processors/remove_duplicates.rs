//! Remove duplicate time-sliced assignments from an association table.
//!
//! For a given reference, at most one assignment of the same value to the
//! same `(branch, owner)` may be active at any revision. Rows are visited in
//! `(BRANCH, SOURCE_ID, REV_MIN)` order; a row that repeats a value inside
//! an already covered revision range is deleted (fully covered) or its
//! `rev_min` is raised past the covered range (partial overlap). The
//! earliest-starting assignment always survives unchanged.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::schema;
use crate::core::{BranchId, ObjectId, QualifiedName, RowValue};
use crate::error::Result;
use crate::interval::{resolve_overlap, OverlapAction, Revision};
use crate::store::batch::BatchWriter;
use crate::store::plan::{DeletePlan, Filter, SelectPlan, UpdatePlan};

use super::{link_columns, LinkRow, MigrationProcessor, ProcessorContext, ProcessorOutcome};

/// Configuration of [`RemoveDuplicateLinks`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveDuplicatesConfig {
    /// Association table holding the assignments.
    pub table: String,

    /// Reference whose assignments are deduplicated.
    pub reference: QualifiedName,
}

/// Applies the shrink-or-delete rule per `(branch, owner)` group.
pub struct RemoveDuplicateLinks {
    config: RemoveDuplicatesConfig,
}

impl RemoveDuplicateLinks {
    /// Create the processor from its configuration.
    pub fn new(config: RemoveDuplicatesConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MigrationProcessor for RemoveDuplicateLinks {
    fn name(&self) -> &'static str {
        "remove-duplicate-links"
    }

    async fn run(&self, ctx: &ProcessorContext) -> Result<ProcessorOutcome> {
        let config = &self.config;
        if ctx.table_schema(&config.table).is_none() {
            warn!(
                "Link table '{}' does not exist; nothing to deduplicate.",
                config.table
            );
            return Ok(ProcessorOutcome::skipped(format!(
                "table '{}' not found",
                config.table
            )));
        }
        let ref_id = ctx.model().resolve_part_id(&config.reference)?;

        let conn = ctx.connection();
        // The algorithm depends on this exact iteration order.
        let rows = conn
            .select(
                &SelectPlan::new(&config.table, link_columns())
                    .with_filter(Filter::Eq(
                        schema::META_ATTRIBUTE_ID.to_string(),
                        RowValue::Int(ref_id.0),
                    ))
                    .ordered_by_owner(schema::SOURCE_ID),
            )
            .await?;

        let mut writer = BatchWriter::new(conn, self.name(), conn.max_batch_size());
        let rows_read = rows.len() as u64;

        let mut group: Option<(BranchId, ObjectId)> = None;
        let mut covered: HashMap<(ObjectId, String), Revision> = HashMap::new();
        for row in rows {
            let link = LinkRow::from_row(&config.table, &row)?;
            let key = (link.branch, link.source_id);
            if group != Some(key) {
                group = Some(key);
                covered.clear();
            }
            let value = (link.dest_id, link.dest_type.clone());
            match covered.get(&value).copied() {
                None => {
                    covered.insert(value, link.lifetime.rev_max);
                }
                Some(last_max) => match resolve_overlap(last_max, link.lifetime) {
                    OverlapAction::Keep => {
                        covered.insert(value, link.lifetime.rev_max);
                    }
                    OverlapAction::Shrink(new_min) => {
                        writer
                            .queue_update(UpdatePlan {
                                table: config.table.clone(),
                                assignments: vec![(
                                    schema::REV_MIN.to_string(),
                                    RowValue::Int(new_min),
                                )],
                                filter: Filter::row_key(
                                    link.branch,
                                    link.id,
                                    link.lifetime.rev_min,
                                ),
                            })
                            .await?;
                        covered.insert(value, link.lifetime.rev_max);
                    }
                    OverlapAction::Delete => {
                        writer
                            .queue_delete(DeletePlan {
                                table: config.table.clone(),
                                filter: Filter::row_key(
                                    link.branch,
                                    link.id,
                                    link.lifetime.rev_min,
                                ),
                            })
                            .await?;
                    }
                },
            }
        }

        let mut stats = writer.finish().await?;
        stats.rows_read = rows_read;
        info!(
            "Deduplicated reference '{}' in '{}': {} shrunk, {} deleted.",
            config.reference, config.table, stats.updated, stats.deleted
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
        let store = MemoryStore::with_schema(&repo);
        let mut model = ModelIndex::new();
        add_reference(&mut model, "tl.core:Item#parts", 42, "HAS_PARTS");
        (store, repo, model)
    }

    fn processor() -> RemoveDuplicateLinks {
        RemoveDuplicateLinks::new(RemoveDuplicatesConfig {
            table: "HAS_PARTS".into(),
            reference: QualifiedName::parse("tl.core:Item#parts").unwrap(),
        })
    }

    fn lifetimes(store: &MemoryStore) -> Vec<(i64, i64)> {
        let mut result: Vec<(i64, i64)> = store
            .rows("HAS_PARTS")
            .iter()
            .map(|r| {
                (
                    r[schema::REV_MIN].as_int().unwrap(),
                    r[schema::REV_MAX].as_int().unwrap(),
                )
            })
            .collect();
        result.sort();
        result
    }

    #[tokio::test]
    async fn test_partial_overlap_shrinks_later_row() {
        let (store, repo, model) = setup();
        // Same source and destination, overlapping lifetimes.
        insert_link(&store, "HAS_PARTS", 0, 1, 1, 5, 1, "ITEM", 10, "ITEM", 42, None);
        insert_link(&store, "HAS_PARTS", 0, 2, 3, 8, 1, "ITEM", 10, "ITEM", 42, None);

        let ctx = context(&store, repo, model).await;
        processor().run(&ctx).await.unwrap();

        assert_eq!(lifetimes(&store), vec![(1, 5), (6, 8)]);
    }

    #[tokio::test]
    async fn test_full_cover_deletes_later_row() {
        let (store, repo, model) = setup();
        insert_link(&store, "HAS_PARTS", 0, 1, 1, 10, 1, "ITEM", 10, "ITEM", 42, None);
        insert_link(&store, "HAS_PARTS", 0, 2, 3, 8, 1, "ITEM", 10, "ITEM", 42, None);

        let ctx = context(&store, repo, model).await;
        let outcome = processor().run(&ctx).await.unwrap();
        match outcome {
            ProcessorOutcome::Applied { stats } => {
                assert_eq!(stats.deleted, 1);
                assert_eq!(stats.updated, 0);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(lifetimes(&store), vec![(1, 10)]);
    }

    #[tokio::test]
    async fn test_distinct_values_untouched() {
        let (store, repo, model) = setup();
        insert_link(&store, "HAS_PARTS", 0, 1, 1, 5, 1, "ITEM", 10, "ITEM", 42, None);
        insert_link(&store, "HAS_PARTS", 0, 2, 3, 8, 1, "ITEM", 11, "ITEM", 42, None);
        // Same destination id in a different table is a different value.
        insert_link(&store, "HAS_PARTS", 0, 3, 3, 8, 1, "ITEM", 10, "OTHER", 42, None);

        let ctx = context(&store, repo, model).await;
        let outcome = processor().run(&ctx).await.unwrap();
        match outcome {
            ProcessorOutcome::Applied { stats } => assert_eq!(stats.writes(), 0),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(store.row_count("HAS_PARTS"), 3);
    }

    #[tokio::test]
    async fn test_groups_do_not_leak_across_owners() {
        let (store, repo, model) = setup();
        insert_link(&store, "HAS_PARTS", 0, 1, 1, 5, 1, "ITEM", 10, "ITEM", 42, None);
        // Different owner: same value and overlapping lifetime is fine.
        insert_link(&store, "HAS_PARTS", 0, 2, 3, 8, 2, "ITEM", 10, "ITEM", 42, None);

        let ctx = context(&store, repo, model).await;
        processor().run(&ctx).await.unwrap();
        assert_eq!(store.row_count("HAS_PARTS"), 2);
        assert_eq!(lifetimes(&store), vec![(1, 5), (3, 8)]);
    }

    #[tokio::test]
    async fn test_idempotent_second_pass() {
        let (store, repo, model) = setup();
        insert_link(&store, "HAS_PARTS", 0, 1, 1, 5, 1, "ITEM", 10, "ITEM", 42, None);
        insert_link(&store, "HAS_PARTS", 0, 2, 3, 8, 1, "ITEM", 10, "ITEM", 42, None);
        insert_link(&store, "HAS_PARTS", 0, 3, 4, 6, 1, "ITEM", 10, "ITEM", 42, None);

        let ctx = context(&store, repo, model).await;
        processor().run(&ctx).await.unwrap();
        let after_first = lifetimes(&store);

        let outcome = processor().run(&ctx).await.unwrap();
        match outcome {
            ProcessorOutcome::Applied { stats } => assert_eq!(stats.writes(), 0),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(lifetimes(&store), after_first);
    }
}
