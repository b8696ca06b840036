//! Rewrite the reference id of association rows.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::schema;
use crate::core::{QualifiedName, RowValue};
use crate::error::Result;
use crate::store::batch::WriteStats;
use crate::store::plan::{Filter, UpdatePlan};

use super::{MigrationProcessor, ProcessorContext, ProcessorOutcome};

/// Configuration of [`ChangeLinkReference`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeReferenceConfig {
    /// Association table holding the links.
    pub table: String,

    /// Reference the links currently instantiate.
    pub old_reference: QualifiedName,

    /// Reference the links instantiate afterwards.
    pub new_reference: QualifiedName,
}

/// Re-labels all links of one reference as links of another reference.
/// Endpoints, identity and lifetimes stay untouched.
pub struct ChangeLinkReference {
    config: ChangeReferenceConfig,
}

impl ChangeLinkReference {
    /// Create the processor from its configuration.
    pub fn new(config: ChangeReferenceConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MigrationProcessor for ChangeLinkReference {
    fn name(&self) -> &'static str {
        "change-link-reference"
    }

    async fn run(&self, ctx: &ProcessorContext) -> Result<ProcessorOutcome> {
        let config = &self.config;
        if ctx.table_schema(&config.table).is_none() {
            warn!(
                "Link table '{}' does not exist; nothing to relabel.",
                config.table
            );
            return Ok(ProcessorOutcome::skipped(format!(
                "table '{}' not found",
                config.table
            )));
        }
        let old_id = ctx.model().resolve_part_id(&config.old_reference)?;
        let new_id = ctx.model().resolve_part_id(&config.new_reference)?;

        let conn = ctx.connection();
        let updated = conn
            .update(&UpdatePlan {
                table: config.table.clone(),
                assignments: vec![(
                    schema::META_ATTRIBUTE_ID.to_string(),
                    RowValue::Int(new_id.0),
                )],
                filter: Filter::Eq(
                    schema::META_ATTRIBUTE_ID.to_string(),
                    RowValue::Int(old_id.0),
                ),
            })
            .await?;

        info!(
            "Relabeled {} links in '{}' from '{}' to '{}'.",
            updated, config.table, config.old_reference, config.new_reference
        );
        Ok(ProcessorOutcome::applied(WriteStats {
            updated,
            ..WriteStats::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{SchemaRepository, TableSchema};
    use crate::processors::testkit::{add_reference, context, insert_link};
    use crate::resolver::ModelIndex;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn test_change_reference_rewrites_matching_rows() {
        let mut repo = SchemaRepository::new();
        repo.add(TableSchema::association("HAS_PARTS"));
        let store = MemoryStore::with_schema(&repo);
        let mut model = ModelIndex::new();
        add_reference(&mut model, "tl.core:Item#old", 42, "HAS_PARTS");
        add_reference(&mut model, "tl.core:Item#new", 99, "HAS_PARTS");

        insert_link(&store, "HAS_PARTS", 1, 1, 1, 10, 100, "ITEM", 200, "ITEM", 42, None);
        insert_link(&store, "HAS_PARTS", 1, 2, 1, 10, 100, "ITEM", 201, "ITEM", 7, None);

        let ctx = context(&store, repo, model).await;
        let processor = ChangeLinkReference::new(ChangeReferenceConfig {
            table: "HAS_PARTS".into(),
            old_reference: QualifiedName::parse("tl.core:Item#old").unwrap(),
            new_reference: QualifiedName::parse("tl.core:Item#new").unwrap(),
        });
        let outcome = processor.run(&ctx).await.unwrap();
        match outcome {
            ProcessorOutcome::Applied { stats } => assert_eq!(stats.updated, 1),
            other => panic!("unexpected outcome {:?}", other),
        }

        let refs: Vec<i64> = store
            .rows("HAS_PARTS")
            .iter()
            .filter_map(|r| r.get(schema::META_ATTRIBUTE_ID).and_then(RowValue::as_int))
            .collect();
        assert!(refs.contains(&99));
        assert!(refs.contains(&7));
        assert!(!refs.contains(&42));
    }
}
