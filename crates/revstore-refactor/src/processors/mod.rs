//! Structural migration processors.
//!
//! Every processor is one bounded rewrite of the versioned store: it
//! resolves its configured names, computes a read plan, derives a write
//! plan and applies it in batches, reporting row counts. Processors are
//! independent units of work; a failure in one does not roll back writes
//! another already committed.

pub mod alter_column;
pub mod attribute_storage;
pub mod change_reference;
pub mod create_links;
pub mod inline_links;
pub mod internationalize;
pub mod link_order;
pub mod move_links;
pub mod move_objects;
pub mod remove_duplicates;

pub use alter_column::{AlterColumn, AlterColumnConfig};
pub use attribute_storage::{ColumnToFlex, ColumnToFlexConfig, FlexToColumn, FlexToColumnConfig};
pub use change_reference::{ChangeLinkReference, ChangeReferenceConfig};
pub use create_links::{CreateLinks, CreateLinksConfig};
pub use inline_links::{InlineLinksConfig, SynthesizeDirectLinks};
pub use internationalize::{InternationalizeAttribute, InternationalizeConfig};
pub use link_order::{LinkOrderConfig, SynthesizeLinkOrder};
pub use move_links::{
    DeleteLinks, DeleteLinksConfig, InvertLinks, InvertLinksConfig, MoveLinks, MoveLinksConfig,
};
pub use move_objects::{MoveObjects, MoveObjectsConfig};
pub use remove_duplicates::{RemoveDuplicateLinks, RemoveDuplicatesConfig};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Serialize;

use crate::core::schema::{self, SchemaRepository, TableSchema};
use crate::core::{BranchId, ObjectId, RowValue, TypePartId};
use crate::error::{MigrationError, Result};
use crate::interval::{Lifetime, Revision};
use crate::resolver::ModelIndex;
use crate::store::batch::WriteStats;
use crate::store::plan::{Filter, SelectPlan};
use crate::store::{StoreConnection, StorePool};

/// Environment a processor runs in: the primary connection, the pool a
/// second read-side connection can be borrowed from, the schema repository
/// snapshot and the model index, all supplied by the driver.
///
/// All writes go through the primary connection and participate in its
/// current transaction; the driver commits after each processor. Only the
/// read-while-write processors commit earlier, to publish a snapshot for
/// their second connection.
pub struct ProcessorContext {
    conn: Box<dyn StoreConnection>,
    pool: Arc<dyn StorePool>,
    schema: Arc<RwLock<SchemaRepository>>,
    model: Arc<ModelIndex>,
}

impl ProcessorContext {
    /// Create a context, borrowing the primary connection from the pool.
    pub async fn new(
        pool: Arc<dyn StorePool>,
        schema: Arc<RwLock<SchemaRepository>>,
        model: Arc<ModelIndex>,
    ) -> Result<Self> {
        let conn = pool.acquire().await?;
        Ok(Self {
            conn,
            pool,
            schema,
            model,
        })
    }

    /// The primary connection.
    pub fn connection(&self) -> &dyn StoreConnection {
        self.conn.as_ref()
    }

    /// The connection pool (read side of the two-connection pattern).
    pub fn pool(&self) -> &dyn StorePool {
        self.pool.as_ref()
    }

    /// The model index.
    pub fn model(&self) -> &ModelIndex {
        &self.model
    }

    /// Copy of a table's schema, if the table exists.
    pub fn table_schema(&self, name: &str) -> Option<TableSchema> {
        self.schema
            .read()
            .expect("schema lock poisoned")
            .get(name)
            .cloned()
    }

    /// Copy of a table's schema, failing when the table is missing.
    pub fn require_table(&self, name: &str) -> Result<TableSchema> {
        self.table_schema(name).ok_or_else(|| {
            MigrationError::Config(format!("Table '{}' not found in schema repository", name))
        })
    }

    /// Names of all association tables.
    pub fn association_tables(&self) -> Vec<String> {
        self.schema
            .read()
            .expect("schema lock poisoned")
            .association_tables()
    }

    /// Mutate the schema repository (alter-column keeps metadata in sync
    /// with executed DDL).
    pub fn update_schema<R>(&self, f: impl FnOnce(&mut SchemaRepository) -> R) -> R {
        f(&mut self.schema.write().expect("schema lock poisoned"))
    }
}

/// Result of one processor run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ProcessorOutcome {
    /// The processor ran and applied its writes.
    Applied {
        /// Row counts.
        stats: WriteStats,
    },

    /// A best-effort precondition was not met; the processor did nothing.
    Skipped {
        /// Operator-facing reason.
        reason: String,
    },
}

impl ProcessorOutcome {
    /// An applied outcome.
    pub fn applied(stats: WriteStats) -> Self {
        ProcessorOutcome::Applied { stats }
    }

    /// A skipped outcome.
    pub fn skipped(reason: impl Into<String>) -> Self {
        ProcessorOutcome::Skipped {
            reason: reason.into(),
        }
    }
}

/// One structural rewrite of the versioned store.
#[async_trait]
pub trait MigrationProcessor: Send + Sync {
    /// Processor name for logging.
    fn name(&self) -> &'static str;

    /// Execute the rewrite.
    async fn run(&self, ctx: &ProcessorContext) -> Result<ProcessorOutcome>;
}

/// Column list shared by all association-table reads, in [`LinkRow`] field
/// order.
pub(crate) fn link_columns() -> Vec<String> {
    [
        schema::BRANCH,
        schema::IDENTIFIER,
        schema::REV_MIN,
        schema::REV_MAX,
        schema::REV_CREATE,
        schema::SOURCE_ID,
        schema::SOURCE_TYPE,
        schema::DEST_ID,
        schema::DEST_TYPE,
        schema::META_ATTRIBUTE_ID,
        schema::SORT_ORDER,
    ]
    .iter()
    .map(|c| c.to_string())
    .collect()
}

/// One association row.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LinkRow {
    pub branch: BranchId,
    pub id: ObjectId,
    pub lifetime: Lifetime,
    pub rev_create: Revision,
    pub source_id: ObjectId,
    pub source_type: String,
    pub dest_id: ObjectId,
    pub dest_type: String,
    pub reference: TypePartId,
    pub sort_order: Option<i64>,
}

impl LinkRow {
    /// Parse a row selected with [`link_columns`].
    pub fn from_row(table: &str, row: &[RowValue]) -> Result<Self> {
        Ok(Self {
            branch: BranchId(req_int(table, row, 0)?),
            id: ObjectId(req_int(table, row, 1)?),
            lifetime: Lifetime::new(req_int(table, row, 2)?, req_int(table, row, 3)?),
            rev_create: req_int(table, row, 4)?,
            source_id: ObjectId(req_int(table, row, 5)?),
            source_type: req_text(table, row, 6)?,
            dest_id: ObjectId(req_int(table, row, 7)?),
            dest_type: req_text(table, row, 8)?,
            reference: TypePartId(req_int(table, row, 9)?),
            sort_order: row.get(10).and_then(RowValue::as_int),
        })
    }

    /// Serialize back into [`link_columns`] order.
    pub fn to_row(&self) -> Vec<RowValue> {
        vec![
            RowValue::Int(self.branch.0),
            RowValue::Int(self.id.0),
            RowValue::Int(self.lifetime.rev_min),
            RowValue::Int(self.lifetime.rev_max),
            RowValue::Int(self.rev_create),
            RowValue::Int(self.source_id.0),
            RowValue::Text(self.source_type.clone()),
            RowValue::Int(self.dest_id.0),
            RowValue::Text(self.dest_type.clone()),
            RowValue::Int(self.reference.0),
            self.sort_order.map(RowValue::Int).into(),
        ]
    }
}

/// Integer cell accessor with a table-identifying error.
pub(crate) fn req_int(table: &str, row: &[RowValue], idx: usize) -> Result<i64> {
    row.get(idx).and_then(RowValue::as_int).ok_or_else(|| {
        MigrationError::sql(
            table,
            "select",
            format!("expected integer in result column {}", idx),
        )
    })
}

/// Text cell accessor with a table-identifying error.
pub(crate) fn req_text(table: &str, row: &[RowValue], idx: usize) -> Result<String> {
    row.get(idx)
        .and_then(RowValue::as_text)
        .map(str::to_string)
        .ok_or_else(|| {
            MigrationError::sql(
                table,
                "select",
                format!("expected text in result column {}", idx),
            )
        })
}

/// Revisions in which new row versions appeared, per branch.
pub(crate) type TouchedRevisions = BTreeMap<BranchId, BTreeSet<Revision>>;

/// Record a touched revision.
pub(crate) fn touch(revs: &mut TouchedRevisions, branch: BranchId, rev: Revision) {
    revs.entry(branch).or_default().insert(rev);
}

/// Hands out fresh object identifiers, fetching contiguous ranges from the
/// store in chunks. Unused remainder ids of the last chunk stay unused
/// (sequence gaps are harmless).
pub(crate) struct IdAllocator {
    next: i64,
    remaining: u64,
    chunk: u64,
}

impl IdAllocator {
    /// Create an allocator fetching `chunk` ids per store round trip.
    pub fn new(chunk: u64) -> Self {
        Self {
            next: 0,
            remaining: 0,
            chunk: chunk.max(1),
        }
    }

    /// Next fresh identifier.
    pub async fn next(&mut self, conn: &dyn StoreConnection) -> Result<ObjectId> {
        if self.remaining == 0 {
            self.next = conn.allocate_ids(self.chunk).await?;
            self.remaining = self.chunk;
        }
        let id = self.next;
        self.next += 1;
        self.remaining -= 1;
        Ok(ObjectId(id))
    }
}

/// Register touched revisions when the store has a cross-reference table;
/// stores without one (partial test fixtures, trimmed deployments) skip the
/// bookkeeping.
pub(crate) async fn maybe_register_xref(
    ctx: &ProcessorContext,
    conn: &dyn StoreConnection,
    table: &str,
    revisions: &TouchedRevisions,
) -> Result<u64> {
    if ctx.table_schema(schema::REVISION_XREF).is_none() {
        tracing::debug!("no revision cross-reference table; skipping registration");
        return Ok(0);
    }
    register_xref(conn, table, revisions).await
}

/// Mark `table` as touched in all given revisions in the revision
/// cross-reference table, skipping entries that are already present so the
/// insert cannot hit a duplicate key.
pub(crate) async fn register_xref(
    conn: &dyn StoreConnection,
    table: &str,
    revisions: &TouchedRevisions,
) -> Result<u64> {
    let mut inserted = 0;
    for (branch, revs) in revisions {
        if revs.is_empty() {
            continue;
        }
        let existing = conn
            .select(
                &SelectPlan::new(schema::REVISION_XREF, vec![schema::XREF_REV.to_string()])
                    .with_filter(Filter::and(vec![
                        Filter::Eq(schema::XREF_BRANCH.to_string(), RowValue::Int(branch.0)),
                        Filter::Eq(
                            schema::XREF_TYPE.to_string(),
                            RowValue::Text(table.to_string()),
                        ),
                    ])),
            )
            .await?;
        let known: BTreeSet<Revision> = existing
            .iter()
            .filter_map(|row| row.first().and_then(RowValue::as_int))
            .collect();

        let mut plan = crate::store::plan::InsertPlan::new(
            schema::REVISION_XREF,
            vec![
                schema::XREF_REV.to_string(),
                schema::XREF_BRANCH.to_string(),
                schema::XREF_TYPE.to_string(),
            ],
        );
        for rev in revs.difference(&known) {
            plan.push(vec![
                RowValue::Int(*rev),
                RowValue::Int(branch.0),
                RowValue::Text(table.to_string()),
            ]);
        }
        if !plan.rows.is_empty() {
            inserted += conn.insert(&plan).await?;
        }
    }
    Ok(inserted)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::StorePool;

    #[test]
    fn test_link_row_round_trip() {
        let link = LinkRow {
            branch: BranchId(1),
            id: ObjectId(500),
            lifetime: Lifetime::new(3, 9),
            rev_create: 3,
            source_id: ObjectId(10),
            source_type: "ITEM".into(),
            dest_id: ObjectId(20),
            dest_type: "ITEM".into(),
            reference: TypePartId(42),
            sort_order: None,
        };
        let row = link.to_row();
        assert_eq!(row.len(), link_columns().len());
        assert_eq!(LinkRow::from_row("T", &row).unwrap(), link);
    }

    #[tokio::test]
    async fn test_register_xref_skips_existing() {
        let store = MemoryStore::new();
        store.create_table(schema::REVISION_XREF);
        store.insert_row(
            schema::REVISION_XREF,
            vec![
                (schema::XREF_REV, RowValue::Int(5)),
                (schema::XREF_BRANCH, RowValue::Int(1)),
                (schema::XREF_TYPE, RowValue::Text("ITEM".into())),
            ],
        );

        let mut revs = TouchedRevisions::new();
        touch(&mut revs, BranchId(1), 5);
        touch(&mut revs, BranchId(1), 6);

        let conn = store.acquire().await.unwrap();
        let inserted = register_xref(conn.as_ref(), "ITEM", &revs).await.unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(store.row_count(schema::REVISION_XREF), 2);

        // A second registration finds everything present.
        let inserted = register_xref(conn.as_ref(), "ITEM", &revs).await.unwrap();
        assert_eq!(inserted, 0);
    }
}
