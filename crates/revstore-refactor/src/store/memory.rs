//! In-memory plan interpreter.
//!
//! Backs unit and integration tests and `--dry-run` executions. Rows live in
//! plain vectors of column maps; an absent column reads as NULL. Filter
//! semantics match the SQL rendering in [`crate::dialect`]: `Eq(col, NULL)`
//! matches NULL (rendered as `IS NULL`), comparisons never match NULL.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::{RowBatch, RowValue};
use crate::core::schema::{DbType, SchemaRepository};
use crate::error::{MigrationError, Result};
use crate::store::plan::{
    DdlOp, DeletePlan, Filter, InsertPlan, OrderKey, SelectPlan, UpdatePlan,
};
use crate::store::{StoreConnection, StorePool};

/// One stored row: column name to value. Absent columns read as NULL.
pub type MemoryRow = BTreeMap<String, RowValue>;

#[derive(Debug, Default)]
struct MemoryInner {
    tables: BTreeMap<String, Vec<MemoryRow>>,
    next_id: i64,
}

/// In-memory row store.
///
/// Cloning shares the underlying tables; every "connection" borrowed from
/// the pool sees writes of every other connection immediately (single
/// process, no isolation), which matches the committed-snapshot guarantee
/// processors rely on.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryInner {
                tables: BTreeMap::new(),
                next_id: 10_000,
            })),
        }
    }

    /// Create a store with one empty table per schema-repository entry.
    pub fn with_schema(repo: &SchemaRepository) -> Self {
        let store = Self::new();
        for name in repo.table_names() {
            store.create_table(&name);
        }
        store
    }

    /// Register an empty table.
    pub fn create_table(&self, name: &str) {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        inner.tables.entry(name.to_string()).or_default();
    }

    /// Insert a row given as column/value pairs (test setup).
    pub fn insert_row(&self, table: &str, values: Vec<(&str, RowValue)>) {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        let rows = inner.tables.entry(table.to_string()).or_default();
        rows.push(
            values
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        );
    }

    /// Snapshot of a table's rows (assertions).
    pub fn rows(&self, table: &str) -> Vec<MemoryRow> {
        let inner = self.inner.lock().expect("memory store poisoned");
        inner.tables.get(table).cloned().unwrap_or_default()
    }

    /// Number of rows in a table.
    pub fn row_count(&self, table: &str) -> usize {
        let inner = self.inner.lock().expect("memory store poisoned");
        inner.tables.get(table).map(Vec::len).unwrap_or(0)
    }
}

fn cell<'a>(row: &'a MemoryRow, column: &str) -> &'a RowValue {
    row.get(column).unwrap_or(&RowValue::Null)
}

fn matches(filter: &Filter, row: &MemoryRow) -> bool {
    match filter {
        Filter::All => true,
        Filter::Eq(col, RowValue::Null) => cell(row, col).is_null(),
        Filter::Eq(col, value) => cell(row, col) == value,
        Filter::In(col, values) => values.contains(cell(row, col)),
        Filter::Le(col, value) => {
            let v = cell(row, col);
            !v.is_null() && !value.is_null() && v.compare(value) != Ordering::Greater
        }
        Filter::Ge(col, value) => {
            let v = cell(row, col);
            !v.is_null() && !value.is_null() && v.compare(value) != Ordering::Less
        }
        Filter::IsNull(col) => cell(row, col).is_null(),
        Filter::NotNull(col) => !cell(row, col).is_null(),
        Filter::And(parts) => parts.iter().all(|p| matches(p, row)),
    }
}

fn sort_rows(rows: &mut [MemoryRow], order: &[OrderKey]) {
    rows.sort_by(|a, b| {
        for key in order {
            let ord = cell(a, &key.column).compare(cell(b, &key.column));
            let ord = if key.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

fn cast(value: RowValue, target: DbType) -> RowValue {
    match (value, target) {
        (RowValue::Int(v), DbType::String) => RowValue::Text(v.to_string()),
        (RowValue::Text(s), DbType::Long) | (RowValue::Text(s), DbType::Int) => {
            match s.parse::<i64>() {
                Ok(v) => RowValue::Int(v),
                Err(_) => RowValue::Text(s),
            }
        }
        (RowValue::Int(v), DbType::Double) => RowValue::Double(v as f64),
        (RowValue::Int(v), DbType::Boolean) => RowValue::Bool(v != 0),
        (RowValue::Bool(b), DbType::Int) | (RowValue::Bool(b), DbType::Long) => {
            RowValue::Int(i64::from(b))
        }
        (other, _) => other,
    }
}

/// A borrowed connection of the in-memory store.
#[derive(Debug, Clone)]
pub struct MemoryConnection {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryConnection {
    fn run_select(&self, plan: &SelectPlan) -> Result<Vec<Vec<RowValue>>> {
        let inner = self.inner.lock().expect("memory store poisoned");
        let rows = inner
            .tables
            .get(&plan.table)
            .ok_or_else(|| MigrationError::sql(&plan.table, "select", "table does not exist"))?;
        let mut selected: Vec<MemoryRow> = rows
            .iter()
            .filter(|r| matches(&plan.filter, r))
            .cloned()
            .collect();
        sort_rows(&mut selected, &plan.order);
        Ok(selected
            .into_iter()
            .map(|row| plan.columns.iter().map(|c| cell(&row, c).clone()).collect())
            .collect())
    }
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn select(&self, plan: &SelectPlan) -> Result<Vec<Vec<RowValue>>> {
        self.run_select(plan)
    }

    async fn insert(&self, plan: &InsertPlan) -> Result<u64> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        let rows = inner
            .tables
            .get_mut(&plan.table)
            .ok_or_else(|| MigrationError::sql(&plan.table, "insert", "table does not exist"))?;
        for values in &plan.rows {
            if values.len() != plan.columns.len() {
                return Err(MigrationError::sql(
                    &plan.table,
                    "insert",
                    format!(
                        "row arity {} does not match column list {}",
                        values.len(),
                        plan.columns.len()
                    ),
                ));
            }
            rows.push(
                plan.columns
                    .iter()
                    .cloned()
                    .zip(values.iter().cloned())
                    .collect(),
            );
        }
        Ok(plan.rows.len() as u64)
    }

    async fn update(&self, plan: &UpdatePlan) -> Result<u64> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        let rows = inner
            .tables
            .get_mut(&plan.table)
            .ok_or_else(|| MigrationError::sql(&plan.table, "update", "table does not exist"))?;
        let mut affected = 0;
        for row in rows.iter_mut() {
            if matches(&plan.filter, row) {
                for (col, value) in &plan.assignments {
                    row.insert(col.clone(), value.clone());
                }
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn delete(&self, plan: &DeletePlan) -> Result<u64> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        let rows = inner
            .tables
            .get_mut(&plan.table)
            .ok_or_else(|| MigrationError::sql(&plan.table, "delete", "table does not exist"))?;
        let before = rows.len();
        rows.retain(|r| !matches(&plan.filter, r));
        Ok((before - rows.len()) as u64)
    }

    async fn execute_ddl(&self, op: &DdlOp) -> Result<()> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        let rows = inner
            .tables
            .get_mut(op.table())
            .ok_or_else(|| MigrationError::sql(op.table(), "ddl", "table does not exist"))?;
        match op {
            DdlOp::AddColumn { .. } => {
                // Absent columns already read as NULL.
            }
            DdlOp::DropColumn { column, .. } => {
                for row in rows.iter_mut() {
                    row.remove(column);
                }
            }
            DdlOp::RenameColumn { from, to, .. } => {
                for row in rows.iter_mut() {
                    if let Some(value) = row.remove(from) {
                        row.insert(to.clone(), value);
                    }
                }
            }
            DdlOp::RetypeColumn {
                column, db_type, ..
            } => {
                for row in rows.iter_mut() {
                    if let Some(value) = row.remove(column) {
                        row.insert(column.clone(), cast(value, *db_type));
                    }
                }
            }
            DdlOp::SetNullable { .. } => {
                // Constraint only; no stored data changes.
            }
        }
        Ok(())
    }

    async fn allocate_ids(&self, count: u64) -> Result<i64> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        let first = inner.next_id;
        inner.next_id += count as i64;
        Ok(first)
    }

    async fn commit(&self) -> Result<()> {
        // Writes are visible immediately; nothing to publish.
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }

    fn max_batch_size(&self) -> usize {
        10_000
    }
}

#[async_trait]
impl StorePool for MemoryStore {
    async fn acquire(&self) -> Result<Box<dyn StoreConnection>> {
        Ok(Box::new(MemoryConnection {
            inner: Arc::clone(&self.inner),
        }))
    }

    async fn select_stream(
        &self,
        plan: SelectPlan,
        batch_rows: usize,
    ) -> Result<mpsc::Receiver<Result<RowBatch>>> {
        let conn = MemoryConnection {
            inner: Arc::clone(&self.inner),
        };
        // Snapshot at call time, like a cursor opened on a second connection.
        let rows = conn.run_select(&plan)?;
        let (tx, rx) = mpsc::channel(4);
        let batch_rows = batch_rows.max(1);
        tokio::spawn(async move {
            let mut iter = rows.into_iter().peekable();
            loop {
                let mut chunk = Vec::with_capacity(batch_rows);
                while chunk.len() < batch_rows {
                    match iter.next() {
                        Some(row) => chunk.push(row),
                        None => break,
                    }
                }
                let is_last = iter.peek().is_none();
                let mut batch = RowBatch::new(chunk);
                if is_last {
                    batch = batch.mark_final();
                }
                if tx.send(Ok(batch)).await.is_err() || is_last {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema;

    fn store_with_links() -> MemoryStore {
        let store = MemoryStore::new();
        store.create_table("HAS_PARTS");
        for (id, rev_min) in [(1i64, 5i64), (2, 1), (3, 3)] {
            store.insert_row(
                "HAS_PARTS",
                vec![
                    (schema::BRANCH, RowValue::Int(1)),
                    (schema::IDENTIFIER, RowValue::Int(id)),
                    (schema::REV_MIN, RowValue::Int(rev_min)),
                    (schema::SOURCE_ID, RowValue::Int(100)),
                ],
            );
        }
        store
    }

    #[tokio::test]
    async fn test_select_ordering() {
        let store = store_with_links();
        let conn = store.acquire().await.unwrap();
        let plan = SelectPlan::new(
            "HAS_PARTS",
            vec![schema::IDENTIFIER.into(), schema::REV_MIN.into()],
        )
        .ordered_by_owner(schema::SOURCE_ID);
        let rows = conn.select(&plan).await.unwrap();
        let revs: Vec<i64> = rows.iter().filter_map(|r| r[1].as_int()).collect();
        assert_eq!(revs, vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn test_update_keyed_row() {
        let store = store_with_links();
        let conn = store.acquire().await.unwrap();
        let affected = conn
            .update(&UpdatePlan {
                table: "HAS_PARTS".into(),
                assignments: vec![(schema::REV_MIN.into(), RowValue::Int(9))],
                filter: Filter::row_key(crate::core::BranchId(1), crate::core::ObjectId(2), 1),
            })
            .await
            .unwrap();
        assert_eq!(affected, 1);
        let revs: Vec<i64> = store
            .rows("HAS_PARTS")
            .iter()
            .filter_map(|r| r.get(schema::REV_MIN).and_then(|v| v.as_int()))
            .collect();
        assert!(revs.contains(&9));
    }

    #[tokio::test]
    async fn test_delete_with_filter() {
        let store = store_with_links();
        let conn = store.acquire().await.unwrap();
        let deleted = conn
            .delete(&DeletePlan {
                table: "HAS_PARTS".into(),
                filter: Filter::Ge(schema::REV_MIN.into(), RowValue::Int(3)),
            })
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.row_count("HAS_PARTS"), 1);
    }

    #[tokio::test]
    async fn test_null_comparison_never_matches() {
        let store = MemoryStore::new();
        store.create_table("T");
        store.insert_row("T", vec![("A", RowValue::Null)]);
        let conn = store.acquire().await.unwrap();
        let rows = conn
            .select(
                &SelectPlan::new("T", vec!["A".into()])
                    .with_filter(Filter::Ge("A".into(), RowValue::Int(0))),
            )
            .await
            .unwrap();
        assert!(rows.is_empty());

        let rows = conn
            .select(
                &SelectPlan::new("T", vec!["A".into()])
                    .with_filter(Filter::Eq("A".into(), RowValue::Null)),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_select_stream_batches() {
        let store = store_with_links();
        let plan = SelectPlan::new("HAS_PARTS", vec![schema::IDENTIFIER.into()])
            .ordered_by_owner(schema::SOURCE_ID);
        let mut rx = store.select_stream(plan, 2).await.unwrap();
        let mut total = 0;
        let mut saw_final = false;
        while let Some(batch) = rx.recv().await {
            let batch = batch.unwrap();
            total += batch.len();
            if batch.is_last {
                saw_final = true;
            }
        }
        assert_eq!(total, 3);
        assert!(saw_final);
    }

    #[tokio::test]
    async fn test_rename_and_drop_column() {
        let store = store_with_links();
        let conn = store.acquire().await.unwrap();
        conn.execute_ddl(&DdlOp::RenameColumn {
            table: "HAS_PARTS".into(),
            from: schema::SOURCE_ID.into(),
            to: "OWNER_ID".into(),
        })
        .await
        .unwrap();
        assert!(store.rows("HAS_PARTS")[0].contains_key("OWNER_ID"));

        conn.execute_ddl(&DdlOp::DropColumn {
            table: "HAS_PARTS".into(),
            column: "OWNER_ID".into(),
        })
        .await
        .unwrap();
        assert!(!store.rows("HAS_PARTS")[0].contains_key("OWNER_ID"));
    }

    #[tokio::test]
    async fn test_allocate_ids_contiguous() {
        let store = MemoryStore::new();
        let conn = store.acquire().await.unwrap();
        let first = conn.allocate_ids(5).await.unwrap();
        let second = conn.allocate_ids(1).await.unwrap();
        assert_eq!(second, first + 5);
    }
}
