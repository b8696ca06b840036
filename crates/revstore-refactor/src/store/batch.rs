//! Batched write execution with progress reporting.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

use crate::core::RowValue;
use crate::error::Result;
use crate::store::plan::{DeletePlan, InsertPlan, UpdatePlan, WriteOp};
use crate::store::StoreConnection;

/// Row counts of one processor's writes.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct WriteStats {
    /// Rows read by the processor's read plan(s).
    pub rows_read: u64,

    /// Rows inserted.
    pub inserted: u64,

    /// Rows updated.
    pub updated: u64,

    /// Rows deleted.
    pub deleted: u64,
}

impl WriteStats {
    /// Merge another stats record into this one.
    pub fn merge(&mut self, other: &WriteStats) {
        self.rows_read += other.rows_read;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.deleted += other.deleted;
    }

    /// Total write count.
    pub fn writes(&self) -> u64 {
        self.inserted + self.updated + self.deleted
    }
}

/// Rate-limited progress logging for long-running batch loops.
///
/// Emits at most roughly one log line per second so an operator can observe
/// progress of a large rewrite without flooding the log.
pub struct ProgressLog {
    label: String,
    period: Duration,
    started: Instant,
    last: Instant,
    count: u64,
}

impl ProgressLog {
    /// Create a progress log with the default one-second period.
    pub fn new(label: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            label: label.into(),
            period: Duration::from_secs(1),
            started: now,
            last: now,
            count: 0,
        }
    }

    /// Record `n` processed rows, logging if the period elapsed.
    pub fn tick(&mut self, n: u64) {
        self.count += n;
        if self.last.elapsed() >= self.period {
            info!("{}: {} rows processed", self.label, self.count);
            self.last = Instant::now();
        }
    }

    /// Total rows recorded.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Log the final total.
    pub fn finish(&self) {
        info!(
            "{}: {} rows processed in {:.1}s",
            self.label,
            self.count,
            self.started.elapsed().as_secs_f64()
        );
    }
}

/// Accumulates writes and flushes them in bounded batches.
///
/// Consecutive inserts into the same table and column list are merged into
/// one batched insert plan. A flush happens whenever the pending write count
/// reaches `max_batch` (dialect-specific); flushed writes are not rolled
/// back if a later batch fails.
pub struct BatchWriter<'a> {
    conn: &'a dyn StoreConnection,
    max_batch: usize,
    pending: Vec<WriteOp>,
    pending_rows: usize,
    stats: WriteStats,
    progress: ProgressLog,
}

impl<'a> BatchWriter<'a> {
    /// Create a writer flushing every `max_batch` queued writes.
    pub fn new(conn: &'a dyn StoreConnection, label: &str, max_batch: usize) -> Self {
        Self {
            conn,
            max_batch: max_batch.max(1),
            pending: Vec::new(),
            pending_rows: 0,
            stats: WriteStats::default(),
            progress: ProgressLog::new(label),
        }
    }

    /// Queue one row for insertion, merging into the current insert plan
    /// when table and columns match.
    pub async fn queue_insert(
        &mut self,
        table: &str,
        columns: &[String],
        row: Vec<RowValue>,
    ) -> Result<()> {
        match self.pending.last_mut() {
            Some(WriteOp::Insert(plan)) if plan.table == table && plan.columns == columns => {
                plan.push(row);
            }
            _ => {
                let mut plan = InsertPlan::new(table, columns.to_vec());
                plan.push(row);
                self.pending.push(WriteOp::Insert(plan));
            }
        }
        self.bump(1).await
    }

    /// Queue an update.
    pub async fn queue_update(&mut self, plan: UpdatePlan) -> Result<()> {
        self.pending.push(WriteOp::Update(plan));
        self.bump(1).await
    }

    /// Queue a delete.
    pub async fn queue_delete(&mut self, plan: DeletePlan) -> Result<()> {
        self.pending.push(WriteOp::Delete(plan));
        self.bump(1).await
    }

    async fn bump(&mut self, rows: usize) -> Result<()> {
        self.pending_rows += rows;
        if self.pending_rows >= self.max_batch {
            self.flush().await?;
        }
        Ok(())
    }

    /// Flush all pending writes.
    pub async fn flush(&mut self) -> Result<()> {
        for op in std::mem::take(&mut self.pending) {
            let affected = self.conn.apply(&op).await?;
            match &op {
                WriteOp::Insert(plan) => self.stats.inserted += plan.rows.len() as u64,
                WriteOp::Update(_) => self.stats.updated += affected,
                WriteOp::Delete(_) => self.stats.deleted += affected,
            }
            self.progress.tick(match &op {
                WriteOp::Insert(plan) => plan.rows.len() as u64,
                _ => affected.max(1),
            });
        }
        self.pending_rows = 0;
        Ok(())
    }

    /// Flush and return the accumulated statistics.
    pub async fn finish(mut self) -> Result<WriteStats> {
        self.flush().await?;
        self.progress.finish();
        Ok(self.stats)
    }

    /// Statistics accumulated so far (flushed writes only).
    pub fn stats(&self) -> WriteStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{self, TableSchema};
    use crate::core::SchemaRepository;
    use crate::store::memory::MemoryStore;
    use crate::store::StorePool;

    fn repo() -> SchemaRepository {
        let mut repo = SchemaRepository::new();
        repo.add(TableSchema::association("HAS_PARTS"));
        repo
    }

    #[tokio::test]
    async fn test_inserts_merge_and_flush() {
        let store = MemoryStore::with_schema(&repo());
        let conn = store.acquire().await.unwrap();
        let columns: Vec<String> = vec![
            schema::BRANCH.into(),
            schema::IDENTIFIER.into(),
            schema::REV_MIN.into(),
        ];

        let mut writer = BatchWriter::new(conn.as_ref(), "test", 2);
        for id in 0..5i64 {
            writer
                .queue_insert(
                    "HAS_PARTS",
                    &columns,
                    vec![RowValue::Int(1), RowValue::Int(id), RowValue::Int(1)],
                )
                .await
                .unwrap();
        }
        let stats = writer.finish().await.unwrap();
        assert_eq!(stats.inserted, 5);
        assert_eq!(store.row_count("HAS_PARTS"), 5);
    }

    #[test]
    fn test_write_stats_merge() {
        let mut a = WriteStats {
            rows_read: 1,
            inserted: 2,
            updated: 3,
            deleted: 4,
        };
        a.merge(&WriteStats {
            rows_read: 10,
            inserted: 20,
            updated: 30,
            deleted: 40,
        });
        assert_eq!(a.rows_read, 11);
        assert_eq!(a.writes(), 99);
    }
}
