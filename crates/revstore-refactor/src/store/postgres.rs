//! Live PostgreSQL backend, pooled via deadpool.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::BytesMut;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use futures::{pin_mut, TryStreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::NoTls;
use tracing::debug;

use crate::core::{RowBatch, RowValue};
use crate::dialect::{Dialect, PostgresDialect};
use crate::error::{MigrationError, Result};
use crate::store::plan::{DdlOp, DeletePlan, InsertPlan, SelectPlan, UpdatePlan};
use crate::store::{StoreConnection, StorePool};

/// Sequence producing identifiers for synthesized rows.
const ID_SEQUENCE: &str = "OBJECT_ID_SEQ";

/// PostgreSQL store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Database host.
    pub host: String,

    /// Database port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// Maximum pool size. Two connections suffice for the engine (one
    /// writer plus the read side of the two-connection pattern).
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_port() -> u16 {
    5432
}

fn default_pool_size() -> usize {
    4
}

/// PostgreSQL store pool.
pub struct PgStore {
    pool: Pool,
    dialect: PostgresDialect,
}

impl PgStore {
    /// Connect and verify one connection can be established.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&config.host)
            .port(config.port)
            .dbname(&config.database)
            .user(&config.user)
            .password(&config.password);

        let manager = Manager::from_config(
            pg,
            NoTls,
            ManagerConfig {
                // Roll back any transaction left open by a failed processor
                // before the connection is handed out again.
                recycling_method: RecyclingMethod::Clean,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(config.pool_size.max(2))
            .build()
            .map_err(|e| MigrationError::pool(e.to_string(), "building pool"))?;

        // Fail fast on unreachable/unauthorized databases.
        pool.get()
            .await
            .map_err(|e| MigrationError::pool(e.to_string(), "connecting to store"))?;

        Ok(Self {
            pool,
            dialect: PostgresDialect::new(),
        })
    }
}

#[async_trait]
impl StorePool for PgStore {
    async fn acquire(&self) -> Result<Box<dyn StoreConnection>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| MigrationError::pool(e.to_string(), "acquiring connection"))?;
        Ok(Box::new(PgConnection {
            client,
            dialect: self.dialect,
            in_txn: AtomicBool::new(false),
        }))
    }

    async fn select_stream(
        &self,
        plan: SelectPlan,
        batch_rows: usize,
    ) -> Result<mpsc::Receiver<Result<RowBatch>>> {
        // The reader side of the two-connection pattern: its own pooled
        // connection, moved into the producer task and returned to the pool
        // when the task ends.
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| MigrationError::pool(e.to_string(), "acquiring read connection"))?;
        let dialect = self.dialect;
        let batch_rows = batch_rows.max(1);
        let (tx, rx) = mpsc::channel(4);

        tokio::spawn(async move {
            let (sql, params) = dialect.render_select(&plan);
            let produced: Result<()> = async {
                let stream = client.query_raw(sql.as_str(), slice_iter(&params)).await?;
                pin_mut!(stream);
                let mut chunk: Vec<Vec<RowValue>> = Vec::with_capacity(batch_rows);
                while let Some(row) = stream.try_next().await? {
                    chunk.push(decode_row(&row)?);
                    if chunk.len() >= batch_rows
                        && tx
                            .send(Ok(RowBatch::new(std::mem::take(&mut chunk))))
                            .await
                            .is_err()
                    {
                        // Receiver hung up; stop reading.
                        return Ok(());
                    }
                }
                let _ = tx.send(Ok(RowBatch::new(chunk).mark_final())).await;
                Ok(())
            }
            .await;
            if let Err(e) = produced {
                let _ = tx.send(Err(e)).await;
            }
        });

        Ok(rx)
    }
}

/// One pooled PostgreSQL connection.
///
/// Writes open a transaction lazily; [`commit`](StoreConnection::commit)
/// publishes it. Connections returned with an open transaction are cleaned
/// by the pool's recycling method.
pub struct PgConnection {
    client: deadpool_postgres::Object,
    dialect: PostgresDialect,
    in_txn: AtomicBool,
}

impl PgConnection {
    async fn ensure_txn(&self, table: &str, op: &'static str) -> Result<()> {
        if !self.in_txn.swap(true, Ordering::SeqCst) {
            debug!("opening transaction for {} on {}", op, table);
            self.client
                .batch_execute("BEGIN")
                .await
                .map_err(|e| MigrationError::sql(table, op, e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl StoreConnection for PgConnection {
    async fn select(&self, plan: &SelectPlan) -> Result<Vec<Vec<RowValue>>> {
        let (sql, params) = self.dialect.render_select(plan);
        let refs = param_refs(&params);
        let rows = self
            .client
            .query(sql.as_str(), &refs)
            .await
            .map_err(|e| MigrationError::sql(&plan.table, "select", e.to_string()))?;
        rows.iter().map(decode_row).collect()
    }

    async fn insert(&self, plan: &InsertPlan) -> Result<u64> {
        if plan.rows.is_empty() {
            return Ok(0);
        }
        self.ensure_txn(&plan.table, "insert").await?;
        let sql = self.dialect.render_insert(&plan.table, &plan.columns);
        let statement = self
            .client
            .prepare(&sql)
            .await
            .map_err(|e| MigrationError::sql(&plan.table, "insert", e.to_string()))?;
        let mut inserted = 0;
        for row in &plan.rows {
            let refs = param_refs(row);
            inserted += self
                .client
                .execute(&statement, &refs)
                .await
                .map_err(|e| MigrationError::sql(&plan.table, "insert", e.to_string()))?;
        }
        Ok(inserted)
    }

    async fn update(&self, plan: &UpdatePlan) -> Result<u64> {
        self.ensure_txn(&plan.table, "update").await?;
        let (sql, params) = self.dialect.render_update(plan);
        let refs = param_refs(&params);
        self.client
            .execute(sql.as_str(), &refs)
            .await
            .map_err(|e| MigrationError::sql(&plan.table, "update", e.to_string()))
    }

    async fn delete(&self, plan: &DeletePlan) -> Result<u64> {
        self.ensure_txn(&plan.table, "delete").await?;
        let (sql, params) = self.dialect.render_delete(plan);
        let refs = param_refs(&params);
        self.client
            .execute(sql.as_str(), &refs)
            .await
            .map_err(|e| MigrationError::sql(&plan.table, "delete", e.to_string()))
    }

    async fn execute_ddl(&self, op: &DdlOp) -> Result<()> {
        self.ensure_txn(op.table(), "ddl").await?;
        for statement in self.dialect.render_ddl(op) {
            self.client
                .batch_execute(&statement)
                .await
                .map_err(|e| MigrationError::sql(op.table(), "ddl", e.to_string()))?;
        }
        Ok(())
    }

    async fn allocate_ids(&self, count: u64) -> Result<i64> {
        // The engine is the store's only writer during a migration, so the
        // sequence hands out a contiguous range.
        let sql = format!(
            "SELECT nextval('{}') FROM generate_series(1, $1)",
            ID_SEQUENCE
        );
        let rows = self
            .client
            .query(sql.as_str(), &[&(count as i64)])
            .await
            .map_err(|e| MigrationError::sql(ID_SEQUENCE, "allocate-ids", e.to_string()))?;
        let first = rows
            .first()
            .ok_or_else(|| {
                MigrationError::sql(ID_SEQUENCE, "allocate-ids", "sequence returned no values")
            })?
            .try_get::<_, i64>(0)
            .map_err(|e| MigrationError::sql(ID_SEQUENCE, "allocate-ids", e.to_string()))?;
        Ok(first)
    }

    async fn commit(&self) -> Result<()> {
        if self.in_txn.swap(false, Ordering::SeqCst) {
            self.client
                .batch_execute("COMMIT")
                .await
                .map_err(|e| MigrationError::sql("-", "commit", e.to_string()))?;
        }
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }

    fn max_batch_size(&self) -> usize {
        self.dialect.max_batch_size()
    }
}

fn param_refs(params: &[RowValue]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

fn slice_iter<'a>(
    params: &'a [RowValue],
) -> impl ExactSizeIterator<Item = &'a (dyn ToSql + Sync)> + 'a {
    params.iter().map(|v| v as &(dyn ToSql + Sync))
}

impl ToSql for RowValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            RowValue::Null => Ok(IsNull::Yes),
            RowValue::Bool(v) => v.to_sql(ty, out),
            RowValue::Int(v) => {
                if *ty == Type::INT2 {
                    (*v as i16).to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    (*v as i32).to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            RowValue::Double(v) => {
                if *ty == Type::FLOAT4 {
                    (*v as f32).to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            RowValue::Text(v) => v.as_str().to_sql(ty, out),
            RowValue::Bytes(v) => v.as_slice().to_sql(ty, out),
            RowValue::Decimal(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        // The runtime value decides how it encodes; plans carry no static
        // column types.
        true
    }

    to_sql_checked!();
}

fn decode_row(row: &tokio_postgres::Row) -> Result<Vec<RowValue>> {
    let mut values = Vec::with_capacity(row.len());
    for (i, col) in row.columns().iter().enumerate() {
        let ty = col.type_();
        let value = if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(i)?.map(RowValue::Bool)
        } else if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(i)?
                .map(|v| RowValue::Int(v as i64))
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(i)?
                .map(|v| RowValue::Int(v as i64))
        } else if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(i)?.map(RowValue::Int)
        } else if *ty == Type::FLOAT4 {
            row.try_get::<_, Option<f32>>(i)?
                .map(|v| RowValue::Double(v as f64))
        } else if *ty == Type::FLOAT8 {
            row.try_get::<_, Option<f64>>(i)?.map(RowValue::Double)
        } else if *ty == Type::VARCHAR || *ty == Type::TEXT || *ty == Type::BPCHAR {
            row.try_get::<_, Option<String>>(i)?.map(RowValue::Text)
        } else if *ty == Type::BYTEA {
            row.try_get::<_, Option<Vec<u8>>>(i)?.map(RowValue::Bytes)
        } else if *ty == Type::NUMERIC {
            row.try_get::<_, Option<Decimal>>(i)?.map(RowValue::Decimal)
        } else {
            return Err(MigrationError::Config(format!(
                "Unsupported column type '{}' for column '{}'",
                ty,
                col.name()
            )));
        };
        values.push(value.unwrap_or(RowValue::Null));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let yaml = "host: localhost\ndatabase: store\nuser: migrator\npassword: secret\n";
        let config: PostgresConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.port, 5432);
        assert_eq!(config.pool_size, 4);
    }

    #[test]
    fn test_row_value_encodes_narrow_ints() {
        let mut buf = BytesMut::new();
        let v = RowValue::Int(7);
        assert!(matches!(
            v.to_sql(&Type::INT2, &mut buf).unwrap(),
            IsNull::No
        ));
        assert_eq!(buf.len(), 2);

        buf.clear();
        assert!(matches!(
            v.to_sql(&Type::INT8, &mut buf).unwrap(),
            IsNull::No
        ));
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn test_null_encodes_as_null() {
        let mut buf = BytesMut::new();
        assert!(matches!(
            RowValue::Null.to_sql(&Type::VARCHAR, &mut buf).unwrap(),
            IsNull::Yes
        ));
        assert!(buf.is_empty());
    }
}
