//! SQL syntax strategies for rendering plans against different engines.
//!
//! The [`Dialect`] trait carries the engine-specific pieces (identifier
//! quoting, parameter placeholders, type names, DDL syntax, batch limits);
//! plan rendering itself is shared as provided methods. Static dispatch goes
//! through the [`DialectImpl`] enum.

mod mssql;
mod postgres;

pub use mssql::MssqlDialect;
pub use postgres::PostgresDialect;

use crate::core::schema::DbType;
use crate::core::RowValue;
use crate::error::{MigrationError, Result};
use crate::store::plan::{DdlOp, DeletePlan, Filter, InsertPlan, SelectPlan, UpdatePlan, WriteOp};

/// SQL syntax strategy for one database engine.
pub trait Dialect: Send + Sync {
    /// Get the dialect identifier (e.g. "postgres", "mssql").
    fn name(&self) -> &str;

    /// Quote an identifier (table name, column name).
    fn quote_ident(&self, name: &str) -> String;

    /// Get a parameter placeholder for the given 1-based index.
    fn param_placeholder(&self, index: usize) -> String;

    /// Maximum number of writes per flushed batch.
    fn max_batch_size(&self) -> usize;

    /// Render a value as an inline SQL literal (script output).
    fn literal(&self, value: &RowValue) -> String;

    /// Engine type name for a column type.
    fn type_name(&self, db_type: DbType, len: Option<u32>) -> String;

    /// Render a structured DDL operation to one or more statements.
    fn render_ddl(&self, op: &DdlOp) -> Vec<String>;

    /// Render a filter to a WHERE fragment, appending parameters.
    fn render_filter(&self, filter: &Filter, params: &mut Vec<RowValue>) -> String {
        match filter {
            Filter::All => "1 = 1".to_string(),
            Filter::Eq(col, RowValue::Null) => format!("{} IS NULL", self.quote_ident(col)),
            Filter::Eq(col, value) => {
                params.push(value.clone());
                format!(
                    "{} = {}",
                    self.quote_ident(col),
                    self.param_placeholder(params.len())
                )
            }
            Filter::In(col, values) => {
                if values.is_empty() {
                    return "1 = 0".to_string();
                }
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|v| {
                        params.push(v.clone());
                        self.param_placeholder(params.len())
                    })
                    .collect();
                format!("{} IN ({})", self.quote_ident(col), placeholders.join(", "))
            }
            Filter::Le(col, value) => {
                params.push(value.clone());
                format!(
                    "{} <= {}",
                    self.quote_ident(col),
                    self.param_placeholder(params.len())
                )
            }
            Filter::Ge(col, value) => {
                params.push(value.clone());
                format!(
                    "{} >= {}",
                    self.quote_ident(col),
                    self.param_placeholder(params.len())
                )
            }
            Filter::IsNull(col) => format!("{} IS NULL", self.quote_ident(col)),
            Filter::NotNull(col) => format!("{} IS NOT NULL", self.quote_ident(col)),
            Filter::And(parts) => {
                let rendered: Vec<String> = parts
                    .iter()
                    .map(|p| format!("({})", self.render_filter(p, params)))
                    .collect();
                rendered.join(" AND ")
            }
        }
    }

    /// Render a select plan to SQL plus positional parameters.
    fn render_select(&self, plan: &SelectPlan) -> (String, Vec<RowValue>) {
        let cols: Vec<String> = plan.columns.iter().map(|c| self.quote_ident(c)).collect();
        let mut params = Vec::new();
        let mut sql = format!(
            "SELECT {} FROM {}",
            cols.join(", "),
            self.quote_ident(&plan.table)
        );
        if !matches!(plan.filter, Filter::All) {
            let where_clause = self.render_filter(&plan.filter, &mut params);
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause);
        }
        if !plan.order.is_empty() {
            let order: Vec<String> = plan
                .order
                .iter()
                .map(|o| {
                    format!(
                        "{}{}",
                        self.quote_ident(&o.column),
                        if o.descending { " DESC" } else { "" }
                    )
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&order.join(", "));
        }
        (sql, params)
    }

    /// Render a single-row parameterized insert statement for a column list.
    fn render_insert(&self, table: &str, columns: &[String]) -> String {
        let cols: Vec<String> = columns.iter().map(|c| self.quote_ident(c)).collect();
        let placeholders: Vec<String> = (1..=columns.len())
            .map(|i| self.param_placeholder(i))
            .collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quote_ident(table),
            cols.join(", "),
            placeholders.join(", ")
        )
    }

    /// Render an update plan to SQL plus positional parameters.
    fn render_update(&self, plan: &UpdatePlan) -> (String, Vec<RowValue>) {
        let mut params = Vec::new();
        let assignments: Vec<String> = plan
            .assignments
            .iter()
            .map(|(col, value)| {
                if value.is_null() {
                    format!("{} = NULL", self.quote_ident(col))
                } else {
                    params.push(value.clone());
                    format!(
                        "{} = {}",
                        self.quote_ident(col),
                        self.param_placeholder(params.len())
                    )
                }
            })
            .collect();
        let mut sql = format!(
            "UPDATE {} SET {}",
            self.quote_ident(&plan.table),
            assignments.join(", ")
        );
        if !matches!(plan.filter, Filter::All) {
            let where_clause = self.render_filter(&plan.filter, &mut params);
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause);
        }
        (sql, params)
    }

    /// Render a delete plan to SQL plus positional parameters.
    fn render_delete(&self, plan: &DeletePlan) -> (String, Vec<RowValue>) {
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", self.quote_ident(&plan.table));
        if !matches!(plan.filter, Filter::All) {
            let where_clause = self.render_filter(&plan.filter, &mut params);
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause);
        }
        (sql, params)
    }

    /// Render a write with inline literals (script output).
    fn render_write_literal(&self, op: &WriteOp) -> Vec<String> {
        match op {
            WriteOp::Insert(plan) => self.render_insert_literal(plan),
            WriteOp::Update(plan) => {
                let (sql, params) = self.render_update(plan);
                vec![self.substitute_params(&sql, &params)]
            }
            WriteOp::Delete(plan) => {
                let (sql, params) = self.render_delete(plan);
                vec![self.substitute_params(&sql, &params)]
            }
        }
    }

    /// Render an insert plan with inline literals, one statement per row.
    fn render_insert_literal(&self, plan: &InsertPlan) -> Vec<String> {
        let cols: Vec<String> = plan.columns.iter().map(|c| self.quote_ident(c)).collect();
        let head = format!(
            "INSERT INTO {} ({}) VALUES ",
            self.quote_ident(&plan.table),
            cols.join(", ")
        );
        plan.rows
            .iter()
            .map(|row| {
                let values: Vec<String> = row.iter().map(|v| self.literal(v)).collect();
                format!("{}({})", head, values.join(", "))
            })
            .collect()
    }

    /// Replace positional placeholders by literals, back to front so `$1`
    /// does not clobber `$10`.
    fn substitute_params(&self, sql: &str, params: &[RowValue]) -> String {
        let mut result = sql.to_string();
        for (i, value) in params.iter().enumerate().rev() {
            result = result.replace(&self.param_placeholder(i + 1), &self.literal(value));
        }
        result
    }
}

/// Quote a string literal, doubling embedded quotes.
pub(crate) fn quote_str(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Enum-based static dispatch for dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialectImpl {
    Postgres(PostgresDialect),
    Mssql(MssqlDialect),
}

impl DialectImpl {
    /// Create a dialect implementation from a dialect name.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(DialectImpl::Postgres(PostgresDialect::new())),
            "mssql" | "sqlserver" | "sql_server" => Ok(DialectImpl::Mssql(MssqlDialect::new())),
            other => Err(MigrationError::Config(format!(
                "Unknown dialect: '{}'. Supported dialects: postgres, mssql",
                other
            ))),
        }
    }
}

impl Dialect for DialectImpl {
    fn name(&self) -> &str {
        match self {
            DialectImpl::Postgres(d) => d.name(),
            DialectImpl::Mssql(d) => d.name(),
        }
    }

    fn quote_ident(&self, name: &str) -> String {
        match self {
            DialectImpl::Postgres(d) => d.quote_ident(name),
            DialectImpl::Mssql(d) => d.quote_ident(name),
        }
    }

    fn param_placeholder(&self, index: usize) -> String {
        match self {
            DialectImpl::Postgres(d) => d.param_placeholder(index),
            DialectImpl::Mssql(d) => d.param_placeholder(index),
        }
    }

    fn max_batch_size(&self) -> usize {
        match self {
            DialectImpl::Postgres(d) => d.max_batch_size(),
            DialectImpl::Mssql(d) => d.max_batch_size(),
        }
    }

    fn literal(&self, value: &RowValue) -> String {
        match self {
            DialectImpl::Postgres(d) => d.literal(value),
            DialectImpl::Mssql(d) => d.literal(value),
        }
    }

    fn type_name(&self, db_type: DbType, len: Option<u32>) -> String {
        match self {
            DialectImpl::Postgres(d) => d.type_name(db_type, len),
            DialectImpl::Mssql(d) => d.type_name(db_type, len),
        }
    }

    fn render_ddl(&self, op: &DdlOp) -> Vec<String> {
        match self {
            DialectImpl::Postgres(d) => d.render_ddl(op),
            DialectImpl::Mssql(d) => d.render_ddl(op),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BranchId, ObjectId};

    #[test]
    fn test_render_select_ordered() {
        let dialect = PostgresDialect::new();
        let plan = SelectPlan::new(
            "HAS_PARTS",
            vec!["BRANCH".into(), "SOURCE_ID".into(), "REV_MIN".into()],
        )
        .with_filter(Filter::Eq(
            "META_ATTRIBUTE_ID".into(),
            RowValue::Int(42),
        ))
        .ordered_by_owner("SOURCE_ID");

        let (sql, params) = dialect.render_select(&plan);
        assert_eq!(
            sql,
            "SELECT \"BRANCH\", \"SOURCE_ID\", \"REV_MIN\" FROM \"HAS_PARTS\" \
             WHERE \"META_ATTRIBUTE_ID\" = $1 \
             ORDER BY \"BRANCH\", \"SOURCE_ID\", \"REV_MIN\""
        );
        assert_eq!(params, vec![RowValue::Int(42)]);
    }

    #[test]
    fn test_render_update_keyed() {
        let dialect = PostgresDialect::new();
        let plan = UpdatePlan {
            table: "HAS_PARTS".into(),
            assignments: vec![("REV_MIN".into(), RowValue::Int(6))],
            filter: Filter::row_key(BranchId(1), ObjectId(7), 3),
        };
        let (sql, params) = dialect.render_update(&plan);
        assert!(sql.starts_with("UPDATE \"HAS_PARTS\" SET \"REV_MIN\" = $1 WHERE"));
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn test_render_update_null_assignment() {
        let dialect = PostgresDialect::new();
        let plan = UpdatePlan {
            table: "ITEM".into(),
            assignments: vec![("NAME".into(), RowValue::Null)],
            filter: Filter::All,
        };
        let (sql, params) = dialect.render_update(&plan);
        assert_eq!(sql, "UPDATE \"ITEM\" SET \"NAME\" = NULL");
        assert!(params.is_empty());
    }

    #[test]
    fn test_empty_in_set_matches_nothing() {
        let dialect = PostgresDialect::new();
        let mut params = Vec::new();
        let sql = dialect.render_filter(&Filter::In("IDENTIFIER".into(), vec![]), &mut params);
        assert_eq!(sql, "1 = 0");
        assert!(params.is_empty());
    }

    #[test]
    fn test_substitute_params_two_digit_index() {
        let dialect = PostgresDialect::new();
        let params: Vec<RowValue> = (0..11).map(RowValue::Int).collect();
        let sql: Vec<String> = (1..=11).map(|i| dialect.param_placeholder(i)).collect();
        let substituted = dialect.substitute_params(&sql.join(", "), &params);
        assert_eq!(substituted, "0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10");
    }

    #[test]
    fn test_dialect_impl_from_name() {
        assert_eq!(DialectImpl::from_name("pg").unwrap().name(), "postgres");
        assert_eq!(
            DialectImpl::from_name("sqlserver").unwrap().name(),
            "mssql"
        );
        assert!(DialectImpl::from_name("oracle").is_err());
    }
}
