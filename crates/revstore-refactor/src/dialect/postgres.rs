//! PostgreSQL SQL dialect.

use super::{quote_str, Dialect};
use crate::core::schema::DbType;
use crate::core::RowValue;
use crate::store::plan::DdlOp;

/// PostgreSQL dialect implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Create a new PostgreSQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &str {
        "postgres"
    }

    fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn param_placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn max_batch_size(&self) -> usize {
        10_000
    }

    fn literal(&self, value: &RowValue) -> String {
        match value {
            RowValue::Null => "NULL".to_string(),
            RowValue::Bool(true) => "TRUE".to_string(),
            RowValue::Bool(false) => "FALSE".to_string(),
            RowValue::Int(v) => v.to_string(),
            RowValue::Double(v) => v.to_string(),
            RowValue::Text(v) => quote_str(v),
            RowValue::Bytes(v) => format!("'\\x{}'", hex(v)),
            RowValue::Decimal(v) => v.to_string(),
        }
    }

    fn type_name(&self, db_type: DbType, len: Option<u32>) -> String {
        match db_type {
            DbType::Boolean => "boolean".to_string(),
            DbType::Int => "integer".to_string(),
            DbType::Long => "bigint".to_string(),
            DbType::Double => "double precision".to_string(),
            DbType::String => match len {
                Some(n) => format!("varchar({})", n),
                None => "varchar(254)".to_string(),
            },
            DbType::Decimal => "numeric".to_string(),
            DbType::Binary => "bytea".to_string(),
            DbType::Clob => "text".to_string(),
        }
    }

    fn render_ddl(&self, op: &DdlOp) -> Vec<String> {
        match op {
            DdlOp::AddColumn { table, column } => {
                let mut sql = format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    self.quote_ident(table),
                    self.quote_ident(&column.name),
                    self.type_name(column.db_type, column.len)
                );
                if !column.nullable {
                    sql.push_str(" NOT NULL");
                }
                vec![sql]
            }
            DdlOp::DropColumn { table, column } => vec![format!(
                "ALTER TABLE {} DROP COLUMN {}",
                self.quote_ident(table),
                self.quote_ident(column)
            )],
            DdlOp::RenameColumn { table, from, to } => vec![format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                self.quote_ident(table),
                self.quote_ident(from),
                self.quote_ident(to)
            )],
            DdlOp::RetypeColumn {
                table,
                column,
                db_type,
                len,
            } => {
                let type_name = self.type_name(*db_type, *len);
                vec![format!(
                    "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{}",
                    self.quote_ident(table),
                    self.quote_ident(column),
                    type_name,
                    self.quote_ident(column),
                    type_name
                )]
            }
            DdlOp::SetNullable {
                table,
                column,
                nullable,
            } => {
                let action = if *nullable { "DROP" } else { "SET" };
                vec![format!(
                    "ALTER TABLE {} ALTER COLUMN {} {} NOT NULL",
                    self.quote_ident(table),
                    self.quote_ident(column),
                    action
                )]
            }
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::ColumnDef;

    #[test]
    fn test_quote_ident() {
        let dialect = PostgresDialect::new();
        assert_eq!(dialect.quote_ident("REV_MIN"), "\"REV_MIN\"");
        assert_eq!(dialect.quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_literals() {
        let dialect = PostgresDialect::new();
        assert_eq!(dialect.literal(&RowValue::Null), "NULL");
        assert_eq!(dialect.literal(&RowValue::Bool(true)), "TRUE");
        assert_eq!(dialect.literal(&RowValue::Text("O'Brien".into())), "'O''Brien'");
        assert_eq!(dialect.literal(&RowValue::Bytes(vec![0xab, 0x01])), "'\\xab01'");
    }

    #[test]
    fn test_rename_column_ddl() {
        let dialect = PostgresDialect::new();
        let ddl = dialect.render_ddl(&DdlOp::RenameColumn {
            table: "ITEM".into(),
            from: "NAME".into(),
            to: "TITLE".into(),
        });
        assert_eq!(
            ddl,
            vec!["ALTER TABLE \"ITEM\" RENAME COLUMN \"NAME\" TO \"TITLE\"".to_string()]
        );
    }

    #[test]
    fn test_retype_uses_cast() {
        let dialect = PostgresDialect::new();
        let ddl = dialect.render_ddl(&DdlOp::RetypeColumn {
            table: "ITEM".into(),
            column: "CODE".into(),
            db_type: DbType::Long,
            len: None,
        });
        assert_eq!(ddl.len(), 1);
        assert!(ddl[0].contains("TYPE bigint USING \"CODE\"::bigint"));
    }

    #[test]
    fn test_add_not_null_column() {
        let dialect = PostgresDialect::new();
        let ddl = dialect.render_ddl(&DdlOp::AddColumn {
            table: "ITEM".into(),
            column: ColumnDef::mandatory("SORT", DbType::Int),
        });
        assert!(ddl[0].ends_with("ADD COLUMN \"SORT\" integer NOT NULL"));
    }
}
