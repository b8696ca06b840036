//! Microsoft SQL Server SQL dialect.
//!
//! Used by the script backend to render review files for MSSQL-hosted
//! stores; there is no live MSSQL executor.

use super::{quote_str, Dialect};
use crate::core::schema::DbType;
use crate::core::RowValue;
use crate::store::plan::DdlOp;

/// MSSQL dialect implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MssqlDialect;

impl MssqlDialect {
    /// Create a new MSSQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for MssqlDialect {
    fn name(&self) -> &str {
        "mssql"
    }

    fn quote_ident(&self, name: &str) -> String {
        format!("[{}]", name.replace(']', "]]"))
    }

    fn param_placeholder(&self, index: usize) -> String {
        format!("@P{}", index)
    }

    fn max_batch_size(&self) -> usize {
        // Conservative: MSSQL caps statements at 2100 parameters.
        1_000
    }

    fn literal(&self, value: &RowValue) -> String {
        match value {
            RowValue::Null => "NULL".to_string(),
            RowValue::Bool(true) => "1".to_string(),
            RowValue::Bool(false) => "0".to_string(),
            RowValue::Int(v) => v.to_string(),
            RowValue::Double(v) => v.to_string(),
            RowValue::Text(v) => format!("N{}", quote_str(v)),
            RowValue::Bytes(v) => format!("0x{}", hex(v)),
            RowValue::Decimal(v) => v.to_string(),
        }
    }

    fn type_name(&self, db_type: DbType, len: Option<u32>) -> String {
        match db_type {
            DbType::Boolean => "bit".to_string(),
            DbType::Int => "int".to_string(),
            DbType::Long => "bigint".to_string(),
            DbType::Double => "float".to_string(),
            DbType::String => match len {
                Some(n) => format!("nvarchar({})", n),
                None => "nvarchar(254)".to_string(),
            },
            DbType::Decimal => "decimal(38,10)".to_string(),
            DbType::Binary => "varbinary(max)".to_string(),
            DbType::Clob => "nvarchar(max)".to_string(),
        }
    }

    fn render_ddl(&self, op: &DdlOp) -> Vec<String> {
        match op {
            DdlOp::AddColumn { table, column } => {
                let mut sql = format!(
                    "ALTER TABLE {} ADD {} {}",
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
                "EXEC sp_rename '{}.{}', '{}', 'COLUMN'",
                table, from, to
            )],
            DdlOp::RetypeColumn {
                table,
                column,
                db_type,
                len,
            } => vec![format!(
                "ALTER TABLE {} ALTER COLUMN {} {}",
                self.quote_ident(table),
                self.quote_ident(column),
                self.type_name(*db_type, *len)
            )],
            DdlOp::SetNullable {
                table,
                column,
                nullable,
            } => {
                // MSSQL re-states the type when changing NULL-ability; the
                // script backend does not track live column types, so emit a
                // comment for the operator to fill in.
                let suffix = if *nullable { "NULL" } else { "NOT NULL" };
                vec![format!(
                    "ALTER TABLE {} ALTER COLUMN {} /* keep current type */ {}",
                    self.quote_ident(table),
                    self.quote_ident(column),
                    suffix
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

    #[test]
    fn test_quote_ident() {
        let dialect = MssqlDialect::new();
        assert_eq!(dialect.quote_ident("REV_MIN"), "[REV_MIN]");
        assert_eq!(dialect.quote_ident("a]b"), "[a]]b]");
    }

    #[test]
    fn test_param_placeholder() {
        let dialect = MssqlDialect::new();
        assert_eq!(dialect.param_placeholder(1), "@P1");
        assert_eq!(dialect.param_placeholder(12), "@P12");
    }

    #[test]
    fn test_unicode_string_literal() {
        let dialect = MssqlDialect::new();
        assert_eq!(
            dialect.literal(&RowValue::Text("O'Brien".into())),
            "N'O''Brien'"
        );
        assert_eq!(dialect.literal(&RowValue::Bool(true)), "1");
    }

    #[test]
    fn test_rename_uses_sp_rename() {
        let dialect = MssqlDialect::new();
        let ddl = dialect.render_ddl(&DdlOp::RenameColumn {
            table: "ITEM".into(),
            from: "NAME".into(),
            to: "TITLE".into(),
        });
        assert_eq!(
            ddl,
            vec!["EXEC sp_rename 'ITEM.NAME', 'TITLE', 'COLUMN'".to_string()]
        );
    }
}
