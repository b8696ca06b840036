//! Schema-repository metadata for the versioned store's tables.
//!
//! The repository is a snapshot of the persisted schema description handed
//! to the engine by the migration driver. Processors consult it to find
//! column lists and abort or skip when a configured table is missing; the
//! alter-column processor additionally updates it so DDL and metadata stay
//! in sync.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};

/// Branch column present on every versioned table.
pub const BRANCH: &str = "BRANCH";

/// Object identifier column present on every versioned table.
pub const IDENTIFIER: &str = "IDENTIFIER";

/// First revision of a row version's lifetime.
pub const REV_MIN: &str = "REV_MIN";

/// Last revision of a row version's lifetime.
pub const REV_MAX: &str = "REV_MAX";

/// Revision in which the object was created.
pub const REV_CREATE: &str = "REV_CREATE";

/// Type-id column of object tables (polymorphic table sharing).
pub const TYPE_ID: &str = "T_TYPE_ID";

/// Source-end id column of association tables.
pub const SOURCE_ID: &str = "SOURCE_ID";

/// Source-end table-name column of association tables.
pub const SOURCE_TYPE: &str = "SOURCE_TYPE";

/// Destination-end id column of association tables.
pub const DEST_ID: &str = "DEST_ID";

/// Destination-end table-name column of association tables.
pub const DEST_TYPE: &str = "DEST_TYPE";

/// Reference-id column of association tables (which named reference a link
/// instantiates).
pub const META_ATTRIBUTE_ID: &str = "META_ATTRIBUTE_ID";

/// Sort-order column of association tables (NULL for unsorted references).
pub const SORT_ORDER: &str = "SORT_ORDER";

/// Name of the generic flex-attribute table.
pub const FLEX_DATA: &str = "FLEX_DATA";

/// Owner-table column of the flex table.
pub const FLEX_TYPE: &str = "TYPE";

/// Attribute-name column of the flex table.
pub const FLEX_ATTR: &str = "ATTR";

/// Type-code column of the flex table's value union.
pub const DATA_TYPE: &str = "DATA_TYPE";

/// Integer slot of the flex value union.
pub const LONG_DATA: &str = "LONG_DATA";

/// Float slot of the flex value union.
pub const DOUBLE_DATA: &str = "DOUBLE_DATA";

/// String slot of the flex value union.
pub const VARCHAR_DATA: &str = "VARCHAR_DATA";

/// Name of the revision cross-reference table.
pub const REVISION_XREF: &str = "REVISION_XREF";

/// Revision column of the cross-reference table.
pub const XREF_REV: &str = "XREF_REV";

/// Branch column of the cross-reference table.
pub const XREF_BRANCH: &str = "XREF_BRANCH";

/// Touched-table column of the cross-reference table.
pub const XREF_TYPE: &str = "XREF_TYPE";

/// Language column of attribute internationalization side tables.
pub const LANG: &str = "LANG";

/// Owner-object column of internationalization side tables.
pub const OBJECT_ID: &str = "OBJECT_ID";

/// Attribute-name column of internationalization side tables.
pub const I18N_ATTR: &str = "I18N_ATTR";

/// Localized-value column of internationalization side tables.
pub const I18N_VALUE: &str = "I18N_VALUE";

/// SQL column type, database-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DbType {
    Boolean,
    Int,
    Long,
    Double,
    String,
    Decimal,
    Binary,
    Clob,
}

/// Column metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,

    /// Column type.
    pub db_type: DbType,

    /// Whether the column allows NULL.
    #[serde(default)]
    pub nullable: bool,

    /// Maximum length for string/binary columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub len: Option<u32>,
}

impl ColumnDef {
    /// Create a mandatory column.
    pub fn mandatory(name: impl Into<String>, db_type: DbType) -> Self {
        Self {
            name: name.into(),
            db_type,
            nullable: false,
            len: None,
        }
    }

    /// Create a nullable column.
    pub fn nullable(name: impl Into<String>, db_type: DbType) -> Self {
        Self {
            name: name.into(),
            db_type,
            nullable: true,
            len: None,
        }
    }

    /// Set the maximum length.
    pub fn with_len(mut self, len: u32) -> Self {
        self.len = Some(len);
        self
    }
}

/// What kind of rows a table stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TableKind {
    /// Object rows (one row version per object and lifetime).
    Object,

    /// Association rows (links between objects).
    Association,

    /// The generic flex-attribute value table.
    Flex,

    /// The revision cross-reference table.
    Xref,

    /// Attribute internationalization side table.
    I18n,
}

/// Table metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,

    /// Table kind.
    pub kind: TableKind,

    /// Column definitions in declaration order.
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    fn versioned_header() -> Vec<ColumnDef> {
        vec![
            ColumnDef::mandatory(BRANCH, DbType::Long),
            ColumnDef::mandatory(IDENTIFIER, DbType::Long),
            ColumnDef::mandatory(REV_MIN, DbType::Long),
            ColumnDef::mandatory(REV_MAX, DbType::Long),
            ColumnDef::mandatory(REV_CREATE, DbType::Long),
        ]
    }

    /// Schema of an object table with the given attribute columns.
    pub fn object(name: impl Into<String>, attributes: Vec<ColumnDef>) -> Self {
        let mut columns = Self::versioned_header();
        columns.push(ColumnDef::mandatory(TYPE_ID, DbType::Long));
        columns.extend(attributes);
        Self {
            name: name.into(),
            kind: TableKind::Object,
            columns,
        }
    }

    /// Schema of an association (link) table.
    pub fn association(name: impl Into<String>) -> Self {
        let mut columns = Self::versioned_header();
        columns.extend([
            ColumnDef::mandatory(SOURCE_ID, DbType::Long),
            ColumnDef::mandatory(SOURCE_TYPE, DbType::String),
            ColumnDef::mandatory(DEST_ID, DbType::Long),
            ColumnDef::mandatory(DEST_TYPE, DbType::String),
            ColumnDef::mandatory(META_ATTRIBUTE_ID, DbType::Long),
            ColumnDef::nullable(SORT_ORDER, DbType::Int),
        ]);
        Self {
            name: name.into(),
            kind: TableKind::Association,
            columns,
        }
    }

    /// Schema of the generic flex-attribute table.
    pub fn flex() -> Self {
        Self {
            name: FLEX_DATA.to_string(),
            kind: TableKind::Flex,
            columns: vec![
                ColumnDef::mandatory(FLEX_TYPE, DbType::String),
                ColumnDef::mandatory(IDENTIFIER, DbType::Long),
                ColumnDef::mandatory(BRANCH, DbType::Long),
                ColumnDef::mandatory(REV_MIN, DbType::Long),
                ColumnDef::mandatory(REV_MAX, DbType::Long),
                ColumnDef::mandatory(FLEX_ATTR, DbType::String),
                ColumnDef::mandatory(DATA_TYPE, DbType::Int),
                ColumnDef::nullable(LONG_DATA, DbType::Long),
                ColumnDef::nullable(DOUBLE_DATA, DbType::Double),
                ColumnDef::nullable(VARCHAR_DATA, DbType::String),
            ],
        }
    }

    /// Schema of the revision cross-reference table.
    pub fn xref() -> Self {
        Self {
            name: REVISION_XREF.to_string(),
            kind: TableKind::Xref,
            columns: vec![
                ColumnDef::mandatory(XREF_REV, DbType::Long),
                ColumnDef::mandatory(XREF_BRANCH, DbType::Long),
                ColumnDef::mandatory(XREF_TYPE, DbType::String),
            ],
        }
    }

    /// Schema of an attribute internationalization side table.
    pub fn i18n(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TableKind::I18n,
            columns: vec![
                ColumnDef::mandatory(BRANCH, DbType::Long),
                ColumnDef::mandatory(OBJECT_ID, DbType::Long),
                ColumnDef::mandatory(REV_MIN, DbType::Long),
                ColumnDef::mandatory(REV_MAX, DbType::Long),
                ColumnDef::mandatory(I18N_ATTR, DbType::String),
                ColumnDef::mandatory(LANG, DbType::String),
                ColumnDef::nullable(I18N_VALUE, DbType::String),
            ],
        }
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Find a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Check whether a column exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }
}

/// Snapshot of the persisted schema description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaRepository {
    tables: HashMap<String, TableSchema>,
}

impl SchemaRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a table.
    pub fn add(&mut self, table: TableSchema) {
        self.tables.insert(table.name.clone(), table);
    }

    /// Look up a table, if present.
    pub fn get(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Look up a table, failing with a configuration error when missing.
    pub fn require(&self, name: &str) -> Result<&TableSchema> {
        self.get(name).ok_or_else(|| {
            MigrationError::Config(format!("Table '{}' not found in schema repository", name))
        })
    }

    /// Mutable lookup, failing when missing.
    pub fn require_mut(&mut self, name: &str) -> Result<&mut TableSchema> {
        self.tables.get_mut(name).ok_or_else(|| {
            MigrationError::Config(format!("Table '{}' not found in schema repository", name))
        })
    }

    /// Names of all association tables, sorted for deterministic iteration.
    pub fn association_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tables
            .values()
            .filter(|t| t.kind == TableKind::Association)
            .map(|t| t.name.clone())
            .collect();
        names.sort();
        names
    }

    /// All table names, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Rename a column in the stored metadata.
    pub fn rename_column(&mut self, table: &str, from: &str, to: &str) -> Result<()> {
        let table = self.require_mut(table)?;
        match table.columns.iter_mut().find(|c| c.name == from) {
            Some(col) => {
                col.name = to.to_string();
                Ok(())
            }
            None => Err(MigrationError::Config(format!(
                "Column '{}' not found in table '{}'",
                from, table.name
            ))),
        }
    }
}
