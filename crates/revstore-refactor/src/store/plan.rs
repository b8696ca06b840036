//! Dialect-independent read and write plans.
//!
//! Processors express their reads and writes as plan values; a backend
//! either renders them to SQL through a [`Dialect`](crate::dialect::Dialect)
//! or interprets them directly (the in-memory backend). Keyed updates and
//! deletes address exactly one row version via
//! `(BRANCH, IDENTIFIER, REV_MIN)`.

use crate::core::schema::{self, ColumnDef, DbType};
use crate::core::{BranchId, ObjectId, RowValue};
use crate::interval::Revision;

/// Row predicate of a plan.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every row.
    All,

    /// Column equals value.
    Eq(String, RowValue),

    /// Column value is contained in the given set.
    In(String, Vec<RowValue>),

    /// Column is less than or equal to value.
    Le(String, RowValue),

    /// Column is greater than or equal to value.
    Ge(String, RowValue),

    /// Column is NULL.
    IsNull(String),

    /// Column is not NULL.
    NotNull(String),

    /// All sub-filters match.
    And(Vec<Filter>),
}

impl Filter {
    /// Conjunction, flattening `All` operands away.
    pub fn and(filters: Vec<Filter>) -> Filter {
        let mut parts: Vec<Filter> = filters
            .into_iter()
            .filter(|f| !matches!(f, Filter::All))
            .collect();
        match parts.len() {
            0 => Filter::All,
            1 => parts.remove(0),
            _ => Filter::And(parts),
        }
    }

    /// Key filter addressing exactly one row version.
    pub fn row_key(branch: BranchId, id: ObjectId, rev_min: Revision) -> Filter {
        Filter::And(vec![
            Filter::Eq(schema::BRANCH.to_string(), RowValue::Int(branch.0)),
            Filter::Eq(schema::IDENTIFIER.to_string(), RowValue::Int(id.0)),
            Filter::Eq(schema::REV_MIN.to_string(), RowValue::Int(rev_min)),
        ])
    }
}

/// One sort key of a select plan.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderKey {
    /// Column name.
    pub column: String,

    /// Sort descending instead of ascending.
    pub descending: bool,
}

impl OrderKey {
    /// Ascending order on a column.
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }
}

/// A filtered select over an explicit column list.
#[derive(Debug, Clone)]
pub struct SelectPlan {
    /// Table name.
    pub table: String,

    /// Columns to read, in result order.
    pub columns: Vec<String>,

    /// Row predicate.
    pub filter: Filter,

    /// Result ordering; required whenever iteration order matters for
    /// correctness (duplicate detection, order synthesis).
    pub order: Vec<OrderKey>,
}

impl SelectPlan {
    /// Create a plan reading the given columns.
    pub fn new(table: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            table: table.into(),
            columns,
            filter: Filter::All,
            order: Vec::new(),
        }
    }

    /// Set the row predicate.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Order by `(BRANCH, <owner column>, REV_MIN)` ascending.
    pub fn ordered_by_owner(mut self, owner_column: &str) -> Self {
        self.order = vec![
            OrderKey::asc(schema::BRANCH),
            OrderKey::asc(owner_column),
            OrderKey::asc(schema::REV_MIN),
        ];
        self
    }

    /// Set an explicit ordering.
    pub fn with_order(mut self, order: Vec<OrderKey>) -> Self {
        self.order = order;
        self
    }
}

/// A batched insert with positional values.
#[derive(Debug, Clone)]
pub struct InsertPlan {
    /// Table name.
    pub table: String,

    /// Columns, positionally matching each row.
    pub columns: Vec<String>,

    /// Rows to insert.
    pub rows: Vec<Vec<RowValue>>,
}

impl InsertPlan {
    /// Create an empty insert plan.
    pub fn new(table: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            table: table.into(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row; panics in debug builds on arity mismatch.
    pub fn push(&mut self, row: Vec<RowValue>) {
        debug_assert_eq!(row.len(), self.columns.len(), "insert arity mismatch");
        self.rows.push(row);
    }
}

/// A filtered update.
#[derive(Debug, Clone)]
pub struct UpdatePlan {
    /// Table name.
    pub table: String,

    /// `SET` assignments.
    pub assignments: Vec<(String, RowValue)>,

    /// Row predicate.
    pub filter: Filter,
}

/// A filtered delete.
#[derive(Debug, Clone)]
pub struct DeletePlan {
    /// Table name.
    pub table: String,

    /// Row predicate.
    pub filter: Filter,
}

/// A single queued write.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Insert(InsertPlan),
    Update(UpdatePlan),
    Delete(DeletePlan),
}

impl WriteOp {
    /// Table the write targets.
    pub fn table(&self) -> &str {
        match self {
            WriteOp::Insert(p) => &p.table,
            WriteOp::Update(p) => &p.table,
            WriteOp::Delete(p) => &p.table,
        }
    }
}

/// Structured column DDL.
#[derive(Debug, Clone)]
pub enum DdlOp {
    /// Add a column.
    AddColumn { table: String, column: ColumnDef },

    /// Drop a column.
    DropColumn { table: String, column: String },

    /// Rename a column.
    RenameColumn {
        table: String,
        from: String,
        to: String,
    },

    /// Change a column's type (best-effort cast of existing values).
    RetypeColumn {
        table: String,
        column: String,
        db_type: DbType,
        len: Option<u32>,
    },

    /// Change a column's NULL-ability.
    SetNullable {
        table: String,
        column: String,
        nullable: bool,
    },
}

impl DdlOp {
    /// Table the DDL targets.
    pub fn table(&self) -> &str {
        match self {
            DdlOp::AddColumn { table, .. }
            | DdlOp::DropColumn { table, .. }
            | DdlOp::RenameColumn { table, .. }
            | DdlOp::RetypeColumn { table, .. }
            | DdlOp::SetNullable { table, .. } => table,
        }
    }
}
