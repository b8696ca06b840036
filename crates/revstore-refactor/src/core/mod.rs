//! Core model types: identifiers, column values, schema metadata.

pub mod ids;
pub mod schema;
pub mod value;

pub use ids::{BranchId, ObjectId, QualifiedName, TypePartId, TRUNK};
pub use schema::{ColumnDef, DbType, SchemaRepository, TableKind, TableSchema};
pub use value::{FlexDataType, RowBatch, RowValue};
