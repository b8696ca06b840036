//! Qualified-name resolution against the model snapshot.
//!
//! Migration configuration addresses types and type members by qualified
//! name (`module:Type`, `module:Type#part`). The [`ModelIndex`] maps those
//! names onto the stable internal identifiers stored in the data rows
//! (`T_TYPE_ID`, `META_ATTRIBUTE_ID`). Resolution is deterministic, happens
//! once per processor invocation and fails closed for unknown names; the
//! index is rebuilt by the driver between migration steps because the model
//! itself evolves step to step.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::{QualifiedName, TypePartId};
use crate::error::{MigrationError, Result};

/// How an attribute's value is physically stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "storage")]
pub enum PartStorage {
    /// Dedicated column of the owner's table.
    Column { column: String },

    /// Link rows in an association table.
    Reference { table: String },

    /// Row in the generic flex table, keyed by attribute name.
    Flex { attr: String },
}

/// A resolved type member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypePart {
    /// Stable internal identifier.
    pub id: TypePartId,

    /// Table storing the owner type's rows.
    pub owner_table: String,

    /// Physical storage of the member's values.
    pub storage: PartStorage,
}

/// A resolved type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeEntry {
    /// Stable internal identifier (content of `T_TYPE_ID`).
    pub id: TypePartId,

    /// Table storing this type's rows.
    pub table: String,
}

/// Model snapshot: qualified name to internal identifier mapping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelIndex {
    types: HashMap<String, TypeEntry>,
    parts: HashMap<String, TypePart>,
}

impl ModelIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type.
    pub fn add_type(&mut self, name: &QualifiedName, entry: TypeEntry) {
        self.types.insert(name.to_string(), entry);
    }

    /// Register a type member.
    pub fn add_part(&mut self, name: &QualifiedName, part: TypePart) {
        self.parts.insert(name.to_string(), part);
    }

    /// Resolve a type name to its entry.
    pub fn resolve_type(&self, name: &QualifiedName) -> Result<&TypeEntry> {
        self.types
            .get(&name.to_string())
            .ok_or_else(|| MigrationError::unresolvable(name.to_string()))
    }

    /// Resolve a member name to its part.
    pub fn resolve_part(&self, name: &QualifiedName) -> Result<&TypePart> {
        self.parts
            .get(&name.to_string())
            .ok_or_else(|| MigrationError::unresolvable(name.to_string()))
    }

    /// Resolve a member name to its internal identifier.
    pub fn resolve_part_id(&self, name: &QualifiedName) -> Result<TypePartId> {
        Ok(self.resolve_part(name)?.id)
    }

    /// Resolve a type name to its internal identifier.
    pub fn resolve_type_id(&self, name: &QualifiedName) -> Result<TypePartId> {
        Ok(self.resolve_type(name)?.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qn(raw: &str) -> QualifiedName {
        QualifiedName::parse(raw).unwrap()
    }

    #[test]
    fn test_resolve_type_and_part() {
        let mut index = ModelIndex::new();
        index.add_type(
            &qn("tl.core:Item"),
            TypeEntry {
                id: TypePartId(100),
                table: "ITEM".to_string(),
            },
        );
        index.add_part(
            &qn("tl.core:Item#parts"),
            TypePart {
                id: TypePartId(200),
                owner_table: "ITEM".to_string(),
                storage: PartStorage::Reference {
                    table: "HAS_PARTS".to_string(),
                },
            },
        );

        assert_eq!(index.resolve_type_id(&qn("tl.core:Item")).unwrap().0, 100);
        assert_eq!(
            index.resolve_part_id(&qn("tl.core:Item#parts")).unwrap().0,
            200
        );
    }

    #[test]
    fn test_resolution_fails_closed() {
        let index = ModelIndex::new();
        let err = index.resolve_type(&qn("tl.core:Missing")).unwrap_err();
        assert!(matches!(err, MigrationError::Unresolvable { .. }));
        assert!(err.to_string().contains("tl.core:Missing"));
    }
}
