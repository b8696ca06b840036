//! Identifier newtypes for the versioned object store.

use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};

/// Branch identifier (which parallel history line a row belongs to).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct BranchId(pub i64);

/// Trunk branch of the store.
pub const TRUNK: BranchId = BranchId(1);

/// Internal identifier of one logical object. Unique per `(branch, table)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub i64);

/// Stable internal identifier of a type or type member (attribute/reference)
/// in the persistent model.
///
/// Resolved once from a qualified name at processor start and immutable for
/// the duration of one processor's execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TypePartId(pub i64);

/// A human-readable qualified name of a type (`module:Type`) or a type member
/// (`module:Type#part`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QualifiedName {
    /// Model module name.
    pub module: String,

    /// Type name within the module.
    pub type_name: String,

    /// Member name, `None` for a type itself.
    pub part: Option<String>,
}

impl QualifiedName {
    /// Parse a qualified name of the form `module:Type` or `module:Type#part`.
    pub fn parse(raw: &str) -> Result<Self> {
        let (head, part) = match raw.split_once('#') {
            Some((head, part)) if !part.is_empty() => (head, Some(part.to_string())),
            Some(_) => {
                return Err(MigrationError::Config(format!(
                    "Qualified name '{}' has an empty part segment",
                    raw
                )))
            }
            None => (raw, None),
        };
        match head.split_once(':') {
            Some((module, type_name)) if !module.is_empty() && !type_name.is_empty() => Ok(Self {
                module: module.to_string(),
                type_name: type_name.to_string(),
                part,
            }),
            _ => Err(MigrationError::Config(format!(
                "Qualified name '{}' is not of the form module:Type[#part]",
                raw
            ))),
        }
    }

    /// True iff this names a type member rather than a type.
    pub fn is_part(&self) -> bool {
        self.part.is_some()
    }

    /// The qualified name of the owning type (drops the part segment).
    pub fn owner(&self) -> QualifiedName {
        QualifiedName {
            module: self.module.clone(),
            type_name: self.type_name.clone(),
            part: None,
        }
    }
}

impl std::fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.part {
            Some(part) => write!(f, "{}:{}#{}", self.module, self.type_name, part),
            None => write!(f, "{}:{}", self.module, self.type_name),
        }
    }
}

impl TryFrom<String> for QualifiedName {
    type Error = MigrationError;

    fn try_from(value: String) -> Result<Self> {
        QualifiedName::parse(&value)
    }
}

impl From<QualifiedName> for String {
    fn from(value: QualifiedName) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_type_name() {
        let name = QualifiedName::parse("tl.core:Item").unwrap();
        assert_eq!(name.module, "tl.core");
        assert_eq!(name.type_name, "Item");
        assert!(name.part.is_none());
        assert_eq!(name.to_string(), "tl.core:Item");
    }

    #[test]
    fn test_parse_part_name() {
        let name = QualifiedName::parse("tl.core:Item#parts").unwrap();
        assert_eq!(name.part.as_deref(), Some("parts"));
        assert!(name.is_part());
        assert_eq!(name.owner().to_string(), "tl.core:Item");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(QualifiedName::parse("Item").is_err());
        assert!(QualifiedName::parse(":Item").is_err());
        assert!(QualifiedName::parse("tl.core:").is_err());
        assert!(QualifiedName::parse("tl.core:Item#").is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let name = QualifiedName::parse("tl.core:Item#parts").unwrap();
        let yaml = serde_yaml::to_string(&name).unwrap();
        let back: QualifiedName = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(name, back);
    }
}
