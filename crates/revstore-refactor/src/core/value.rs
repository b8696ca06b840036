//! Column values exchanged with the row store.
//!
//! [`RowValue`] is the single value representation used by read plans, write
//! plans and the in-memory backend. It also carries the mapping onto the
//! generic flex-attribute value union (`DATA_TYPE` code plus one of
//! `LONG_DATA`/`DOUBLE_DATA`/`VARCHAR_DATA`).

use std::cmp::Ordering;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};

/// A single column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RowValue {
    /// SQL NULL.
    Null,

    /// Boolean value.
    Bool(bool),

    /// Integer value (covers all integer column widths).
    Int(i64),

    /// Double-precision float.
    Double(f64),

    /// Character data.
    Text(String),

    /// Binary data.
    Bytes(Vec<u8>),

    /// Exact decimal value.
    Decimal(Decimal),
}

/// Type code stored in the flex table's `DATA_TYPE` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlexDataType {
    Bool = 1,
    Long = 2,
    Double = 3,
    String = 4,
    Decimal = 5,
}

impl FlexDataType {
    /// Decode a `DATA_TYPE` column value.
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            1 => Ok(Self::Bool),
            2 => Ok(Self::Long),
            3 => Ok(Self::Double),
            4 => Ok(Self::String),
            5 => Ok(Self::Decimal),
            other => Err(MigrationError::Config(format!(
                "Unknown flex data type code {}",
                other
            ))),
        }
    }
}

impl RowValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, RowValue::Null)
    }

    /// Integer content, if this is an integer value.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            RowValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Text content, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            RowValue::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Total order over values, used when a processor sorts rows by an
    /// attribute value (order synthesis).
    ///
    /// Values of the same kind compare by their natural order; NULL sorts
    /// before everything; mixed kinds fall back to a fixed kind rank so the
    /// order stays total even over dirty data.
    pub fn compare(&self, other: &RowValue) -> Ordering {
        use RowValue::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Double(a), Double(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Int(a), Double(b)) => (*a as f64).partial_cmp(b).unwrap_or(Ordering::Equal),
            (Double(a), Int(b)) => a.partial_cmp(&(*b as f64)).unwrap_or(Ordering::Equal),
            (Text(a), Text(b)) => a.cmp(b),
            (Bytes(a), Bytes(b)) => a.cmp(b),
            (Decimal(a), Decimal(b)) => a.cmp(b),
            (a, b) => a.kind_rank().cmp(&b.kind_rank()),
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            RowValue::Null => 0,
            RowValue::Bool(_) => 1,
            RowValue::Int(_) => 2,
            RowValue::Double(_) => 3,
            RowValue::Decimal(_) => 4,
            RowValue::Text(_) => 5,
            RowValue::Bytes(_) => 6,
        }
    }

    /// Encode this value into the flex value union.
    ///
    /// Returns `(DATA_TYPE, LONG_DATA, DOUBLE_DATA, VARCHAR_DATA)`. Binary
    /// values have no flex representation and NULL is never stored as a flex
    /// row; both are rejected.
    pub fn to_flex(&self) -> Result<(i64, RowValue, RowValue, RowValue)> {
        let null = RowValue::Null;
        match self {
            RowValue::Bool(b) => Ok((
                FlexDataType::Bool as i64,
                RowValue::Int(i64::from(*b)),
                null.clone(),
                null,
            )),
            RowValue::Int(v) => Ok((
                FlexDataType::Long as i64,
                RowValue::Int(*v),
                null.clone(),
                null,
            )),
            RowValue::Double(v) => Ok((
                FlexDataType::Double as i64,
                null.clone(),
                RowValue::Double(*v),
                null,
            )),
            RowValue::Text(v) => Ok((
                FlexDataType::String as i64,
                null.clone(),
                null,
                RowValue::Text(v.clone()),
            )),
            RowValue::Decimal(v) => Ok((
                FlexDataType::Decimal as i64,
                null.clone(),
                null,
                RowValue::Text(v.to_string()),
            )),
            RowValue::Null => Err(MigrationError::Config(
                "NULL has no flex representation".to_string(),
            )),
            RowValue::Bytes(_) => Err(MigrationError::Config(
                "Binary values have no flex representation".to_string(),
            )),
        }
    }

    /// Decode a flex value union back into a value.
    pub fn from_flex(
        data_type: i64,
        long_data: &RowValue,
        double_data: &RowValue,
        varchar_data: &RowValue,
    ) -> Result<RowValue> {
        let decode_err = |col: &str| {
            MigrationError::Config(format!(
                "Flex value with DATA_TYPE {} has no {} content",
                data_type, col
            ))
        };
        match FlexDataType::from_code(data_type)? {
            FlexDataType::Bool => match long_data.as_int() {
                Some(v) => Ok(RowValue::Bool(v != 0)),
                None => Err(decode_err("LONG_DATA")),
            },
            FlexDataType::Long => match long_data.as_int() {
                Some(v) => Ok(RowValue::Int(v)),
                None => Err(decode_err("LONG_DATA")),
            },
            FlexDataType::Double => match double_data {
                RowValue::Double(v) => Ok(RowValue::Double(*v)),
                _ => Err(decode_err("DOUBLE_DATA")),
            },
            FlexDataType::String => match varchar_data.as_text() {
                Some(v) => Ok(RowValue::Text(v.to_string())),
                None => Err(decode_err("VARCHAR_DATA")),
            },
            FlexDataType::Decimal => match varchar_data.as_text() {
                Some(v) => v
                    .parse::<Decimal>()
                    .map(RowValue::Decimal)
                    .map_err(|e| MigrationError::Config(format!("Bad decimal '{}': {}", v, e))),
                None => Err(decode_err("VARCHAR_DATA")),
            },
        }
    }
}

impl From<bool> for RowValue {
    fn from(v: bool) -> Self {
        RowValue::Bool(v)
    }
}

impl From<i32> for RowValue {
    fn from(v: i32) -> Self {
        RowValue::Int(v as i64)
    }
}

impl From<i64> for RowValue {
    fn from(v: i64) -> Self {
        RowValue::Int(v)
    }
}

impl From<f64> for RowValue {
    fn from(v: f64) -> Self {
        RowValue::Double(v)
    }
}

impl From<String> for RowValue {
    fn from(v: String) -> Self {
        RowValue::Text(v)
    }
}

impl From<&str> for RowValue {
    fn from(v: &str) -> Self {
        RowValue::Text(v.to_string())
    }
}

impl From<Vec<u8>> for RowValue {
    fn from(v: Vec<u8>) -> Self {
        RowValue::Bytes(v)
    }
}

impl From<Decimal> for RowValue {
    fn from(v: Decimal) -> Self {
        RowValue::Decimal(v)
    }
}

impl<T: Into<RowValue>> From<Option<T>> for RowValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => RowValue::Null,
        }
    }
}

/// A batch of rows streamed out of the store.
#[derive(Debug)]
pub struct RowBatch {
    /// Rows, positionally matching the select plan's column list.
    pub rows: Vec<Vec<RowValue>>,

    /// Whether this is the final batch of the stream.
    pub is_last: bool,
}

impl RowBatch {
    /// Create a new batch with the given rows.
    pub fn new(rows: Vec<Vec<RowValue>>) -> Self {
        Self {
            rows,
            is_last: false,
        }
    }

    /// Create an empty final batch.
    pub fn empty_final() -> Self {
        Self {
            rows: Vec::new(),
            is_last: true,
        }
    }

    /// Mark this as the final batch.
    pub fn mark_final(mut self) -> Self {
        self.is_last = true;
        self
    }

    /// Get the number of rows in this batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_same_kind() {
        assert_eq!(
            RowValue::Int(1).compare(&RowValue::Int(2)),
            Ordering::Less
        );
        assert_eq!(
            RowValue::Text("b".into()).compare(&RowValue::Text("a".into())),
            Ordering::Greater
        );
        assert_eq!(
            RowValue::Double(1.5).compare(&RowValue::Double(1.5)),
            Ordering::Equal
        );
    }

    #[test]
    fn test_compare_null_sorts_first() {
        assert_eq!(
            RowValue::Null.compare(&RowValue::Int(i64::MIN)),
            Ordering::Less
        );
        assert_eq!(
            RowValue::Text(String::new()).compare(&RowValue::Null),
            Ordering::Greater
        );
    }

    #[test]
    fn test_compare_numeric_mix() {
        assert_eq!(
            RowValue::Int(2).compare(&RowValue::Double(2.5)),
            Ordering::Less
        );
        assert_eq!(
            RowValue::Double(3.0).compare(&RowValue::Int(2)),
            Ordering::Greater
        );
    }

    #[test]
    fn test_flex_round_trip() {
        let values = [
            RowValue::Bool(true),
            RowValue::Int(-42),
            RowValue::Double(2.75),
            RowValue::Text("Hello".into()),
            RowValue::Decimal(Decimal::new(12345, 2)),
        ];
        for v in values {
            let (code, long, double, varchar) = v.to_flex().unwrap();
            let back = RowValue::from_flex(code, &long, &double, &varchar).unwrap();
            assert_eq!(v, back);
        }
    }

    #[test]
    fn test_flex_rejects_unsupported() {
        assert!(RowValue::Null.to_flex().is_err());
        assert!(RowValue::Bytes(vec![1, 2]).to_flex().is_err());
        assert!(FlexDataType::from_code(99).is_err());
    }
}
