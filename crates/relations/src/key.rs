//! Entity identity - primary keys and their column representation
//!
//! Supports integer, UUID, text and composite primary keys. Keys are stored in
//! hash sets and ordered maps, so every variant is `Eq + Hash + Ord`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::{RelationError, RelationResult};

/// Primary key of an entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PrimaryKey {
    /// Integer primary key
    Integer(i64),
    /// UUID primary key
    Uuid(Uuid),
    /// Natural text key
    Text(String),
    /// Composite key, one part per key column. Parts are never composite.
    Composite(BTreeMap<String, PrimaryKey>),
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimaryKey::Integer(id) => write!(f, "{}", id),
            PrimaryKey::Uuid(id) => write!(f, "{}", id),
            PrimaryKey::Text(id) => write!(f, "{}", id),
            PrimaryKey::Composite(parts) => {
                let pairs: Vec<String> = parts
                    .iter()
                    .map(|(k, v)| format!("{}:{}", k, v))
                    .collect();
                write!(f, "{}", pairs.join(","))
            }
        }
    }
}

impl From<i64> for PrimaryKey {
    fn from(id: i64) -> Self {
        PrimaryKey::Integer(id)
    }
}

impl From<i32> for PrimaryKey {
    fn from(id: i32) -> Self {
        PrimaryKey::Integer(i64::from(id))
    }
}

impl From<Uuid> for PrimaryKey {
    fn from(id: Uuid) -> Self {
        PrimaryKey::Uuid(id)
    }
}

impl From<&str> for PrimaryKey {
    fn from(id: &str) -> Self {
        PrimaryKey::Text(id.to_string())
    }
}

impl PrimaryKey {
    /// Build a composite key from (column, part) pairs
    pub fn composite<I, K>(parts: I) -> Self
    where
        I: IntoIterator<Item = (K, PrimaryKey)>,
        K: Into<String>,
    {
        PrimaryKey::Composite(parts.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Extract as i64 if this is an Integer primary key
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PrimaryKey::Integer(id) => Some(*id),
            _ => None,
        }
    }

    /// Column values for this key, ordered like `columns`.
    ///
    /// Single-valued keys need exactly one column; composite keys must carry a
    /// part for every column.
    pub fn to_column_values(&self, columns: &[String]) -> RelationResult<Vec<Value>> {
        match self {
            PrimaryKey::Composite(parts) => columns
                .iter()
                .map(|column| {
                    parts
                        .get(column)
                        .map(PrimaryKey::scalar_value)
                        .ok_or_else(|| {
                            RelationError::invalid_argument(
                                column,
                                format!(
                                    "composite key {} has no part for column '{}'",
                                    self, column
                                ),
                            )
                        })
                })
                .collect(),
            scalar => {
                if columns.len() != 1 {
                    return Err(RelationError::invalid_argument(
                        &columns.join(","),
                        format!(
                            "single-valued key {} cannot fill {} columns",
                            scalar,
                            columns.len()
                        ),
                    ));
                }
                Ok(vec![scalar.scalar_value()])
            }
        }
    }

    /// Rebuild a key from column values. Returns `None` when any column is
    /// NULL, which is how an unset foreign key reads back.
    pub fn from_column_values(columns: &[String], values: &[Value]) -> Option<PrimaryKey> {
        if columns.is_empty() || columns.len() != values.len() {
            return None;
        }

        if columns.len() == 1 {
            return PrimaryKey::from_scalar(&values[0]);
        }

        let mut parts = BTreeMap::new();
        for (column, value) in columns.iter().zip(values) {
            parts.insert(column.clone(), PrimaryKey::from_scalar(value)?);
        }
        Some(PrimaryKey::Composite(parts))
    }

    fn scalar_value(&self) -> Value {
        match self {
            PrimaryKey::Integer(id) => Value::from(*id),
            PrimaryKey::Uuid(id) => Value::String(id.to_string()),
            PrimaryKey::Text(id) => Value::String(id.clone()),
            // Parts are never composite; render defensively rather than panic
            PrimaryKey::Composite(_) => Value::String(self.to_string()),
        }
    }

    fn from_scalar(value: &Value) -> Option<PrimaryKey> {
        match value {
            Value::Null => None,
            Value::Number(n) => match n.as_i64() {
                Some(id) => Some(PrimaryKey::Integer(id)),
                None => Some(PrimaryKey::Text(n.to_string())),
            },
            Value::String(s) => match Uuid::parse_str(s) {
                Ok(id) => Some(PrimaryKey::Uuid(id)),
                Err(_) => Some(PrimaryKey::Text(s.clone())),
            },
            other => Some(PrimaryKey::Text(other.to_string())),
        }
    }
}

/// Index of an entity type inside a resolved schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub(crate) usize);

impl EntityId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Identity of one entity instance: its type plus its primary key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityIdentity {
    pub entity: EntityId,
    pub key: PrimaryKey,
}

impl EntityIdentity {
    pub fn new(entity: EntityId, key: impl Into<PrimaryKey>) -> Self {
        Self {
            entity,
            key: key.into(),
        }
    }
}
