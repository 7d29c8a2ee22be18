//! Relationship Metadata - declarations consumed by the resolution step
//!
//! An association is declared once, naming both of its roles. Each role is a
//! relationship field on one entity type. Resolution (see
//! [`RelationshipRegistry`](crate::registry::RelationshipRegistry)) turns
//! these declarations into wired [`RelationshipField`](crate::field::RelationshipField)s.

use serde::{Deserialize, Serialize};

use crate::error::ResolutionError;

/// Multiplicity of a relationship field, seen from the entity that owns it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    /// Single-valued field
    ToOne,
    /// Collection-valued field
    ToMany,
}

impl Cardinality {
    /// Returns true if the field holds a collection
    pub fn is_collection(self) -> bool {
        matches!(self, Self::ToMany)
    }
}

/// Entity type as seen by the relationship engine: a table and its key columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub name: String,
    pub table: String,
    pub primary_key: Vec<String>,
}

impl EntityDescriptor {
    /// Entity with a single `id` key column
    pub fn new(name: &str, table: &str) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            primary_key: vec!["id".to_string()],
        }
    }

    /// Replace the key columns
    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn validate(&self) -> Result<(), ResolutionError> {
        if self.name.is_empty() || self.table.is_empty() {
            return Err(ResolutionError::InvalidDeclaration(
                "entity name and table cannot be empty".to_string(),
            ));
        }
        if self.primary_key.is_empty() {
            return Err(ResolutionError::InvalidDeclaration(format!(
                "entity '{}' must have at least one primary key column",
                self.name
            )));
        }
        Ok(())
    }
}

/// A column that mirrors one primary key column of some entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyColumn {
    /// Physical column name
    pub column: String,
    /// Primary key column it references. Empty means "the only key column".
    pub references: String,
}

impl KeyColumn {
    pub fn new(column: &str, references: &str) -> Self {
        Self {
            column: column.to_string(),
            references: references.to_string(),
        }
    }

    /// Column referencing a single-column primary key
    pub fn simple(column: &str) -> Self {
        Self::new(column, "")
    }
}

/// Foreign key columns stored on the declaring role's own table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyConfig {
    pub columns: Vec<KeyColumn>,
    /// Whether the columns may be NULL (optional relationship)
    pub nullable: bool,
}

impl ForeignKeyConfig {
    /// Single nullable foreign key column
    pub fn simple(column: &str) -> Self {
        Self {
            columns: vec![KeyColumn::simple(column)],
            nullable: true,
        }
    }

    /// Composite foreign key
    pub fn composite(columns: Vec<KeyColumn>) -> Self {
        Self {
            columns,
            nullable: true,
        }
    }

    /// Mark the foreign key as mandatory
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Column names joined for messages
    pub fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| c.column.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Explicit relation (join) table for an association
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationTableConfig {
    pub table: String,
    /// Columns referencing the left role's entity key
    pub left_columns: Vec<KeyColumn>,
    /// Columns referencing the right role's entity key
    pub right_columns: Vec<KeyColumn>,
}

impl RelationTableConfig {
    pub fn new(table: &str, left_columns: Vec<KeyColumn>, right_columns: Vec<KeyColumn>) -> Self {
        Self {
            table: table.to_string(),
            left_columns,
            right_columns,
        }
    }

    /// Relation table with one column per side, both referencing single-column keys
    pub fn simple(table: &str, left_column: &str, right_column: &str) -> Self {
        Self::new(
            table,
            vec![KeyColumn::simple(left_column)],
            vec![KeyColumn::simple(right_column)],
        )
    }
}

/// One end of an association: a relationship field on an entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDeclaration {
    /// Entity type owning the field
    pub entity: String,
    /// Field name on that entity
    pub field: String,
    pub cardinality: Cardinality,
    /// Deleting the owning entity deletes the related entities first
    pub cascade_delete: bool,
    pub read_only: bool,
    /// Present when this role's table stores the foreign key
    pub foreign_key: Option<ForeignKeyConfig>,
}

impl RoleDeclaration {
    pub fn to_one(entity: &str, field: &str) -> Self {
        Self::new(entity, field, Cardinality::ToOne)
    }

    pub fn to_many(entity: &str, field: &str) -> Self {
        Self::new(entity, field, Cardinality::ToMany)
    }

    fn new(entity: &str, field: &str, cardinality: Cardinality) -> Self {
        Self {
            entity: entity.to_string(),
            field: field.to_string(),
            cardinality,
            cascade_delete: false,
            read_only: false,
            foreign_key: None,
        }
    }

    pub fn cascade_delete(mut self) -> Self {
        self.cascade_delete = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn with_foreign_key(mut self, foreign_key: ForeignKeyConfig) -> Self {
        self.foreign_key = Some(foreign_key);
        self
    }
}

/// A bidirectional association between two roles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationDeclaration {
    pub name: String,
    pub left: RoleDeclaration,
    pub right: RoleDeclaration,
    pub relation_table: Option<RelationTableConfig>,
}

impl AssociationDeclaration {
    pub fn new(name: &str, left: RoleDeclaration, right: RoleDeclaration) -> Self {
        Self {
            name: name.to_string(),
            left,
            right,
            relation_table: None,
        }
    }

    pub fn with_relation_table(mut self, relation_table: RelationTableConfig) -> Self {
        self.relation_table = Some(relation_table);
        self
    }

    /// Structural checks that need no knowledge of the entity types
    pub fn validate(&self) -> Result<(), ResolutionError> {
        if self.name.is_empty() {
            return Err(ResolutionError::InvalidDeclaration(
                "association name cannot be empty".to_string(),
            ));
        }

        for role in [&self.left, &self.right] {
            if role.field.is_empty() {
                return Err(ResolutionError::UnknownField {
                    association: self.name.clone(),
                    entity: role.entity.clone(),
                });
            }
        }

        if self.left.entity == self.right.entity && self.left.field == self.right.field {
            return Err(ResolutionError::InvalidDeclaration(format!(
                "association '{}' uses field '{}' for both roles",
                self.name, self.left.field
            )));
        }

        if let Some(ref relation_table) = self.relation_table {
            if relation_table.table.is_empty() {
                return Err(ResolutionError::InvalidDeclaration(format!(
                    "association '{}' has an unnamed relation table",
                    self.name
                )));
            }
        }

        Ok(())
    }
}
