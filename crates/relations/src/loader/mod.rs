//! Relationship Loaders - physical strategies behind a relationship field
//!
//! Each field gets exactly one loader at resolution time:
//!
//! - [`JoinTableLoader`]: links live in a relation table, either side writes
//! - [`OwnedForeignKeyLoader`]: the related table holds the foreign key; reads only
//! - [`LocalForeignKeyLoader`]: this entity's own row holds the foreign key

pub mod join_table;
pub mod local_fk;
pub mod owned_fk;

pub use join_table::{JoinTableLoader, RelationTable, RelationTableSide};
pub use local_fk::LocalForeignKeyLoader;
pub use owned_fk::OwnedForeignKeyLoader;

use std::fmt;

use crate::context::PersistenceContext;
use crate::error::RelationResult;
use crate::key::PrimaryKey;
use crate::sql::Row;
use crate::store::TableStore;

/// Which physical strategy a loader implements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoaderStrategy {
    JoinTable,
    OwnedForeignKey,
    LocalForeignKey,
}

impl fmt::Display for LoaderStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoaderStrategy::JoinTable => "join-table",
            LoaderStrategy::OwnedForeignKey => "owned-foreign-key",
            LoaderStrategy::LocalForeignKey => "local-foreign-key",
        };
        write!(f, "{}", name)
    }
}

/// Loads and persists the links of one relationship field.
///
/// `ctx` is the persistence context of the entity owning the field. Storage
/// failures are returned unchanged; an empty result is not an error.
pub trait RelationshipLoader: Send + Sync + fmt::Debug {
    fn strategy(&self) -> LoaderStrategy;

    /// Whether writes through this loader change the physical link. Exactly
    /// one side of every link performs the write.
    fn owns_link(&self) -> bool {
        self.strategy() != LoaderStrategy::OwnedForeignKey
    }

    /// Foreign key columns stored on the owning entity's own row, and whether
    /// they may be NULL
    fn local_foreign_key(&self) -> Option<(&[String], bool)> {
        None
    }

    /// Keys of all entities currently related to `ctx`'s entity
    fn load(
        &self,
        store: &dyn TableStore,
        ctx: &mut PersistenceContext,
    ) -> RelationResult<Vec<PrimaryKey>>;

    /// Persist a link. Returns false when the link already existed.
    fn add_related_id(
        &self,
        store: &dyn TableStore,
        ctx: &mut PersistenceContext,
        related: &PrimaryKey,
    ) -> RelationResult<bool>;

    /// Remove a link. Returns false when there was nothing to remove.
    fn remove_related_id(
        &self,
        store: &dyn TableStore,
        ctx: &mut PersistenceContext,
        related: &PrimaryKey,
    ) -> RelationResult<bool>;
}

/// Rebuild keys from rows selected with exactly the key columns
pub(crate) fn keys_from_rows(key_columns: &[String], rows: &[Row]) -> Vec<PrimaryKey> {
    rows.iter()
        .filter_map(|row| {
            let values: Vec<_> = key_columns
                .iter()
                .map(|c| row.get(c).cloned().unwrap_or(serde_json::Value::Null))
                .collect();
            PrimaryKey::from_column_values(key_columns, &values)
        })
        .collect()
}
