//! Owned foreign-key strategy: the related table points back at this entity
//!
//! The related side's [`LocalForeignKeyLoader`](super::LocalForeignKeyLoader)
//! is authoritative for writes, so mutations here only log and report no change.

use tracing::{debug, trace};

use super::{keys_from_rows, LoaderStrategy, RelationshipLoader};
use crate::context::PersistenceContext;
use crate::error::RelationResult;
use crate::key::PrimaryKey;
use crate::sql::{Condition, SelectQuery};
use crate::store::TableStore;

#[derive(Debug, Clone)]
pub struct OwnedForeignKeyLoader {
    related_table: String,
    related_key_columns: Vec<String>,
    /// Foreign key columns on the related table, in this entity's key column order
    foreign_key_columns: Vec<String>,
    local_key_columns: Vec<String>,
}

impl OwnedForeignKeyLoader {
    pub fn new(
        related_table: &str,
        related_key_columns: Vec<String>,
        foreign_key_columns: Vec<String>,
        local_key_columns: Vec<String>,
    ) -> Self {
        Self {
            related_table: related_table.to_string(),
            related_key_columns,
            foreign_key_columns,
            local_key_columns,
        }
    }
}

impl RelationshipLoader for OwnedForeignKeyLoader {
    fn strategy(&self) -> LoaderStrategy {
        LoaderStrategy::OwnedForeignKey
    }

    fn load(
        &self,
        store: &dyn TableStore,
        ctx: &mut PersistenceContext,
    ) -> RelationResult<Vec<PrimaryKey>> {
        let values = ctx.key().to_column_values(&self.local_key_columns)?;
        let rows = store.select(&SelectQuery {
            table: self.related_table.clone(),
            columns: self.related_key_columns.clone(),
            filter: Condition::all_eq(&self.foreign_key_columns, &values),
        })?;

        let keys = keys_from_rows(&self.related_key_columns, &rows);
        debug!(
            table = %self.related_table,
            key = %ctx.key(),
            related = keys.len(),
            "loaded rows referencing entity"
        );
        Ok(keys)
    }

    fn add_related_id(
        &self,
        _store: &dyn TableStore,
        ctx: &mut PersistenceContext,
        related: &PrimaryKey,
    ) -> RelationResult<bool> {
        trace!(key = %ctx.key(), %related, "link owned by related side, nothing to write");
        Ok(false)
    }

    fn remove_related_id(
        &self,
        _store: &dyn TableStore,
        ctx: &mut PersistenceContext,
        related: &PrimaryKey,
    ) -> RelationResult<bool> {
        trace!(key = %ctx.key(), %related, "link owned by related side, nothing to write");
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{EntityId, EntityIdentity};
    use crate::sql::StatementKind;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn loader() -> OwnedForeignKeyLoader {
        OwnedForeignKeyLoader::new(
            "line_items",
            vec!["id".to_string()],
            vec!["order_id".to_string()],
            vec!["id".to_string()],
        )
    }

    #[test]
    fn test_load_filters_by_foreign_key() {
        let store = MemoryStore::new();
        store.seed(
            "line_items",
            vec![
                json!({"id": 5, "order_id": 1}),
                json!({"id": 6, "order_id": 1}),
                json!({"id": 7, "order_id": 2}),
                json!({"id": 8, "order_id": null}),
            ],
        );

        let mut ctx = PersistenceContext::new(EntityIdentity::new(EntityId(0), 1), 1);
        let mut keys = loader().load(&store, &mut ctx).unwrap();
        keys.sort();
        assert_eq!(keys, vec![PrimaryKey::Integer(5), PrimaryKey::Integer(6)]);
        assert_eq!(
            store.statements()[0].sql,
            "SELECT id FROM line_items WHERE order_id = $1"
        );
    }

    #[test]
    fn test_mutations_never_touch_storage() {
        let store = MemoryStore::new();
        let mut ctx = PersistenceContext::new(EntityIdentity::new(EntityId(0), 1), 1);

        assert!(!loader().owns_link());
        assert!(!loader().add_related_id(&store, &mut ctx, &PrimaryKey::Integer(5)).unwrap());
        assert!(!loader().remove_related_id(&store, &mut ctx, &PrimaryKey::Integer(5)).unwrap());
        assert_eq!(store.count(StatementKind::Update, "line_items"), 0);
        assert!(store.statements().is_empty());
    }
}
