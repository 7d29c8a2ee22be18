//! Local foreign-key strategy: this entity's row stores the related key
//!
//! Loads come straight from the cached row, so at most one row read per
//! session. Clearing a non-nullable key is not written; it is recorded as a
//! deferred check that the flush phase resolves.

use serde_json::Value;
use tracing::debug;

use super::{LoaderStrategy, RelationshipLoader};
use crate::context::PersistenceContext;
use crate::error::RelationResult;
use crate::key::PrimaryKey;
use crate::sql::{Condition, UpdateStatement};
use crate::store::TableStore;

#[derive(Debug, Clone)]
pub struct LocalForeignKeyLoader {
    /// Slot of the owning field in the persistence context
    field_index: usize,
    local_table: String,
    local_key_columns: Vec<String>,
    /// Foreign key columns on the local table, in the related key column order
    foreign_key_columns: Vec<String>,
    related_key_columns: Vec<String>,
    nullable: bool,
}

impl LocalForeignKeyLoader {
    pub fn new(
        field_index: usize,
        local_table: &str,
        local_key_columns: Vec<String>,
        foreign_key_columns: Vec<String>,
        related_key_columns: Vec<String>,
        nullable: bool,
    ) -> Self {
        Self {
            field_index,
            local_table: local_table.to_string(),
            local_key_columns,
            foreign_key_columns,
            related_key_columns,
            nullable,
        }
    }

    pub fn foreign_key_columns(&self) -> &[String] {
        &self.foreign_key_columns
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Related key currently stored in the row, `None` when the columns are NULL
    pub fn current_value(
        &self,
        store: &dyn TableStore,
        ctx: &mut PersistenceContext,
    ) -> RelationResult<Option<PrimaryKey>> {
        ctx.ensure_row(store, &self.local_table, &self.local_key_columns)?;
        let values = ctx.column_values(&self.foreign_key_columns);
        Ok(PrimaryKey::from_column_values(&self.related_key_columns, &values))
    }

    fn write(
        &self,
        store: &dyn TableStore,
        ctx: &mut PersistenceContext,
        values: Vec<Value>,
    ) -> RelationResult<()> {
        let key_values = ctx.key().to_column_values(&self.local_key_columns)?;
        store.update(&UpdateStatement {
            table: self.local_table.clone(),
            assignments: self
                .foreign_key_columns
                .iter()
                .cloned()
                .zip(values.iter().cloned())
                .collect(),
            filter: Condition::all_eq(&self.local_key_columns, &key_values),
        })?;
        ctx.set_column_values(&self.foreign_key_columns, &values);
        Ok(())
    }
}

impl RelationshipLoader for LocalForeignKeyLoader {
    fn strategy(&self) -> LoaderStrategy {
        LoaderStrategy::LocalForeignKey
    }

    fn local_foreign_key(&self) -> Option<(&[String], bool)> {
        Some((self.foreign_key_columns.as_slice(), self.nullable))
    }

    fn load(
        &self,
        store: &dyn TableStore,
        ctx: &mut PersistenceContext,
    ) -> RelationResult<Vec<PrimaryKey>> {
        Ok(self.current_value(store, ctx)?.into_iter().collect())
    }

    fn add_related_id(
        &self,
        store: &dyn TableStore,
        ctx: &mut PersistenceContext,
        related: &PrimaryKey,
    ) -> RelationResult<bool> {
        if self.current_value(store, ctx)?.as_ref() == Some(related) {
            ctx.clear_fk_check(self.field_index);
            return Ok(false);
        }

        let values = related.to_column_values(&self.related_key_columns)?;
        self.write(store, ctx, values)?;
        ctx.clear_fk_check(self.field_index);
        debug!(table = %self.local_table, key = %ctx.key(), %related, "foreign key set");
        Ok(true)
    }

    fn remove_related_id(
        &self,
        store: &dyn TableStore,
        ctx: &mut PersistenceContext,
        related: &PrimaryKey,
    ) -> RelationResult<bool> {
        if self.current_value(store, ctx)?.as_ref() != Some(related) {
            return Ok(false);
        }

        let nulls = vec![Value::Null; self.foreign_key_columns.len()];
        if self.nullable {
            self.write(store, ctx, nulls)?;
        } else {
            ctx.set_column_values(&self.foreign_key_columns, &nulls);
            ctx.defer_fk_check(self.field_index);
        }
        debug!(
            table = %self.local_table,
            key = %ctx.key(),
            %related,
            deferred = !self.nullable,
            "foreign key cleared"
        );
        Ok(true)
    }
}
