//! Join-table strategy: links are rows of a relation table
//!
//! Adding a link reads the relation table for that key pair first, so an
//! existing link is never inserted twice. That read is the only storage
//! access a mutation of a new, loaded collection makes.

use std::sync::Arc;
use tracing::debug;

use super::{keys_from_rows, LoaderStrategy, RelationshipLoader};
use crate::context::PersistenceContext;
use crate::error::RelationResult;
use crate::key::PrimaryKey;
use crate::sql::{Condition, DeleteStatement, InsertStatement, JoinQuery, Row, SelectQuery};
use crate::store::TableStore;

/// Resolved relation table, shared by both sides of an association
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationTable {
    pub table: String,
    /// Columns referencing the left entity's key, in key column order
    pub left_columns: Vec<String>,
    /// Columns referencing the right entity's key, in key column order
    pub right_columns: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationTableSide {
    Left,
    Right,
}

#[derive(Debug, Clone)]
pub struct JoinTableLoader {
    relation_table: Arc<RelationTable>,
    side: RelationTableSide,
    local_key_columns: Vec<String>,
    related_table: String,
    related_key_columns: Vec<String>,
}

impl JoinTableLoader {
    pub fn new(
        relation_table: Arc<RelationTable>,
        side: RelationTableSide,
        local_key_columns: Vec<String>,
        related_table: &str,
        related_key_columns: Vec<String>,
    ) -> Self {
        Self {
            relation_table,
            side,
            local_key_columns,
            related_table: related_table.to_string(),
            related_key_columns,
        }
    }

    pub fn relation_table(&self) -> &Arc<RelationTable> {
        &self.relation_table
    }

    /// Relation table columns pointing at this side's entity
    fn local_columns(&self) -> &[String] {
        match self.side {
            RelationTableSide::Left => &self.relation_table.left_columns,
            RelationTableSide::Right => &self.relation_table.right_columns,
        }
    }

    /// Relation table columns pointing at the related entity
    fn related_columns(&self) -> &[String] {
        match self.side {
            RelationTableSide::Left => &self.relation_table.right_columns,
            RelationTableSide::Right => &self.relation_table.left_columns,
        }
    }

    fn link_filter(
        &self,
        local: &PrimaryKey,
        related: &PrimaryKey,
    ) -> RelationResult<Vec<Condition>> {
        let mut filter = Condition::all_eq(
            self.local_columns(),
            &local.to_column_values(&self.local_key_columns)?,
        );
        filter.extend(Condition::all_eq(
            self.related_columns(),
            &related.to_column_values(&self.related_key_columns)?,
        ));
        Ok(filter)
    }
}

impl RelationshipLoader for JoinTableLoader {
    fn strategy(&self) -> LoaderStrategy {
        LoaderStrategy::JoinTable
    }

    fn load(
        &self,
        store: &dyn TableStore,
        ctx: &mut PersistenceContext,
    ) -> RelationResult<Vec<PrimaryKey>> {
        let values = ctx.key().to_column_values(&self.local_key_columns)?;
        let query = JoinQuery {
            table: self.related_table.clone(),
            columns: self.related_key_columns.clone(),
            join_table: self.relation_table.table.clone(),
            on: self
                .related_key_columns
                .iter()
                .cloned()
                .zip(self.related_columns().iter().cloned())
                .collect(),
            filter: Condition::all_eq(self.local_columns(), &values),
        };

        let rows = store.select_join(&query)?;
        let keys = keys_from_rows(&self.related_key_columns, &rows);
        debug!(
            relation_table = %self.relation_table.table,
            key = %ctx.key(),
            related = keys.len(),
            "loaded relation table links"
        );
        Ok(keys)
    }

    fn add_related_id(
        &self,
        store: &dyn TableStore,
        ctx: &mut PersistenceContext,
        related: &PrimaryKey,
    ) -> RelationResult<bool> {
        let filter = self.link_filter(ctx.key(), related)?;

        let existing = store.select(&SelectQuery {
            table: self.relation_table.table.clone(),
            columns: filter.iter().map(|c| c.column.clone()).collect(),
            filter: filter.clone(),
        })?;
        if !existing.is_empty() {
            debug!(
                relation_table = %self.relation_table.table,
                key = %ctx.key(),
                %related,
                "link already present"
            );
            return Ok(false);
        }

        let row: Row = filter.into_iter().map(|c| (c.column, c.value)).collect();
        store.insert(&InsertStatement {
            table: self.relation_table.table.clone(),
            row,
        })?;
        Ok(true)
    }

    fn remove_related_id(
        &self,
        store: &dyn TableStore,
        ctx: &mut PersistenceContext,
        related: &PrimaryKey,
    ) -> RelationResult<bool> {
        let filter = self.link_filter(ctx.key(), related)?;
        let deleted = store.delete(&DeleteStatement {
            table: self.relation_table.table.clone(),
            filter,
        })?;
        Ok(deleted > 0)
    }
}
