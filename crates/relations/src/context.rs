//! Persistence Context - transaction-scoped state of one entity instance
//!
//! Holds the instance's own row (read lazily, needed for local foreign keys),
//! one [`FieldState`] slot per relationship field, the dirty-relations flag and
//! the deferred foreign-key nullability checks. Dropped with its session.

use serde_json::Value;
use std::collections::BTreeSet;
use tracing::trace;

use crate::cache::RelationCache;
use crate::error::{RelationError, RelationResult};
use crate::key::{EntityIdentity, PrimaryKey};
use crate::metadata::Cardinality;
use crate::sql::{Condition, Row, SelectQuery};
use crate::state::FieldState;
use crate::store::TableStore;

#[derive(Debug, Clone)]
pub struct PersistenceContext {
    identity: EntityIdentity,
    row: Option<Row>,
    field_states: Vec<Option<FieldState>>,
    relations_dirty: bool,
    /// Fields mutated in this session; survives flush
    touched_fields: BTreeSet<usize>,
    deferred_fk_checks: BTreeSet<usize>,
}

impl PersistenceContext {
    pub fn new(identity: EntityIdentity, field_count: usize) -> Self {
        Self {
            identity,
            row: None,
            field_states: vec![None; field_count],
            relations_dirty: false,
            touched_fields: BTreeSet::new(),
            deferred_fk_checks: BTreeSet::new(),
        }
    }

    pub fn identity(&self) -> &EntityIdentity {
        &self.identity
    }

    pub fn key(&self) -> &PrimaryKey {
        &self.identity.key
    }

    pub fn field_state(&self, index: usize) -> Option<&FieldState> {
        self.field_states.get(index).and_then(Option::as_ref)
    }

    /// Take the state out of its slot, creating an unloaded one if empty.
    /// Callers put it back with [`set_field_state`](Self::set_field_state).
    pub fn take_field_state(&mut self, index: usize, cardinality: Cardinality) -> FieldState {
        self.field_states
            .get_mut(index)
            .and_then(Option::take)
            .unwrap_or_else(|| FieldState::new(cardinality))
    }

    pub fn set_field_state(&mut self, index: usize, state: FieldState) {
        if index >= self.field_states.len() {
            self.field_states.resize(index + 1, None);
        }
        self.field_states[index] = Some(state);
    }

    pub fn field_states(&self) -> impl Iterator<Item = (usize, &FieldState)> {
        self.field_states
            .iter()
            .enumerate()
            .filter_map(|(index, state)| state.as_ref().map(|s| (index, s)))
    }

    pub fn mark_dirty(&mut self) {
        self.relations_dirty = true;
    }

    /// Dirty check used to decide whether relationship state must be flushed
    pub fn is_relations_dirty(&self) -> bool {
        self.relations_dirty || self.field_states().any(|(_, state)| state.is_modified())
    }

    /// Record a mutation of a field. Snapshots of touched fields hold
    /// uncommitted links and are kept out of the instance cache until commit.
    pub fn mark_touched(&mut self, index: usize) {
        self.touched_fields.insert(index);
    }

    pub fn is_touched(&self, index: usize) -> bool {
        self.touched_fields.contains(&index)
    }

    pub fn touched_fields(&self) -> impl Iterator<Item = usize> + '_ {
        self.touched_fields.iter().copied()
    }

    /// Reset dirty tracking after a flush
    pub fn clear_dirty(&mut self) {
        self.relations_dirty = false;
        for state in self.field_states.iter_mut().flatten() {
            state.clear_modified();
        }
    }

    /// Publish a loaded state to the instance cache
    pub fn cache_relations(&self, cache: Option<&RelationCache>, index: usize, state: &FieldState) {
        let Some(cache) = cache else {
            return;
        };
        if state.is_loaded() {
            cache.store(&self.identity, index, state.related_keys());
        } else {
            cache.invalidate(&self.identity, index);
        }
    }

    /// Fill an unloaded state from the instance cache. Returns true on a hit.
    pub fn load_cached_relations(
        &self,
        cache: Option<&RelationCache>,
        index: usize,
        state: &mut FieldState,
    ) -> bool {
        let Some(keys) = cache.and_then(|cache| cache.get(&self.identity, index)) else {
            return false;
        };
        trace!(field = index, entries = keys.len(), "relation cache hit");
        state.load_relations(keys);
        true
    }

    pub fn has_row(&self) -> bool {
        self.row.is_some()
    }

    pub fn set_row(&mut self, row: Row) {
        self.row = Some(row);
    }

    /// Read this instance's row once
    pub fn ensure_row(
        &mut self,
        store: &dyn TableStore,
        table: &str,
        key_columns: &[String],
    ) -> RelationResult<&mut Row> {
        if self.row.is_none() {
            let values = self.identity.key.to_column_values(key_columns)?;
            let rows = store.select(&SelectQuery {
                table: table.to_string(),
                columns: Vec::new(),
                filter: Condition::all_eq(key_columns, &values),
            })?;
            let row = rows
                .into_iter()
                .next()
                .ok_or_else(|| {
                    RelationError::EntityNotFound(format!("{}#{}", table, self.identity.key))
                })?;
            self.row = Some(row);
        }

        self.row
            .as_mut()
            .ok_or_else(|| RelationError::EntityNotFound(self.identity.key.to_string()))
    }

    /// Cached column values; NULL for unknown columns
    pub fn column_values(&self, columns: &[String]) -> Vec<Value> {
        columns
            .iter()
            .map(|c| {
                self.row
                    .as_ref()
                    .and_then(|row| row.get(c))
                    .cloned()
                    .unwrap_or(Value::Null)
            })
            .collect()
    }

    pub fn set_column_values(&mut self, columns: &[String], values: &[Value]) {
        let row = self.row.get_or_insert_with(Row::new);
        for (column, value) in columns.iter().zip(values) {
            row.insert(column.clone(), value.clone());
        }
    }

    /// Record that a non-nullable foreign key was cleared without a write
    pub fn defer_fk_check(&mut self, index: usize) {
        self.deferred_fk_checks.insert(index);
    }

    pub fn clear_fk_check(&mut self, index: usize) {
        self.deferred_fk_checks.remove(&index);
    }

    pub fn deferred_fk_checks(&self) -> impl Iterator<Item = usize> + '_ {
        self.deferred_fk_checks.iter().copied()
    }
}
