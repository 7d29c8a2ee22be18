//! Session - transaction scope of the relationship engine
//!
//! A [`RelationManager`] owns everything that outlives a transaction: the
//! resolved schema, the table store and the optional instance cache. Each
//! [`Session`] owns the persistence contexts of the entities it touches and
//! the removal bookkeeping used to stop cyclic cascades. Dropping a session
//! without committing discards all of its in-memory relationship state.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, debug_span, info, trace, warn};

use crate::cache::RelationCache;
use crate::config::RelationsConfig;
use crate::context::PersistenceContext;
use crate::error::{RelationError, RelationResult};
use crate::field::RelationshipField;
use crate::key::{EntityIdentity, PrimaryKey};
use crate::loader::LoaderStrategy;
use crate::metadata::Cardinality;
use crate::registry::RelationSchema;
use crate::set::RelationshipSet;
use crate::sql::{Condition, DeleteStatement, InsertStatement, Row};
use crate::state::FieldState;
use crate::store::{LoggingStore, TableStore};

/// Long-lived entry point: schema, storage and instance cache
#[derive(Debug, Clone)]
pub struct RelationManager {
    schema: Arc<RelationSchema>,
    store: Arc<dyn TableStore>,
    cache: Option<Arc<RelationCache>>,
    config: RelationsConfig,
}

impl RelationManager {
    pub fn new(
        schema: Arc<RelationSchema>,
        store: Arc<dyn TableStore>,
        config: RelationsConfig,
    ) -> RelationResult<Self> {
        config.validate()?;

        let store: Arc<dyn TableStore> = if config.log_statements {
            Arc::new(LoggingStore::new(store))
        } else {
            store
        };
        let cache = config
            .instance_cache
            .enabled
            .then(|| Arc::new(RelationCache::new(config.instance_cache.clone())));

        info!(
            instance_cache = cache.is_some(),
            defer_unloaded_mutations = config.defer_unloaded_mutations,
            "relation manager ready"
        );

        Ok(Self {
            schema,
            store,
            cache,
            config,
        })
    }

    pub fn schema(&self) -> &Arc<RelationSchema> {
        &self.schema
    }

    pub fn config(&self) -> &RelationsConfig {
        &self.config
    }

    pub fn instance_cache(&self) -> Option<&Arc<RelationCache>> {
        self.cache.as_ref()
    }

    /// Start a new transaction scope
    pub fn begin(&self) -> Session {
        Session {
            schema: self.schema.clone(),
            store: self.store.clone(),
            cache: self.cache.clone(),
            config: self.config.clone(),
            contexts: BTreeMap::new(),
            removing: BTreeSet::new(),
            removed: BTreeSet::new(),
        }
    }
}

/// One transaction's view of entity relationships
#[derive(Debug)]
pub struct Session {
    schema: Arc<RelationSchema>,
    store: Arc<dyn TableStore>,
    cache: Option<Arc<RelationCache>>,
    config: RelationsConfig,
    contexts: BTreeMap<EntityIdentity, PersistenceContext>,
    /// Removals in progress, checked before recursing into a cascade
    removing: BTreeSet<EntityIdentity>,
    removed: BTreeSet<EntityIdentity>,
}

impl Session {
    pub(crate) fn schema(&self) -> Arc<RelationSchema> {
        self.schema.clone()
    }

    pub(crate) fn store(&self) -> Arc<dyn TableStore> {
        self.store.clone()
    }

    pub(crate) fn instance_cache(&self) -> Option<Arc<RelationCache>> {
        self.cache.clone()
    }

    pub fn config(&self) -> &RelationsConfig {
        &self.config
    }

    /// Build an identity from an entity type name and key
    pub fn identity(
        &self,
        entity: &str,
        key: impl Into<PrimaryKey>,
    ) -> RelationResult<EntityIdentity> {
        Ok(EntityIdentity::new(self.schema.entity_id(entity)?, key))
    }

    /// Context of an instance, activated on first touch with unloaded states
    pub(crate) fn context_mut(
        &mut self,
        identity: &EntityIdentity,
    ) -> RelationResult<&mut PersistenceContext> {
        if self.removed.contains(identity) {
            return Err(RelationError::EntityRemoved(self.schema.describe(identity)));
        }

        let schema = &self.schema;
        Ok(self.contexts.entry(identity.clone()).or_insert_with(|| {
            trace!(entity = %schema.describe(identity), "activating persistence context");
            PersistenceContext::new(identity.clone(), schema.field_count(identity.entity))
        }))
    }

    pub(crate) fn state_at(&self, identity: &EntityIdentity, index: usize) -> Option<&FieldState> {
        self.contexts.get(identity).and_then(|ctx| ctx.field_state(index))
    }

    pub(crate) fn is_removing(&self, identity: &EntityIdentity) -> bool {
        self.removing.contains(identity)
    }

    pub(crate) fn is_removed(&self, identity: &EntityIdentity) -> bool {
        self.removed.contains(identity)
    }

    /// Inverse-side fan-out for a new link
    pub(crate) fn invoke_add_related_id(
        &mut self,
        field: &RelationshipField,
        target: &PrimaryKey,
        related: &PrimaryKey,
        write: bool,
    ) -> RelationResult<bool> {
        trace!(field = %field.name(), %target, %related, write, "inverse add");
        field.add_related_id(self, target, related, write)
    }

    /// Inverse-side fan-out for a severed link
    pub(crate) fn invoke_remove_related_id(
        &mut self,
        field: &RelationshipField,
        target: &PrimaryKey,
        related: &PrimaryKey,
        write: bool,
    ) -> RelationResult<bool> {
        trace!(field = %field.name(), %target, %related, write, "inverse remove");
        field.remove_related_id(self, target, related, write)
    }

    /// Insert a new entity row.
    ///
    /// Relationship fields of a new instance start loaded and empty, except
    /// local foreign keys, which read their value from the inserted row. A
    /// non-null foreign key in `row` links the related entity immediately.
    pub fn create_entity(
        &mut self,
        entity: &str,
        key: impl Into<PrimaryKey>,
        row: Value,
    ) -> RelationResult<EntityIdentity> {
        let schema = self.schema.clone();
        let identity = EntityIdentity::new(schema.entity_id(entity)?, key);
        let descriptor = schema.entity(identity.entity);

        let Value::Object(mut row) = row else {
            return Err(RelationError::invalid_argument(entity, "entity row must be a JSON object"));
        };
        let key_values = identity.key.to_column_values(&descriptor.primary_key)?;
        for (column, value) in descriptor.primary_key.iter().zip(key_values) {
            row.insert(column.clone(), value);
        }

        let mut ctx = PersistenceContext::new(
            identity.clone(),
            schema.field_count(identity.entity),
        );
        let mut links = Vec::new();
        for field in schema.fields_of(identity.entity) {
            // Nothing about a new instance may reach the instance cache before commit
            ctx.mark_touched(field.index());
            match field.loader().local_foreign_key() {
                Some((columns, nullable)) => {
                    let values = columns
                        .iter()
                        .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                        .collect::<Vec<_>>();
                    if values.iter().all(Value::is_null) {
                        if !nullable {
                            ctx.defer_fk_check(field.index());
                        }
                    } else {
                        links.push(field);
                    }
                }
                None => {
                    ctx.set_field_state(field.index(), FieldState::new_loaded(field.cardinality()))
                }
            }
        }
        ctx.set_row(row.clone());

        self.removed.remove(&identity);
        self.contexts.insert(identity.clone(), ctx);

        // Single-valued inverses learn their current partner before the new
        // row makes a second one visible in storage
        let prepared = self.prepare_links(&schema, &identity, &links);
        let inserted = prepared.and_then(|links| {
            self.store.insert(&InsertStatement {
                table: descriptor.table.clone(),
                row,
            })?;
            Ok(links)
        });
        let links = match inserted {
            Ok(links) => links,
            Err(err) => {
                self.contexts.remove(&identity);
                return Err(err);
            }
        };
        debug!(entity = %schema.describe(&identity), "entity created");

        for (inverse, related) in links {
            if inverse.cardinality() == Cardinality::ToOne {
                match inverse.get_value(self, &related)? {
                    Some(current) if current != identity.key => {
                        debug!(
                            field = %inverse.name(),
                            %related,
                            previous = %current,
                            "detaching related entity from its previous partner"
                        );
                        inverse.destroy_relation_links(self, &related, &current)?;
                    }
                    _ => {}
                }
            }
            self.invoke_add_related_id(inverse, &related, &identity.key, false)?;
        }
        Ok(identity)
    }

    /// Inverse fields and related keys named by the foreign keys of a new
    /// row. Single-valued inverses are loaded on the way.
    fn prepare_links<'a>(
        &mut self,
        schema: &'a RelationSchema,
        identity: &EntityIdentity,
        fields: &[&'a RelationshipField],
    ) -> RelationResult<Vec<(&'a RelationshipField, PrimaryKey)>> {
        let mut links = Vec::with_capacity(fields.len());
        for field in fields {
            let Some(related) = field.get_value(self, &identity.key)? else {
                continue;
            };
            let inverse = schema.field(field.related_field());
            if inverse.cardinality() == Cardinality::ToOne {
                inverse.ensure_loaded(self, &related)?;
            }
            links.push((inverse, related));
        }
        Ok(links)
    }

    /// Activate an existing entity. Returns `None` when no row exists.
    pub fn find_entity(
        &mut self,
        entity: &str,
        key: impl Into<PrimaryKey>,
    ) -> RelationResult<Option<EntityIdentity>> {
        let identity = self.identity(entity, key)?;
        if self.removed.contains(&identity) {
            return Ok(None);
        }

        let schema = self.schema.clone();
        let store = self.store.clone();
        let descriptor = schema.entity(identity.entity);
        let existed = self.contexts.contains_key(&identity);

        let found = self
            .context_mut(&identity)?
            .ensure_row(store.as_ref(), &descriptor.table, &descriptor.primary_key)
            .map(|_| ());

        match found {
            Ok(()) => Ok(Some(identity)),
            Err(RelationError::EntityNotFound(_)) => {
                if !existed {
                    self.contexts.remove(&identity);
                }
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn field<'a>(
        schema: &'a RelationSchema,
        identity: &EntityIdentity,
        name: &str,
    ) -> RelationResult<&'a RelationshipField> {
        schema.field_named(identity.entity, name)
    }

    /// Value of a single-valued relationship field
    pub fn get_related(
        &mut self,
        identity: &EntityIdentity,
        field: &str,
    ) -> RelationResult<Option<PrimaryKey>> {
        let schema = self.schema.clone();
        let field = Self::field(&schema, identity, field)?;
        if field.cardinality().is_collection() {
            return Err(RelationError::invalid_argument(
                field.name(),
                "collection-valued field, use related_keys or related_set",
            ));
        }
        field.get_value(self, &identity.key)
    }

    /// Assign a single-valued relationship field. Returns false when the
    /// field already held `value`.
    pub fn set_related(
        &mut self,
        identity: &EntityIdentity,
        field: &str,
        value: Option<PrimaryKey>,
    ) -> RelationResult<bool> {
        let schema = self.schema.clone();
        let field = Self::field(&schema, identity, field)?;
        field.check_writable()?;
        field.set_value(self, &identity.key, value)
    }

    /// Keys of every related entity, for either cardinality
    pub fn related_keys(
        &mut self,
        identity: &EntityIdentity,
        field: &str,
    ) -> RelationResult<Vec<PrimaryKey>> {
        let schema = self.schema.clone();
        Self::field(&schema, identity, field)?.related_ids(self, &identity.key)
    }

    /// Replace a collection-valued field. `None` is rejected.
    pub fn set_related_keys(
        &mut self,
        identity: &EntityIdentity,
        field: &str,
        values: Option<Vec<PrimaryKey>>,
    ) -> RelationResult<()> {
        let schema = self.schema.clone();
        let field = Self::field(&schema, identity, field)?;
        field.check_writable()?;
        field.set_values(self, &identity.key, values)
    }

    /// Live view of a collection-valued field
    pub fn related_set(
        &mut self,
        identity: &EntityIdentity,
        field: &str,
    ) -> RelationResult<RelationshipSet<'_>> {
        let schema = self.schema.clone();
        let field = Self::field(&schema, identity, field)?;
        if !field.cardinality().is_collection() {
            return Err(RelationError::invalid_argument(
                field.name(),
                "single-valued field has no collection view",
            ));
        }
        if self.removed.contains(identity) {
            return Err(RelationError::EntityRemoved(schema.describe(identity)));
        }
        let id = field.id();
        Ok(RelationshipSet::new(self, schema, id, identity.key.clone()))
    }

    /// Load a field now instead of on first access
    pub fn ensure_loaded(&mut self, identity: &EntityIdentity, field: &str) -> RelationResult<()> {
        let schema = self.schema.clone();
        Self::field(&schema, identity, field)?.ensure_loaded(self, &identity.key)
    }

    pub fn is_loaded(&self, identity: &EntityIdentity, field: &str) -> RelationResult<bool> {
        Ok(self.field_state(identity, field)?.is_some_and(FieldState::is_loaded))
    }

    /// Current in-memory state of a field, if the instance has one
    pub fn field_state(
        &self,
        identity: &EntityIdentity,
        field: &str,
    ) -> RelationResult<Option<&FieldState>> {
        let index = self.schema.field_named(identity.entity, field)?.index();
        Ok(self.state_at(identity, index))
    }

    /// Whether the instance has relationship changes not yet flushed
    pub fn is_dirty(&self, identity: &EntityIdentity) -> bool {
        self.contexts
            .get(identity)
            .is_some_and(PersistenceContext::is_relations_dirty)
    }

    pub fn is_active(&self, identity: &EntityIdentity) -> bool {
        self.contexts.contains_key(identity)
    }

    /// Remove an entity: cascade or sever every relationship, then delete
    /// its row
    pub fn remove_entity(&mut self, identity: &EntityIdentity) -> RelationResult<()> {
        if self.removed.contains(identity) {
            return Err(RelationError::EntityRemoved(self.schema.describe(identity)));
        }
        if self.removing.contains(identity) {
            return Ok(());
        }
        self.remove_entity_cascade(identity)
    }

    pub(crate) fn remove_entity_cascade(
        &mut self,
        identity: &EntityIdentity,
    ) -> RelationResult<()> {
        let schema = self.schema.clone();
        let span = debug_span!("remove_entity", entity = %schema.describe(identity));
        let _enter = span.enter();

        self.removing.insert(identity.clone());
        let result = self.remove_fields_and_row(&schema, identity);
        self.removing.remove(identity);

        if result.is_ok() {
            self.removed.insert(identity.clone());
            debug!("entity removed");
        }
        result
    }

    fn remove_fields_and_row(
        &mut self,
        schema: &RelationSchema,
        identity: &EntityIdentity,
    ) -> RelationResult<()> {
        for field in schema.fields_of(identity.entity) {
            field.remove(self, &identity.key)?;
        }

        let descriptor = schema.entity(identity.entity);
        let key_values = identity.key.to_column_values(&descriptor.primary_key)?;
        let deleted = self.store.delete(&DeleteStatement {
            table: descriptor.table.clone(),
            filter: Condition::all_eq(&descriptor.primary_key, &key_values),
        })?;
        if deleted == 0 {
            warn!(table = %descriptor.table, key = %identity.key, "removed entity had no row");
        }

        // Deferred foreign-key checks go with the context
        self.contexts.remove(identity);
        if let Some(cache) = &self.cache {
            cache.invalidate_entity(identity);
        }
        Ok(())
    }

    /// Fail if a mandatory local foreign key was left unset
    fn check_foreign_keys(&self) -> RelationResult<()> {
        for ctx in self.contexts.values() {
            let Some(index) = ctx.deferred_fk_checks().next() else {
                continue;
            };
            let identity = ctx.identity();
            let field = self
                .schema
                .fields_of(identity.entity)
                .find(|f| f.index() == index && f.strategy() == LoaderStrategy::LocalForeignKey);

            let (name, columns) = match field {
                Some(field) => (
                    field.name().to_string(),
                    field
                        .loader()
                        .local_foreign_key()
                        .map(|(columns, _)| columns.join(", "))
                        .unwrap_or_default(),
                ),
                None => (index.to_string(), String::new()),
            };
            return Err(RelationError::ForeignKeyViolation {
                entity: self.schema.describe(identity),
                field: name,
                columns,
            });
        }
        Ok(())
    }

    /// Verify deferred foreign-key checks and reset dirty tracking. Links are
    /// already written by the time a mutating call returns.
    pub fn flush(&mut self) -> RelationResult<()> {
        self.check_foreign_keys()?;

        let mut flushed = 0;
        for ctx in self.contexts.values_mut() {
            if ctx.is_relations_dirty() {
                ctx.clear_dirty();
                flushed += 1;
            }
        }
        debug!(contexts = flushed, "relationship state flushed");
        Ok(())
    }

    /// Flush, then publish modified relationship snapshots to the instance
    /// cache
    pub fn commit(mut self) -> RelationResult<()> {
        self.check_foreign_keys()?;

        // Touched fields publish their loaded snapshot; unloaded ones are dropped
        let mut published = 0;
        if let Some(cache) = self.cache.as_deref() {
            for ctx in self.contexts.values() {
                for index in ctx.touched_fields() {
                    match ctx.field_state(index) {
                        Some(state) if state.is_loaded() => {
                            ctx.cache_relations(Some(cache), index, state);
                            published += 1;
                        }
                        _ => {
                            cache.invalidate(ctx.identity(), index);
                        }
                    }
                }
            }
        }

        self.flush()?;
        debug!(
            contexts = self.contexts.len(),
            removed = self.removed.len(),
            published,
            "session committed"
        );
        Ok(())
    }

    /// Discard the session. Instance-cache entries of every field mutated
    /// in this session, flushed or not, are invalidated; storage rollback
    /// belongs to the store.
    pub fn rollback(self) {
        if let Some(cache) = &self.cache {
            for ctx in self.contexts.values() {
                for index in ctx.touched_fields() {
                    cache.invalidate(ctx.identity(), index);
                }
            }
            for identity in &self.removed {
                cache.invalidate_entity(identity);
            }
        }
        debug!(contexts = self.contexts.len(), "session rolled back");
    }

    /// Row of an active instance as last read or written by this session
    pub fn entity_row(&mut self, identity: &EntityIdentity) -> RelationResult<Row> {
        let schema = self.schema.clone();
        let store = self.store.clone();
        let descriptor = schema.entity(identity.entity);
        let row = self
            .context_mut(identity)?
            .ensure_row(store.as_ref(), &descriptor.table, &descriptor.primary_key)?;
        Ok(row.clone())
    }
}
