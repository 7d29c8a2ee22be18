//! Relationship Field - one endpoint of a bidirectional association
//!
//! Descriptors are immutable after resolution and shared by every session.
//! The operations here implement the relationship semantics: load on demand,
//! keep both sides of every link consistent, and route the physical write to
//! the side whose loader owns the link.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::RelationCache;
use crate::context::PersistenceContext;
use crate::error::{RelationError, RelationResult};
use crate::key::{EntityId, EntityIdentity, PrimaryKey};
use crate::loader::{LoaderStrategy, RelationshipLoader};
use crate::metadata::Cardinality;
use crate::session::Session;
use crate::state::FieldState;
use crate::store::TableStore;

/// Index of a relationship field inside a resolved schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub(crate) usize);

impl FieldId {
    pub fn index(self) -> usize {
        self.0
    }
}

pub struct RelationshipField {
    pub(crate) id: FieldId,
    pub(crate) name: String,
    pub(crate) association: String,
    pub(crate) entity: EntityId,
    pub(crate) related_entity: EntityId,
    /// Slot in the owning entity's persistence context
    pub(crate) index: usize,
    pub(crate) cardinality: Cardinality,
    pub(crate) related_field: FieldId,
    pub(crate) loader: Arc<dyn RelationshipLoader>,
    pub(crate) cascade_delete: bool,
    pub(crate) read_only: bool,
}

impl fmt::Debug for RelationshipField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationshipField")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("association", &self.association)
            .field("cardinality", &self.cardinality)
            .field("related_field", &self.related_field)
            .field("strategy", &self.loader.strategy())
            .field("cascade_delete", &self.cascade_delete)
            .field("read_only", &self.read_only)
            .finish()
    }
}

impl RelationshipField {
    pub fn id(&self) -> FieldId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn association(&self) -> &str {
        &self.association
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn related_entity(&self) -> EntityId {
        self.related_entity
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn related_field(&self) -> FieldId {
        self.related_field
    }

    pub fn loader(&self) -> &dyn RelationshipLoader {
        self.loader.as_ref()
    }

    pub fn strategy(&self) -> LoaderStrategy {
        self.loader.strategy()
    }

    pub fn is_cascade_delete(&self) -> bool {
        self.cascade_delete
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn identity(&self, key: &PrimaryKey) -> EntityIdentity {
        EntityIdentity::new(self.entity, key.clone())
    }

    /// Fail if application code may not mutate this field
    pub(crate) fn check_writable(&self) -> RelationResult<()> {
        if self.read_only {
            return Err(RelationError::ReadOnly(self.name.clone()));
        }
        Ok(())
    }

    /// Run `f` against this field's state for one instance. The state is
    /// always returned to its slot, also when `f` fails.
    fn with_state<R>(
        &self,
        session: &mut Session,
        key: &PrimaryKey,
        f: impl FnOnce(
            &mut FieldState,
            &mut PersistenceContext,
            &dyn TableStore,
            Option<&RelationCache>,
        ) -> RelationResult<R>,
    ) -> RelationResult<R> {
        let identity = self.identity(key);
        let store = session.store();
        let cache = session.instance_cache();
        let ctx = session.context_mut(&identity)?;

        let mut state = ctx.take_field_state(self.index, self.cardinality);
        let result = f(&mut state, ctx, store.as_ref(), cache.as_deref());
        ctx.set_field_state(self.index, state);
        result
    }

    /// Load an unloaded state: instance cache first, then the loader
    fn load_state(
        &self,
        state: &mut FieldState,
        ctx: &mut PersistenceContext,
        store: &dyn TableStore,
        cache: Option<&RelationCache>,
    ) -> RelationResult<()> {
        if state.is_loaded() || ctx.load_cached_relations(cache, self.index, state) {
            return Ok(());
        }

        let keys = self.loader.load(store, ctx)?;
        if self.cardinality == Cardinality::ToOne && keys.len() > 1 {
            warn!(
                field = %self.name,
                key = %ctx.key(),
                found = keys.len(),
                "single-valued relationship loaded more than one related entity, keeping the first"
            );
        }
        debug!(field = %self.name, key = %ctx.key(), related = keys.len(), "relationship loaded");

        state.load_relations(keys);
        // Snapshots carrying uncommitted links are published at commit
        if !state.is_modified() && !ctx.is_touched(self.index) {
            ctx.cache_relations(cache, self.index, state);
        }
        Ok(())
    }

    /// Force the field to be loaded for one instance
    pub(crate) fn ensure_loaded(
        &self,
        session: &mut Session,
        key: &PrimaryKey,
    ) -> RelationResult<()> {
        self.with_state(session, key, |state, ctx, store, cache| {
            self.load_state(state, ctx, store, cache)
        })
    }

    /// Keys of all related entities, loading if needed
    pub(crate) fn related_ids(
        &self,
        session: &mut Session,
        key: &PrimaryKey,
    ) -> RelationResult<Vec<PrimaryKey>> {
        self.with_state(session, key, |state, ctx, store, cache| {
            self.load_state(state, ctx, store, cache)?;
            Ok(state.related_keys())
        })
    }

    /// Value of a single-valued field
    pub(crate) fn get_value(
        &self,
        session: &mut Session,
        key: &PrimaryKey,
    ) -> RelationResult<Option<PrimaryKey>> {
        Ok(self.related_ids(session, key)?.into_iter().next())
    }

    /// Membership check, loading if needed
    pub(crate) fn contains(
        &self,
        session: &mut Session,
        key: &PrimaryKey,
        related: &PrimaryKey,
    ) -> RelationResult<bool> {
        self.with_state(session, key, |state, ctx, store, cache| {
            self.load_state(state, ctx, store, cache)?;
            Ok(state.related_keys().contains(related))
        })
    }

    /// Membership according to a loaded cache only; `None` when unloaded
    fn cached_contains(
        &self,
        session: &Session,
        key: &PrimaryKey,
        related: &PrimaryKey,
    ) -> Option<bool> {
        session
            .state_at(&self.identity(key), self.index)
            .filter(|state| state.is_loaded())
            .map(|state| state.related_keys().contains(related))
    }

    /// Low-level primitive: record a link on this side, writing it through
    /// the loader when `write` is set. Returns true when the link is known to
    /// be new (loaded cache changed, or storage reported a write).
    pub(crate) fn add_related_id(
        &self,
        session: &mut Session,
        key: &PrimaryKey,
        related: &PrimaryKey,
        write: bool,
    ) -> RelationResult<bool> {
        let force_load =
            self.cardinality.is_collection() && !session.config().defer_unloaded_mutations;

        self.with_state(session, key, |state, ctx, store, cache| {
            if force_load {
                self.load_state(state, ctx, store, cache)?;
            }

            let stored = if write {
                self.loader.add_related_id(store, ctx, related)?
            } else {
                false
            };
            let was_loaded = state.is_loaded();
            let changed = state.add_relation(related.clone());

            if changed || stored {
                ctx.mark_dirty();
            }
            ctx.mark_touched(self.index);
            if let Some(cache) = cache {
                cache.invalidate(ctx.identity(), self.index);
            }
            Ok(stored || (was_loaded && changed))
        })
    }

    /// Low-level primitive: drop a link on this side, see [`Self::add_related_id`]
    pub(crate) fn remove_related_id(
        &self,
        session: &mut Session,
        key: &PrimaryKey,
        related: &PrimaryKey,
        write: bool,
    ) -> RelationResult<bool> {
        // A single-valued field must know its partner before it can drop it
        let force_load =
            self.cardinality == Cardinality::ToOne || !session.config().defer_unloaded_mutations;

        self.with_state(session, key, |state, ctx, store, cache| {
            if force_load {
                self.load_state(state, ctx, store, cache)?;
            }

            let stored = if write {
                self.loader.remove_related_id(store, ctx, related)?
            } else {
                false
            };
            let was_loaded = state.is_loaded();
            let changed = state.remove_relation(related);

            if changed || stored {
                ctx.mark_dirty();
            }
            ctx.mark_touched(self.index);
            if let Some(cache) = cache {
                cache.invalidate(ctx.identity(), self.index);
            }
            Ok(stored || (was_loaded && changed))
        })
    }

    /// Link `key` to `related` on both sides.
    ///
    /// When the inverse field is single-valued, `related` is first detached
    /// from its current partner.
    pub(crate) fn create_relation_links(
        &self,
        session: &mut Session,
        key: &PrimaryKey,
        related: &PrimaryKey,
    ) -> RelationResult<bool> {
        if self.cached_contains(session, key, related) == Some(true) {
            return Ok(false);
        }

        let schema = session.schema();
        let related_field = schema.field(self.related_field);

        if related_field.cardinality == Cardinality::ToOne {
            match related_field.get_value(session, related)? {
                Some(current) if &current == key => {
                    // Already linked; bring this side's cache in line
                    self.add_related_id(session, key, related, false)?;
                    return Ok(false);
                }
                Some(current) => {
                    debug!(
                        field = %self.name,
                        %related,
                        previous = %current,
                        "detaching related entity from its previous partner"
                    );
                    self.destroy_relation_links(session, &current, related)?;
                }
                None => {}
            }
        }

        let write_here = self.loader.owns_link();
        let write_there = !write_here && related_field.loader.owns_link();

        let here = self.add_related_id(session, key, related, write_here)?;
        let there = session.invoke_add_related_id(related_field, related, key, write_there)?;
        Ok(here || there)
    }

    /// Unlink `key` from `related` on both sides
    pub(crate) fn destroy_relation_links(
        &self,
        session: &mut Session,
        key: &PrimaryKey,
        related: &PrimaryKey,
    ) -> RelationResult<bool> {
        let schema = session.schema();
        let related_field = schema.field(self.related_field);

        let write_here = self.loader.owns_link();
        let write_there = !write_here && related_field.loader.owns_link();

        let here = self.remove_related_id(session, key, related, write_here)?;
        let there = session.invoke_remove_related_id(related_field, related, key, write_there)?;
        Ok(here || there)
    }

    /// Sever every link of this field without deleting the related entities
    pub(crate) fn destroy_existing_relationships(
        &self,
        session: &mut Session,
        key: &PrimaryKey,
    ) -> RelationResult<usize> {
        let related = self.related_ids(session, key)?;
        for other in &related {
            self.destroy_relation_links(session, key, other)?;
        }
        Ok(related.len())
    }

    /// Assign a single-valued field
    pub(crate) fn set_value(
        &self,
        session: &mut Session,
        key: &PrimaryKey,
        value: Option<PrimaryKey>,
    ) -> RelationResult<bool> {
        if self.cardinality.is_collection() {
            return Err(RelationError::invalid_argument(
                &self.name,
                "collection-valued field must be assigned a collection",
            ));
        }

        if self.get_value(session, key)? == value {
            return Ok(false);
        }

        self.destroy_existing_relationships(session, key)?;
        if let Some(related) = value {
            self.create_relation_links(session, key, &related)?;
        }
        Ok(true)
    }

    /// Replace the contents of a collection-valued field
    pub(crate) fn set_values(
        &self,
        session: &mut Session,
        key: &PrimaryKey,
        values: Option<Vec<PrimaryKey>>,
    ) -> RelationResult<()> {
        if !self.cardinality.is_collection() {
            return Err(RelationError::invalid_argument(
                &self.name,
                "single-valued field must be assigned a single key",
            ));
        }
        let Some(values) = values else {
            return Err(RelationError::invalid_argument(
                &self.name,
                "null cannot be assigned to a collection-valued relationship field",
            ));
        };

        self.destroy_existing_relationships(session, key)?;
        for related in &values {
            self.create_relation_links(session, key, related)?;
        }
        Ok(())
    }

    /// Removal lifecycle hook, called before the owning row is deleted.
    ///
    /// Cascading fields remove every related entity first; others only sever
    /// their links. Entities already being removed are only unlinked, which
    /// stops cyclic cascades.
    pub(crate) fn remove(&self, session: &mut Session, key: &PrimaryKey) -> RelationResult<()> {
        if !self.cascade_delete {
            self.destroy_existing_relationships(session, key)?;
            return Ok(());
        }

        for related in self.related_ids(session, key)? {
            let identity = EntityIdentity::new(self.related_entity, related.clone());
            if session.is_removed(&identity) {
                continue;
            }
            if session.is_removing(&identity) {
                self.destroy_relation_links(session, key, &related)?;
                continue;
            }
            debug!(field = %self.name, key = %key, %related, "cascade delete");
            session.remove_entity_cascade(&identity)?;
        }
        Ok(())
    }
}
