//! Field State - per-instance cache of one relationship field
//!
//! A state is owned by exactly one persistence context. It never talks to
//! storage itself; [`RelationshipField`](crate::field::RelationshipField)
//! decides when to load and when to write, and keeps the state in step.

use std::collections::BTreeSet;

use crate::key::PrimaryKey;
use crate::metadata::Cardinality;

/// Cached value of a relationship field for one entity instance
#[derive(Debug, Clone, PartialEq)]
pub enum FieldState {
    ToOne(ToOneState),
    ToMany(ToManyState),
}

impl FieldState {
    /// Unloaded state, for instances activated from storage
    pub fn new(cardinality: Cardinality) -> Self {
        match cardinality {
            Cardinality::ToOne => FieldState::ToOne(ToOneState::default()),
            Cardinality::ToMany => FieldState::ToMany(ToManyState::default()),
        }
    }

    /// Loaded, empty state, for freshly created instances
    pub fn new_loaded(cardinality: Cardinality) -> Self {
        let mut state = Self::new(cardinality);
        state.load_relations(Vec::new());
        state
    }

    pub fn cardinality(&self) -> Cardinality {
        match self {
            FieldState::ToOne(_) => Cardinality::ToOne,
            FieldState::ToMany(_) => Cardinality::ToMany,
        }
    }

    pub fn is_loaded(&self) -> bool {
        match self {
            FieldState::ToOne(state) => state.loaded,
            FieldState::ToMany(state) => state.loaded,
        }
    }

    pub fn is_modified(&self) -> bool {
        match self {
            FieldState::ToOne(state) => state.modified,
            FieldState::ToMany(state) => state.modified,
        }
    }

    pub fn clear_modified(&mut self) {
        match self {
            FieldState::ToOne(state) => state.modified = false,
            FieldState::ToMany(state) => state.modified = false,
        }
    }

    /// Structural change counter; to-one fields do not track one
    pub fn generation(&self) -> u64 {
        match self {
            FieldState::ToOne(_) => 0,
            FieldState::ToMany(state) => state.generation,
        }
    }

    /// Install keys read from storage or from the instance cache
    pub fn load_relations(&mut self, keys: Vec<PrimaryKey>) {
        match self {
            FieldState::ToOne(state) => state.load(keys.into_iter().next()),
            FieldState::ToMany(state) => state.load_relations(keys),
        }
    }

    /// Related keys of a loaded state, in key order
    pub fn related_keys(&self) -> Vec<PrimaryKey> {
        match self {
            FieldState::ToOne(state) => state.value.iter().cloned().collect(),
            FieldState::ToMany(state) => state.value.iter().cloned().collect(),
        }
    }

    /// Record a new link. Returns true if the cached value changed.
    pub fn add_relation(&mut self, key: PrimaryKey) -> bool {
        match self {
            FieldState::ToOne(state) => state.add_relation(key),
            FieldState::ToMany(state) => state.add_relation(key),
        }
    }

    /// Drop a link. Returns true if the cached value changed.
    pub fn remove_relation(&mut self, key: &PrimaryKey) -> bool {
        match self {
            FieldState::ToOne(state) => state.remove_relation(key),
            FieldState::ToMany(state) => state.remove_relation(key),
        }
    }

    /// Empty the loaded value after every link has been severed
    pub fn clear(&mut self) {
        match self {
            FieldState::ToOne(state) => {
                state.value = None;
                state.loaded = true;
                state.modified = true;
            }
            FieldState::ToMany(state) => state.clear(),
        }
    }

    pub fn as_to_many(&self) -> Option<&ToManyState> {
        match self {
            FieldState::ToMany(state) => Some(state),
            FieldState::ToOne(_) => None,
        }
    }
}

/// State of a single-valued field
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToOneState {
    value: Option<PrimaryKey>,
    loaded: bool,
    modified: bool,
}

impl ToOneState {
    pub fn value(&self) -> Option<&PrimaryKey> {
        self.value.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn load(&mut self, value: Option<PrimaryKey>) {
        self.value = value;
        self.loaded = true;
    }

    fn add_relation(&mut self, key: PrimaryKey) -> bool {
        let changed = self.value.as_ref() != Some(&key);
        self.value = Some(key);
        self.loaded = true;
        if changed {
            self.modified = true;
        }
        changed
    }

    fn remove_relation(&mut self, key: &PrimaryKey) -> bool {
        if self.loaded && self.value.as_ref() != Some(key) {
            return false;
        }
        // An unloaded to-one is only asked to drop the partner it is linked to
        self.value = None;
        self.loaded = true;
        self.modified = true;
        true
    }
}

/// State of a collection-valued field.
///
/// While unloaded, mutations are buffered in two pending sets. An add cancels
/// a pending remove of the same key and vice versa, so the sets never overlap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToManyState {
    value: BTreeSet<PrimaryKey>,
    added_while_not_loaded: BTreeSet<PrimaryKey>,
    removed_while_not_loaded: BTreeSet<PrimaryKey>,
    loaded: bool,
    modified: bool,
    generation: u64,
}

impl ToManyState {
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Loaded keys; empty while unloaded
    pub fn value(&self) -> &BTreeSet<PrimaryKey> {
        &self.value
    }

    pub fn pending_added(&self) -> &BTreeSet<PrimaryKey> {
        &self.added_while_not_loaded
    }

    pub fn pending_removed(&self) -> &BTreeSet<PrimaryKey> {
        &self.removed_while_not_loaded
    }

    /// `loaded ∪ added \ removed`, then drop the pending sets
    fn load_relations(&mut self, keys: Vec<PrimaryKey>) {
        self.value = keys.into_iter().collect();
        self.value.extend(std::mem::take(&mut self.added_while_not_loaded));
        for key in std::mem::take(&mut self.removed_while_not_loaded) {
            self.value.remove(&key);
        }
        self.loaded = true;
    }

    fn add_relation(&mut self, key: PrimaryKey) -> bool {
        let changed = if self.loaded {
            self.value.insert(key)
        } else if self.removed_while_not_loaded.remove(&key) {
            true
        } else {
            self.added_while_not_loaded.insert(key)
        };
        self.touch(changed);
        changed
    }

    fn remove_relation(&mut self, key: &PrimaryKey) -> bool {
        let changed = if self.loaded {
            self.value.remove(key)
        } else if self.added_while_not_loaded.remove(key) {
            true
        } else {
            self.removed_while_not_loaded.insert(key.clone())
        };
        self.touch(changed);
        changed
    }

    fn clear(&mut self) {
        let changed = !self.value.is_empty() || !self.loaded;
        self.value.clear();
        self.added_while_not_loaded.clear();
        self.removed_while_not_loaded.clear();
        self.loaded = true;
        self.touch(changed);
    }

    fn touch(&mut self, changed: bool) {
        if changed {
            self.modified = true;
            self.generation += 1;
        }
    }
}
