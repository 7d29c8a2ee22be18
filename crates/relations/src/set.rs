//! Relationship Set - live collection view of a to-many field
//!
//! The view holds no state of its own: every call goes through the field
//! operations, so the inverse side and storage stay in step with each
//! mutation. Iteration works on a snapshot; a [`RelationshipCursor`] detects
//! structural changes made behind its back.

use std::sync::Arc;

use crate::error::{RelationError, RelationResult};
use crate::field::{FieldId, RelationshipField};
use crate::key::{EntityIdentity, PrimaryKey};
use crate::registry::RelationSchema;
use crate::session::Session;

pub struct RelationshipSet<'s> {
    session: &'s mut Session,
    schema: Arc<RelationSchema>,
    field: FieldId,
    key: PrimaryKey,
}

impl<'s> RelationshipSet<'s> {
    pub(crate) fn new(
        session: &'s mut Session,
        schema: Arc<RelationSchema>,
        field: FieldId,
        key: PrimaryKey,
    ) -> Self {
        Self {
            session,
            schema,
            field,
            key,
        }
    }

    pub fn field(&self) -> &RelationshipField {
        self.schema.field(self.field)
    }

    /// Identity of the entity owning the collection
    pub fn owner(&self) -> EntityIdentity {
        EntityIdentity::new(self.field().entity(), self.key.clone())
    }

    /// Link `related`; false if it was already a member
    pub fn add(&mut self, related: PrimaryKey) -> RelationResult<bool> {
        let field = self.schema.field(self.field);
        field.check_writable()?;
        field.create_relation_links(self.session, &self.key, &related)
    }

    /// Unlink `related`; false if it was not a member
    pub fn remove(&mut self, related: &PrimaryKey) -> RelationResult<bool> {
        let field = self.schema.field(self.field);
        field.check_writable()?;
        field.destroy_relation_links(self.session, &self.key, related)
    }

    pub fn contains(&mut self, related: &PrimaryKey) -> RelationResult<bool> {
        self.schema.field(self.field).contains(self.session, &self.key, related)
    }

    pub fn contains_all(&mut self, related: &[PrimaryKey]) -> RelationResult<bool> {
        let keys = self.keys()?;
        Ok(related.iter().all(|k| keys.contains(k)))
    }

    pub fn len(&mut self) -> RelationResult<usize> {
        Ok(self.keys()?.len())
    }

    pub fn is_empty(&mut self) -> RelationResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Members in key order, loading the field if needed
    pub fn keys(&mut self) -> RelationResult<Vec<PrimaryKey>> {
        self.schema.field(self.field).related_ids(self.session, &self.key)
    }

    /// Iterate over a snapshot taken now
    pub fn iter(&mut self) -> RelationResult<std::vec::IntoIter<PrimaryKey>> {
        Ok(self.keys()?.into_iter())
    }

    /// Snapshot iterator that supports removal through the view
    pub fn cursor(&mut self) -> RelationResult<RelationshipCursor> {
        let snapshot = self.keys()?;
        Ok(RelationshipCursor {
            snapshot: snapshot.into_iter(),
            current: None,
            expected_generation: self.generation(),
        })
    }

    /// Sever every link without deleting the related entities
    pub fn clear(&mut self) -> RelationResult<()> {
        let field = self.schema.field(self.field);
        field.check_writable()?;
        field.destroy_existing_relationships(self.session, &self.key)?;
        Ok(())
    }

    /// Returns true if any member was added
    pub fn add_all<I>(&mut self, related: I) -> RelationResult<bool>
    where
        I: IntoIterator<Item = PrimaryKey>,
    {
        let mut changed = false;
        for key in related {
            changed |= self.add(key)?;
        }
        Ok(changed)
    }

    /// Returns true if any member was removed
    pub fn remove_all(&mut self, related: &[PrimaryKey]) -> RelationResult<bool> {
        let mut changed = false;
        for key in related {
            changed |= self.remove(key)?;
        }
        Ok(changed)
    }

    /// Keep only the members listed in `related`
    pub fn retain_all(&mut self, related: &[PrimaryKey]) -> RelationResult<bool> {
        let mut changed = false;
        for key in self.keys()? {
            if !related.contains(&key) {
                changed |= self.remove(&key)?;
            }
        }
        Ok(changed)
    }

    pub fn is_loaded(&self) -> bool {
        let field = self.schema.field(self.field);
        self.session
            .state_at(&self.owner(), field.index())
            .is_some_and(|state| state.is_loaded())
    }

    /// Structural change counter of the backing state
    pub fn generation(&self) -> u64 {
        let field = self.schema.field(self.field);
        self.session
            .state_at(&self.owner(), field.index())
            .map_or(0, |state| state.generation())
    }
}

/// Iterator over a snapshot of a [`RelationshipSet`].
///
/// The cursor borrows the set only per call, so the set stays usable while
/// iterating. Any structural change not made through [`remove`](Self::remove)
/// is reported as [`RelationError::ConcurrentModification`].
#[derive(Debug, Clone)]
pub struct RelationshipCursor {
    snapshot: std::vec::IntoIter<PrimaryKey>,
    current: Option<PrimaryKey>,
    expected_generation: u64,
}

impl RelationshipCursor {
    fn check(&self, set: &RelationshipSet<'_>) -> RelationResult<()> {
        let found = set.generation();
        if found != self.expected_generation {
            return Err(RelationError::ConcurrentModification {
                field: set.field().name().to_string(),
                expected: self.expected_generation,
                found,
            });
        }
        Ok(())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self, set: &RelationshipSet<'_>) -> RelationResult<Option<PrimaryKey>> {
        self.check(set)?;
        self.current = self.snapshot.next();
        Ok(self.current.clone())
    }

    /// Remove the element last returned by [`next`](Self::next)
    pub fn remove(&mut self, set: &mut RelationshipSet<'_>) -> RelationResult<()> {
        self.check(set)?;
        let Some(current) = self.current.take() else {
            return Err(RelationError::invalid_argument(
                set.field().name(),
                "cursor has no current element to remove",
            ));
        };
        set.remove(&current)?;
        self.expected_generation = set.generation();
        Ok(())
    }

    /// Elements left in the snapshot
    pub fn remaining(&self) -> usize {
        self.snapshot.len()
    }
}
