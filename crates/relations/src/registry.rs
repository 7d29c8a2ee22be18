//! Relationship Registry - declaration intake and one-time resolution
//!
//! Entity types and associations are registered first, then [`resolve`]
//! wires every association into two cross-linked [`RelationshipField`]s with
//! exactly one loader strategy each. The resulting [`RelationSchema`] is
//! immutable and shared by all sessions.
//!
//! [`resolve`]: RelationshipRegistry::resolve

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{RelationError, RelationResult, ResolutionError};
use crate::field::{FieldId, RelationshipField};
use crate::key::{EntityId, EntityIdentity};
use crate::loader::{
    JoinTableLoader, LocalForeignKeyLoader, OwnedForeignKeyLoader, RelationTable, RelationTableSide,
    RelationshipLoader,
};
use crate::metadata::{
    AssociationDeclaration, Cardinality, EntityDescriptor, KeyColumn, RoleDeclaration,
};

/// Collects declarations until [`resolve`](Self::resolve) is called
#[derive(Debug, Default)]
pub struct RelationshipRegistry {
    entities: Vec<EntityDescriptor>,
    entity_index: HashMap<String, EntityId>,
    associations: Vec<AssociationDeclaration>,
}

impl RelationshipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity type
    pub fn register_entity(
        &mut self,
        entity: EntityDescriptor,
    ) -> Result<EntityId, ResolutionError> {
        entity.validate()?;
        if self.entity_index.contains_key(&entity.name) {
            return Err(ResolutionError::DuplicateEntity(entity.name));
        }

        let id = EntityId(self.entities.len());
        self.entity_index.insert(entity.name.clone(), id);
        self.entities.push(entity);
        Ok(id)
    }

    /// Register an association. Entity references are checked at resolution.
    pub fn register_association(
        &mut self,
        association: AssociationDeclaration,
    ) -> Result<(), ResolutionError> {
        association.validate()?;
        self.associations.push(association);
        Ok(())
    }

    /// Builder-style registration for both kinds of declaration
    pub fn with_entity(mut self, entity: EntityDescriptor) -> Result<Self, ResolutionError> {
        self.register_entity(entity)?;
        Ok(self)
    }

    pub fn with_association(
        mut self,
        association: AssociationDeclaration,
    ) -> Result<Self, ResolutionError> {
        self.register_association(association)?;
        Ok(self)
    }

    fn lookup(
        &self,
        association: &AssociationDeclaration,
        role: &RoleDeclaration,
    ) -> Result<EntityId, ResolutionError> {
        self.entity_index
            .get(&role.entity)
            .copied()
            .ok_or_else(|| ResolutionError::UnknownEntity {
                association: association.name.clone(),
                entity: role.entity.clone(),
            })
    }

    /// Wire all associations. Resolution happens exactly once; the registry
    /// is consumed.
    pub fn resolve(self) -> Result<Arc<RelationSchema>, ResolutionError> {
        let mut fields: Vec<RelationshipField> = Vec::with_capacity(self.associations.len() * 2);
        let mut entity_fields: Vec<Vec<FieldId>> = vec![Vec::new(); self.entities.len()];
        let mut field_index: HashMap<(EntityId, String), FieldId> = HashMap::new();

        for association in &self.associations {
            let left_entity = self.lookup(association, &association.left)?;
            let right_entity = self.lookup(association, &association.right)?;

            let roles = [
                (left_entity, &association.left),
                (right_entity, &association.right),
            ];
            for (entity, role) in roles {
                if field_index.contains_key(&(entity, role.field.clone())) {
                    return Err(ResolutionError::DuplicateField {
                        entity: role.entity.clone(),
                        field: role.field.clone(),
                    });
                }
            }

            check_cascade(association, &association.left, &association.right)?;
            check_cascade(association, &association.right, &association.left)?;

            let left_slot = entity_fields[left_entity.0].len();
            let right_slot =
                entity_fields[right_entity.0].len() + usize::from(left_entity == right_entity);

            let (left_loader, right_loader) = self.resolve_loaders(
                association,
                left_entity,
                right_entity,
                left_slot,
                right_slot,
            )?;

            let left_id = FieldId(fields.len());
            let right_id = FieldId(fields.len() + 1);
            debug!(
                association = %association.name,
                left = %format!("{}.{}", association.left.entity, association.left.field),
                right = %format!("{}.{}", association.right.entity, association.right.field),
                left_strategy = %left_loader.strategy(),
                right_strategy = %right_loader.strategy(),
                "association resolved"
            );

            let sides = [
                (
                    left_id,
                    &association.left,
                    left_entity,
                    right_entity,
                    right_id,
                    left_slot,
                    left_loader,
                ),
                (
                    right_id,
                    &association.right,
                    right_entity,
                    left_entity,
                    left_id,
                    right_slot,
                    right_loader,
                ),
            ];
            for (id, role, entity, related_entity, related_field, slot, loader) in sides {
                fields.push(RelationshipField {
                    id,
                    name: role.field.clone(),
                    association: association.name.clone(),
                    entity,
                    related_entity,
                    index: slot,
                    cardinality: role.cardinality,
                    related_field,
                    loader,
                    cascade_delete: role.cascade_delete,
                    read_only: role.read_only,
                });
                entity_fields[entity.0].push(id);
                field_index.insert((entity, role.field.clone()), id);
            }
        }

        info!(
            entities = self.entities.len(),
            associations = self.associations.len(),
            fields = fields.len(),
            "relationship schema resolved"
        );

        Ok(Arc::new(RelationSchema {
            entities: self.entities,
            entity_index: self.entity_index,
            fields,
            entity_fields,
            field_index,
        }))
    }

    /// Pick one loader per side: a declared relation table wins, otherwise
    /// the side declaring the foreign key owns it
    fn resolve_loaders(
        &self,
        association: &AssociationDeclaration,
        left_entity: EntityId,
        right_entity: EntityId,
        left_slot: usize,
        right_slot: usize,
    ) -> Result<(Arc<dyn RelationshipLoader>, Arc<dyn RelationshipLoader>), ResolutionError> {
        let left = &self.entities[left_entity.0];
        let right = &self.entities[right_entity.0];

        if let Some(ref table) = association.relation_table {
            if association.left.foreign_key.is_some() || association.right.foreign_key.is_some() {
                return Err(ResolutionError::AmbiguousForeignKey(association.name.clone()));
            }

            let left_columns =
                resolve_key_columns(&association.name, &table.left_columns, left, &left.name)?;
            let right_columns =
                resolve_key_columns(&association.name, &table.right_columns, right, &right.name)?;
            if left_columns.iter().any(|c| right_columns.contains(c)) {
                return Err(ResolutionError::InvalidForeignKey {
                    association: association.name.clone(),
                    message: format!(
                        "relation table '{}' uses a column for both sides",
                        table.table
                    ),
                });
            }

            let relation_table = Arc::new(RelationTable {
                table: table.table.clone(),
                left_columns,
                right_columns,
            });
            let left_loader = JoinTableLoader::new(
                relation_table.clone(),
                RelationTableSide::Left,
                left.primary_key.clone(),
                &right.table,
                right.primary_key.clone(),
            );
            let right_loader = JoinTableLoader::new(
                relation_table,
                RelationTableSide::Right,
                right.primary_key.clone(),
                &left.table,
                left.primary_key.clone(),
            );
            return Ok((Arc::new(left_loader), Arc::new(right_loader)));
        }

        match (&association.left.foreign_key, &association.right.foreign_key) {
            (Some(_), None) => {
                let (local, owned) =
                    foreign_key_loaders(association, &association.left, left, left_slot, right)?;
                Ok((local, owned))
            }
            (None, Some(_)) => {
                let (local, owned) =
                    foreign_key_loaders(association, &association.right, right, right_slot, left)?;
                Ok((owned, local))
            }
            _ => Err(ResolutionError::AmbiguousForeignKey(association.name.clone())),
        }
    }
}

/// Loaders for a foreign key stored on `role`'s table, pointing at `target`.
/// Returns (local side, owned side).
fn foreign_key_loaders(
    association: &AssociationDeclaration,
    role: &RoleDeclaration,
    local: &EntityDescriptor,
    slot: usize,
    target: &EntityDescriptor,
) -> Result<(Arc<dyn RelationshipLoader>, Arc<dyn RelationshipLoader>), ResolutionError> {
    let Some(ref foreign_key) = role.foreign_key else {
        return Err(ResolutionError::AmbiguousForeignKey(association.name.clone()));
    };
    if role.cardinality != Cardinality::ToOne {
        return Err(ResolutionError::InvalidForeignKey {
            association: association.name.clone(),
            message: format!(
                "foreign key declared on collection-valued field '{}.{}'",
                role.entity, role.field
            ),
        });
    }

    let columns =
        resolve_key_columns(&association.name, &foreign_key.columns, target, &role.field)?;
    let local_loader = LocalForeignKeyLoader::new(
        slot,
        &local.table,
        local.primary_key.clone(),
        columns.clone(),
        target.primary_key.clone(),
        foreign_key.nullable,
    );
    let owned_loader = OwnedForeignKeyLoader::new(
        &local.table,
        local.primary_key.clone(),
        columns,
        target.primary_key.clone(),
    );
    Ok((Arc::new(local_loader), Arc::new(owned_loader)))
}

/// Order declared columns by the key columns of `target`. With nothing
/// declared, columns are named `{prefix}_{key column}` in lower case.
fn resolve_key_columns(
    association: &str,
    columns: &[KeyColumn],
    target: &EntityDescriptor,
    default_prefix: &str,
) -> Result<Vec<String>, ResolutionError> {
    let key = &target.primary_key;
    if columns.is_empty() {
        let prefix = default_prefix.to_lowercase();
        return Ok(key.iter().map(|pk| format!("{}_{}", prefix, pk)).collect());
    }

    let invalid = |message: String| ResolutionError::InvalidForeignKey {
        association: association.to_string(),
        message,
    };

    if columns.len() != key.len() {
        return Err(invalid(format!(
            "{} column(s) declared but '{}' has {} key column(s)",
            columns.len(),
            target.name,
            key.len()
        )));
    }

    if let ([column], [pk]) = (columns, key.as_slice()) {
        if !column.references.is_empty() && &column.references != pk {
            return Err(invalid(format!(
                "column '{}' references '{}', which is not a key column of '{}'",
                column.column, column.references, target.name
            )));
        }
        return Ok(vec![column.column.clone()]);
    }

    key.iter()
        .map(|pk| {
            columns
                .iter()
                .find(|c| &c.references == pk)
                .map(|c| c.column.clone())
                .ok_or_else(|| {
                    invalid(format!(
                        "no column references key column '{}' of '{}'",
                        pk, target.name
                    ))
                })
        })
        .collect()
}

fn check_cascade(
    association: &AssociationDeclaration,
    role: &RoleDeclaration,
    inverse: &RoleDeclaration,
) -> Result<(), ResolutionError> {
    if role.cascade_delete && inverse.cardinality != Cardinality::ToOne {
        return Err(ResolutionError::InvalidCascade {
            association: association.name.clone(),
            field: role.field.clone(),
        });
    }
    Ok(())
}

/// Resolved, immutable relationship metadata
#[derive(Debug)]
pub struct RelationSchema {
    entities: Vec<EntityDescriptor>,
    entity_index: HashMap<String, EntityId>,
    fields: Vec<RelationshipField>,
    entity_fields: Vec<Vec<FieldId>>,
    field_index: HashMap<(EntityId, String), FieldId>,
}

impl RelationSchema {
    pub fn entity(&self, id: EntityId) -> &EntityDescriptor {
        &self.entities[id.0]
    }

    pub fn entities(&self) -> impl Iterator<Item = (EntityId, &EntityDescriptor)> {
        self.entities.iter().enumerate().map(|(i, e)| (EntityId(i), e))
    }

    pub fn entity_id(&self, name: &str) -> RelationResult<EntityId> {
        self.entity_index
            .get(name)
            .copied()
            .ok_or_else(|| RelationError::UnknownEntity(name.to_string()))
    }

    pub fn field(&self, id: FieldId) -> &RelationshipField {
        &self.fields[id.0]
    }

    pub fn field_named(&self, entity: EntityId, name: &str) -> RelationResult<&RelationshipField> {
        self.field_index
            .get(&(entity, name.to_string()))
            .map(|id| &self.fields[id.0])
            .ok_or_else(|| RelationError::UnknownField {
                entity: self.entity(entity).name.clone(),
                field: name.to_string(),
            })
    }

    /// Relationship fields of an entity type, in slot order
    pub fn fields_of(&self, entity: EntityId) -> impl Iterator<Item = &RelationshipField> {
        self.entity_fields[entity.0].iter().map(move |id| &self.fields[id.0])
    }

    /// Number of relationship field slots an entity's context needs
    pub fn field_count(&self, entity: EntityId) -> usize {
        self.entity_fields[entity.0].len()
    }

    /// Human-readable identity, e.g. `Order#1`
    pub fn describe(&self, identity: &EntityIdentity) -> String {
        format!("{}#{}", self.entity(identity.entity).name, identity.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::LoaderStrategy;
    use crate::metadata::{ForeignKeyConfig, RelationTableConfig};

    fn registry() -> RelationshipRegistry {
        let mut registry = RelationshipRegistry::new();
        registry.register_entity(EntityDescriptor::new("Order", "orders")).unwrap();
        registry.register_entity(EntityDescriptor::new("LineItem", "line_items")).unwrap();
        registry
    }

    fn order_items() -> AssociationDeclaration {
        AssociationDeclaration::new(
            "order-items",
            RoleDeclaration::to_many("Order", "items"),
            RoleDeclaration::to_one("LineItem", "order")
                .with_foreign_key(ForeignKeyConfig::simple("order_id")),
        )
    }

    #[test]
    fn test_foreign_key_resolution() {
        let mut registry = registry();
        registry.register_association(order_items()).unwrap();
        let schema = registry.resolve().unwrap();

        let order = schema.entity_id("Order").unwrap();
        let item = schema.entity_id("LineItem").unwrap();
        let items = schema.field_named(order, "items").unwrap();
        let back = schema.field_named(item, "order").unwrap();

        assert_eq!(items.strategy(), LoaderStrategy::OwnedForeignKey);
        assert_eq!(back.strategy(), LoaderStrategy::LocalForeignKey);
        // Symmetric cross-link
        assert_eq!(schema.field(items.related_field()).id(), back.id());
        assert_eq!(schema.field(back.related_field()).id(), items.id());
        assert_eq!(items.related_entity(), item);
        assert_eq!(schema.field_count(order), 1);
    }

    #[test]
    fn test_join_table_resolution() {
        let mut registry = registry();
        registry
            .register_association(
                AssociationDeclaration::new(
                    "order-items",
                    RoleDeclaration::to_many("Order", "items"),
                    RoleDeclaration::to_many("LineItem", "orders"),
                )
                .with_relation_table(RelationTableConfig::new("order_items", vec![], vec![])),
            )
            .unwrap();
        let schema = registry.resolve().unwrap();

        for field in schema.fields_of(schema.entity_id("Order").unwrap()) {
            assert_eq!(field.strategy(), LoaderStrategy::JoinTable);
        }
        let item = schema.entity_id("LineItem").unwrap();
        assert_eq!(
            schema.field_named(item, "orders").unwrap().strategy(),
            LoaderStrategy::JoinTable
        );
    }

    #[test]
    fn test_default_key_columns() {
        let order = EntityDescriptor::new("Order", "orders");
        assert_eq!(
            resolve_key_columns("a", &[], &order, "Order").unwrap(),
            vec!["order_id".to_string()]
        );

        let composite =
            EntityDescriptor::new("Line", "lines").with_primary_key(&["order_id", "line"]);
        let columns = vec![KeyColumn::new("l_line", "line"), KeyColumn::new("l_order", "order_id")];
        assert_eq!(
            resolve_key_columns("a", &columns, &composite, "line").unwrap(),
            vec!["l_order".to_string(), "l_line".to_string()]
        );
        assert!(resolve_key_columns("a", &columns[..1], &composite, "line").is_err());
    }

    #[test]
    fn test_unknown_entity_is_fatal() {
        let mut registry = registry();
        registry
            .register_association(AssociationDeclaration::new(
                "order-invoice",
                RoleDeclaration::to_one("Order", "invoice")
                    .with_foreign_key(ForeignKeyConfig::simple("invoice_id")),
                RoleDeclaration::to_one("Invoice", "order"),
            ))
            .unwrap();

        assert_eq!(
            registry.resolve().unwrap_err(),
            ResolutionError::UnknownEntity {
                association: "order-invoice".to_string(),
                entity: "Invoice".to_string(),
            }
        );
    }

    #[test]
    fn test_ambiguous_foreign_key_mappings() {
        // Neither side
        let mut none = registry();
        none.register_association(AssociationDeclaration::new(
            "a",
            RoleDeclaration::to_many("Order", "items"),
            RoleDeclaration::to_one("LineItem", "order"),
        ))
        .unwrap();
        assert!(matches!(none.resolve(), Err(ResolutionError::AmbiguousForeignKey(_))));

        // Both sides
        let mut both = registry();
        both.register_association(AssociationDeclaration::new(
            "a",
            RoleDeclaration::to_one("Order", "item")
                .with_foreign_key(ForeignKeyConfig::simple("item_id")),
            RoleDeclaration::to_one("LineItem", "order")
                .with_foreign_key(ForeignKeyConfig::simple("order_id")),
        ))
        .unwrap();
        assert!(matches!(both.resolve(), Err(ResolutionError::AmbiguousForeignKey(_))));

        // Foreign key and relation table
        let mut mixed = registry();
        mixed
            .register_association(order_items().with_relation_table(RelationTableConfig::simple(
                "order_items",
                "order_id",
                "item_id",
            )))
            .unwrap();
        assert!(matches!(mixed.resolve(), Err(ResolutionError::AmbiguousForeignKey(_))));
    }

    #[test]
    fn test_foreign_key_on_collection_rejected() {
        let mut registry = registry();
        registry
            .register_association(AssociationDeclaration::new(
                "a",
                RoleDeclaration::to_many("Order", "items")
                    .with_foreign_key(ForeignKeyConfig::simple("item_id")),
                RoleDeclaration::to_one("LineItem", "order"),
            ))
            .unwrap();
        assert!(matches!(
            registry.resolve(),
            Err(ResolutionError::InvalidForeignKey { .. })
        ));
    }

    #[test]
    fn test_cascade_requires_single_valued_inverse() {
        let mut registry = registry();
        registry
            .register_association(
                AssociationDeclaration::new(
                    "a",
                    RoleDeclaration::to_many("Order", "items").cascade_delete(),
                    RoleDeclaration::to_many("LineItem", "orders"),
                )
                .with_relation_table(RelationTableConfig::simple(
                    "order_items",
                    "order_id",
                    "item_id",
                )),
            )
            .unwrap();
        assert!(matches!(
            registry.resolve(),
            Err(ResolutionError::InvalidCascade { .. })
        ));
    }

    #[test]
    fn test_duplicate_field_and_entity() {
        let mut registry = registry();
        registry.register_association(order_items()).unwrap();
        registry.register_association(order_items()).unwrap();
        assert!(matches!(
            registry.resolve(),
            Err(ResolutionError::DuplicateField { .. })
        ));

        let mut registry = RelationshipRegistry::new();
        registry.register_entity(EntityDescriptor::new("Order", "orders")).unwrap();
        assert_eq!(
            registry.register_entity(EntityDescriptor::new("Order", "orders_v2")),
            Err(ResolutionError::DuplicateEntity("Order".to_string()))
        );
    }

    #[test]
    fn test_self_association_slots() {
        let mut registry = RelationshipRegistry::new();
        let employee = registry
            .register_entity(EntityDescriptor::new("Employee", "employees"))
            .unwrap();
        registry
            .register_association(AssociationDeclaration::new(
                "management",
                RoleDeclaration::to_one("Employee", "manager")
                    .with_foreign_key(ForeignKeyConfig::simple("manager_id")),
                RoleDeclaration::to_many("Employee", "reports"),
            ))
            .unwrap();
        let schema = registry.resolve().unwrap();

        let slots: Vec<_> = schema
            .fields_of(employee)
            .map(|f| (f.name().to_string(), f.index()))
            .collect();
        assert_eq!(slots, vec![("manager".to_string(), 0), ("reports".to_string(), 1)]);
        assert_eq!(schema.describe(&EntityIdentity::new(employee, 4)), "Employee#4");
    }

    #[test]
    fn test_self_association_with_one_field_name_rejected() {
        let mut registry = RelationshipRegistry::new();
        registry.register_entity(EntityDescriptor::new("Node", "nodes")).unwrap();

        let result = registry.register_association(AssociationDeclaration::new(
            "chain",
            RoleDeclaration::to_one("Node", "next")
                .with_foreign_key(ForeignKeyConfig::simple("next_id")),
            RoleDeclaration::to_one("Node", "next"),
        ));
        assert!(matches!(result, Err(ResolutionError::InvalidDeclaration(_))));

        // Nothing was registered, so resolution sees no fields for Node
        let schema = registry.resolve().unwrap();
        let node = schema.entity_id("Node").unwrap();
        assert_eq!(schema.field_count(node), 0);
    }
}
