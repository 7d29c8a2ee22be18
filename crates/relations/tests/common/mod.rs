//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::sync::Arc;

use elif_relations::{
    AssociationDeclaration, EntityDescriptor, ForeignKeyConfig, MemoryStore, PrimaryKey,
    RelationManager, RelationSchema, RelationTableConfig, RelationsConfig, RelationshipRegistry,
    RoleDeclaration,
};
use serde_json::{json, Value};

pub struct Fixture {
    pub manager: RelationManager,
    pub store: Arc<MemoryStore>,
}

pub fn key(id: i64) -> PrimaryKey {
    PrimaryKey::Integer(id)
}

pub fn keys(ids: &[i64]) -> Vec<PrimaryKey> {
    ids.iter().copied().map(key).collect()
}

/// Shop schema used across the tests:
///
/// - `Customer.billing_address` (fk `address_id`, nullable) <-> `Address.customer`
/// - `Order.lines` (cascade) <-> `LineItem.order` (fk `order_id`, not null)
/// - `Order.items` <-> `LineItem.orders` through `order_items`
/// - `Order.tags` <-> `Tag.orders` (read-only) through `order_tags`
/// - `Node.next` (fk `next_id`, cascade) <-> `Node.previous` (cascade)
pub fn shop_schema() -> Arc<RelationSchema> {
    RelationshipRegistry::new()
        .with_entity(EntityDescriptor::new("Customer", "customers"))
        .and_then(|r| r.with_entity(EntityDescriptor::new("Address", "addresses")))
        .and_then(|r| r.with_entity(EntityDescriptor::new("Order", "orders")))
        .and_then(|r| r.with_entity(EntityDescriptor::new("LineItem", "line_items")))
        .and_then(|r| r.with_entity(EntityDescriptor::new("Tag", "tags")))
        .and_then(|r| r.with_entity(EntityDescriptor::new("Node", "nodes")))
        .and_then(|r| {
            r.with_association(AssociationDeclaration::new(
                "billing",
                RoleDeclaration::to_one("Customer", "billing_address")
                    .with_foreign_key(ForeignKeyConfig::simple("address_id")),
                RoleDeclaration::to_one("Address", "customer"),
            ))
        })
        .and_then(|r| {
            r.with_association(AssociationDeclaration::new(
                "order-lines",
                RoleDeclaration::to_many("Order", "lines").cascade_delete(),
                RoleDeclaration::to_one("LineItem", "order")
                    .with_foreign_key(ForeignKeyConfig::simple("order_id").not_null()),
            ))
        })
        .and_then(|r| {
            r.with_association(
                AssociationDeclaration::new(
                    "order-items",
                    RoleDeclaration::to_many("Order", "items"),
                    RoleDeclaration::to_many("LineItem", "orders"),
                )
                .with_relation_table(RelationTableConfig::simple(
                    "order_items",
                    "order_id",
                    "item_id",
                )),
            )
        })
        .and_then(|r| {
            r.with_association(
                AssociationDeclaration::new(
                    "order-tags",
                    RoleDeclaration::to_many("Order", "tags"),
                    RoleDeclaration::to_many("Tag", "orders").read_only(),
                )
                .with_relation_table(RelationTableConfig::simple(
                    "order_tags",
                    "order_id",
                    "tag_id",
                )),
            )
        })
        .and_then(|r| {
            r.with_association(AssociationDeclaration::new(
                "chain",
                RoleDeclaration::to_one("Node", "next")
                    .cascade_delete()
                    .with_foreign_key(ForeignKeyConfig::simple("next_id")),
                RoleDeclaration::to_one("Node", "previous").cascade_delete(),
            ))
        })
        .and_then(|r| r.resolve())
        .expect("shop schema resolves")
}

pub fn shop() -> Fixture {
    shop_with(RelationsConfig::testing())
}

pub fn shop_with(config: RelationsConfig) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let manager = RelationManager::new(shop_schema(), store.clone(), config).expect("valid config");
    Fixture { manager, store }
}

/// Rows of `order_items` as (order_id, item_id) pairs, sorted
pub fn order_item_rows(store: &MemoryStore) -> Vec<(i64, i64)> {
    let mut rows: Vec<_> = store
        .rows("order_items")
        .iter()
        .map(|row| {
            (
                row.get("order_id").and_then(Value::as_i64).unwrap_or(-1),
                row.get("item_id").and_then(Value::as_i64).unwrap_or(-1),
            )
        })
        .collect();
    rows.sort();
    rows
}

/// Orders 1 and 2, items 5, 6 and 7 on order 1, item 8 on order 2
pub fn seed_orders(store: &MemoryStore) {
    store.seed("orders", vec![json!({"id": 1}), json!({"id": 2})]);
    store.seed(
        "line_items",
        vec![
            json!({"id": 5, "order_id": 1}),
            json!({"id": 6, "order_id": 1}),
            json!({"id": 7, "order_id": 1}),
            json!({"id": 8, "order_id": 2}),
        ],
    );
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("elif_relations=debug")
        .with_test_writer()
        .try_init();
}
