mod common;

use common::{init_tracing, key, keys, order_item_rows, seed_orders, shop};
use elif_relations::{RelationError, StatementKind};
use serde_json::json;

#[test]
fn test_join_table_symmetry() {
    init_tracing();
    let fx = shop();
    seed_orders(&fx.store);
    let mut session = fx.manager.begin();
    let order = session.identity("Order", 1).unwrap();
    let item = session.identity("LineItem", 5).unwrap();

    assert!(session.related_set(&order, "items").unwrap().add(key(5)).unwrap());
    assert_eq!(session.related_keys(&item, "orders").unwrap(), keys(&[1]));

    // Removal from the inverse side is visible on this side
    assert!(session.related_set(&item, "orders").unwrap().remove(&key(1)).unwrap());
    assert!(session.related_keys(&order, "items").unwrap().is_empty());
    assert!(order_item_rows(&fx.store).is_empty());
}

#[test]
fn test_foreign_key_symmetry() {
    let fx = shop();
    seed_orders(&fx.store);
    let mut session = fx.manager.begin();
    let order_two = session.identity("Order", 2).unwrap();
    let item = session.identity("LineItem", 5).unwrap();

    session.set_related(&item, "order", Some(key(2))).unwrap();

    assert_eq!(session.related_keys(&order_two, "lines").unwrap(), keys(&[5, 8]));
    let order_one = session.identity("Order", 1).unwrap();
    assert_eq!(session.related_keys(&order_one, "lines").unwrap(), keys(&[6, 7]));
    assert_eq!(fx.store.rows("line_items")[0].get("order_id"), Some(&json!(2)));

    // Adding through the owned side writes the foreign key on the item
    session.related_set(&order_one, "lines").unwrap().add(key(5)).unwrap();
    assert_eq!(session.get_related(&item, "order").unwrap(), Some(key(1)));
    assert_eq!(session.related_keys(&order_two, "lines").unwrap(), keys(&[8]));
    assert_eq!(fx.store.rows("line_items")[0].get("order_id"), Some(&json!(1)));
    session.flush().unwrap();
}

#[test]
fn test_single_partner_invariant() {
    let fx = shop();
    fx.store.seed(
        "customers",
        vec![json!({"id": 7, "address_id": null}), json!({"id": 9, "address_id": 3})],
    );
    fx.store.seed("addresses", vec![json!({"id": 3})]);
    let mut session = fx.manager.begin();
    let seven = session.identity("Customer", 7).unwrap();
    let nine = session.identity("Customer", 9).unwrap();
    let address = session.identity("Address", 3).unwrap();

    assert!(session.set_related(&seven, "billing_address", Some(key(3))).unwrap());

    assert_eq!(session.get_related(&nine, "billing_address").unwrap(), None);
    assert_eq!(session.get_related(&address, "customer").unwrap(), Some(key(7)));

    let rows = fx.store.rows("customers");
    assert_eq!(rows[0].get("address_id"), Some(&json!(3)));
    assert_eq!(rows[1].get("address_id"), Some(&json!(null)));

    // Setting the same value again is a no-op
    assert!(!session.set_related(&seven, "billing_address", Some(key(3))).unwrap());
}

fn create_customer_on_taken_address(read_partner_first: bool) {
    let fx = shop();
    fx.store.seed("customers", vec![json!({"id": 9, "address_id": 3})]);
    fx.store.seed("addresses", vec![json!({"id": 3})]);
    let mut session = fx.manager.begin();
    let nine = session.identity("Customer", 9).unwrap();
    let address = session.identity("Address", 3).unwrap();
    if read_partner_first {
        assert_eq!(session.get_related(&address, "customer").unwrap(), Some(key(9)));
    }

    let seven = session
        .create_entity("Customer", 7, json!({"address_id": 3}))
        .unwrap();

    assert_eq!(session.get_related(&address, "customer").unwrap(), Some(key(7)));
    assert_eq!(session.get_related(&seven, "billing_address").unwrap(), Some(key(3)));
    assert_eq!(session.get_related(&nine, "billing_address").unwrap(), None);

    let rows = fx.store.rows("customers");
    assert_eq!(rows[0].get("id"), Some(&json!(9)));
    assert_eq!(rows[0].get("address_id"), Some(&json!(null)));
    assert_eq!(rows[1].get("address_id"), Some(&json!(3)));
    session.flush().unwrap();
}

#[test]
fn test_new_entity_takes_over_loaded_single_partner() {
    create_customer_on_taken_address(true);
}

#[test]
fn test_new_entity_takes_over_unloaded_single_partner() {
    create_customer_on_taken_address(false);
}

#[test]
fn test_clearing_to_one_detaches_both_sides() {
    let fx = shop();
    fx.store.seed("customers", vec![json!({"id": 9, "address_id": 3})]);
    fx.store.seed("addresses", vec![json!({"id": 3})]);
    let mut session = fx.manager.begin();
    let nine = session.identity("Customer", 9).unwrap();
    let address = session.identity("Address", 3).unwrap();

    assert_eq!(session.get_related(&address, "customer").unwrap(), Some(key(9)));
    session.set_related(&nine, "billing_address", None).unwrap();

    assert_eq!(session.get_related(&address, "customer").unwrap(), None);
    assert_eq!(fx.store.rows("customers")[0].get("address_id"), Some(&json!(null)));
}

#[test]
fn test_new_order_items_served_without_storage_read() {
    let fx = shop();
    let mut session = fx.manager.begin();
    let order = session.create_entity("Order", 1, json!({})).unwrap();
    session.create_entity("LineItem", 5, json!({"order_id": 1})).unwrap();
    session.create_entity("LineItem", 6, json!({"order_id": 1})).unwrap();
    fx.store.clear_log();

    {
        let mut items = session.related_set(&order, "items").unwrap();
        assert!(items.add(key(5)).unwrap());
        assert!(items.add(key(6)).unwrap());
        assert_eq!(items.keys().unwrap(), keys(&[5, 6]));
        assert!(items.contains(&key(5)).unwrap());
        assert!(items.is_loaded());
    }

    assert_eq!(fx.store.count(StatementKind::Join, "line_items"), 0);
    assert_eq!(fx.store.count(StatementKind::Join, "orders"), 0);
    assert_eq!(fx.store.reads("orders"), 0);
    assert_eq!(fx.store.reads("line_items"), 0);
    // The relation table is read only to check for an existing link before each insert
    assert_eq!(fx.store.count(StatementKind::Select, "order_items"), 2);
    assert_eq!(fx.store.count(StatementKind::Insert, "order_items"), 2);
    assert_eq!(order_item_rows(&fx.store), vec![(1, 5), (1, 6)]);
    session.commit().unwrap();
}

#[test]
fn test_unloaded_adds_merge_on_first_load() {
    let fx = shop();
    seed_orders(&fx.store);
    let mut session = fx.manager.begin();
    let order = session.identity("Order", 1).unwrap();

    let mut items = session.related_set(&order, "items").unwrap();
    items.add(key(5)).unwrap();
    items.add(key(6)).unwrap();
    assert!(!items.is_loaded());

    // The load happens once, and merges the buffered adds
    assert!(items.contains(&key(6)).unwrap());
    assert_eq!(items.keys().unwrap(), keys(&[5, 6]));
    drop(items);

    assert_eq!(fx.store.count(StatementKind::Join, "line_items"), 1);
    assert_eq!(order_item_rows(&fx.store), vec![(1, 5), (1, 6)]);
}

#[test]
fn test_idempotent_re_add() {
    let fx = shop();
    seed_orders(&fx.store);
    fx.store.seed("order_items", vec![json!({"order_id": 1, "item_id": 5})]);
    let mut session = fx.manager.begin();
    let order = session.identity("Order", 1).unwrap();

    let mut items = session.related_set(&order, "items").unwrap();
    // Unloaded: storage already holds the link
    assert!(!items.add(key(5)).unwrap());
    assert_eq!(items.keys().unwrap(), keys(&[5]));
    // Loaded: the cached value answers
    assert!(!items.add(key(5)).unwrap());
    assert!(items.add(key(6)).unwrap());
    assert!(!items.add(key(6)).unwrap());
    drop(items);

    assert_eq!(order_item_rows(&fx.store), vec![(1, 5), (1, 6)]);
    assert_eq!(fx.store.count(StatementKind::Insert, "order_items"), 1);
}

#[test]
fn test_deferred_add_remove_is_net_zero() {
    let fx = shop();
    seed_orders(&fx.store);
    fx.store.seed("order_items", vec![json!({"order_id": 1, "item_id": 5})]);
    let mut session = fx.manager.begin();
    let order = session.identity("Order", 1).unwrap();

    {
        let mut items = session.related_set(&order, "items").unwrap();
        items.add(key(7)).unwrap();
        items.remove(&key(7)).unwrap();
        items.remove(&key(5)).unwrap();
        items.add(key(5)).unwrap();
    }

    let state = session.field_state(&order, "items").unwrap().unwrap();
    let pending = state.as_to_many().unwrap();
    assert!(!pending.is_loaded());
    assert!(pending.pending_added().is_empty());
    assert!(pending.pending_removed().is_empty());

    assert_eq!(session.related_keys(&order, "items").unwrap(), keys(&[5]));
    assert_eq!(order_item_rows(&fx.store), vec![(1, 5)]);
}

#[test]
fn test_replace_collection() {
    let fx = shop();
    seed_orders(&fx.store);
    fx.store.seed(
        "order_items",
        vec![json!({"order_id": 1, "item_id": 5}), json!({"order_id": 1, "item_id": 6})],
    );
    let mut session = fx.manager.begin();
    let order = session.identity("Order", 1).unwrap();
    let five = session.identity("LineItem", 5).unwrap();

    session.set_related_keys(&order, "items", Some(keys(&[6, 7]))).unwrap();

    assert_eq!(session.related_keys(&order, "items").unwrap(), keys(&[6, 7]));
    assert!(session.related_keys(&five, "orders").unwrap().is_empty());
    assert_eq!(order_item_rows(&fx.store), vec![(1, 6), (1, 7)]);
}

#[test]
fn test_none_on_collection_is_rejected() {
    let fx = shop();
    seed_orders(&fx.store);
    let mut session = fx.manager.begin();
    let order = session.identity("Order", 1).unwrap();

    let err = session.set_related_keys(&order, "items", None).unwrap_err();
    assert!(matches!(err, RelationError::InvalidArgument { .. }));
    assert!(err.is_programming_error());
    assert!(fx.store.statements().is_empty());
}

#[test]
fn test_read_only_field() {
    let fx = shop();
    fx.store.seed("orders", vec![json!({"id": 1})]);
    fx.store.seed("tags", vec![json!({"id": 40})]);
    let mut session = fx.manager.begin();
    let order = session.identity("Order", 1).unwrap();
    let tag = session.identity("Tag", 40).unwrap();

    let err = session.related_set(&tag, "orders").unwrap().add(key(1)).unwrap_err();
    assert!(matches!(err, RelationError::ReadOnly(ref field) if field == "orders"));
    assert!(matches!(
        session.set_related_keys(&tag, "orders", Some(vec![])),
        Err(RelationError::ReadOnly(_))
    ));

    // The writable side still maintains the read-only inverse
    session.related_set(&order, "tags").unwrap().add(key(40)).unwrap();
    assert_eq!(session.related_keys(&tag, "orders").unwrap(), keys(&[1]));
}

#[test]
fn test_cursor_removal_and_concurrent_modification() {
    let fx = shop();
    seed_orders(&fx.store);
    fx.store.seed(
        "order_items",
        vec![
            json!({"order_id": 1, "item_id": 5}),
            json!({"order_id": 1, "item_id": 6}),
            json!({"order_id": 1, "item_id": 7}),
        ],
    );
    let mut session = fx.manager.begin();
    let order = session.identity("Order", 1).unwrap();
    let mut items = session.related_set(&order, "items").unwrap();

    let mut cursor = items.cursor().unwrap();
    assert_eq!(cursor.next(&items).unwrap(), Some(key(5)));
    cursor.remove(&mut items).unwrap();
    assert_eq!(cursor.next(&items).unwrap(), Some(key(6)));
    assert_eq!(cursor.remaining(), 1);

    // Structural change behind the cursor's back
    items.add(key(8)).unwrap();
    let err = cursor.next(&items).unwrap_err();
    assert!(matches!(err, RelationError::ConcurrentModification { .. }));
    assert!(err.is_programming_error());

    assert_eq!(items.keys().unwrap(), keys(&[6, 7, 8]));
}

#[test]
fn test_cursor_remove_requires_current_element() {
    let fx = shop();
    seed_orders(&fx.store);
    let mut session = fx.manager.begin();
    let order = session.identity("Order", 1).unwrap();
    let mut lines = session.related_set(&order, "lines").unwrap();

    let mut cursor = lines.cursor().unwrap();
    assert!(matches!(
        cursor.remove(&mut lines),
        Err(RelationError::InvalidArgument { .. })
    ));

    let mut seen = Vec::new();
    while let Some(line) = cursor.next(&lines).unwrap() {
        seen.push(line);
    }
    assert_eq!(seen, keys(&[5, 6, 7]));
}

#[test]
fn test_bulk_operations() {
    let fx = shop();
    seed_orders(&fx.store);
    let mut session = fx.manager.begin();
    let order = session.identity("Order", 2).unwrap();
    let mut items = session.related_set(&order, "items").unwrap();

    assert!(items.add_all(keys(&[5, 6, 7])).unwrap());
    assert!(items.contains_all(&keys(&[5, 7])).unwrap());
    assert!(items.retain_all(&keys(&[6, 7])).unwrap());
    assert!(!items.remove_all(&keys(&[5])).unwrap());
    assert_eq!(items.len().unwrap(), 2);

    items.clear().unwrap();
    assert!(items.is_empty().unwrap());
    drop(items);
    assert!(order_item_rows(&fx.store).is_empty());
}
