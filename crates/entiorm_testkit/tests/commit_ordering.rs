//! Dependency ordering of commits and their all-or-nothing behaviour.

use entiorm_codec::Value;
use entiorm_core::{Config, CoreError, Entity};
use entiorm_testkit::prelude::*;
use proptest::prelude::*;
use std::sync::Arc;

#[test]
fn chains_are_inserted_root_first() {
    let shop = TestStore::memory();
    let chain = scenarios::category_chain(&shop, 4);

    let summary = shop.commit().unwrap();
    assert_eq!(summary.inserted, 4);
    assert_eq!(summary.insert_batches, 4);
    assert_eq!(shop.db.commit_count(), 1);

    for pair in chain.windows(2) {
        assert_eq!(
            pair[1].get("parent_id").unwrap(),
            Value::from(pair[0].id().unwrap())
        );
    }
    assert!(chain.iter().all(|category| !category.is_dirty()));
}

#[test]
fn cycles_are_refused_until_broken() {
    let shop = TestStore::memory();
    let chain = scenarios::category_chain(&shop, 3);
    chain[0].set_reference("parent", Some(&chain[2])).unwrap();

    match shop.commit() {
        Err(CoreError::CommitCycle { entity, .. }) => assert_eq!(entity, "Category"),
        other => panic!("expected a cycle, got {other:?}"),
    }
    assert!(shop.db.is_empty());
    assert!(chain.iter().all(|category| category.is_transient()));

    chain[0].set_reference("parent", None).unwrap();
    let summary = shop.commit().unwrap();
    assert_eq!(summary.inserted, 3);
    assert_eq!(shop.db.len("categories"), 3);
    assert!(chain[0].get("parent_id").unwrap().is_null());
}

#[test]
fn validation_failures_write_nothing() {
    let shop = TestStore::memory();
    let customer = shop.create("Customer").unwrap();
    customer.set("name", "Ada").unwrap();
    let product = shop.create("Product").unwrap();

    match shop.commit() {
        Err(CoreError::NotNullable { entity, field }) => {
            assert_eq!(entity, "Product");
            assert_eq!(field, "name");
        }
        other => panic!("expected NotNullable, got {other:?}"),
    }
    assert!(shop.db.is_empty());
    assert!(customer.is_transient());

    product.set("name", "Tea").unwrap();
    assert_eq!(shop.commit().unwrap().inserted, 2);
}

#[test]
fn nested_not_null_fields_are_validated() {
    with_test_store(|store| {
        let order = store.create("Order").unwrap();
        order
            .list("lines")
            .unwrap()
            .push_object([("qty", Value::from(3))])
            .unwrap();
        assert!(matches!(
            store.commit(),
            Err(CoreError::NotNullable { .. })
        ));
    });
}

#[test]
fn adapter_failures_restore_state() {
    let shop = scenarios::populated_shop(1, 0);
    let customer = shop.get_all("customers").remove(0);
    let revision = customer.revision();
    customer.set("email", "ada@example.com").unwrap();
    let order = shop.create("Order").unwrap();
    order.set_reference("customer", Some(&customer)).unwrap();

    shop.db.fail_next_commit("connection reset");
    let err = shop.commit().unwrap_err();
    assert!(err.is_adapter());
    assert!(order.is_transient());
    assert_eq!(customer.revision(), revision);
    assert!(customer.dirty().contains("email"));
    assert_eq!(shop.db.len("orders"), 0);

    let summary = shop.commit().unwrap();
    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.updated, 1);
    assert_ne!(customer.revision(), revision);
    assert!(order.is_persisted());
}

#[test]
fn updates_can_point_at_new_entities() {
    let harness = IntegrationHarness::new();
    let store = harness.store();
    let category = store.create("Category").unwrap();
    category.set("name", "tea").unwrap();
    store.commit().unwrap();

    let parent = Entity::new(category.schema().clone());
    parent.set("name", "drinks").unwrap();
    category.set_reference("parent", Some(&parent)).unwrap();

    let summary = store.commit().unwrap();
    assert_eq!((summary.inserted, summary.updated), (1, 1));
    assert_eq!(
        harness.stored(&category).unwrap().get("parent_id"),
        Some(&Value::from(parent.id().unwrap()))
    );
    harness.verify(&category);
    harness.verify(&parent);
}

#[test]
fn unregistered_targets_need_cascading() {
    let shop = TestStore::with_config(Config::default().cascade_transient_references(false));
    let order = shop.create("Order").unwrap();
    let customer = Entity::new(shop.schema("Customer").unwrap());
    customer.set("name", "Ada").unwrap();
    order.set_reference("customer", Some(&customer)).unwrap();

    assert!(matches!(
        shop.commit(),
        Err(CoreError::InvalidOperation { .. })
    ));

    shop.add(&customer).unwrap();
    assert_eq!(shop.commit().unwrap().insert_batches, 2);
}

#[test]
fn failed_commits_keep_the_pending_set() {
    let shop = TestStore::memory();
    let order = shop.create("Order").unwrap();
    let customer = Entity::new(shop.schema("Customer").unwrap());
    order.set_reference("customer", Some(&customer)).unwrap();
    assert_eq!(shop.pending_new().len(), 1);

    match shop.commit() {
        Err(CoreError::NotNullable { entity, field }) => {
            assert_eq!(entity, "Customer");
            assert_eq!(field, "name");
        }
        other => panic!("expected NotNullable, got {other:?}"),
    }
    assert_eq!(shop.pending_new().len(), 1);
    assert!(!shop.contains(&customer));

    order.set_reference("customer", None).unwrap();
    let summary = shop.commit().unwrap();
    assert_eq!(summary.inserted, 1);
    assert_eq!(shop.db.len("customers"), 0);
    assert!(customer.is_transient());
}

#[test]
fn refused_cycles_keep_the_pending_set() {
    let shop = TestStore::memory();
    let tea = shop.create("Category").unwrap();
    let drinks = Entity::new(shop.schema("Category").unwrap());
    tea.set_reference("parent", Some(&drinks)).unwrap();
    drinks.set_reference("parent", Some(&tea)).unwrap();

    assert!(matches!(shop.commit(), Err(CoreError::CommitCycle { .. })));
    assert_eq!(shop.pending_new().len(), 1);
    assert!(shop.get_all("categories").iter().all(|c| !Arc::ptr_eq(c, &drinks)));

    drinks.set_reference("parent", None).unwrap();
    let summary = shop.commit().unwrap();
    assert_eq!((summary.inserted, summary.insert_batches), (2, 2));
    assert_eq!(
        tea.get("parent_id").unwrap(),
        Value::from(drinks.id().unwrap())
    );
}

fn depth(parents: &[Option<usize>], mut node: usize) -> usize {
    let mut depth = 0;
    while let Some(parent) = parents[node] {
        depth += 1;
        node = parent;
    }
    depth
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn forests_commit_in_depth_order(parents in forest_strategy(24)) {
        let shop = TestStore::memory();
        let nodes: Vec<_> = parents
            .iter()
            .map(|_| shop.create("Category").unwrap())
            .collect();
        for (i, parent) in parents.iter().enumerate() {
            if let Some(parent) = parent {
                nodes[i].set_reference("parent", Some(&nodes[*parent])).unwrap();
            }
        }

        let summary = shop.commit().unwrap();
        let max_depth = (0..parents.len()).map(|i| depth(&parents, i)).max().unwrap_or(0);
        prop_assert_eq!(summary.inserted, parents.len());
        prop_assert_eq!(summary.insert_batches, max_depth + 1);
        for (i, parent) in parents.iter().enumerate() {
            let expected = parent.map_or(Value::Null, |p| Value::from(nodes[p].id().unwrap()));
            prop_assert_eq!(nodes[i].get("parent_id").unwrap(), expected);
        }
    }
}
