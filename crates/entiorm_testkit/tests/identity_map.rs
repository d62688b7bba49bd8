//! Identity map behaviour across loads, queries and forks.

use entiorm_core::{CoreError, Entity};
use entiorm_testkit::prelude::*;
use std::sync::Arc;

#[test]
fn one_instance_per_id() {
    let shop = scenarios::populated_shop(1, 2);
    let customer = shop.get_all("customers").remove(0);
    let id = customer.id().unwrap();

    let by_key = shop.get_by_name("Customer", &id).unwrap().unwrap();
    let by_full_id = shop
        .get_by_name("Customer", &customer.full_id().unwrap())
        .unwrap()
        .unwrap();
    let by_query = shop.query("Customer").unwrap().one().unwrap().unwrap();
    assert!(Arc::ptr_eq(&by_key, &customer));
    assert!(Arc::ptr_eq(&by_full_id, &customer));
    assert!(Arc::ptr_eq(&by_query, &customer));
}

#[test]
fn forks_load_their_own_instances() {
    let shop = scenarios::populated_shop(1, 0);
    let original = shop.get_all("customers").remove(0);

    let fork = shop.fork();
    let copy = fork
        .get_by_name("Customer", &original.full_id().unwrap())
        .unwrap()
        .unwrap();
    assert!(!Arc::ptr_eq(&copy, &original));
    assert_eq!(copy.revision(), original.revision());
    assert!(!copy.is_dirty());

    let again = fork
        .get_by_name("Customer", &original.id().unwrap())
        .unwrap()
        .unwrap();
    assert!(Arc::ptr_eq(&copy, &again));
}

#[test]
fn stale_cache_reports_conflicts() {
    let shop = scenarios::populated_shop(1, 0);
    let original = shop.get_all("customers").remove(0);

    let fork = shop.fork();
    let copy = fork
        .get_by_name("Customer", &original.id().unwrap())
        .unwrap()
        .unwrap();
    copy.set("name", "Renamed").unwrap();
    fork.commit().unwrap();
    assert_ne!(copy.revision(), original.revision());

    let incoming = Entity::from_db(Arc::clone(original.schema()), copy.raw()).unwrap();
    assert!(matches!(
        shop.add(&incoming),
        Err(CoreError::IdentityConflict { .. })
    ));
    assert!(matches!(
        shop.query("Customer").unwrap().all(),
        Err(CoreError::IdentityConflict { .. })
    ));
}

#[test]
fn client_keys_are_kept() {
    with_test_store(|store| {
        let product = Entity::new(store.schema("Product").unwrap());
        product.set_id("tea").unwrap();
        product.set("name", "Tea").unwrap();
        store.add(&product).unwrap();
        assert!(store.cached("products/tea").is_some());
        assert!(!product.is_persisted());

        store.commit().unwrap();
        assert_eq!(product.full_id().as_deref(), Some("products/tea"));
        assert!(product.is_persisted());
        assert!(matches!(
            product.set_id("coffee"),
            Err(CoreError::IdentityImmutable { .. })
        ));
    });
}

#[test]
fn removed_entities_leave_the_map() {
    let shop = scenarios::populated_shop(1, 0);
    let customer = shop.get_all("customers").remove(0);
    let id = customer.full_id().unwrap();

    shop.remove(&customer).unwrap();
    assert!(shop.cached(&id).is_none());
    assert!(shop.get_all("customers").is_empty());
    assert_eq!(shop.pending_removed().len(), 1);

    assert_eq!(shop.commit().unwrap().removed, 1);
    assert_eq!(shop.db.len("customers"), 0);
    assert!(shop.get_by_name("Customer", &id).unwrap().is_none());
}

#[test]
fn removed_records_are_not_reloaded() {
    let shop = scenarios::populated_shop(1, 0);
    let customer = shop.get_all("customers").remove(0);
    let id = customer.full_id().unwrap();

    shop.remove(&customer).unwrap();
    assert!(shop.query("Customer").unwrap().all().unwrap().is_empty());
    assert!(shop.get_by_name("Customer", &id).unwrap().is_none());
    assert!(shop.cached(&id).is_none());

    shop.commit().unwrap();
    assert_eq!(shop.db.len("customers"), 0);
    assert!(shop.cached(&id).is_none());
    assert!(shop.get_by_name("Customer", &id).unwrap().is_none());
    assert!(shop.get_all("customers").is_empty());
}

#[test]
fn full_ids_resolve_their_own_type() {
    let shop = scenarios::populated_shop(1, 1);
    let order = shop.get_all("orders").remove(0);

    let fork = shop.fork();
    let loaded = fork
        .get_by_name("Customer", &order.full_id().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(loaded.type_name(), "Order");
    assert_eq!(loaded.schema().collection(), "orders");
}
