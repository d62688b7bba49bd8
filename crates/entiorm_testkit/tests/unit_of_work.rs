//! Store-level unit of work: queries, queued operations, callbacks and
//! connecting through drivers.

use entiorm_codec::Value;
use entiorm_core::{Config, ConnectionConfig, CoreError, DriverRegistry, Store};
use entiorm_storage::{Database, InMemoryDatabase, RawStatement};
use entiorm_testkit::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn seeded_orders(shop: &TestStore) {
    for (state, total, tag) in [
        ("open", 10, "gift"),
        ("open", 25, "rush"),
        ("shipped", 40, "gift"),
        ("cancelled", 5, "rush"),
    ] {
        let order = shop.create("Order").unwrap();
        order.set("state", state).unwrap();
        order.set("total", total).unwrap();
        order.list("tags").unwrap().push(tag).unwrap();
    }
    shop.commit().unwrap();
}

#[test]
fn queries_combine_filters() {
    let shop = TestStore::memory();
    seeded_orders(&shop);
    let schema = shop.schema("Order").unwrap();
    let state = schema.require_field("state").unwrap();
    let total = schema.require_field("total").unwrap();
    let tags = schema.require_field("tags").unwrap();

    let fork = shop.fork();
    let open_large = fork
        .query("Order")
        .unwrap()
        .filter(state.eq("open"))
        .filter(total.gt(20));
    assert_eq!(open_large.count().unwrap(), 1);

    let gifts = fork.query("Order").unwrap().filter(tags.contains_("gift"));
    assert_eq!(gifts.all().unwrap().len(), 2);

    let not_done = fork
        .query("Order")
        .unwrap()
        .filter(state.not_().in_(Value::array(["shipped", "cancelled"])));
    assert_eq!(not_done.count().unwrap(), 2);

    let either = fork
        .query("Order")
        .unwrap()
        .filter(state.eq("cancelled"))
        .or_filter(total.ge(40));
    assert_eq!(either.count().unwrap(), 2);
    assert_eq!(either.limit(1).all().unwrap().len(), 1);
}

#[test]
fn queued_deletes_run_inside_the_commit() {
    let shop = TestStore::memory();
    seeded_orders(&shop);
    let state = shop.schema("Order").unwrap().require_field("state").unwrap().clone();

    shop.query("Order").unwrap().filter(state.eq("cancelled")).delete();
    assert_eq!(shop.db.len("orders"), 4);

    shop.db.fail_next_commit("lock timeout");
    assert!(shop.commit().is_err());
    assert_eq!(shop.db.len("orders"), 4);

    let summary = shop.commit().unwrap();
    assert_eq!(summary.queued, 1);
    assert_eq!(shop.db.len("orders"), 3);
    assert!(shop.commit().unwrap().is_empty());
}

#[test]
fn after_commit_callbacks_run_once() {
    with_test_store(|store| {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        store.run_after_commit(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        store.run_after_commit(|| Err("webhook unreachable".into()));

        assert!(store.commit().unwrap().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        store.create("Product").unwrap().set("name", "Tea").unwrap();
        store.commit().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    });
}

#[test]
fn clear_forgets_everything() {
    let shop = scenarios::populated_shop(2, 1);
    shop.create("Product").unwrap();
    shop.clear();

    assert!(shop.get_all("customers").is_empty());
    assert!(shop.pending_new().is_empty());
    assert!(shop.commit().unwrap().is_empty());

    let reloaded = shop.query("Customer").unwrap().all().unwrap();
    assert_eq!(reloaded.len(), 2);
}

#[test]
fn changed_lists_dirty_persisted_entities() {
    let shop = scenarios::populated_shop(2, 0);
    let customers = shop.get_all("customers");
    customers[1].set("email", "grace@example.com").unwrap();
    shop.create("Product").unwrap().set("name", "Tea").unwrap();

    let changed = shop.changed();
    assert_eq!(changed.len(), 1);
    assert!(Arc::ptr_eq(&changed[0], &customers[1]));

    let summary = shop.commit().unwrap();
    assert_eq!((summary.inserted, summary.updated), (1, 1));
    assert!(shop.changed().is_empty());
}

#[test]
fn raw_statements_are_passed_to_the_adapter() {
    with_test_store(|store| {
        let err = store
            .raw(&RawStatement::new("FOR c IN customers RETURN c"))
            .unwrap_err();
        assert!(err.is_adapter());
    });
}

#[test]
fn stores_without_a_database_stay_in_memory() {
    let store = Store::new(shop_registry());
    let product = store.create("Product").unwrap();
    product.set("name", "Tea").unwrap();

    assert!(!store.has_database());
    assert!(store.get_by_name("Product", "tea").unwrap().is_none());
    assert!(matches!(store.commit(), Err(CoreError::NoDatabase)));
    assert!(matches!(store.query("Product").unwrap().all(), Err(CoreError::NoDatabase)));
    assert_eq!(store.pending_new().len(), 1);
}

#[test]
fn connecting_through_a_custom_driver() {
    let shared = Arc::new(InMemoryDatabase::new());
    let handle: Arc<dyn Database> = shared.clone();
    let mut drivers = DriverRegistry::with_defaults();
    drivers.register("shared", move |_config: &ConnectionConfig| Ok(Arc::clone(&handle)));

    let connection: ConnectionConfig =
        serde_json::from_value(serde_json::json!({ "driver": "shared", "db_name": "shop" }))
            .unwrap();
    assert_eq!(connection.port, 8529);

    let store = Store::connect(&drivers, shop_registry(), &connection, Config::default()).unwrap();
    store.setup_db().unwrap();
    store.create("Product").unwrap().set("name", "Tea").unwrap();
    store.commit().unwrap();
    assert_eq!(shared.len("products"), 1);

    let missing = ConnectionConfig::new("arangodb");
    assert!(matches!(
        Store::connect(&drivers, shop_registry(), &missing, Config::default()),
        Err(CoreError::UnknownDriver { .. })
    ));
}

#[test]
fn relaxed_revisions_accept_newer_records() {
    let shop = TestStore::with_config(Config::default().check_revisions(false));
    let customer = shop.create("Customer").unwrap();
    customer.set("name", "Ada").unwrap();
    shop.commit().unwrap();

    let fork = shop.fork();
    let copy = fork
        .get_by_name("Customer", &customer.id().unwrap())
        .unwrap()
        .unwrap();
    copy.set("name", "Ada Lovelace").unwrap();
    fork.commit().unwrap();

    let found = shop.query("Customer").unwrap().all().unwrap();
    assert!(Arc::ptr_eq(&found[0], &customer));
    assert_eq!(customer.get("name").unwrap(), Value::from("Ada"));
}
