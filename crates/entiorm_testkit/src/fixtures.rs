//! Test fixtures and store helpers.
//!
//! Provides a small shop model (customers, orders, products, categories and
//! notes) and stores backed by a fresh [`InMemoryDatabase`].

use entiorm_codec::Value;
use entiorm_core::{
    Config, EntitySchema, FieldDescriptor, OwnerValue, ReferenceDescriptor, SchemaRegistry,
    Store,
};
use entiorm_storage::{Database, InMemoryDatabase};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;

/// Installs a test-friendly tracing subscriber once per process.
///
/// The filter comes from `RUST_LOG`; output goes through the test harness
/// so it only shows for failing tests.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// The shop schema.
///
/// - `Customer`: `name` (not null), `email`, hidden `password`, a reverse
///   `orders` collection and an `order_history` remote reference list
/// - `Order`: `customer` reference, `state` defaulting to `"open"`, a
///   generated `number`, nested `shipping.address`, `lines`, a `meta` dict,
///   `tags` and a `products` reference list
/// - `Product`: `name` (not null), `price`
/// - `Category`: a `parent` self-reference and a `children` collection
/// - `Note`: a polymorphic `subject` reference stored as a full id
///
/// # Panics
///
/// Never for this fixed schema; the builders only fail on malformed
/// declarations.
pub fn shop_registry() -> SchemaRegistry {
    let customer = EntitySchema::builder("Customer")
        .field(FieldDescriptor::string("name").not_null())
        .field(FieldDescriptor::string("email"))
        .field(FieldDescriptor::password("password").hidden())
        .reference(ReferenceDescriptor::collection("orders", "Order", ["customer"]))
        .reference(ReferenceDescriptor::remote_reference_list(
            "order_history",
            "customer_id",
            "Order",
        ))
        .reference(
            ReferenceDescriptor::collection("notes", "Note", ["subject"]).own_prop(OwnerValue::FullId),
        )
        .build()
        .expect("customer schema");

    let address = EntitySchema::builder("Address")
        .field(FieldDescriptor::string("street"))
        .field(FieldDescriptor::string("city"))
        .embedded()
        .build()
        .expect("address schema");
    let shipping = EntitySchema::builder("Shipping")
        .field(FieldDescriptor::string("carrier").default_value("post"))
        .field(FieldDescriptor::object("address", address))
        .embedded()
        .build()
        .expect("shipping schema");
    let line = EntitySchema::builder("Line")
        .field(FieldDescriptor::string("sku").not_null())
        .field(FieldDescriptor::number("qty").default_value(1))
        .embedded()
        .build()
        .expect("line schema");

    static ORDER_NUMBERS: AtomicU64 = AtomicU64::new(1000);
    let order = EntitySchema::builder("Order")
        .field(FieldDescriptor::reference_id("customer_id"))
        .field(FieldDescriptor::string("state").default_value("open"))
        .field(FieldDescriptor::number("number").default_with(|| {
            #[allow(clippy::cast_possible_wrap)]
            let next = ORDER_NUMBERS.fetch_add(1, Ordering::Relaxed) as i64;
            Value::Integer(next)
        }))
        .field(FieldDescriptor::number("total"))
        .field(FieldDescriptor::object("shipping", shipping))
        .field(FieldDescriptor::object_list("lines", line))
        .field(FieldDescriptor::dict("meta"))
        .field(FieldDescriptor::list("tags"))
        .field(FieldDescriptor::reference_id_list("product_ids"))
        .reference(ReferenceDescriptor::reference("customer", "customer_id", "Customer"))
        .reference(ReferenceDescriptor::reference_list("products", "product_ids", "Product"))
        .build()
        .expect("order schema");

    let product = EntitySchema::builder("Product")
        .field(FieldDescriptor::string("name").not_null())
        .field(FieldDescriptor::number("price"))
        .build()
        .expect("product schema");

    let category = EntitySchema::builder("Category")
        .collection("categories")
        .field(FieldDescriptor::string("name"))
        .field(FieldDescriptor::reference_id("parent_id"))
        .reference(ReferenceDescriptor::reference("parent", "parent_id", "Category"))
        .reference(ReferenceDescriptor::collection("children", "Category", ["parent"]))
        .build()
        .expect("category schema");

    let note = EntitySchema::builder("Note")
        .field(FieldDescriptor::string("text"))
        .field(FieldDescriptor::full_reference_id("subject_id"))
        .reference(ReferenceDescriptor::reference("subject", "subject_id", "any"))
        .build()
        .expect("note schema");

    SchemaRegistry::with_schemas([customer, order, product, category, note])
        .expect("shop registry")
}

/// A store over a fresh in-memory database.
pub struct TestStore {
    /// The store.
    pub store: Store,
    /// The database, for failpoints and direct inspection.
    pub db: Arc<InMemoryDatabase>,
}

impl TestStore {
    /// Creates a store over the shop schema with default config.
    pub fn memory() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a store over the shop schema with `config`.
    pub fn with_config(config: Config) -> Self {
        init_tracing();
        let db = Arc::new(InMemoryDatabase::new());
        let shared: Arc<dyn Database> = db.clone();
        let store = Store::with_database(shop_registry(), shared, config);
        store.setup_db().expect("provision shop collections");
        Self { store, db }
    }

    /// A second, empty unit of work on the same database.
    pub fn fork(&self) -> Store {
        self.store.fork()
    }
}

impl std::ops::Deref for TestStore {
    type Target = Store;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs a test with a store over a fresh in-memory database.
///
/// # Example
///
/// ```rust,ignore
/// use entiorm_testkit::with_test_store;
///
/// #[test]
/// fn my_test() {
///     with_test_store(|store| {
///         store.create("Product").unwrap().set("name", "Tea").unwrap();
///         store.commit().unwrap();
///     });
/// }
/// ```
pub fn with_test_store<F, R>(f: F) -> R
where
    F: FnOnce(&Store) -> R,
{
    let test_store = TestStore::memory();
    f(&test_store.store)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use entiorm_core::EntityRef;

    /// Creates a committed shop with `customers` customers, each with
    /// `orders_per_customer` orders.
    pub fn populated_shop(customers: usize, orders_per_customer: usize) -> TestStore {
        let test_store = TestStore::memory();
        for i in 0..customers {
            let customer = test_store.create("Customer").expect("create customer");
            customer
                .set("name", format!("customer {i}"))
                .expect("set name");
            for _ in 0..orders_per_customer {
                let order = test_store.create("Order").expect("create order");
                order
                    .set_reference("customer", Some(&customer))
                    .expect("set customer");
            }
        }
        test_store.commit().expect("commit shop");
        test_store
    }

    /// Creates an uncommitted category chain, root first.
    pub fn category_chain(store: &Store, depth: usize) -> Vec<EntityRef> {
        let mut chain: Vec<EntityRef> = Vec::with_capacity(depth);
        for level in 0..depth {
            let category = store.create("Category").expect("create category");
            category
                .set("name", format!("level {level}"))
                .expect("set name");
            if let Some(parent) = chain.last() {
                category
                    .set_reference("parent", Some(parent))
                    .expect("set parent");
            }
            chain.push(category);
        }
        chain
    }
}
