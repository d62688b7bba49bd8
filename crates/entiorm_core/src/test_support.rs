//! Shared schemas for unit tests.

use crate::schema::{EntitySchema, FieldDescriptor, ReferenceDescriptor, SchemaRegistry};
use std::sync::{Arc, OnceLock};

struct Schemas {
    customer: Arc<EntitySchema>,
    order: Arc<EntitySchema>,
    product: Arc<EntitySchema>,
    node: Arc<EntitySchema>,
}

fn schemas() -> &'static Schemas {
    static SCHEMAS: OnceLock<Schemas> = OnceLock::new();
    SCHEMAS.get_or_init(|| {
        let customer = EntitySchema::builder("Customer")
            .field(FieldDescriptor::string("name").not_null())
            .field(FieldDescriptor::password("password").hidden())
            .reference(ReferenceDescriptor::collection("orders", "Order", ["customer"]))
            .reference(ReferenceDescriptor::remote_reference_list(
                "order_history",
                "customer_id",
                "Order",
            ))
            .build()
            .unwrap();

        let address = EntitySchema::builder("Address")
            .field(FieldDescriptor::string("city"))
            .embedded()
            .build()
            .unwrap();
        let shipping = EntitySchema::builder("Shipping")
            .field(FieldDescriptor::string("carrier"))
            .field(FieldDescriptor::object("address", address))
            .embedded()
            .build()
            .unwrap();
        let line = EntitySchema::builder("Line")
            .field(FieldDescriptor::string("sku"))
            .field(FieldDescriptor::number("qty"))
            .embedded()
            .build()
            .unwrap();

        let order = EntitySchema::builder("Order")
            .field(FieldDescriptor::reference_id("customer_id"))
            .field(FieldDescriptor::string("state").default_value("open"))
            .field(FieldDescriptor::number("total"))
            .field(FieldDescriptor::object("shipping", shipping))
            .field(FieldDescriptor::object_list("lines", line))
            .field(FieldDescriptor::dict("meta").dict_default("n/a"))
            .field(FieldDescriptor::list("tags"))
            .field(FieldDescriptor::reference_id_list("product_ids"))
            .reference(ReferenceDescriptor::reference("customer", "customer_id", "Customer"))
            .reference(ReferenceDescriptor::reference_list("products", "product_ids", "Product"))
            .build()
            .unwrap();

        let product = EntitySchema::builder("Product")
            .field(FieldDescriptor::string("name"))
            .build()
            .unwrap();

        let node = EntitySchema::builder("Node")
            .field(FieldDescriptor::reference_id("parent_id"))
            .field(FieldDescriptor::string("label"))
            .reference(ReferenceDescriptor::reference("parent", "parent_id", "Node"))
            .reference(ReferenceDescriptor::collection("children", "Node", ["parent"]))
            .reference(ReferenceDescriptor::remote_reference("first_child", "parent_id", "Node"))
            .build()
            .unwrap();

        Schemas {
            customer,
            order,
            product,
            node,
        }
    })
}

pub(crate) fn customer_schema() -> Arc<EntitySchema> {
    Arc::clone(&schemas().customer)
}

pub(crate) fn order_schema() -> Arc<EntitySchema> {
    Arc::clone(&schemas().order)
}

pub(crate) fn product_schema() -> Arc<EntitySchema> {
    Arc::clone(&schemas().product)
}

pub(crate) fn node_schema() -> Arc<EntitySchema> {
    Arc::clone(&schemas().node)
}

/// A registry holding every test schema.
pub(crate) fn registry() -> SchemaRegistry {
    SchemaRegistry::with_schemas([
        customer_schema(),
        order_schema(),
        product_schema(),
        node_schema(),
    ])
    .unwrap()
}
