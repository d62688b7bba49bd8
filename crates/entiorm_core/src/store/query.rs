//! Filtered reads that go through the identity map.

use super::Store;
use crate::entity::EntityRef;
use crate::error::CoreResult;
use crate::schema::EntitySchema;
use entiorm_storage::{Filter, QuerySpec, QueuedOp};
use std::sync::Arc;

/// A query over one entity type.
///
/// Results are registered with the store, so an id that is already live
/// yields the cached instance rather than a second copy.
///
/// # Example
///
/// ```rust,ignore
/// let open = store
///     .query("Order")?
///     .filter(order.require_field("state")?.eq("open"))
///     .limit(10)
///     .all()?;
/// ```
#[derive(Debug, Clone)]
pub struct Query {
    store: Store,
    schema: Arc<EntitySchema>,
    spec: QuerySpec,
}

impl Query {
    pub(crate) fn new(store: Store, schema: Arc<EntitySchema>) -> Self {
        let spec = QuerySpec::new(schema.collection());
        Self {
            store,
            schema,
            spec,
        }
    }

    /// Type being queried.
    #[must_use]
    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    /// The adapter-facing form of the query.
    #[must_use]
    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    /// Adds a filter, combined with AND unless it carries the OR flag.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.spec = self.spec.filter(filter);
        self
    }

    /// Adds a filter combined with OR.
    #[must_use]
    pub fn or_filter(self, filter: Filter) -> Self {
        self.filter(filter.or_())
    }

    /// Caps the number of results.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.spec = self.spec.limit(limit);
        self
    }

    /// Runs the query. Records pending delete in the store are left out.
    ///
    /// # Errors
    ///
    /// Returns `NoDatabase`, the adapter error, or `IdentityConflict` if a
    /// record's revision differs from its cached instance.
    pub fn all(&self) -> CoreResult<Vec<EntityRef>> {
        let records = self.store.database()?.query(&self.spec)?;
        tracing::debug!(
            collection = %self.spec.collection,
            filters = self.spec.filters.len(),
            found = records.len(),
            "query executed"
        );
        let mut found = Vec::with_capacity(records.len());
        for record in records {
            found.extend(self.store.load(&self.schema, record)?);
        }
        Ok(found)
    }

    /// Runs the query for at most one result.
    ///
    /// # Errors
    ///
    /// Same as [`Query::all`].
    pub fn one(&self) -> CoreResult<Option<EntityRef>> {
        let first = Self {
            store: self.store.clone(),
            schema: Arc::clone(&self.schema),
            spec: self.spec.clone().limit(1),
        };
        Ok(first.all()?.into_iter().next())
    }

    /// Counts matching records without loading them.
    ///
    /// # Errors
    ///
    /// Returns `NoDatabase` or the adapter error.
    pub fn count(&self) -> CoreResult<usize> {
        Ok(self.store.database()?.count(&self.spec)?)
    }

    /// Looks up one entity of the queried type by key or full id; filters
    /// are not applied.
    ///
    /// # Errors
    ///
    /// Same as [`Store::get`].
    pub fn get(&self, id: &str) -> CoreResult<Option<EntityRef>> {
        self.store.get(&self.schema, id)
    }

    /// Queues a delete of every matching record for the next commit.
    ///
    /// Cached instances of the deleted records are left alone.
    pub fn delete(self) {
        self.store.queue(QueuedOp::delete(self.spec));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::test_support::{customer_schema, registry};
    use entiorm_codec::Value;
    use entiorm_storage::InMemoryDatabase;

    fn seeded() -> (Store, Arc<InMemoryDatabase>) {
        let db = Arc::new(InMemoryDatabase::new());
        let store = Store::with_database(registry(), db.clone(), Config::default());
        for name in ["Ada", "Grace", "Alan"] {
            let customer = store.create("Customer").unwrap();
            customer.set("name", name).unwrap();
        }
        store.commit().unwrap();
        (store, db)
    }

    fn by_name(name: &str) -> Filter {
        customer_schema().require_field("name").unwrap().eq(name)
    }

    #[test]
    fn results_come_from_the_identity_map() {
        let (store, _db) = seeded();
        let cached = store.get_all("customers");
        let found = store.query("Customer").unwrap().filter(by_name("Ada")).all().unwrap();
        assert_eq!(found.len(), 1);
        assert!(cached.iter().any(|c| Arc::ptr_eq(c, &found[0])));
    }

    #[test]
    fn fresh_store_loads_and_dedups() {
        let (store, _db) = seeded();
        let fork = store.fork();
        let first = fork.query("Customer").unwrap().all().unwrap();
        let second = fork.query("Customer").unwrap().all().unwrap();
        assert_eq!(first.len(), 3);
        for (a, b) in first.iter().zip(&second) {
            assert!(Arc::ptr_eq(a, b));
        }
        assert!(first.iter().all(|c| !c.is_dirty()));
    }

    #[test]
    fn or_filters_and_count() {
        let (store, _db) = seeded();
        let query = store
            .query("Customer")
            .unwrap()
            .filter(by_name("Ada"))
            .or_filter(by_name("Alan"));
        assert_eq!(query.count().unwrap(), 2);
        let first = query.one().unwrap().unwrap();
        let name = first.get("name").unwrap();
        assert!(name == Value::from("Ada") || name == Value::from("Alan"));
    }

    #[test]
    fn records_pending_delete_are_left_out() {
        let (store, db) = seeded();
        let fork = store.fork();
        let ada = fork.query("Customer").unwrap().filter(by_name("Ada")).one().unwrap().unwrap();
        let id = ada.full_id().unwrap();
        fork.remove(&ada).unwrap();

        assert_eq!(fork.query("Customer").unwrap().all().unwrap().len(), 2);
        assert!(fork.query("Customer").unwrap().filter(by_name("Ada")).one().unwrap().is_none());
        assert!(fork.cached(&id).is_none());

        fork.commit().unwrap();
        assert_eq!(db.len("customers"), 2);
        assert!(fork.cached(&id).is_none());
        assert!(fork.get(&customer_schema(), &id).unwrap().is_none());
    }

    #[test]
    fn queued_delete_runs_on_commit() {
        let (store, db) = seeded();
        store.query("Customer").unwrap().filter(by_name("Grace")).delete();
        assert_eq!(db.len("customers"), 3);
        let summary = store.commit().unwrap();
        assert_eq!(summary.queued, 1);
        assert_eq!(db.len("customers"), 2);
        assert_eq!(
            store
                .fork()
                .query("Customer")
                .unwrap()
                .filter(by_name("Grace"))
                .count()
                .unwrap(),
            0
        );
    }
}
