//! Flushing a unit of work in one transaction.
//!
//! Commit order inside the transaction:
//!
//! 1. queued bulk operations
//! 2. deletes of removed entities
//! 3. inserts, batch by batch in dependency order
//! 4. updates, batch by batch in dependency order
//!
//! Inserting a batch assigns ids that later batches read through their
//! pending references, so each batch is serialized only after the previous
//! one was acknowledged. If anything fails, the transaction is aborted and
//! every entity is put back the way it was before the commit started.

use super::state::AfterCommit;
use super::{Store, StoreEvent};
use crate::entity::EntityRef;
use crate::error::{CoreError, CoreResult};
use crate::planner::BatchPlanner;
use entiorm_codec::ObjectView;
use entiorm_storage::{Database, DocumentWrite, QueuedOp, Transaction};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// What one commit wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Entities inserted.
    pub inserted: usize,
    /// Entities updated.
    pub updated: usize,
    /// Entities deleted.
    pub removed: usize,
    /// Queued bulk operations run.
    pub queued: usize,
    /// Dependency rounds used for inserts.
    pub insert_batches: usize,
    /// Dependency rounds used for updates.
    pub update_batches: usize,
}

impl CommitSummary {
    /// Returns `true` if the commit wrote nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.removed == 0 && self.queued == 0
    }
}

struct PendingWork {
    new: Vec<EntityRef>,
    changed: Vec<EntityRef>,
    removed: Vec<EntityRef>,
    queued: Vec<QueuedOp>,
}

impl PendingWork {
    fn is_empty(&self) -> bool {
        self.new.is_empty()
            && self.changed.is_empty()
            && self.removed.is_empty()
            && self.queued.is_empty()
    }

    fn collections(&self) -> Vec<String> {
        let mut collections: BTreeSet<String> = self
            .new
            .iter()
            .chain(&self.changed)
            .chain(&self.removed)
            .map(|entity| entity.collection().to_string())
            .collect();
        for op in &self.queued {
            collections.extend(op.collections.iter().cloned());
        }
        collections.into_iter().collect()
    }
}

impl Store {
    /// Writes every pending change to the database in one transaction.
    ///
    /// On success new entities carry their assigned ids, every written
    /// entity is clean, and callbacks registered with
    /// [`Store::run_after_commit`] run. On failure nothing is published and
    /// entities keep the state they had before the call, so the commit can
    /// be retried. Entities registered by cascading are unregistered again.
    ///
    /// # Errors
    ///
    /// Returns `NoDatabase`, `NotNullable` from validation, `CommitCycle` or
    /// `InvalidOperation` from planning, or the adapter error.
    pub fn commit(&self) -> CoreResult<CommitSummary> {
        let database = Arc::clone(self.database()?);
        let mut cascaded = Vec::new();
        let result = if self.inner.config.cascade_transient_references {
            self.register_dependencies(&mut cascaded)
                .and_then(|()| self.commit_to(database.as_ref()))
        } else {
            self.commit_to(database.as_ref())
        };
        if result.is_err() && !cascaded.is_empty() {
            tracing::debug!(count = cascaded.len(), "unregistering cascaded entities");
            self.forget(&cascaded);
        }
        result
    }

    fn commit_to(&self, database: &dyn Database) -> CoreResult<CommitSummary> {
        let work = self.pending_work();
        if work.is_empty() {
            tracing::debug!("nothing to commit");
            let callbacks = std::mem::take(&mut self.inner.state.lock().after_commit);
            run_callbacks(callbacks);
            return Ok(CommitSummary::default());
        }

        if self.inner.config.strict_new_revisions {
            if let Some(entity) = work.new.iter().find(|entity| entity.revision().is_some()) {
                return Err(CoreError::invalid_operation(format!(
                    "{} {} already has a revision and cannot be new",
                    entity.type_name(),
                    entity.full_id().unwrap_or_default()
                )));
            }
        }
        for entity in &work.new {
            entity.validate(false)?;
        }
        for entity in &work.changed {
            entity.validate(true)?;
        }

        let inserts = BatchPlanner::new().plan(work.new.clone())?;
        let updates = BatchPlanner::new()
            .assume_persisted(&work.new)
            .plan(work.changed.clone())?;

        let snapshots: Vec<(EntityRef, ObjectView)> = work
            .new
            .iter()
            .chain(&work.changed)
            .map(|entity| (Arc::clone(entity), entity.snapshot()))
            .collect();

        let written = write_all(database, &work, &inserts, &updates);
        let touched = match written {
            Ok(touched) => touched,
            Err(err) => {
                for (entity, snapshot) in snapshots {
                    entity.restore(snapshot);
                }
                tracing::warn!(error = %err, "commit failed, entities restored");
                return Err(err);
            }
        };

        for entity in work.new.iter().chain(&work.changed).chain(&work.removed) {
            entity.settle();
        }
        let callbacks = {
            let mut state = self.inner.state.lock();
            for entity in &work.new {
                state.new.remove(&entity.uid());
                if let Some(id) = entity.full_id() {
                    state.cache.insert(id, Arc::clone(entity));
                }
            }
            for entity in work.new.iter().chain(&work.changed) {
                state.reindex(entity);
            }
            for entity in &work.removed {
                state.removed.remove(&entity.uid());
                let cached = entity.full_id().and_then(|id| state.cache.remove(&id));
                if let Some(cached) = cached {
                    state.evict(&cached);
                }
            }
            let ran = work.queued.len().min(state.queued.len());
            state.queued.drain(..ran);
            std::mem::take(&mut state.after_commit)
        };

        let summary = CommitSummary {
            inserted: work.new.len(),
            updated: work.changed.len(),
            removed: work.removed.len(),
            queued: work.queued.len(),
            insert_batches: inserts.len(),
            update_batches: updates.len(),
        };
        tracing::info!(
            inserted = summary.inserted,
            updated = summary.updated,
            removed = summary.removed,
            queued = summary.queued,
            queued_rows = touched,
            insert_batches = summary.insert_batches,
            update_batches = summary.update_batches,
            "commit finished"
        );
        run_callbacks(callbacks);
        Ok(summary)
    }

    /// Registers unsaved entities reachable through pending references of
    /// new or changed entities, recording each one in `registered`.
    fn register_dependencies(&self, registered: &mut Vec<EntityRef>) -> CoreResult<()> {
        let mut frontier: Vec<EntityRef> = {
            let state = self.inner.state.lock();
            state
                .new
                .values()
                .cloned()
                .chain(state.cache.values().filter(|entity| entity.is_dirty()).cloned())
                .collect()
        };
        let mut seen = HashSet::new();
        while let Some(entity) = frontier.pop() {
            if !seen.insert(entity.uid()) {
                continue;
            }
            for dependency in entity.dependencies() {
                if dependency.is_persisted() {
                    continue;
                }
                if !self.inner.state.lock().knows(&dependency) {
                    tracing::debug!(
                        from = %entity.type_name(),
                        to = %dependency.type_name(),
                        "registering referenced entity"
                    );
                    self.add(&dependency)?;
                    registered.push(Arc::clone(&dependency));
                }
                frontier.push(dependency);
            }
        }
        Ok(())
    }

    /// Unregisters transient entities without queueing anything.
    fn forget(&self, entities: &[EntityRef]) {
        {
            let mut state = self.inner.state.lock();
            for entity in entities {
                state.evict(entity);
            }
        }
        for entity in entities {
            self.inner
                .events
                .emit(&StoreEvent::Removed(Arc::clone(entity)));
        }
    }

    fn pending_work(&self) -> PendingWork {
        let changed = self.changed();
        let state = self.inner.state.lock();
        PendingWork {
            new: state.new.values().cloned().collect(),
            changed,
            removed: state.removed.values().cloned().collect(),
            queued: state.queued.clone(),
        }
    }
}

fn write_all(
    database: &dyn Database,
    work: &PendingWork,
    inserts: &[Vec<EntityRef>],
    updates: &[Vec<EntityRef>],
) -> CoreResult<usize> {
    let mut tx = database.begin(&work.collections())?;
    match write_in(tx.as_mut(), work, inserts, updates) {
        Ok(touched) => {
            tx.commit()?;
            Ok(touched)
        }
        Err(err) => {
            tx.abort();
            Err(err)
        }
    }
}

fn write_in(
    tx: &mut (dyn Transaction + '_),
    work: &PendingWork,
    inserts: &[Vec<EntityRef>],
    updates: &[Vec<EntityRef>],
) -> CoreResult<usize> {
    let mut touched = 0;
    for op in &work.queued {
        touched += tx.run_queued(op)?;
    }

    for entity in &work.removed {
        if let Some(id) = entity.full_id() {
            tx.remove(&id)?;
        }
    }

    for (round, batch) in inserts.iter().enumerate() {
        let documents = serialize_batch(batch, false)?;
        let written: Vec<ObjectView> = documents.iter().map(|d| d.document.clone()).collect();
        let acks = tx.insert(documents)?;
        for ((entity, document), ack) in batch.iter().zip(&written).zip(&acks) {
            entity.absorb(document);
            entity.apply_ack(ack);
        }
        tracing::debug!(round, size = batch.len(), "insert batch written");
    }

    for (round, batch) in updates.iter().enumerate() {
        let acks = tx.update(serialize_batch(batch, true)?)?;
        for (entity, ack) in batch.iter().zip(&acks) {
            entity.apply_ack(ack);
        }
        tracing::debug!(round, size = batch.len(), "update batch written");
    }
    Ok(touched)
}

fn serialize_batch(batch: &[EntityRef], changes_only: bool) -> CoreResult<Vec<DocumentWrite>> {
    batch
        .iter()
        .map(|entity| {
            Ok(DocumentWrite {
                collection: entity.collection().to_string(),
                document: entity.dump(changes_only)?,
            })
        })
        .collect()
}

fn run_callbacks(callbacks: Vec<AfterCommit>) {
    for callback in callbacks {
        if let Err(err) = callback() {
            tracing::warn!(error = %err, "after-commit callback failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::entity::Entity;
    use crate::test_support::{customer_schema, node_schema, order_schema, registry};
    use entiorm_codec::Value;
    use entiorm_storage::InMemoryDatabase;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn memory_store() -> (Store, Arc<InMemoryDatabase>) {
        let db = Arc::new(InMemoryDatabase::new());
        let store = Store::with_database(registry(), db.clone(), Config::default());
        (store, db)
    }

    fn customer(store: &Store, name: &str) -> EntityRef {
        let customer = store.create("Customer").unwrap();
        customer.set("name", name).unwrap();
        customer
    }

    #[test]
    fn inserts_assign_identity_and_clean() {
        let (store, db) = memory_store();
        let ada = customer(&store, "Ada");
        let summary = store.commit().unwrap();

        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.insert_batches, 1);
        assert!(ada.is_persisted());
        assert!(ada.revision().is_some());
        assert!(!ada.is_dirty());
        assert!(store.pending_new().is_empty());
        assert!(store.cached(&ada.full_id().unwrap()).is_some());
        assert_eq!(db.len("customers"), 1);
    }

    #[test]
    fn referenced_entities_are_inserted_first() {
        let (store, db) = memory_store();
        let order = store.create("Order").unwrap();
        let ada = Entity::new(customer_schema());
        ada.set("name", "Ada").unwrap();
        order.set_reference("customer", Some(&ada)).unwrap();

        let summary = store.commit().unwrap();
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.insert_batches, 2);

        let stored = db.fetch("orders", &order.id().unwrap()).unwrap().unwrap();
        assert_eq!(stored.get("customer_id"), Some(&Value::from(ada.id().unwrap())));
        assert!(Arc::ptr_eq(
            &order.reference("customer").unwrap().unwrap(),
            &ada
        ));
    }

    #[test]
    fn without_cascade_unregistered_targets_fail() {
        let db = Arc::new(InMemoryDatabase::new());
        let store = Store::with_database(
            registry(),
            db,
            Config::new().cascade_transient_references(false),
        );
        let order = store.create("Order").unwrap();
        order
            .set_reference("customer", Some(&Entity::new(customer_schema())))
            .unwrap();
        assert!(matches!(store.commit(), Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn updates_send_only_changes() {
        let (store, db) = memory_store();
        let ada = customer(&store, "Ada");
        store.commit().unwrap();
        let rev = ada.revision();

        ada.set("name", "Ada Lovelace").unwrap();
        assert_eq!(store.changed().len(), 1);
        let summary = store.commit().unwrap();
        assert_eq!(summary.updated, 1);
        assert_ne!(ada.revision(), rev);
        assert!(!ada.is_dirty());

        let stored = db.fetch("customers", &ada.id().unwrap()).unwrap().unwrap();
        assert_eq!(stored.get("name"), Some(&Value::from("Ada Lovelace")));
        assert!(store.commit().unwrap().is_empty());
    }

    #[test]
    fn not_nullable_blocks_commit() {
        let (store, db) = memory_store();
        store.create("Customer").unwrap();
        assert!(matches!(store.commit(), Err(CoreError::NotNullable { .. })));
        assert!(db.is_empty());
        assert_eq!(store.pending_new().len(), 1);
    }

    #[test]
    fn failed_cascade_leaves_pending_set_alone() {
        let (store, db) = memory_store();
        let order = store.create("Order").unwrap();
        let nameless = Entity::new(customer_schema());
        order.set_reference("customer", Some(&nameless)).unwrap();

        assert!(matches!(store.commit(), Err(CoreError::NotNullable { .. })));
        assert_eq!(store.pending_new().len(), 1);
        assert!(!store.contains(&nameless));
        assert!(matches!(store.commit(), Err(CoreError::NotNullable { .. })));
        assert_eq!(store.pending_new().len(), 1);

        order.set_reference("customer", None).unwrap();
        assert_eq!(store.commit().unwrap().inserted, 1);
        assert_eq!(db.len("customers"), 0);
    }

    #[test]
    fn cascaded_cycle_is_unregistered() {
        let (store, _db) = memory_store();
        let a = store.create("Node").unwrap();
        let b = Entity::new(node_schema());
        a.set_reference("parent", Some(&b)).unwrap();
        b.set_reference("parent", Some(&a)).unwrap();

        assert!(matches!(store.commit(), Err(CoreError::CommitCycle { .. })));
        assert_eq!(store.pending_new().len(), 1);

        a.set_reference("parent", None).unwrap();
        assert_eq!(store.commit().unwrap().inserted, 1);
    }

    #[test]
    fn cycle_is_reported() {
        let (store, _db) = memory_store();
        let (a, b) = (store.create("Node").unwrap(), store.create("Node").unwrap());
        a.set_reference("parent", Some(&b)).unwrap();
        b.set_reference("parent", Some(&a)).unwrap();
        assert!(matches!(store.commit(), Err(CoreError::CommitCycle { .. })));
    }

    #[test]
    fn failed_commit_restores_and_retries() {
        let (store, db) = memory_store();
        let parent = store.create("Node").unwrap();
        let child = store.create("Node").unwrap();
        child.set_reference("parent", Some(&parent)).unwrap();

        db.fail_next_commit("disk full");
        assert!(store.commit().unwrap_err().is_adapter());
        assert!(parent.is_transient());
        assert!(child.get("parent_id").unwrap().is_null());
        assert_eq!(store.pending_new().len(), 2);
        assert!(db.is_empty());

        let summary = store.commit().unwrap();
        assert_eq!(summary.inserted, 2);
        assert_eq!(child.get("parent_id").unwrap(), Value::from(parent.id().unwrap()));
        assert_eq!(db.commit_count(), 1);
    }

    #[test]
    fn removals_are_deleted() {
        let (store, db) = memory_store();
        let ada = customer(&store, "Ada");
        store.commit().unwrap();
        store.remove(&ada).unwrap();
        let summary = store.commit().unwrap();
        assert_eq!(summary.removed, 1);
        assert_eq!(db.len("customers"), 0);
        assert!(store.pending_removed().is_empty());
    }

    #[test]
    fn new_entity_with_revision_is_rejected() {
        let (store, _db) = memory_store();
        let order = Entity::new(order_schema());
        order.set("_rev", "r1").unwrap();
        store.add(&order).unwrap();
        assert!(matches!(store.commit(), Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn callbacks_run_once_after_success() {
        let (store, db) = memory_store();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        store.run_after_commit(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        store.run_after_commit(|| Err("mail server down".into()));
        customer(&store, "Ada");

        db.fail_next_commit("boom");
        assert!(store.commit().is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        store.commit().unwrap();
        store.commit().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn updates_wait_for_inserted_targets() {
        let (store, db) = memory_store();
        let node = store.create("Node").unwrap();
        node.set("label", "root").unwrap();
        store.commit().unwrap();

        let parent = Entity::new(node_schema());
        node.set_reference("parent", Some(&parent)).unwrap();
        let summary = store.commit().unwrap();
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.updated, 1);
        let stored = db.fetch("nodes", &node.id().unwrap()).unwrap().unwrap();
        assert_eq!(stored.get("parent_id"), Some(&Value::from(parent.id().unwrap())));
    }
}
