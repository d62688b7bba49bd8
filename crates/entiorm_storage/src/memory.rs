//! In-memory database adapter.

use crate::database::{
    split_full_id, Database, DocumentWrite, QueryAction, QuerySpec, QueuedOp, RawStatement,
    Transaction, WriteAck,
};
use crate::error::{StorageError, StorageResult};
use crate::filter::matches_all;
use entiorm_codec::{from_cbor, to_cbor, ObjectView, Value, ID_KEY, KEY_KEY, REV_KEY};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

/// A stored record and its insertion sequence number.
#[derive(Debug, Clone)]
struct StoredRecord {
    seq: u64,
    bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    collections: BTreeMap<String, BTreeMap<String, StoredRecord>>,
    next_key: u64,
    next_seq: u64,
}

impl MemoryState {
    /// Decodes the records of a query in insertion order.
    fn select(&self, spec: &QuerySpec) -> StorageResult<Vec<(String, Value)>> {
        let Some(records) = self.collections.get(&spec.collection) else {
            return Ok(Vec::new());
        };
        let mut ordered: Vec<(&String, &StoredRecord)> = records.iter().collect();
        ordered.sort_by_key(|(_, record)| record.seq);

        let mut selected = Vec::new();
        for (key, record) in ordered {
            if spec.limit.is_some_and(|limit| selected.len() >= limit) {
                break;
            }
            let value = from_cbor(&record.bytes)?;
            if matches_all(&spec.filters, &value) {
                selected.push((key.clone(), value));
            }
        }
        Ok(selected)
    }

    fn generate_key(&mut self, collection: &str) -> String {
        loop {
            self.next_key += 1;
            let key = self.next_key.to_string();
            let taken = self
                .collections
                .get(collection)
                .is_some_and(|records| records.contains_key(&key));
            if !taken {
                return key;
            }
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

/// An in-memory database adapter.
///
/// Records are kept CBOR-encoded per collection. This adapter is suitable
/// for:
/// - Unit and integration tests
/// - Ephemeral stores that don't need persistence
///
/// # Transactions
///
/// A transaction holds the writer lock for its whole lifetime and stages
/// its writes on a private copy of the data. Readers keep seeing the last
/// committed state until the copy is published by a successful commit.
///
/// # Example
///
/// ```rust
/// use entiorm_codec::ObjectView;
/// use entiorm_storage::{Database, DocumentWrite, InMemoryDatabase};
///
/// let db = InMemoryDatabase::new();
/// let mut txn = db.begin(&["orders".to_string()]).unwrap();
/// let mut doc = ObjectView::new();
/// doc.set("total", 10);
/// let acks = txn
///     .insert(vec![DocumentWrite { collection: "orders".into(), document: doc }])
///     .unwrap();
/// txn.commit().unwrap();
/// assert!(db.fetch("orders", &acks[0].key).unwrap().is_some());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryDatabase {
    state: RwLock<MemoryState>,
    writer: Mutex<()>,
    failpoint: Mutex<Option<String>>,
    commits: AtomicU64,
}

impl InMemoryDatabase {
    /// Creates an empty database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next transaction commit fail with `message`.
    ///
    /// The failing transaction publishes nothing. Later commits succeed.
    pub fn fail_next_commit(&self, message: impl Into<String>) {
        *self.failpoint.lock() = Some(message.into());
    }

    /// Number of successfully committed transactions.
    #[must_use]
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::Acquire)
    }

    /// Number of records stored in `collection`.
    #[must_use]
    pub fn len(&self, collection: &str) -> usize {
        self.state
            .read()
            .collections
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Returns `true` if no collection holds a record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state
            .read()
            .collections
            .values()
            .all(BTreeMap::is_empty)
    }

    /// Names of all provisioned collections.
    #[must_use]
    pub fn collections(&self) -> Vec<String> {
        self.state.read().collections.keys().cloned().collect()
    }
}

impl Database for InMemoryDatabase {
    fn driver(&self) -> &str {
        "memory"
    }

    fn setup_schema(&self, collections: &[String]) -> StorageResult<()> {
        let _writer = self.writer.lock();
        let mut state = self.state.write();
        for name in collections {
            state.collections.entry(name.clone()).or_default();
        }
        tracing::debug!(collections = collections.len(), "schema provisioned");
        Ok(())
    }

    fn fetch(&self, collection: &str, key: &str) -> StorageResult<Option<ObjectView>> {
        let state = self.state.read();
        let Some(record) = state
            .collections
            .get(collection)
            .and_then(|records| records.get(key))
        else {
            return Ok(None);
        };
        Ok(Some(ObjectView::try_from(from_cbor(&record.bytes)?)?))
    }

    fn query(&self, spec: &QuerySpec) -> StorageResult<Vec<ObjectView>> {
        let selected = self.state.read().select(spec)?;
        selected
            .into_iter()
            .map(|(_, value)| ObjectView::try_from(value).map_err(StorageError::from))
            .collect()
    }

    fn count(&self, spec: &QuerySpec) -> StorageResult<usize> {
        Ok(self.state.read().select(spec)?.len())
    }

    fn raw(&self, _statement: &RawStatement) -> StorageResult<Vec<Value>> {
        Err(StorageError::unsupported("raw statements on the memory driver"))
    }

    fn begin(&self, collections: &[String]) -> StorageResult<Box<dyn Transaction + '_>> {
        let writer = self.writer.lock();
        let staged = self.state.read().clone();
        Ok(Box::new(MemoryTransaction {
            db: self,
            _writer: writer,
            staged,
            collections: collections.iter().cloned().collect(),
        }))
    }
}

struct MemoryTransaction<'a> {
    db: &'a InMemoryDatabase,
    _writer: MutexGuard<'a, ()>,
    staged: MemoryState,
    collections: BTreeSet<String>,
}

impl MemoryTransaction<'_> {
    fn check_declared(&self, collection: &str) -> StorageResult<()> {
        if self.collections.contains(collection) {
            Ok(())
        } else {
            Err(StorageError::transaction(format!(
                "collection {collection} was not declared for writing"
            )))
        }
    }

    fn records_mut(
        &mut self,
        collection: &str,
    ) -> StorageResult<&mut BTreeMap<String, StoredRecord>> {
        self.staged
            .collections
            .get_mut(collection)
            .ok_or_else(|| StorageError::CollectionNotFound {
                name: collection.to_string(),
            })
    }

    fn document_key(write: &DocumentWrite) -> Option<String> {
        write.document.key().map(str::to_string).or_else(|| {
            write
                .document
                .id()
                .and_then(split_full_id)
                .map(|(_, key)| key.to_string())
        })
    }
}

fn new_revision() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Merges `patch` into `target`; nested maps merge key by key.
fn deep_merge(target: &mut BTreeMap<String, Value>, patch: BTreeMap<String, Value>) {
    for (key, value) in patch {
        match (target.get_mut(&key), value) {
            (Some(Value::Map(existing)), Value::Map(incoming)) => deep_merge(existing, incoming),
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn run_queued(&mut self, op: &QueuedOp) -> StorageResult<usize> {
        for collection in &op.collections {
            self.check_declared(collection)?;
        }
        match op.action {
            QueryAction::Delete => {
                let selected = self.staged.select(&op.query)?;
                let Some(records) = self.staged.collections.get_mut(&op.query.collection) else {
                    return Ok(0);
                };
                for (key, _) in &selected {
                    records.remove(key);
                }
                tracing::debug!(
                    collection = %op.query.collection,
                    deleted = selected.len(),
                    "queued delete applied"
                );
                Ok(selected.len())
            }
        }
    }

    fn remove(&mut self, full_id: &str) -> StorageResult<()> {
        let (collection, key) =
            split_full_id(full_id).ok_or_else(|| StorageError::not_found(full_id))?;
        self.check_declared(collection)?;
        let records = self.records_mut(collection)?;
        if records.remove(key).is_none() {
            return Err(StorageError::not_found(full_id));
        }
        tracing::trace!(id = %full_id, "document removed");
        Ok(())
    }

    fn insert(&mut self, batch: Vec<DocumentWrite>) -> StorageResult<Vec<WriteAck>> {
        let mut acks = Vec::with_capacity(batch.len());
        for write in batch {
            self.check_declared(&write.collection)?;
            let key = match Self::document_key(&write) {
                Some(key) => key,
                None => self.staged.generate_key(&write.collection),
            };
            let id = format!("{}/{}", write.collection, key);
            let exists = self
                .staged
                .collections
                .get(&write.collection)
                .is_some_and(|records| records.contains_key(&key));
            if exists {
                return Err(StorageError::DuplicateKey { id });
            }

            let rev = new_revision();
            let mut document = write.document;
            document.set(ID_KEY, id.as_str());
            document.set(KEY_KEY, key.as_str());
            document.set(REV_KEY, rev.as_str());
            let bytes = to_cbor(&document.into_value())?;
            let seq = self.staged.next_seq();
            self.staged
                .collections
                .entry(write.collection)
                .or_default()
                .insert(key.clone(), StoredRecord { seq, bytes });

            tracing::trace!(id = %id, rev = %rev, "document inserted");
            acks.push(WriteAck { id, key, rev });
        }
        Ok(acks)
    }

    fn update(&mut self, batch: Vec<DocumentWrite>) -> StorageResult<Vec<WriteAck>> {
        let mut acks = Vec::with_capacity(batch.len());
        for write in batch {
            self.check_declared(&write.collection)?;
            let key = Self::document_key(&write).ok_or_else(|| {
                StorageError::invalid_query(format!(
                    "update in {} without a document key",
                    write.collection
                ))
            })?;
            let id = format!("{}/{}", write.collection, key);
            let records = self.records_mut(&write.collection)?;
            let record = records
                .get_mut(&key)
                .ok_or_else(|| StorageError::not_found(id.as_str()))?;

            let mut stored = ObjectView::try_from(from_cbor(&record.bytes)?)?;
            let mut patch = write.document;
            if let Some(expected) = patch.rev() {
                let actual = stored.rev().unwrap_or_default();
                if expected != actual {
                    return Err(StorageError::StaleRevision {
                        id,
                        expected: expected.to_string(),
                        actual: actual.to_string(),
                    });
                }
            }
            for reserved in [ID_KEY, KEY_KEY, REV_KEY] {
                patch.remove(reserved);
            }

            let rev = new_revision();
            deep_merge(stored.as_map_mut(), patch.as_map().clone());
            stored.set(REV_KEY, rev.as_str());
            record.bytes = to_cbor(&stored.into_value())?;

            tracing::trace!(id = %id, rev = %rev, "document updated");
            acks.push(WriteAck { id, key, rev });
        }
        Ok(acks)
    }

    fn commit(self: Box<Self>) -> StorageResult<()> {
        let this = *self;
        if let Some(message) = this.db.failpoint.lock().take() {
            tracing::debug!(%message, "commit failpoint triggered");
            return Err(StorageError::Injected { message });
        }
        *this.db.state.write() = this.staged;
        this.db.commits.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn abort(self: Box<Self>) {
        tracing::debug!(collections = self.collections.len(), "transaction aborted");
    }
}
