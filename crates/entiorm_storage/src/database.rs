//! Database adapter traits.

use crate::error::StorageResult;
use crate::filter::Filter;
use entiorm_codec::{ObjectView, Value};
use std::collections::BTreeMap;

/// Splits a full id (`collection/key`) into its two parts.
#[must_use]
pub fn split_full_id(full_id: &str) -> Option<(&str, &str)> {
    full_id
        .split_once('/')
        .filter(|(collection, key)| !collection.is_empty() && !key.is_empty())
}

/// A filtered read over one collection.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QuerySpec {
    /// Collection to read from.
    pub collection: String,
    /// Filters, combined left to right.
    pub filters: Vec<Filter>,
    /// Maximum number of records to return.
    pub limit: Option<usize>,
}

impl QuerySpec {
    /// Creates an unfiltered query over `collection`.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Self::default()
        }
    }

    /// Adds a filter.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Limits the number of results.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// What a queued operation does with the records its query selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryAction {
    /// Delete every selected record.
    Delete,
}

/// A query-driven bulk operation deferred until commit.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedOp {
    /// Records the operation applies to.
    pub query: QuerySpec,
    /// The operation.
    pub action: QueryAction,
    /// Collections the operation writes.
    pub collections: Vec<String>,
}

impl QueuedOp {
    /// Queues a delete of everything `query` selects.
    #[must_use]
    pub fn delete(query: QuerySpec) -> Self {
        let collections = vec![query.collection.clone()];
        Self {
            query,
            action: QueryAction::Delete,
            collections,
        }
    }
}

/// An adapter-native statement with bind variables.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawStatement {
    /// Statement text in the adapter's query language.
    pub text: String,
    /// Bind variables referenced by the statement.
    pub bind_vars: BTreeMap<String, Value>,
}

impl RawStatement {
    /// Creates a statement without bind variables.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            bind_vars: BTreeMap::new(),
        }
    }

    /// Adds a bind variable.
    #[must_use]
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bind_vars.insert(name.into(), value.into());
        self
    }
}

/// One document sent to an insert or update.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentWrite {
    /// Target collection.
    pub collection: String,
    /// Serialized document. Inserts may omit `_key`; updates must carry it.
    pub document: ObjectView,
}

/// Identity assigned by the adapter to a written document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAck {
    /// Full id (`collection/key`).
    pub id: String,
    /// Collection-local key.
    pub key: String,
    /// New revision token.
    pub rev: String,
}

/// The external database collaborator.
///
/// An adapter stores records grouped by collection and hands out
/// transactions for writing them. It knows nothing about entities, schemas
/// or dependency ordering: the store plans the writes and drives the
/// transaction.
///
/// # Invariants
///
/// - Writes made through a [`Transaction`] become visible only after
///   [`Transaction::commit`] succeeds, and become visible all at once
/// - A transaction that is aborted, dropped or fails to commit leaves the
///   stored data unchanged
/// - `setup_schema` is idempotent
/// - Adapters must be `Send + Sync`; one adapter is shared by every forked
///   store
pub trait Database: Send + Sync {
    /// Name of the driver backing this adapter.
    fn driver(&self) -> &str;

    /// Provisions the given collections. Existing collections are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if provisioning fails.
    fn setup_schema(&self, collections: &[String]) -> StorageResult<()>;

    /// Fetches one record by collection and key.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails. A missing record is `Ok(None)`.
    fn fetch(&self, collection: &str, key: &str) -> StorageResult<Option<ObjectView>>;

    /// Runs a filtered read.
    ///
    /// # Errors
    ///
    /// Returns an error if the query cannot be evaluated.
    fn query(&self, spec: &QuerySpec) -> StorageResult<Vec<ObjectView>>;

    /// Counts the records a query selects.
    ///
    /// # Errors
    ///
    /// Returns an error if the query cannot be evaluated.
    fn count(&self, spec: &QuerySpec) -> StorageResult<usize>;

    /// Executes an adapter-native statement.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails or raw statements are not
    /// supported.
    fn raw(&self, statement: &RawStatement) -> StorageResult<Vec<Value>>;

    /// Starts a write transaction over `collections`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot be started.
    fn begin(&self, collections: &[String]) -> StorageResult<Box<dyn Transaction + '_>>;
}

/// An open write transaction.
///
/// Dropping a transaction without committing it aborts it.
pub trait Transaction {
    /// Applies a queued bulk operation, returning how many records it touched.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation fails.
    fn run_queued(&mut self, op: &QueuedOp) -> StorageResult<usize>;

    /// Deletes one record by full id.
    ///
    /// # Errors
    ///
    /// Returns an error if the record does not exist or cannot be deleted.
    fn remove(&mut self, full_id: &str) -> StorageResult<()>;

    /// Inserts a batch of documents, returning one ack per document in
    /// input order.
    ///
    /// # Errors
    ///
    /// Returns an error if any document cannot be inserted.
    fn insert(&mut self, batch: Vec<DocumentWrite>) -> StorageResult<Vec<WriteAck>>;

    /// Merges a batch of partial documents into existing records, returning
    /// one ack per document in input order.
    ///
    /// # Errors
    ///
    /// Returns an error if any target is missing or its revision is stale.
    fn update(&mut self, batch: Vec<DocumentWrite>) -> StorageResult<Vec<WriteAck>>;

    /// Publishes every write made in this transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; nothing is published then.
    fn commit(self: Box<Self>) -> StorageResult<()>;

    /// Discards every write made in this transaction.
    fn abort(self: Box<Self>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_full_id_requires_both_parts() {
        assert_eq!(split_full_id("orders/12"), Some(("orders", "12")));
        assert_eq!(split_full_id("orders/"), None);
        assert_eq!(split_full_id("12"), None);
    }

    #[test]
    fn queued_delete_writes_its_collection() {
        let op = QueuedOp::delete(QuerySpec::new("orders").filter(Filter::eq("state", "void")));
        assert_eq!(op.collections, vec!["orders".to_string()]);
        assert_eq!(op.action, QueryAction::Delete);
    }
}
