//! Error types for adapter operations.

use entiorm_codec::CodecError;
use thiserror::Error;

/// Result type for adapter operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by a database adapter.
///
/// The core never interprets these beyond logging them: they are handed back
/// to the caller of `commit` (or of the query that triggered the call)
/// unchanged.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The transaction could not be started, continued or committed.
    #[error("transaction failed: {message}")]
    Transaction {
        /// Description of the failure.
        message: String,
    },

    /// An update carried a revision that no longer matches the stored one.
    #[error("stale revision for {id}: expected {expected}, found {actual}")]
    StaleRevision {
        /// Full id of the document.
        id: String,
        /// Revision sent with the update.
        expected: String,
        /// Revision currently stored.
        actual: String,
    },

    /// The addressed document does not exist.
    #[error("document not found: {id}")]
    DocumentNotFound {
        /// Full id of the document.
        id: String,
    },

    /// An insert used a key that is already taken.
    #[error("duplicate key: {id}")]
    DuplicateKey {
        /// Full id that already exists.
        id: String,
    },

    /// The addressed collection does not exist.
    #[error("collection not found: {name}")]
    CollectionNotFound {
        /// Collection name.
        name: String,
    },

    /// A record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A failure injected by a test failpoint.
    #[error("injected failure: {message}")]
    Injected {
        /// Message given to the failpoint.
        message: String,
    },

    /// The adapter does not support the requested operation.
    #[error("unsupported operation: {operation}")]
    Unsupported {
        /// Name of the operation.
        operation: String,
    },

    /// A query could not be evaluated.
    #[error("invalid query: {message}")]
    InvalidQuery {
        /// Description of the problem.
        message: String,
    },
}

impl StorageError {
    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Create a document-not-found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::DocumentNotFound { id: id.into() }
    }

    /// Create an unsupported-operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Create an invalid-query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }
}
