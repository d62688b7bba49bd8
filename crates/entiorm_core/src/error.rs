//! Error types for EntiORM core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in EntiORM core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Database adapter error, propagated unchanged.
    #[error("adapter error: {0}")]
    Adapter(#[from] entiorm_storage::StorageError),

    /// Value codec error.
    #[error("codec error: {0}")]
    Codec(#[from] entiorm_codec::CodecError),

    /// A cached entity and an incoming one carry different revisions.
    #[error("identity conflict on {id}: cached revision {cached}, incoming revision {incoming}")]
    IdentityConflict {
        /// Full id of the entity.
        id: String,
        /// Revision of the cached instance.
        cached: String,
        /// Revision of the incoming instance.
        incoming: String,
    },

    /// A non-nullable field resolved to null during serialization.
    #[error("field {field} on {entity} not nullable")]
    NotNullable {
        /// Entity type name.
        entity: String,
        /// Dot path of the field.
        field: String,
    },

    /// The batch planner could not make progress.
    #[error("reference cycle among unsaved {entity} entities: {data}")]
    CommitCycle {
        /// Entity type name of one stuck entity.
        entity: String,
        /// JSON form of the stuck entity's raw data.
        data: String,
    },

    /// Appending to a reverse collection that has no single foreign key.
    #[error("cannot append to collection {collection}: {message}")]
    InvalidFilterTarget {
        /// Name of the collection on the owner.
        collection: String,
        /// Description of the problem.
        message: String,
    },

    /// The entity type declares no field or reference with this name.
    #[error("{entity} has no field {field}")]
    UnknownField {
        /// Entity type name.
        entity: String,
        /// Requested field name.
        field: String,
    },

    /// No entity type is registered under this name or collection.
    #[error("unknown entity type: {name}")]
    UnknownEntityType {
        /// Requested type or collection name.
        name: String,
    },

    /// No driver is registered under this name.
    #[error("unknown database driver: {name}")]
    UnknownDriver {
        /// Requested driver name.
        name: String,
    },

    /// The entity is not registered with a store.
    #[error("{entity} is not attached to a store")]
    NotAttached {
        /// Entity type name.
        entity: String,
    },

    /// The entity already belongs to another store.
    #[error("{entity} is already attached to another store")]
    AlreadyAttached {
        /// Entity type name.
        entity: String,
    },

    /// The store has no database adapter.
    #[error("store has no database")]
    NoDatabase,

    /// Attempt to change an id that is already set.
    #[error("id of {entity} is already {current} and cannot change")]
    IdentityImmutable {
        /// Entity type name.
        entity: String,
        /// The id currently assigned.
        current: String,
    },

    /// A stored value cannot be converted by its field.
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        /// Dot path of the field.
        field: String,
        /// Description of the problem.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Create an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Create an unknown field error.
    pub fn unknown_field(entity: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField {
            entity: entity.into(),
            field: field.into(),
        }
    }

    /// Create an unknown entity type error.
    pub fn unknown_entity_type(name: impl Into<String>) -> Self {
        Self::UnknownEntityType { name: name.into() }
    }

    /// Create an invalid value error.
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if the error came from the database adapter.
    #[must_use]
    pub fn is_adapter(&self) -> bool {
        matches!(self, Self::Adapter(_))
    }
}
