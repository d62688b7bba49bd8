//! Reference descriptors.

/// Entity type a reference points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A registered entity type, by name.
    Type(String),
    /// Any type; resolved from the collection prefix of the stored full id.
    Any,
}

impl Target {
    /// Target type name, unless polymorphic.
    #[must_use]
    pub fn type_name(&self) -> Option<&str> {
        match self {
            Self::Type(name) => Some(name),
            Self::Any => None,
        }
    }
}

impl From<&str> for Target {
    fn from(name: &str) -> Self {
        if name == "any" {
            Self::Any
        } else {
            Self::Type(name.to_string())
        }
    }
}

/// Which owner value a reverse collection matches against.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OwnerValue {
    /// The owner's key.
    #[default]
    Id,
    /// The owner's full id.
    FullId,
    /// The value of one of the owner's fields.
    Field(String),
}

/// How a reference is stored and resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceKind {
    /// One target, keyed by a local foreign key field.
    Reference {
        /// The foreign key field.
        field: String,
    },
    /// Many targets, keyed by a local foreign key list field.
    ReferenceList {
        /// The foreign key list field.
        field: String,
    },
    /// One target found by querying its `remote_field` for the owner's id.
    RemoteReference {
        /// Foreign key field on the target.
        remote_field: String,
    },
    /// All targets whose `remote_field` holds the owner's id.
    RemoteReferenceList {
        /// Foreign key field on the targets.
        remote_field: String,
    },
    /// A reverse relation kept current from the store's index and events.
    Collection {
        /// References or foreign key fields on the target; several mean OR.
        filter: Vec<String>,
        /// Owner value the filter fields are compared with.
        own_prop: OwnerValue,
    },
}

/// A declared relation of an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceDescriptor {
    name: String,
    kind: ReferenceKind,
    target: Target,
}

impl ReferenceDescriptor {
    /// A single reference stored in the foreign key `field`.
    pub fn reference(
        name: impl Into<String>,
        field: impl Into<String>,
        target: impl Into<Target>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: ReferenceKind::Reference {
                field: field.into(),
            },
            target: target.into(),
        }
    }

    /// A reference list stored in the foreign key list `field`.
    pub fn reference_list(
        name: impl Into<String>,
        field: impl Into<String>,
        target: impl Into<Target>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: ReferenceKind::ReferenceList {
                field: field.into(),
            },
            target: target.into(),
        }
    }

    /// A reverse single reference through `remote_field` on the target.
    pub fn remote_reference(
        name: impl Into<String>,
        remote_field: impl Into<String>,
        target: impl Into<Target>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: ReferenceKind::RemoteReference {
                remote_field: remote_field.into(),
            },
            target: target.into(),
        }
    }

    /// A reverse reference list through `remote_field` on the targets.
    pub fn remote_reference_list(
        name: impl Into<String>,
        remote_field: impl Into<String>,
        target: impl Into<Target>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: ReferenceKind::RemoteReferenceList {
                remote_field: remote_field.into(),
            },
            target: target.into(),
        }
    }

    /// A reverse collection of `target` entities whose `filter` references
    /// point back at the owner.
    pub fn collection<I, S>(name: impl Into<String>, target: impl Into<Target>, filter: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            kind: ReferenceKind::Collection {
                filter: filter.into_iter().map(Into::into).collect(),
                own_prop: OwnerValue::Id,
            },
            target: target.into(),
        }
    }

    /// Sets the owner value a collection matches against.
    #[must_use]
    pub fn own_prop(mut self, value: OwnerValue) -> Self {
        if let ReferenceKind::Collection { own_prop, .. } = &mut self.kind {
            *own_prop = value;
        }
        self
    }

    /// Reference name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Storage and resolution kind.
    #[must_use]
    pub fn kind(&self) -> &ReferenceKind {
        &self.kind
    }

    /// Target type.
    #[must_use]
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// The local foreign key field, for references and reference lists.
    #[must_use]
    pub fn local_field(&self) -> Option<&str> {
        match &self.kind {
            ReferenceKind::Reference { field } | ReferenceKind::ReferenceList { field } => {
                Some(field)
            }
            _ => None,
        }
    }
}
