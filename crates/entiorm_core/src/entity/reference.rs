//! Lazy resolution of references, reference lists and remote references.

use super::{Entity, EntityRef, RefSlot};
use crate::error::{CoreError, CoreResult};
use crate::schema::{EntitySchema, FieldKind, ReferenceDescriptor, ReferenceKind, Target};
use entiorm_codec::Value;
use std::sync::Arc;

impl Entity {
    fn reference_descriptor(&self, name: &str) -> CoreResult<ReferenceDescriptor> {
        self.schema.require_reference(name).cloned()
    }

    fn wrong_kind(&self, name: &str, expected: &str) -> CoreError {
        CoreError::invalid_operation(format!(
            "{}.{name} is not a {expected}",
            self.type_name()
        ))
    }

    fn remote_schema(&self, reference: &ReferenceDescriptor) -> CoreResult<Arc<EntitySchema>> {
        let store = self.require_store()?;
        match reference.target() {
            Target::Type(name) => store.registry().get(name),
            Target::Any => Err(CoreError::invalid_operation(format!(
                "remote reference {}.{} needs a concrete target type",
                self.type_name(),
                reference.name()
            ))),
        }
    }

    /// Resolves a single reference.
    ///
    /// The result is cached on the entity. A null foreign key resolves to
    /// `None` without touching the store.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` if no reference has this name, `NotAttached`
    /// if the entity has no store to resolve through, or the adapter error
    /// of the fetch.
    pub fn reference(&self, name: &str) -> CoreResult<Option<EntityRef>> {
        let reference = self.reference_descriptor(name)?;
        let ReferenceKind::Reference { field } = reference.kind() else {
            return Err(self.wrong_kind(name, "reference"));
        };
        match self.state.read().refs.get(name) {
            Some(RefSlot::Pending(target)) => return Ok(Some(Arc::clone(target))),
            Some(RefSlot::Resolved(target)) => return Ok(target.clone()),
            _ => {}
        }

        let key = self.get(field)?;
        let Some(key) = key.as_text() else {
            return Ok(None);
        };
        let store = self.require_store()?;
        let schema = store.registry().resolve_target(reference.target(), key)?;
        let target = store.get(&schema, key)?;
        self.state
            .write()
            .refs
            .insert(name.to_string(), RefSlot::Resolved(target.clone()));
        Ok(target)
    }

    /// Points a single reference at `target`, or clears it with `None`.
    ///
    /// A target with an id is written to the foreign key at once and
    /// registered with this entity's store. A transient target is stashed
    /// and its id is written when the entity is committed.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` if no reference has this name, or the error
    /// of registering the target.
    pub fn set_reference(&self, name: &str, target: Option<&EntityRef>) -> CoreResult<()> {
        let reference = self.reference_descriptor(name)?;
        let ReferenceKind::Reference { field } = reference.kind() else {
            return Err(self.wrong_kind(name, "reference"));
        };
        let use_full_id = matches!(
            self.schema.field(field).map(|f| f.kind()),
            Some(FieldKind::ReferenceId { use_full_id: true })
        );

        let Some(target) = target else {
            let mut state = self.state.write();
            state.data.set(field.as_str(), Value::Null);
            state.refs.insert(name.to_string(), RefSlot::Resolved(None));
            drop(state);
            self.dirty.mark(field.as_str());
            return Ok(());
        };

        let target = match self.store() {
            Some(store) if !target.is_transient() => store.add(target)?,
            _ => Arc::clone(target),
        };
        let key = if use_full_id {
            target.full_id()
        } else {
            target.id()
        };
        // Unwritten targets stay pending so the commit orders them first.
        let slot = if target.is_persisted() {
            RefSlot::Resolved(Some(target))
        } else {
            RefSlot::Pending(target)
        };
        let mut state = self.state.write();
        state
            .data
            .set(field.as_str(), key.map_or(Value::Null, Value::from));
        state.refs.insert(name.to_string(), slot);
        drop(state);
        self.dirty.mark(field.as_str());
        Ok(())
    }

    /// The entity a single reference currently points at without
    /// resolving anything.
    pub(crate) fn linked(&self, name: &str) -> Option<EntityRef> {
        match self.state.read().refs.get(name) {
            Some(RefSlot::Pending(target) | RefSlot::Resolved(Some(target))) => {
                Some(Arc::clone(target))
            }
            _ => None,
        }
    }

    /// Handle to a reference list.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` if no reference has this name and
    /// `InvalidOperation` if it is not a reference list.
    pub fn reference_list(self: &Arc<Self>, name: &str) -> CoreResult<ReferenceList> {
        let reference = self.reference_descriptor(name)?;
        let ReferenceKind::ReferenceList { field } = reference.kind() else {
            return Err(self.wrong_kind(name, "reference list"));
        };
        Ok(ReferenceList {
            owner: Arc::clone(self),
            name: name.to_string(),
            field: field.clone(),
            use_full_id: reference.target() == &Target::Any,
            target: reference.target().clone(),
        })
    }

    /// Resolves a remote reference: the one target entity whose foreign
    /// key holds this entity's id.
    ///
    /// A transient entity has no remote reference.
    ///
    /// # Errors
    ///
    /// Returns `NotAttached` without a store, or the adapter error of the
    /// query.
    pub fn remote_reference(&self, name: &str) -> CoreResult<Option<EntityRef>> {
        let reference = self.reference_descriptor(name)?;
        let ReferenceKind::RemoteReference { remote_field } = reference.kind() else {
            return Err(self.wrong_kind(name, "remote reference"));
        };
        if let Some(RefSlot::Resolved(target)) = self.state.read().refs.get(name) {
            return Ok(target.clone());
        }
        let Some(id) = self.id() else {
            return Ok(None);
        };
        let schema = self.remote_schema(&reference)?;
        let fk = schema.require_field(remote_field)?.clone();
        let target = self
            .require_store()?
            .query_schema(&schema)
            .filter(fk.eq(id))
            .one()?;
        self.state
            .write()
            .refs
            .insert(name.to_string(), RefSlot::Resolved(target.clone()));
        Ok(target)
    }

    /// Points a remote reference at `target` by setting the target's
    /// foreign key to this entity.
    ///
    /// # Errors
    ///
    /// Returns `NotAttached` without a store, or the error of updating the
    /// target.
    pub fn set_remote_reference(self: &Arc<Self>, name: &str, target: &EntityRef) -> CoreResult<()> {
        let reference = self.reference_descriptor(name)?;
        let ReferenceKind::RemoteReference { remote_field } = reference.kind() else {
            return Err(self.wrong_kind(name, "remote reference"));
        };
        let store = self.require_store()?;
        let target = store.add(target)?;
        point_back(&target, remote_field, self)?;
        self.state
            .write()
            .refs
            .insert(name.to_string(), RefSlot::Resolved(Some(target)));
        Ok(())
    }

    /// Resolves a remote reference list: every target entity whose foreign
    /// key holds this entity's id.
    ///
    /// # Errors
    ///
    /// Returns `NotAttached` without a store, or the adapter error of the
    /// query.
    pub fn remote_references(&self, name: &str) -> CoreResult<Vec<EntityRef>> {
        let reference = self.reference_descriptor(name)?;
        let ReferenceKind::RemoteReferenceList { remote_field } = reference.kind() else {
            return Err(self.wrong_kind(name, "remote reference list"));
        };
        if let Some(RefSlot::Many(targets)) = self.state.read().refs.get(name) {
            return Ok(targets.clone());
        }
        let Some(id) = self.id() else {
            return Ok(Vec::new());
        };
        let schema = self.remote_schema(&reference)?;
        let fk = schema.require_field(remote_field)?.clone();
        let targets = self
            .require_store()?
            .query_schema(&schema)
            .filter(fk.eq(id))
            .all()?;
        self.state
            .write()
            .refs
            .insert(name.to_string(), RefSlot::Many(targets.clone()));
        Ok(targets)
    }
}

/// Sets `field` on `child` to point at `owner`, through the child's
/// reference when the field backs one.
pub(crate) fn point_back(child: &EntityRef, field: &str, owner: &EntityRef) -> CoreResult<()> {
    let schema = Arc::clone(child.schema());
    let descriptor = schema.require_field(field)?;
    if let Some(reference) = descriptor.ref_name() {
        return child.set_reference(reference, Some(owner));
    }
    match owner.id() {
        Some(id) => child.set(field, id),
        None => Err(CoreError::invalid_operation(format!(
            "{} has no id to store in {}.{field}",
            owner.type_name(),
            child.type_name()
        ))),
    }
}

/// A locally stored list of foreign keys with lazily resolved targets.
pub struct ReferenceList {
    owner: EntityRef,
    name: String,
    field: String,
    use_full_id: bool,
    target: Target,
}

impl ReferenceList {
    /// Stored ids, plus the ids of appended items that have one.
    ///
    /// # Errors
    ///
    /// Returns the error of reading the foreign key list.
    pub fn ids(&self) -> CoreResult<Vec<Value>> {
        match self.owner.get(&self.field)? {
            Value::Array(ids) => Ok(ids),
            _ => Ok(Vec::new()),
        }
    }

    /// Resolves every target. Resolution happens once and is cached until
    /// the list changes.
    ///
    /// # Errors
    ///
    /// Returns `NotAttached` if stored ids need a store to resolve, or the
    /// adapter error of a fetch.
    pub fn all(&self) -> CoreResult<Vec<EntityRef>> {
        let (stored, pending) = {
            let state = self.owner.state.read();
            if let Some(RefSlot::Many(targets)) = state.refs.get(&self.name) {
                return Ok(targets.clone());
            }
            let stored = state
                .data
                .get(&self.field)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let pending = state.ref_lists.get(&self.name).cloned().unwrap_or_default();
            (stored, pending)
        };

        let mut targets = Vec::with_capacity(stored.len() + pending.len());
        if !stored.is_empty() {
            let store = self.owner.require_store()?;
            for key in stored.iter().filter_map(Value::as_text) {
                let schema = store.registry().resolve_target(&self.target, key)?;
                if let Some(target) = store.get(&schema, key)? {
                    targets.push(target);
                }
            }
        }
        targets.extend(pending);
        self.owner
            .state
            .write()
            .refs
            .insert(self.name.clone(), RefSlot::Many(targets.clone()));
        Ok(targets)
    }

    /// Number of entries.
    ///
    /// # Errors
    ///
    /// Returns the error of reading the foreign key list.
    pub fn len(&self) -> CoreResult<usize> {
        let pending_without_id = self
            .owner
            .state
            .read()
            .ref_lists
            .get(&self.name)
            .map_or(0, |items| items.iter().filter(|i| i.id().is_none()).count());
        Ok(self.ids()?.len() + pending_without_id)
    }

    /// Returns `true` if the list has no entries.
    ///
    /// # Errors
    ///
    /// Returns the error of reading the foreign key list.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Returns `true` if `target` is in the list.
    ///
    /// # Errors
    ///
    /// Returns the error of reading the foreign key list.
    pub fn contains(&self, target: &EntityRef) -> CoreResult<bool> {
        let pending = self
            .owner
            .state
            .read()
            .ref_lists
            .get(&self.name)
            .is_some_and(|items| items.iter().any(|i| Arc::ptr_eq(i, target)));
        if pending {
            return Ok(true);
        }
        let Some(key) = self.key_of(target) else {
            return Ok(false);
        };
        Ok(self.ids()?.iter().any(|id| id.as_text() == Some(key.as_str())))
    }

    fn key_of(&self, target: &Entity) -> Option<String> {
        if self.use_full_id {
            target.full_id()
        } else {
            target.id()
        }
    }

    /// Appends `target` unless it is already in the list.
    ///
    /// # Errors
    ///
    /// Returns the error of registering the target with the owner's store.
    pub fn append(&self, target: &EntityRef) -> CoreResult<()> {
        if self.contains(target)? {
            return Ok(());
        }
        let target = match self.owner.store() {
            Some(store) if !target.is_transient() => store.add(target)?,
            _ => Arc::clone(target),
        };
        let key = self.key_of(&target).filter(|_| target.is_persisted());
        let mut state = self.owner.state.write();
        state.refs.remove(&self.name);
        match key {
            Some(key) => match state.data.get_mut(&self.field) {
                Some(Value::Array(ids)) => ids.push(Value::from(key)),
                _ => {
                    state.data.set(self.field.as_str(), Value::array([key]));
                }
            },
            None => state
                .ref_lists
                .entry(self.name.clone())
                .or_default()
                .push(target),
        }
        drop(state);
        self.owner.dirty.mark(self.field.as_str());
        Ok(())
    }

    /// Removes `target`, returning whether it was in the list.
    pub fn remove(&self, target: &EntityRef) -> bool {
        let key = self.key_of(target);
        let mut state = self.owner.state.write();
        let mut removed = false;
        if let Some(items) = state.ref_lists.get_mut(&self.name) {
            let before = items.len();
            items.retain(|i| !Arc::ptr_eq(i, target));
            removed = items.len() != before;
        }
        if !removed {
            if let (Some(key), Some(Value::Array(ids))) = (key, state.data.get_mut(&self.field)) {
                if let Some(index) = ids.iter().position(|id| id.as_text() == Some(key.as_str())) {
                    ids.remove(index);
                    removed = true;
                }
            }
        }
        if removed {
            state.refs.remove(&self.name);
        }
        drop(state);
        if removed {
            self.owner.dirty.mark(self.field.as_str());
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use crate::entity::Entity;
    use crate::error::CoreError;
    use crate::config::Config;
    use crate::store::Store;
    use crate::test_support::{customer_schema, node_schema, order_schema, product_schema, registry};
    use entiorm_codec::Value;
    use entiorm_storage::InMemoryDatabase;
    use std::sync::Arc;

    fn memory_store() -> Store {
        Store::with_database(registry(), Arc::new(InMemoryDatabase::new()), Config::default())
    }

    #[test]
    fn transient_target_is_stashed() {
        let order = Entity::new(order_schema());
        let customer = Entity::new(customer_schema());
        order.set_reference("customer", Some(&customer)).unwrap();

        assert!(order.dirty().contains("customer_id"));
        assert_eq!(order.get("customer_id").unwrap(), Value::Null);
        assert_eq!(order.dependencies().len(), 1);
        let resolved = order.reference("customer").unwrap().unwrap();
        assert!(std::sync::Arc::ptr_eq(&resolved, &customer));

        customer.set_id("c9").unwrap();
        assert_eq!(order.get("customer_id").unwrap(), Value::from("c9"));
    }

    #[test]
    fn null_foreign_key_resolves_to_none() {
        let order = Entity::new(order_schema());
        assert!(order.reference("customer").unwrap().is_none());
        order.set("customer_id", "c1").unwrap();
        assert!(matches!(
            order.reference("customer"),
            Err(CoreError::NotAttached { .. })
        ));
    }

    #[test]
    fn clearing_a_reference() {
        let order = Entity::new(order_schema());
        let customer = Entity::new(customer_schema());
        order.set_reference("customer", Some(&customer)).unwrap();
        order.set_reference("customer", None).unwrap();
        assert!(order.dependencies().is_empty());
        assert!(order.reference("customer").unwrap().is_none());
    }

    #[test]
    fn reference_list_mixes_ids_and_pending() {
        let order = Entity::new(order_schema());
        let products = order.reference_list("products").unwrap();
        let stored = Entity::new(product_schema());
        stored.set_id("p1").unwrap();
        let fresh = Entity::new(product_schema());

        products.append(&stored).unwrap();
        products.append(&fresh).unwrap();
        products.append(&fresh).unwrap();
        assert_eq!(products.ids().unwrap(), vec![Value::from("p1")]);
        assert_eq!(products.len().unwrap(), 2);
        assert!(products.contains(&fresh).unwrap());
        assert!(order.dirty().contains("product_ids"));

        assert!(products.remove(&stored));
        assert!(!products.remove(&stored));
        assert_eq!(products.len().unwrap(), 1);
    }

    #[test]
    fn wrong_reference_kind() {
        let order = Entity::new(order_schema());
        assert!(order.reference_list("customer").is_err());
        assert!(order.reference("products").is_err());
    }

    #[test]
    fn remote_references_query_the_database() {
        let store = memory_store();
        let ada = store.create("Customer").unwrap();
        ada.set("name", "Ada").unwrap();
        let order = store.create("Order").unwrap();
        order.set_reference("customer", Some(&ada)).unwrap();
        store.commit().unwrap();

        let history = ada.remote_references("order_history").unwrap();
        assert_eq!(history.len(), 1);
        assert!(Arc::ptr_eq(&history[0], &order));
        assert!(ada.remote_reference("order_history").is_err());
    }

    #[test]
    fn set_remote_reference_points_back() {
        let store = memory_store();
        let root = store.create("Node").unwrap();
        let child = Entity::new(node_schema());
        root.set_remote_reference("first_child", &child).unwrap();
        assert!(store.contains(&child));
        assert!(Arc::ptr_eq(
            &root.remote_reference("first_child").unwrap().unwrap(),
            &child
        ));

        store.commit().unwrap();
        assert_eq!(child.get("parent_id").unwrap(), Value::from(root.id().unwrap()));
        let fork = store.fork();
        let loaded = fork.get(&node_schema(), &root.id().unwrap()).unwrap().unwrap();
        let first = loaded.remote_reference("first_child").unwrap().unwrap();
        assert_eq!(first.id(), child.id());
    }
}
