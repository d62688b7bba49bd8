//! Dependency-ordered commit batches.
//!
//! Entities that reference unsaved entities must be written after them, so
//! the foreign key can hold the id the database assigned. The planner
//! splits a set of entities into rounds: every entity in round `k` depends
//! only on entities in rounds `0..k`, on entities already persisted, or on
//! entities outside the set that already have an id.

use crate::entity::EntityRef;
use crate::error::{CoreError, CoreResult};
use std::collections::HashSet;

/// Computes commit batches for one set of entities.
#[derive(Debug, Default)]
pub struct BatchPlanner {
    collected: HashSet<u64>,
}

impl BatchPlanner {
    /// Creates a planner that knows of no scheduled entities.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Treats these entities as already scheduled.
    ///
    /// Used for update planning, where every new entity is inserted before
    /// any update runs.
    #[must_use]
    pub fn assume_persisted<'a, I>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = &'a EntityRef>,
    {
        self.collected
            .extend(entities.into_iter().map(|entity| entity.uid()));
        self
    }

    /// Splits `entities` into dependency-ordered batches.
    ///
    /// Input order is kept within each batch.
    ///
    /// # Errors
    ///
    /// Returns `CommitCycle` if the remaining entities reference each other
    /// so that no round can make progress, and `InvalidOperation` if an
    /// entity depends on an unsaved entity outside the set.
    pub fn plan(mut self, entities: Vec<EntityRef>) -> CoreResult<Vec<Vec<EntityRef>>> {
        let members: HashSet<u64> = entities.iter().map(|entity| entity.uid()).collect();

        let mut remaining = Vec::with_capacity(entities.len());
        for entity in entities {
            let dependencies = entity.dependencies();
            if let Some(orphan) = dependencies.iter().find(|dep| {
                !members.contains(&dep.uid())
                    && !self.collected.contains(&dep.uid())
                    && dep.full_id().is_none()
            }) {
                return Err(CoreError::invalid_operation(format!(
                    "{} references an unsaved {} that is not registered for commit",
                    entity.type_name(),
                    orphan.type_name()
                )));
            }
            remaining.push((entity, dependencies));
        }

        let mut batches = Vec::new();
        while !remaining.is_empty() {
            let (ready, blocked): (Vec<_>, Vec<_>) =
                remaining.into_iter().partition(|(_, dependencies)| {
                    dependencies.iter().all(|dep| {
                        self.collected.contains(&dep.uid())
                            || (!members.contains(&dep.uid()) && dep.full_id().is_some())
                    })
                });

            if ready.is_empty() {
                let Some((stuck, _)) = blocked.first() else {
                    break;
                };
                return Err(CoreError::CommitCycle {
                    entity: stuck.type_name().to_string(),
                    data: stuck.raw().to_json().to_string(),
                });
            }

            let batch: Vec<EntityRef> = ready.into_iter().map(|(entity, _)| entity).collect();
            self.collected.extend(batch.iter().map(|entity| entity.uid()));
            tracing::debug!(
                round = batches.len(),
                size = batch.len(),
                blocked = blocked.len(),
                "batch planned"
            );
            batches.push(batch);
            remaining = blocked;
        }
        Ok(batches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::test_support::node_schema;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn node() -> EntityRef {
        Entity::new(node_schema())
    }

    fn link(from: &EntityRef, to: &EntityRef) {
        from.set_reference("parent", Some(to)).unwrap();
    }

    fn position(batches: &[Vec<EntityRef>], entity: &EntityRef) -> usize {
        batches
            .iter()
            .position(|batch| batch.iter().any(|e| Arc::ptr_eq(e, entity)))
            .unwrap()
    }

    #[test]
    fn chain_is_ordered_leaf_first() {
        let (a, b, c) = (node(), node(), node());
        link(&a, &b);
        link(&b, &c);

        let batches = BatchPlanner::new()
            .plan(vec![Arc::clone(&a), Arc::clone(&b), Arc::clone(&c)])
            .unwrap();
        assert_eq!(batches.len(), 3);
        assert!(Arc::ptr_eq(&batches[0][0], &c));
        assert!(Arc::ptr_eq(&batches[1][0], &b));
        assert!(Arc::ptr_eq(&batches[2][0], &a));
    }

    #[test]
    fn independent_entities_share_a_batch() {
        let batches = BatchPlanner::new().plan(vec![node(), node(), node()]).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
    }

    #[test]
    fn cycle_is_rejected() {
        let (a, b) = (node(), node());
        link(&a, &b);
        link(&b, &a);
        a.set("label", "a").unwrap();

        let err = BatchPlanner::new().plan(vec![a, b]).unwrap_err();
        assert!(matches!(err, CoreError::CommitCycle { ref entity, .. } if entity == "Node"));
    }

    #[test]
    fn dependency_with_id_outside_the_set_is_satisfied() {
        let (a, b) = (node(), node());
        b.set_id("b").unwrap();
        link(&a, &b);
        let batches = BatchPlanner::new().plan(vec![a]).unwrap();
        assert_eq!(batches.len(), 1);
    }

    #[test]
    fn unregistered_transient_dependency_is_rejected() {
        let (a, b) = (node(), node());
        link(&a, &b);
        assert!(matches!(
            BatchPlanner::new().plan(vec![a]),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn assumed_entities_count_as_scheduled() {
        let (a, b) = (node(), node());
        link(&a, &b);
        let batches = BatchPlanner::new()
            .assume_persisted([&b])
            .plan(vec![a])
            .unwrap();
        assert_eq!(batches.len(), 1);
    }

    proptest! {
        #[test]
        fn random_forests_respect_dependencies(parents in prop::collection::vec(any::<prop::sample::Index>(), 1..24)) {
            let nodes: Vec<EntityRef> = (0..parents.len()).map(|_| node()).collect();
            // Node i may only point at an earlier node, which keeps the graph acyclic.
            for (i, parent) in parents.iter().enumerate().skip(1) {
                link(&nodes[i], &nodes[parent.index(i)]);
            }

            let batches = BatchPlanner::new().plan(nodes.iter().rev().cloned().collect()).unwrap();
            prop_assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), nodes.len());
            for (i, parent) in parents.iter().enumerate().skip(1) {
                let parent = &nodes[parent.index(i)];
                prop_assert!(position(&batches, parent) < position(&batches, &nodes[i]));
            }
        }
    }
}
