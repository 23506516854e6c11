//! Dependency graph between components.
//!
//! Edges are plain data: each component id maps to the ids it depends on.
//! The graph is fixed once built and only used to order evaluation.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use ytop_common::{Error, Result};

use crate::component::ComponentId;

/// Acyclic map from a component to its dependencies
#[derive(Clone, Debug, Default)]
pub struct ComponentGraph {
    edges: BTreeMap<ComponentId, Vec<ComponentId>>,
}

impl ComponentGraph {
    /// Build the graph, rejecting duplicate ids and edges to unknown components
    pub fn new(nodes: impl IntoIterator<Item = (ComponentId, Vec<ComponentId>)>) -> Result<Self> {
        let mut edges = BTreeMap::new();
        for (id, deps) in nodes {
            if edges.contains_key(&id) {
                return Err(Error::validation(format!("component {} declared twice", id)));
            }
            edges.insert(id, deps);
        }

        for (id, deps) in &edges {
            if let Some(unknown) = deps.iter().find(|dep| !edges.contains_key(*dep)) {
                return Err(Error::validation(format!(
                    "component {} depends on unknown component {}",
                    id, unknown
                )));
            }
        }

        Ok(Self { edges })
    }

    /// Number of components
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Graph has no components
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Declared dependencies of `id`
    pub fn dependencies(&self, id: &ComponentId) -> &[ComponentId] {
        self.edges.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Dependencies before dependents, ties broken by id ordering.
    ///
    /// Kahn's algorithm with an ordered ready set, so the result is stable
    /// across ticks and process restarts.
    pub fn topological_order(&self) -> Result<Vec<ComponentId>> {
        let mut pending: BTreeMap<&ComponentId, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&ComponentId, Vec<&ComponentId>> = BTreeMap::new();
        for (id, deps) in &self.edges {
            let distinct: BTreeSet<&ComponentId> = deps.iter().collect();
            pending.insert(id, distinct.len());
            for dep in distinct {
                dependents.entry(dep).or_default().push(id);
            }
        }

        let mut ready: BTreeSet<&ComponentId> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.edges.len());

        while let Some(id) = ready.pop_first() {
            order.push(id.clone());
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(count) = pending.get_mut(*dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        if order.len() < self.edges.len() {
            let placed: BTreeSet<&ComponentId> = order.iter().collect();
            let stuck: Vec<String> = self
                .edges
                .keys()
                .filter(|id| !placed.contains(id))
                .map(ComponentId::name)
                .collect();
            return Err(Error::validation(format!(
                "dependency cycle between components: {}",
                stuck.join(", ")
            )));
        }

        debug!(components = order.len(), "computed component order");
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ytop_common::ComponentKind;

    fn id(kind: ComponentKind) -> ComponentId {
        ComponentId::new(kind)
    }

    fn pool(kind: ComponentKind, name: &str) -> ComponentId {
        ComponentId::with_instance(kind, name)
    }

    #[test]
    fn dependencies_come_first() {
        let graph = ComponentGraph::new([
            (id(ComponentKind::QueryTracker), vec![
                id(ComponentKind::Master),
                pool(ComponentKind::TabletNode, "ssd"),
            ]),
            (pool(ComponentKind::TabletNode, "ssd"), vec![id(ComponentKind::Master)]),
            (id(ComponentKind::Master), vec![]),
            (id(ComponentKind::Discovery), vec![]),
        ])
        .unwrap();

        let order = graph.topological_order().unwrap();
        assert_eq!(
            order,
            vec![
                id(ComponentKind::Master),
                id(ComponentKind::Discovery),
                pool(ComponentKind::TabletNode, "ssd"),
                id(ComponentKind::QueryTracker),
            ]
        );
    }

    #[test]
    fn order_is_independent_of_insertion_order() {
        let nodes = vec![
            (pool(ComponentKind::HttpProxy, "b"), vec![id(ComponentKind::Master)]),
            (pool(ComponentKind::HttpProxy, "a"), vec![id(ComponentKind::Master)]),
            (id(ComponentKind::Master), vec![]),
        ];
        let mut reversed = nodes.clone();
        reversed.reverse();

        let forward = ComponentGraph::new(nodes).unwrap().topological_order().unwrap();
        let backward = ComponentGraph::new(reversed).unwrap().topological_order().unwrap();
        assert_eq!(forward, backward);
        assert_eq!(forward[1], pool(ComponentKind::HttpProxy, "a"));
    }

    #[test]
    fn repeated_edges_count_once() {
        let graph = ComponentGraph::new([
            (id(ComponentKind::Master), vec![]),
            (id(ComponentKind::Scheduler), vec![
                id(ComponentKind::Master),
                id(ComponentKind::Master),
            ]),
        ])
        .unwrap();
        assert_eq!(graph.topological_order().unwrap().len(), 2);
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let err = ComponentGraph::new([(
            id(ComponentKind::Scheduler),
            vec![id(ComponentKind::Master)],
        )])
        .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert!(err.to_string().contains("Master"));
    }

    #[test]
    fn duplicate_component_is_rejected() {
        let err = ComponentGraph::new([
            (id(ComponentKind::Master), vec![]),
            (id(ComponentKind::Master), vec![]),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }

    #[test]
    fn cycle_names_its_members() {
        let graph = ComponentGraph::new([
            (id(ComponentKind::Master), vec![]),
            (id(ComponentKind::Scheduler), vec![id(ComponentKind::ControllerAgent)]),
            (id(ComponentKind::ControllerAgent), vec![id(ComponentKind::Scheduler)]),
        ])
        .unwrap();

        let err = graph.topological_order().unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        let msg = err.to_string();
        assert!(msg.contains("Scheduler"), "{}", msg);
        assert!(!msg.contains("Master"), "{}", msg);
    }

    #[test]
    fn empty_graph_has_empty_order() {
        let graph = ComponentGraph::new(Vec::new()).unwrap();
        assert!(graph.is_empty());
        assert!(graph.topological_order().unwrap().is_empty());
    }
}
