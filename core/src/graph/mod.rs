//! Resource graph - explicit dependency graph plus topological ordering.
//!
//! Nodes are kept in declaration order. `order()` repeatedly picks the
//! earliest-declared node whose dependencies are all placed, so the apply
//! order is deterministic for a given declaration. `validate()` checks the
//! structural rules the engine relies on before anything touches the cloud.

pub mod builder;
pub mod node;
pub mod render;

use std::collections::{BTreeMap, BTreeSet};

use crate::errors::{GraphCycleError, GraphError};
use node::{NodeId, ResourceKind, ResourceNode};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceGraph {
    nodes: Vec<ResourceNode>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        ResourceGraph { nodes: Vec::new() }
    }

    /// Declare a node. Ids must be unique.
    pub fn add(&mut self, node: ResourceNode) -> Result<(), GraphError> {
        if self.nodes.iter().any(|n| n.id == node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        self.nodes.push(node);
        Ok(())
    }

    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    pub fn get(&self, id: &NodeId) -> Option<&ResourceNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.iter().filter(move |n| n.kind() == kind)
    }

    /// Check dependency targets, references, and per-kind prerequisites, then
    /// make sure the graph is acyclic.
    pub fn validate(&self) -> Result<(), GraphError> {
        for node in &self.nodes {
            for dep in &node.depends_on {
                if self.get(dep).is_none() {
                    return Err(GraphError::UnknownDependency {
                        node: node.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }

            for (reference, _) in node.spec.references() {
                if !node.depends_on.contains(&reference) {
                    return Err(GraphError::UnboundReference {
                        node: node.id.clone(),
                        reference,
                    });
                }
            }

            for required in node.kind().prerequisites() {
                let satisfied = node
                    .depends_on
                    .iter()
                    .filter_map(|d| self.get(d))
                    .any(|d| d.kind() == *required);
                if !satisfied {
                    return Err(GraphError::MissingPrerequisite {
                        node: node.id.clone(),
                        kind: node.kind(),
                        required: *required,
                    });
                }
            }
        }

        self.order().map(|_| ())
    }

    /// Topological order. Ties go to the earliest-declared node.
    pub fn order(&self) -> Result<Vec<&ResourceNode>, GraphError> {
        let mut placed: BTreeSet<&NodeId> = BTreeSet::new();
        let mut ordered: Vec<&ResourceNode> = Vec::with_capacity(self.nodes.len());

        while ordered.len() < self.nodes.len() {
            let next = self.nodes.iter().find(|n| {
                !placed.contains(&n.id) && n.depends_on.iter().all(|d| placed.contains(d))
            });
            match next {
                Some(node) => {
                    placed.insert(&node.id);
                    ordered.push(node);
                }
                None => {
                    let remaining: Vec<&ResourceNode> = self
                        .nodes
                        .iter()
                        .filter(|n| !placed.contains(&n.id))
                        .collect();
                    return Err(self.cycle_among(&remaining));
                }
            }
        }

        Ok(ordered)
    }

    /// Find a concrete cycle among nodes that could not be placed.
    ///
    /// Every remaining node has at least one unplaced dependency, so walking
    /// unplaced dependencies must revisit a node.
    fn cycle_among(&self, remaining: &[&ResourceNode]) -> GraphError {
        let unplaced: BTreeMap<&NodeId, &ResourceNode> =
            remaining.iter().map(|n| (&n.id, *n)).collect();

        let mut path: Vec<NodeId> = Vec::new();
        let mut current = remaining.first().map(|n| *n);

        while let Some(node) = current {
            if let Some(pos) = path.iter().position(|p| p == &node.id) {
                let mut cycle = path[pos..].to_vec();
                cycle.push(node.id.clone());
                return GraphCycleError { path: cycle }.into();
            }
            path.push(node.id.clone());
            current = node
                .depends_on
                .iter()
                .find_map(|d| unplaced.get(d).copied());
        }

        // Unreachable for a well-formed remainder; report what we walked.
        GraphCycleError { path }.into()
    }
}
