use std::collections::{BTreeMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use kiln_core::{ConnectionId, NodeId};

/// A directed edge from one node's output port to another node's input port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub from: NodeId,
    pub from_output: usize,
    pub to: NodeId,
    pub to_input: usize,
}

impl Connection {
    pub fn touches(&self, node: NodeId) -> bool {
        self.from == node || self.to == node
    }

    fn same_endpoints(&self, from: NodeId, from_output: usize, to: NodeId, to_input: usize) -> bool {
        self.from == from
            && self.from_output == from_output
            && self.to == to
            && self.to_input == to_input
    }
}

/// Edge set keyed by id. Endpoints are plain ids resolved through the environment.
#[derive(Debug, Clone, Default)]
pub struct ConnectionGraph {
    edges: BTreeMap<ConnectionId, Connection>,
    next_id: u64,
}

impl ConnectionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an edge without validation. Callers check arity and cycles first.
    pub(crate) fn insert(
        &mut self,
        from: NodeId,
        from_output: usize,
        to: NodeId,
        to_input: usize,
    ) -> ConnectionId {
        self.next_id += 1;
        let id = ConnectionId(self.next_id);
        self.edges.insert(
            id,
            Connection {
                id,
                from,
                from_output,
                to,
                to_input,
            },
        );
        id
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.edges.get(&id)
    }

    pub fn find(
        &self,
        from: NodeId,
        from_output: usize,
        to: NodeId,
        to_input: usize,
    ) -> Option<&Connection> {
        self.edges
            .values()
            .find(|c| c.same_endpoints(from, from_output, to, to_input))
    }

    pub(crate) fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.edges.remove(&id)
    }

    /// Edges feeding `node`, ordered by input index then creation order.
    pub fn inputs_of(&self, node: NodeId) -> Vec<Connection> {
        let mut inputs: Vec<Connection> =
            self.edges.values().filter(|c| c.to == node).copied().collect();
        inputs.sort_by_key(|c| (c.to_input, c.id));
        inputs
    }

    /// Edges leaving `node`, in creation order.
    pub fn outputs_of(&self, node: NodeId) -> Vec<Connection> {
        self.edges.values().filter(|c| c.from == node).copied().collect()
    }

    pub fn input_count(&self, node: NodeId, input: usize) -> usize {
        self.edges
            .values()
            .filter(|c| c.to == node && c.to_input == input)
            .count()
    }

    pub fn output_count(&self, node: NodeId, output: usize) -> usize {
        self.edges
            .values()
            .filter(|c| c.from == node && c.from_output == output)
            .count()
    }

    /// Whether `target` is reachable downstream from `start`.
    pub fn reaches(&self, start: NodeId, target: NodeId) -> bool {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            if current == target {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            queue.extend(
                self.edges
                    .values()
                    .filter(|c| c.from == current)
                    .map(|c| c.to),
            );
        }
        false
    }

    /// Remove every edge touching `node`, returning them.
    pub(crate) fn remove_node(&mut self, node: NodeId) -> Vec<Connection> {
        let removed: Vec<Connection> = self
            .edges
            .values()
            .filter(|c| c.touches(node))
            .copied()
            .collect();
        for c in &removed {
            self.edges.remove(&c.id);
        }
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.edges.values()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: NodeId = NodeId(1);
    const B: NodeId = NodeId(2);
    const C: NodeId = NodeId(3);

    #[test]
    fn test_inputs_sorted_by_port() {
        let mut graph = ConnectionGraph::new();
        let second = graph.insert(A, 0, C, 1);
        let first = graph.insert(B, 0, C, 0);
        let ids: Vec<_> = graph.inputs_of(C).iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![first, second]);
        assert_eq!(graph.outputs_of(A).len(), 1);
        assert_eq!(graph.input_count(C, 0), 1);
        assert_eq!(graph.output_count(B, 0), 1);
    }

    #[test]
    fn test_reaches_transitively() {
        let mut graph = ConnectionGraph::new();
        graph.insert(A, 0, B, 0);
        graph.insert(B, 0, C, 0);
        assert!(graph.reaches(A, C));
        assert!(!graph.reaches(C, A));
        assert!(graph.reaches(B, B));
    }

    #[test]
    fn test_remove_node_drops_all_edges() {
        let mut graph = ConnectionGraph::new();
        graph.insert(A, 0, B, 0);
        graph.insert(B, 0, C, 0);
        graph.insert(A, 0, C, 0);
        let removed = graph.remove_node(B);
        assert_eq!(removed.len(), 2);
        assert_eq!(graph.len(), 1);
        assert!(graph.iter().all(|c| !c.touches(B)));
    }

    #[test]
    fn test_find_and_remove() {
        let mut graph = ConnectionGraph::new();
        let id = graph.insert(A, 0, B, 0);
        assert_eq!(graph.find(A, 0, B, 0).map(|c| c.id), Some(id));
        assert!(graph.find(A, 1, B, 0).is_none());
        assert!(graph.remove(id).is_some());
        assert!(graph.remove(id).is_none());
        assert!(graph.is_empty());
    }
}
