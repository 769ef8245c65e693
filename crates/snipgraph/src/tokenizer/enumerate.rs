use std::collections::HashMap;

use crate::error::GraphError;
use crate::graph::{Graph, NodeId};

/// Topological rank of every live node, tied to the graph version it was computed for.
#[derive(Debug, Clone)]
pub struct Enumeration {
    order: Vec<NodeId>,
    ranks: HashMap<NodeId, usize>,
    version: u64,
}

impl Enumeration {
    pub fn compute(graph: &Graph) -> Result<Self, GraphError> {
        let order = graph.topological_order()?;
        let ranks = order
            .iter()
            .enumerate()
            .map(|(rank, id)| (*id, rank))
            .collect();
        Ok(Self {
            order,
            ranks,
            version: graph.version(),
        })
    }

    pub fn rank(&self, id: NodeId) -> Option<usize> {
        self.ranks.get(&id).copied()
    }

    /// Nodes in rank order.
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Any edit since [`Enumeration::compute`] invalidates the ranks.
    pub fn is_stale(&self, graph: &Graph) -> bool {
        self.version != graph.version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ElementType, GraphBuilder, Operation};

    #[test]
    fn producers_rank_before_consumers() {
        let mut b = GraphBuilder::new();
        let x = b.parameter("x", ElementType::F32, &[2, 3]);
        let y = b.parameter("y", ElementType::F32, &[2, 3]);
        let sum = b.node("sum", Operation::Add, &[x, y]).unwrap();
        let prod = b.node("prod", Operation::Multiply, &[sum, x]).unwrap();
        b.result(prod).unwrap();
        let graph = b.finish();

        let enumeration = Enumeration::compute(&graph).unwrap();
        assert_eq!(enumeration.len(), graph.len());
        for id in graph.node_ids() {
            let rank = enumeration.rank(id).unwrap();
            for input in graph.node(id).unwrap().inputs() {
                assert!(enumeration.rank(input.node).unwrap() < rank);
            }
        }
        assert!(!enumeration.is_stale(&graph));
    }

    #[test]
    fn edits_make_ranks_stale() {
        let mut b = GraphBuilder::new();
        let x = b.parameter("x", ElementType::F32, &[4]);
        let twice = b.node("twice", Operation::Add, &[x, x]).unwrap();
        b.result(twice).unwrap();
        let mut graph = b.finish();

        let enumeration = Enumeration::compute(&graph).unwrap();
        graph.add_result(x).unwrap();
        assert!(enumeration.is_stale(&graph));
    }
}
