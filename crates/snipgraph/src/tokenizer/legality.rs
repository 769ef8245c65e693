//! Island assembly and the rank-pruned convexity check.

use std::collections::HashSet;

use crate::error::GraphError;
use crate::graph::{Graph, NodeId, OpKind, OutputRef};
use crate::pattern::MatchResult;

use super::enumerate::Enumeration;
use super::{MhaVariant, TokenizerConfig};

const EPILOGUE_KINDS: [OpKind; 3] = [OpKind::Transpose, OpKind::Dequantize, OpKind::Convert];

/// Fusion candidate: the nodes that move into one Subgraph body.
#[derive(Debug, Clone)]
pub(crate) struct Island {
    pub(crate) variant: MhaVariant,
    /// Motif root, the second MatMul.
    pub(crate) root: NodeId,
    /// Fused nodes in rank order; the last one is the sink.
    pub(crate) nodes: Vec<NodeId>,
    /// Constant producers cloned into the body instead of becoming inputs.
    pub(crate) constants: Vec<NodeId>,
}

/// External wiring of an island at one graph state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Boundary {
    /// Producers outside the island, de-duplicated in first-use order.
    pub(crate) inputs: Vec<OutputRef>,
    /// Island outputs with consumers outside the island, in (rank, port) order.
    pub(crate) outputs: Vec<OutputRef>,
}

impl Island {
    /// Extends a motif match with its epilogue and inlined constants.
    pub(crate) fn collect(
        graph: &Graph,
        enumeration: &Enumeration,
        matched: &MatchResult,
        variant: MhaVariant,
        config: &TokenizerConfig,
    ) -> Option<Self> {
        let root = matched.root_node();
        let mut nodes = matched.matched_nodes();

        let mut sink = root;
        for _ in 0..config.max_epilogue {
            let [consumer] = graph.consumers(sink.output(0)) else {
                break;
            };
            let next = consumer.node;
            let node = graph.get(next)?;
            if !EPILOGUE_KINDS.contains(&node.kind()) || nodes.contains(&next) {
                break;
            }
            nodes.push(next);
            sink = next;
        }

        let mut ranked = nodes
            .iter()
            .map(|id| enumeration.rank(*id).map(|rank| (rank, *id)))
            .collect::<Option<Vec<_>>>()?;
        ranked.sort_unstable();
        let nodes = ranked.into_iter().map(|(_, id)| id).collect::<Vec<_>>();

        let mut constants = Vec::new();
        if config.inline_constants {
            for id in &nodes {
                for input in graph.get(*id)?.inputs() {
                    if graph.kind_of(input.node) == Some(OpKind::Constant)
                        && !constants.contains(&input.node)
                    {
                        constants.push(input.node);
                    }
                }
            }
        }

        Some(Self {
            variant,
            root,
            nodes,
            constants,
        })
    }

    pub(crate) fn sink(&self) -> NodeId {
        self.nodes.last().copied().unwrap_or(self.root)
    }

    pub(crate) fn is_live(&self, graph: &Graph) -> bool {
        self.nodes
            .iter()
            .chain(&self.constants)
            .all(|id| graph.contains(*id))
    }

    pub(crate) fn members(&self) -> HashSet<NodeId> {
        self.nodes.iter().copied().collect()
    }

    /// Computes the current external inputs and outputs.
    pub(crate) fn boundary(&self, graph: &Graph) -> Result<Boundary, GraphError> {
        let members = self.members();
        let mut boundary = Boundary::default();
        for id in &self.nodes {
            for input in graph.node(*id)?.inputs() {
                if members.contains(&input.node) || self.constants.contains(&input.node) {
                    continue;
                }
                if !boundary.inputs.contains(input) {
                    boundary.inputs.push(*input);
                }
            }
        }
        for id in &self.nodes {
            let node = graph.node(*id)?;
            for (port, output) in node.outputs().iter().enumerate() {
                if output
                    .consumers()
                    .iter()
                    .any(|consumer| !members.contains(&consumer.node))
                {
                    boundary.outputs.push(id.output(port));
                }
            }
        }
        Ok(boundary)
    }

    /// Whether the boundary only exposes outputs this variant may export.
    pub(crate) fn exports_allowed(&self, boundary: &Boundary, config: &TokenizerConfig) -> bool {
        let sink = self.sink();
        let intermediate = boundary.outputs.iter().any(|output| output.node != sink);
        if !intermediate {
            return true;
        }
        config.allow_intermediate_outputs && self.variant != MhaVariant::Quantized
    }
}

/// No path may leave the island and re-enter it.
///
/// Only nodes ranked at or below the island's highest rank can lead back into it, so external
/// consumers ranked above that bound are accepted without a walk.
pub(crate) fn is_convex(graph: &Graph, enumeration: &Enumeration, island: &Island) -> bool {
    let members = island.members();
    let Some(bound) = island
        .nodes
        .iter()
        .filter_map(|id| enumeration.rank(*id))
        .max()
    else {
        return false;
    };
    let below_bound = |id: NodeId| enumeration.rank(id).is_some_and(|rank| rank <= bound);

    let mut visited = HashSet::new();
    let mut worklist = Vec::new();
    for id in &island.nodes {
        let Some(node) = graph.get(*id) else {
            return false;
        };
        for output in node.outputs() {
            for consumer in output.consumers() {
                if !members.contains(&consumer.node) && below_bound(consumer.node) {
                    worklist.push(consumer.node);
                }
            }
        }
    }
    while let Some(id) = worklist.pop() {
        if members.contains(&id) {
            return false;
        }
        if !visited.insert(id) {
            continue;
        }
        let Some(node) = graph.get(id) else {
            continue;
        };
        for output in node.outputs() {
            for consumer in output.consumers() {
                if below_bound(consumer.node) {
                    worklist.push(consumer.node);
                }
            }
        }
    }
    true
}
