use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;

use tracing::trace;

use crate::error::GraphError;

use super::infer::CapabilityTable;
use super::node::{InputRef, Node, NodeId, Output, OutputRef, RtInfo};
use super::op::{OpKind, Operation};
use super::types::OutputSpec;

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    pins: u32,
    node: Option<Node>,
}

/// Arena-backed dataflow graph with explicit consumer bookkeeping.
///
/// Nodes are released as soon as nothing consumes them, nothing pins them and they are not
/// graph anchors (parameters and results). Every structural mutation bumps [`Graph::version`].
#[derive(Debug, Clone)]
pub struct Graph {
    slots: Vec<Slot>,
    free: Vec<u32>,
    parameters: Vec<NodeId>,
    results: Vec<NodeId>,
    live: usize,
    version: u64,
    capabilities: Arc<CapabilityTable>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self::with_capabilities(CapabilityTable::standard())
    }

    pub fn with_capabilities(capabilities: Arc<CapabilityTable>) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            parameters: Vec::new(),
            results: Vec::new(),
            live: 0,
            version: 0,
            capabilities,
        }
    }

    pub fn capabilities(&self) -> &Arc<CapabilityTable> {
        &self.capabilities
    }

    /// Monotonic mutation counter.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.get(id).ok_or(GraphError::UnknownNode { node: id })
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, GraphError> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
            .ok_or(GraphError::UnknownNode { node: id })
    }

    /// Live nodes in slot order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.node.as_ref().map(|_| NodeId {
                index: index as u32,
                generation: slot.generation,
            })
        })
    }

    pub fn parameters(&self) -> &[NodeId] {
        &self.parameters
    }

    pub fn results(&self) -> &[NodeId] {
        &self.results
    }

    pub fn output_spec(&self, output: OutputRef) -> Option<&OutputSpec> {
        self.get(output.node)?.output_spec(output.port)
    }

    pub fn has_output(&self, output: OutputRef) -> bool {
        self.output_spec(output).is_some()
    }

    pub fn consumers(&self, output: OutputRef) -> &[InputRef] {
        self.get(output.node)
            .and_then(|node| node.outputs.get(output.port))
            .map(|out| out.consumers.as_slice())
            .unwrap_or(&[])
    }

    /// Output feeding the given input slot.
    pub fn producer(&self, input: InputRef) -> Option<OutputRef> {
        self.get(input.node)?.input(input.port)
    }

    pub fn kind_of(&self, id: NodeId) -> Option<OpKind> {
        self.get(id).map(Node::kind)
    }

    pub fn pins(&self, id: NodeId) -> u32 {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .map_or(0, |slot| slot.pins)
    }

    /// Runs the capability registered for `op` over the given input specs.
    pub fn infer(
        &self,
        op: &Operation,
        inputs: &[OutputSpec],
    ) -> Result<Vec<OutputSpec>, GraphError> {
        let kind = op.kind();
        let capability =
            self.capabilities
                .get(kind)
                .ok_or_else(|| GraphError::ShapeInference {
                    kind,
                    reason: "no capability registered".to_string(),
                })?;
        if !capability.accepts_inputs(inputs.len()) {
            return Err(GraphError::InputArity {
                kind,
                expected: capability.arity_description(),
                actual: inputs.len(),
            });
        }
        (capability.infer)(op, inputs).map_err(|err| GraphError::ShapeInference {
            kind,
            reason: format!("{err:#}"),
        })
    }

    fn input_specs(&self, inputs: &[OutputRef]) -> Result<Vec<OutputSpec>, GraphError> {
        inputs
            .iter()
            .map(|input| {
                self.output_spec(*input)
                    .cloned()
                    .ok_or(GraphError::UnknownOutput { output: *input })
            })
            .collect()
    }

    pub fn add_parameter(&mut self, name: impl Into<String>, spec: OutputSpec) -> NodeId {
        let node = Node {
            op: Operation::Parameter { spec: spec.clone() },
            inputs: Vec::new(),
            outputs: vec![Output::new(spec)],
            name: name.into(),
            rt_info: RtInfo::new(),
        };
        let id = self.allocate(node);
        self.parameters.push(id);
        id
    }

    /// Adds a node after validating its inputs and inferring its outputs.
    pub fn add_node(&mut self, op: Operation, inputs: &[OutputRef]) -> Result<NodeId, GraphError> {
        let specs = self.input_specs(inputs)?;
        let outputs = self.infer(&op, &specs)?;
        self.add_node_verbatim(op, inputs, outputs)
    }

    pub fn add_result(&mut self, value: OutputRef) -> Result<NodeId, GraphError> {
        self.add_node(Operation::Result, &[value])
    }

    /// Adds a node with caller-provided output specs; inputs are checked but nothing is inferred.
    pub(crate) fn add_node_verbatim(
        &mut self,
        op: Operation,
        inputs: &[OutputRef],
        outputs: Vec<OutputSpec>,
    ) -> Result<NodeId, GraphError> {
        for input in inputs {
            if !self.has_output(*input) {
                return Err(GraphError::UnknownOutput { output: *input });
            }
        }
        let kind = op.kind();
        let node = Node {
            op,
            inputs: Vec::new(),
            outputs: outputs.into_iter().map(Output::new).collect(),
            name: String::new(),
            rt_info: RtInfo::new(),
        };
        let id = self.allocate(node);
        self.wire_inputs(id, inputs.to_vec());
        match kind {
            OpKind::Result => self.results.push(id),
            OpKind::Parameter => self.parameters.push(id),
            _ => {}
        }
        Ok(id)
    }

    pub(crate) fn allocate(&mut self, node: Node) -> NodeId {
        self.version += 1;
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            slot.pins = 0;
            return NodeId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            pins: 0,
            node: Some(node),
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    /// Sets the inputs of a node that has none yet and registers it as consumer.
    pub(crate) fn wire_inputs(&mut self, id: NodeId, inputs: Vec<OutputRef>) {
        for (port, input) in inputs.iter().enumerate() {
            let slot = &mut self.slots[input.node.index as usize];
            if let Some(producer) = slot.node.as_mut() {
                producer.outputs[input.port].consumers.push(id.input(port));
            }
        }
        if let Some(node) = self.slots[id.index as usize].node.as_mut() {
            node.inputs = inputs;
        }
        self.version += 1;
    }

    /// Moves every consumer of `from` over to `to`. Callers validate both ends beforehand.
    pub(crate) fn repoint_consumers(&mut self, from: OutputRef, to: OutputRef) {
        let consumers = match self
            .slots
            .get_mut(from.node.index as usize)
            .and_then(|slot| slot.node.as_mut())
        {
            Some(node) => std::mem::take(&mut node.outputs[from.port].consumers),
            None => return,
        };
        for consumer in &consumers {
            if let Some(node) = self.slots[consumer.node.index as usize].node.as_mut() {
                node.inputs[consumer.port] = to;
            }
        }
        if let Some(node) = self.slots[to.node.index as usize].node.as_mut() {
            node.outputs[to.port].consumers.extend(consumers);
        }
        self.version += 1;
    }

    pub fn set_friendly_name(
        &mut self,
        id: NodeId,
        name: impl Into<String>,
    ) -> Result<(), GraphError> {
        self.node_mut(id)?.name = name.into();
        Ok(())
    }

    pub fn set_rt_info(
        &mut self,
        id: NodeId,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), GraphError> {
        self.node_mut(id)?.rt_info.insert(key.into(), value.into());
        Ok(())
    }

    /// Merges the annotations of `sources` into every destination; existing destination keys win.
    pub fn copy_runtime_info(
        &mut self,
        sources: &[NodeId],
        destinations: &[NodeId],
    ) -> Result<(), GraphError> {
        let mut merged = RtInfo::new();
        for source in sources {
            for (key, value) in &self.node(*source)?.rt_info {
                merged.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        for destination in destinations {
            self.node(*destination)?;
        }
        for destination in destinations {
            let node = self.node_mut(*destination)?;
            merge_rt_info(&mut node.rt_info, &merged);
        }
        Ok(())
    }

    /// Holds an external handle on `id`; pinned nodes are never released.
    pub fn pin(&mut self, id: NodeId) -> Result<(), GraphError> {
        self.node(id)?;
        self.slots[id.index as usize].pins += 1;
        Ok(())
    }

    /// Drops one pin and releases the node (and dead producers) if nothing else holds it.
    pub fn unpin(&mut self, id: NodeId) -> Result<usize, GraphError> {
        self.node(id)?;
        let slot = &mut self.slots[id.index as usize];
        slot.pins = slot.pins.saturating_sub(1);
        Ok(self.release_if_dead(id))
    }

    fn is_dead(&self, id: NodeId) -> bool {
        let Some(slot) = self.slots.get(id.index as usize) else {
            return false;
        };
        if slot.generation != id.generation || slot.pins > 0 {
            return false;
        }
        slot.node
            .as_ref()
            .is_some_and(|node| !node.is_anchor() && node.is_unused())
    }

    /// Releases `id` if it is dead, cascading to producers. Returns the number of released nodes.
    pub(crate) fn release_if_dead(&mut self, id: NodeId) -> usize {
        let mut released = 0usize;
        let mut worklist = vec![id];
        while let Some(current) = worklist.pop() {
            if !self.is_dead(current) {
                continue;
            }
            let slot = &mut self.slots[current.index as usize];
            let Some(node) = slot.node.take() else {
                continue;
            };
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(current.index);
            self.live -= 1;
            released += 1;
            trace!(node = %current, kind = %node.kind(), name = node.name(), "released node");
            for (port, input) in node.inputs.iter().enumerate() {
                if let Some(producer) = self.slots[input.node.index as usize].node.as_mut() {
                    let target = current.input(port);
                    producer.outputs[input.port]
                        .consumers
                        .retain(|consumer| *consumer != target);
                    worklist.push(input.node);
                }
            }
        }
        if released > 0 {
            self.version += 1;
        }
        released
    }

    /// Releases every node that cannot reach a result and is not pinned.
    pub fn collect_garbage(&mut self) -> usize {
        let reachable = self.ancestors(self.results.clone());
        let candidates = self
            .node_ids()
            .filter(|id| !reachable.contains(id))
            .collect::<Vec<_>>();
        let mut released = 0usize;
        let mut progress = true;
        while progress {
            progress = false;
            for id in &candidates {
                let count = self.release_if_dead(*id);
                if count > 0 {
                    released += count;
                    progress = true;
                }
            }
        }
        released
    }

    /// Transitive producers of `roots`, roots included.
    pub fn ancestors(&self, roots: impl IntoIterator<Item = NodeId>) -> HashSet<NodeId> {
        let mut seen = HashSet::new();
        let mut stack = roots.into_iter().collect::<Vec<_>>();
        while let Some(id) = stack.pop() {
            let Some(node) = self.get(id) else {
                continue;
            };
            if !seen.insert(id) {
                continue;
            }
            stack.extend(node.inputs.iter().map(|input| input.node));
        }
        seen
    }

    /// Deterministic Kahn order; among ready nodes the lowest slot index goes first.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let mut pending = vec![0usize; self.slots.len()];
        let mut ready = BinaryHeap::new();
        for id in self.node_ids() {
            let node = &self.slots[id.index as usize];
            let count = node.node.as_ref().map_or(0, |node| node.inputs.len());
            pending[id.index as usize] = count;
            if count == 0 {
                ready.push(Reverse(id));
            }
        }
        let mut order = Vec::with_capacity(self.live);
        while let Some(Reverse(id)) = ready.pop() {
            order.push(id);
            let Some(node) = self.get(id) else {
                continue;
            };
            for output in &node.outputs {
                for consumer in &output.consumers {
                    let slot = &mut pending[consumer.node.index as usize];
                    *slot = slot.saturating_sub(1);
                    if *slot == 0 {
                        ready.push(Reverse(consumer.node));
                    }
                }
            }
        }
        if order.len() != self.live {
            let placed = order.iter().copied().collect::<HashSet<_>>();
            if let Some(node) = self.node_ids().find(|id| !placed.contains(id)) {
                return Err(GraphError::Cyclic { node });
            }
        }
        Ok(order)
    }

    /// Checks consumer exactness, dangling edges and acyclicity.
    pub fn validate(&self) -> Result<(), GraphError> {
        for id in self.node_ids() {
            let node = self.node(id)?;
            for (port, input) in node.inputs.iter().enumerate() {
                let producer = self
                    .get(input.node)
                    .ok_or(GraphError::UnknownOutput { output: *input })?;
                let output = producer
                    .outputs
                    .get(input.port)
                    .ok_or(GraphError::UnknownOutput { output: *input })?;
                let occurrences = output
                    .consumers
                    .iter()
                    .filter(|consumer| **consumer == id.input(port))
                    .count();
                if occurrences != 1 {
                    return Err(GraphError::ConsumerMismatch { output: *input });
                }
            }
            for (port, output) in node.outputs.iter().enumerate() {
                for consumer in &output.consumers {
                    let listed = self
                        .get(consumer.node)
                        .and_then(|user| user.input(consumer.port));
                    if listed != Some(id.output(port)) {
                        return Err(GraphError::ConsumerMismatch {
                            output: id.output(port),
                        });
                    }
                }
            }
        }
        for anchor in self.parameters.iter().chain(&self.results) {
            self.node(*anchor)?;
        }
        self.topological_order().map(|_| ())
    }

    /// Re-runs inference over every node in topological order, refreshing output specs.
    pub fn revalidate(&mut self) -> Result<(), GraphError> {
        for id in self.topological_order()? {
            let node = self.node(id)?;
            let specs = self.input_specs(&node.inputs)?;
            let outputs = self.infer(&node.op, &specs)?;
            let kind = node.kind();
            if outputs.len() != node.outputs.len() {
                return Err(GraphError::ShapeInference {
                    kind,
                    reason: format!(
                        "output count changed from {} to {}",
                        node.outputs.len(),
                        outputs.len()
                    ),
                });
            }
            let node = self.node_mut(id)?;
            for (output, spec) in node.outputs.iter_mut().zip(outputs) {
                output.spec = spec;
            }
        }
        self.version += 1;
        Ok(())
    }

    /// Specs of the values consumed by the result nodes, in result order.
    pub fn result_specs(&self) -> Vec<OutputSpec> {
        self.results
            .iter()
            .filter_map(|id| self.get(*id)?.input(0))
            .filter_map(|value| self.output_spec(value).cloned())
            .collect()
    }

    /// Rebinds parameter specs to externally supplied ones; element types must agree.
    pub(crate) fn bind_parameters(&mut self, specs: &[OutputSpec]) -> Result<(), GraphError> {
        if specs.len() != self.parameters.len() {
            return Err(GraphError::InputArity {
                kind: OpKind::Subgraph,
                expected: self.parameters.len().to_string(),
                actual: specs.len(),
            });
        }
        for (index, (id, spec)) in self.parameters.clone().into_iter().zip(specs).enumerate() {
            let node = self.node_mut(id)?;
            let current = node.outputs[0].spec.element_type;
            if current != spec.element_type {
                return Err(GraphError::ShapeInference {
                    kind: OpKind::Parameter,
                    reason: format!(
                        "parameter {index} expects {current}, got {}",
                        spec.element_type
                    ),
                });
            }
            node.op = Operation::Parameter { spec: spec.clone() };
            node.outputs[0].spec = spec.clone();
        }
        self.version += 1;
        Ok(())
    }

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }

    pub(crate) fn merge_rt_info_into(&mut self, id: NodeId, source: &RtInfo) {
        if let Ok(node) = self.node_mut(id) {
            merge_rt_info(&mut node.rt_info, source);
        }
    }

    pub(crate) fn set_name_if_empty(&mut self, id: NodeId, name: &str) {
        if let Ok(node) = self.node_mut(id) {
            if node.name.is_empty() {
                node.name = name.to_string();
            }
        }
    }
}

/// Destination-wins merge.
pub(crate) fn merge_rt_info(destination: &mut RtInfo, source: &RtInfo) {
    for (key, value) in source {
        destination
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::types::ElementType;

    fn spec() -> OutputSpec {
        OutputSpec::static_shape(ElementType::F32, &[2, 2])
    }

    #[test]
    fn released_slots_bump_generation() {
        let mut graph = Graph::new();
        let x = graph.add_parameter("x", spec());
        let add = graph.add_node(Operation::Add, &[x.output(0), x.output(0)]).unwrap();
        assert_eq!(graph.release_if_dead(add), 1);
        assert!(!graph.contains(add));
        let again = graph.add_node(Operation::Add, &[x.output(0), x.output(0)]).unwrap();
        assert_eq!(again.index(), add.index());
        assert_ne!(again.generation(), add.generation());
        assert!(graph.get(add).is_none());
    }

    #[test]
    fn pinned_nodes_survive_until_unpinned() {
        let mut graph = Graph::new();
        let x = graph.add_parameter("x", spec());
        let neg = graph
            .add_node(Operation::Transpose { perm: vec![1, 0] }, &[x.output(0)])
            .unwrap();
        graph.pin(neg).unwrap();
        assert_eq!(graph.release_if_dead(neg), 0);
        assert_eq!(graph.unpin(neg).unwrap(), 1);
        assert_eq!(graph.len(), 1);
        assert!(graph.consumers(x.output(0)).is_empty());
    }

    #[test]
    fn unpinning_a_released_node_is_an_error() {
        let mut graph = Graph::new();
        let x = graph.add_parameter("x", spec());
        let add = graph.add_node(Operation::Add, &[x.output(0), x.output(0)]).unwrap();
        graph.pin(add).unwrap();
        assert_eq!(graph.unpin(add).unwrap(), 1);
        assert_eq!(
            graph.unpin(add).unwrap_err(),
            GraphError::UnknownNode { node: add }
        );
        assert_eq!(graph.pins(add), 0);
    }

    #[test]
    fn topological_order_prefers_low_indices() {
        let mut graph = Graph::new();
        let a = graph.add_parameter("a", spec());
        let b = graph.add_parameter("b", spec());
        let sum = graph.add_node(Operation::Add, &[b.output(0), a.output(0)]).unwrap();
        graph.add_result(sum.output(0)).unwrap();
        let order = graph.topological_order().unwrap();
        assert_eq!(&order[..3], &[a, b, sum]);
    }
}
