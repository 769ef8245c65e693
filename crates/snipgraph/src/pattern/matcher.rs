use tracing::{debug, trace};

use crate::graph::{Graph, NodeId, OpKind, OutputRef};

use super::{Pattern, PatternId, PatternNode, Predicate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Binding {
    placeholder: PatternId,
    output: OutputRef,
    /// Bound by a `wrap_type`/`optional` placeholder, i.e. the producer is part of the match.
    is_op: bool,
}

/// In-progress state of one match attempt: the binding map plus its binding order.
#[derive(Debug)]
pub struct MatchContext<'a> {
    graph: &'a Graph,
    pattern: &'a Pattern,
    slots: Vec<Option<OutputRef>>,
    order: Vec<Binding>,
}

impl<'a> MatchContext<'a> {
    pub fn new(graph: &'a Graph, pattern: &'a Pattern) -> Self {
        Self {
            graph,
            pattern,
            slots: vec![None; pattern.len()],
            order: Vec::new(),
        }
    }

    pub fn bound(&self, placeholder: PatternId) -> Option<OutputRef> {
        self.slots.get(placeholder.index()).copied().flatten()
    }

    fn bind(&mut self, placeholder: PatternId, output: OutputRef, is_op: bool) {
        self.slots[placeholder.index()] = Some(output);
        self.order.push(Binding {
            placeholder,
            output,
            is_op,
        });
    }

    fn snapshot(&self) -> usize {
        self.order.len()
    }

    fn rollback(&mut self, snapshot: usize) {
        for binding in self.order.drain(snapshot..) {
            self.slots[binding.placeholder.index()] = None;
        }
    }

    /// Matches `placeholder` against `output`, recursing through declared inputs.
    pub fn match_value(&mut self, placeholder: PatternId, output: OutputRef) -> bool {
        if let Some(bound) = self.bound(placeholder) {
            return bound == output;
        }
        let pattern = self.pattern;
        match pattern.node(placeholder) {
            PatternNode::AnyInput { predicate } => {
                if !self.graph.has_output(output) || !predicate.test(self.graph, output) {
                    return false;
                }
                self.bind(placeholder, output, false);
                true
            }
            PatternNode::WrapType {
                kinds,
                inputs,
                predicate,
            } => self.match_op(placeholder, kinds, inputs, predicate, output),
            PatternNode::Optional {
                kinds,
                inputs,
                predicate,
            } => {
                let snapshot = self.snapshot();
                if self.match_op(placeholder, kinds, inputs, predicate, output) {
                    return true;
                }
                self.rollback(snapshot);
                match inputs.first() {
                    Some(first) => self.match_value(*first, output),
                    None => false,
                }
            }
            PatternNode::Or { branches } => {
                for branch in branches {
                    let snapshot = self.snapshot();
                    if self.match_value(*branch, output) {
                        return true;
                    }
                    self.rollback(snapshot);
                }
                false
            }
        }
    }

    fn match_op(
        &mut self,
        placeholder: PatternId,
        kinds: &[OpKind],
        inputs: &[PatternId],
        predicate: &Predicate,
        output: OutputRef,
    ) -> bool {
        let graph = self.graph;
        let Some(node) = graph.get(output.node) else {
            return false;
        };
        if !kinds.contains(&node.kind()) || output.port >= node.output_count() {
            return false;
        }
        if !inputs.is_empty() && node.inputs().len() != inputs.len() {
            return false;
        }
        if !predicate.test(graph, output) {
            return false;
        }
        self.bind(placeholder, output, true);
        inputs
            .iter()
            .zip(node.inputs().iter().copied())
            .all(|(input, value)| self.match_value(*input, value))
    }

    fn into_result(self, root: OutputRef) -> MatchResult {
        MatchResult {
            root,
            bindings: self.order,
        }
    }
}

/// Bindings of one successful match. Only meaningful for the graph state it was produced from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    root: OutputRef,
    bindings: Vec<Binding>,
}

impl MatchResult {
    pub fn root(&self) -> OutputRef {
        self.root
    }

    pub fn root_node(&self) -> NodeId {
        self.root.node
    }

    pub fn get(&self, placeholder: PatternId) -> Option<OutputRef> {
        self.bindings
            .iter()
            .find(|binding| binding.placeholder == placeholder)
            .map(|binding| binding.output)
    }

    /// Producer bound to `placeholder`.
    pub fn node(&self, placeholder: PatternId) -> Option<NodeId> {
        self.get(placeholder).map(|output| output.node)
    }

    pub fn contains(&self, placeholder: PatternId) -> bool {
        self.get(placeholder).is_some()
    }

    pub fn bindings(&self) -> impl Iterator<Item = (PatternId, OutputRef)> + '_ {
        self.bindings
            .iter()
            .map(|binding| (binding.placeholder, binding.output))
    }

    /// Distinct producers bound by operation placeholders, in binding order.
    pub fn matched_nodes(&self) -> Vec<NodeId> {
        let mut nodes = Vec::new();
        for binding in self.bindings.iter().filter(|binding| binding.is_op) {
            if !nodes.contains(&binding.output.node) {
                nodes.push(binding.output.node);
            }
        }
        nodes
    }
}

impl Pattern {
    /// Attempts to match the pattern rooted at `output`.
    pub fn match_output(&self, graph: &Graph, output: OutputRef) -> Option<MatchResult> {
        let mut cx = MatchContext::new(graph, self);
        trace!(root = %output, "match attempt");
        if !cx.match_value(self.root, output) {
            return None;
        }
        let result = cx.into_result(output);
        debug!(
            root = %output,
            bindings = result.bindings.len(),
            "pattern matched"
        );
        Some(result)
    }

    /// Matches against the first output of `node`.
    pub fn match_node(&self, graph: &Graph, node: NodeId) -> Option<MatchResult> {
        if graph.get(node)?.output_count() == 0 {
            return None;
        }
        self.match_output(graph, node.output(0))
    }
}
