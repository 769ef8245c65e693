use crate::error::GraphError;
use crate::graph::{Graph, NodeId, Operation, OutputRef, OutputSpec, RtInfo};

/// Handle to a node staged in a [`RewriteRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StagedId(pub(crate) usize);

impl StagedId {
    pub fn output(self, port: usize) -> ValueRef {
        ValueRef::Staged { node: self, port }
    }

    pub fn index(self) -> usize {
        self.0
    }
}

/// A value usable as input during a rewrite: either already in the graph or staged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueRef {
    Graph(OutputRef),
    Staged { node: StagedId, port: usize },
}

impl From<OutputRef> for ValueRef {
    fn from(output: OutputRef) -> Self {
        ValueRef::Graph(output)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct StagedNode {
    pub(crate) op: Operation,
    pub(crate) inputs: Vec<ValueRef>,
    pub(crate) outputs: Vec<OutputSpec>,
    pub(crate) name: Option<String>,
    pub(crate) rt_info: RtInfo,
}

/// Transient owner of the nodes built by one rewrite attempt.
///
/// Nothing here touches the graph until [`Graph::commit`] is called; dropping the registry
/// discards every staged node.
#[derive(Debug, Default)]
pub struct RewriteRegistry {
    pub(crate) staged: Vec<StagedNode>,
    pub(crate) replacements: Vec<(OutputRef, ValueRef)>,
    pub(crate) sources: Vec<NodeId>,
}

impl RewriteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    pub fn replacement_count(&self) -> usize {
        self.replacements.len()
    }

    /// Returns `true` when committing would not change the graph.
    pub fn is_empty(&self) -> bool {
        self.replacements.is_empty()
    }

    pub fn spec<'a>(&'a self, graph: &'a Graph, value: ValueRef) -> Option<&'a OutputSpec> {
        match value {
            ValueRef::Graph(output) => graph.output_spec(output),
            ValueRef::Staged { node, port } => self.staged.get(node.0)?.outputs.get(port),
        }
    }

    fn input_specs(&self, graph: &Graph, inputs: &[ValueRef]) -> Result<Vec<OutputSpec>, GraphError> {
        inputs
            .iter()
            .map(|value| {
                self.spec(graph, *value).cloned().ok_or(match value {
                    ValueRef::Graph(output) => GraphError::UnknownOutput { output: *output },
                    ValueRef::Staged { node, .. } => GraphError::UnknownStaged { index: node.0 },
                })
            })
            .collect()
    }

    /// Stages a node and infers its outputs immediately.
    pub fn make(
        &mut self,
        graph: &Graph,
        op: Operation,
        inputs: &[ValueRef],
    ) -> Result<StagedId, GraphError> {
        let specs = self.input_specs(graph, inputs)?;
        let outputs = graph.infer(&op, &specs)?;
        let id = StagedId(self.staged.len());
        self.staged.push(StagedNode {
            op,
            inputs: inputs.to_vec(),
            outputs,
            name: None,
            rt_info: RtInfo::new(),
        });
        Ok(id)
    }

    /// Shorthand for single-output nodes.
    pub fn make_value(
        &mut self,
        graph: &Graph,
        op: Operation,
        inputs: &[ValueRef],
    ) -> Result<ValueRef, GraphError> {
        Ok(self.make(graph, op, inputs)?.output(0))
    }

    fn staged_mut(&mut self, id: StagedId) -> Result<&mut StagedNode, GraphError> {
        self.staged
            .get_mut(id.0)
            .ok_or(GraphError::UnknownStaged { index: id.0 })
    }

    pub fn set_friendly_name(
        &mut self,
        id: StagedId,
        name: impl Into<String>,
    ) -> Result<(), GraphError> {
        self.staged_mut(id)?.name = Some(name.into());
        Ok(())
    }

    pub fn set_rt_info(
        &mut self,
        id: StagedId,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), GraphError> {
        self.staged_mut(id)?.rt_info.insert(key.into(), value.into());
        Ok(())
    }

    /// Schedules every consumer of `from` to be repointed to `to` at commit time.
    pub fn replace(&mut self, from: OutputRef, to: impl Into<ValueRef>) {
        self.replacements.push((from, to.into()));
    }

    /// Records nodes whose annotations every staged node inherits at commit time.
    pub fn copy_runtime_info_from(&mut self, sources: &[NodeId]) {
        for source in sources {
            if !self.sources.contains(source) {
                self.sources.push(*source);
            }
        }
    }
}
