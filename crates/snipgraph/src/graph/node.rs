use std::collections::BTreeMap;
use std::fmt;

use smallvec::SmallVec;

use super::op::{OpKind, Operation};
use super::types::OutputSpec;

/// Generational handle into the graph arena. Stale handles never alias a recycled slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl NodeId {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }

    pub fn output(self, port: usize) -> OutputRef {
        OutputRef { node: self, port }
    }

    pub fn input(self, port: usize) -> InputRef {
        InputRef { node: self, port }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.index)
    }
}

/// One output of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputRef {
    pub node: NodeId,
    pub port: usize,
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.port)
    }
}

/// One input slot of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InputRef {
    pub node: NodeId,
    pub port: usize,
}

impl fmt::Display for InputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.node, self.port)
    }
}

/// Opaque runtime annotations; ordered so dumps and merges are deterministic.
pub type RtInfo = BTreeMap<String, String>;

#[derive(Debug, Clone)]
pub struct Output {
    pub(crate) spec: OutputSpec,
    pub(crate) consumers: SmallVec<[InputRef; 4]>,
}

impl Output {
    pub(crate) fn new(spec: OutputSpec) -> Self {
        Self {
            spec,
            consumers: SmallVec::new(),
        }
    }

    pub fn spec(&self) -> &OutputSpec {
        &self.spec
    }

    pub fn consumers(&self) -> &[InputRef] {
        &self.consumers
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) op: Operation,
    pub(crate) inputs: Vec<OutputRef>,
    pub(crate) outputs: Vec<Output>,
    pub(crate) name: String,
    pub(crate) rt_info: RtInfo,
}

impl Node {
    pub fn op(&self) -> &Operation {
        &self.op
    }

    pub fn kind(&self) -> OpKind {
        self.op.kind()
    }

    pub fn inputs(&self) -> &[OutputRef] {
        &self.inputs
    }

    pub fn input(&self, port: usize) -> Option<OutputRef> {
        self.inputs.get(port).copied()
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn output_spec(&self, port: usize) -> Option<&OutputSpec> {
        self.outputs.get(port).map(Output::spec)
    }

    /// Friendly name; diagnostic metadata only.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rt_info(&self) -> &RtInfo {
        &self.rt_info
    }

    /// Returns `true` when no output has a consumer.
    pub fn is_unused(&self) -> bool {
        self.outputs.iter().all(|output| output.consumers.is_empty())
    }

    /// Parameters and results anchor the graph and are never released.
    pub fn is_anchor(&self) -> bool {
        matches!(self.kind(), OpKind::Parameter | OpKind::Result)
    }
}
