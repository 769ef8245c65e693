use crate::error::GraphError;

use super::fold::ConstantValue;
use super::node::{NodeId, OutputRef};
use super::op::Operation;
use super::types::{ElementType, OutputSpec, PartialShape};
use super::Graph;

/// Loader-style construction helper that names every node it creates.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_graph(graph: Graph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn parameter(&mut self, name: &str, element_type: ElementType, dims: &[usize]) -> OutputRef {
        self.parameter_with_shape(name, element_type, PartialShape::from_static(dims))
    }

    pub fn parameter_with_shape(
        &mut self,
        name: &str,
        element_type: ElementType,
        shape: PartialShape,
    ) -> OutputRef {
        self.graph
            .add_parameter(name, OutputSpec::new(element_type, shape))
            .output(0)
    }

    pub fn constant(&mut self, name: &str, value: ConstantValue) -> Result<OutputRef, GraphError> {
        self.node(name, Operation::Constant(value), &[])
    }

    /// Adds a single-output node and returns its output.
    pub fn node(
        &mut self,
        name: &str,
        op: Operation,
        inputs: &[OutputRef],
    ) -> Result<OutputRef, GraphError> {
        Ok(self.node_id(name, op, inputs)?.output(0))
    }

    /// Adds a node and returns its handle, for multi-output kinds.
    pub fn node_id(
        &mut self,
        name: &str,
        op: Operation,
        inputs: &[OutputRef],
    ) -> Result<NodeId, GraphError> {
        let id = self.graph.add_node(op, inputs)?;
        self.graph.set_friendly_name(id, name)?;
        Ok(id)
    }

    pub fn transpose(
        &mut self,
        name: &str,
        input: OutputRef,
        perm: &[usize],
    ) -> Result<OutputRef, GraphError> {
        self.node(
            name,
            Operation::Transpose {
                perm: perm.to_vec(),
            },
            &[input],
        )
    }

    pub fn matmul(
        &mut self,
        name: &str,
        lhs: OutputRef,
        rhs: OutputRef,
        transpose_b: bool,
    ) -> Result<OutputRef, GraphError> {
        self.node(
            name,
            Operation::MatMul {
                transpose_a: false,
                transpose_b,
            },
            &[lhs, rhs],
        )
    }

    pub fn result(&mut self, value: OutputRef) -> Result<NodeId, GraphError> {
        self.graph.add_result(value)
    }

    pub fn finish(self) -> Graph {
        self.graph
    }
}
