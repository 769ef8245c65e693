use thiserror::Error;

use crate::graph::{ElementType, NodeId, OpKind, OutputRef};

/// Structural faults raised by the graph arena and the rewrite commit path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("node {node} is not part of the graph")]
    UnknownNode { node: NodeId },
    #[error("output {output} does not exist")]
    UnknownOutput { output: OutputRef },
    #[error("staged node #{index} is not part of this rewrite")]
    UnknownStaged { index: usize },
    #[error("{kind} accepts {expected} inputs, got {actual}")]
    InputArity {
        kind: OpKind,
        expected: String,
        actual: usize,
    },
    #[error("shape inference for {kind} failed: {reason}")]
    ShapeInference { kind: OpKind, reason: String },
    #[error("constant payload holds {actual} values but its shape requires {expected}")]
    ConstantPayload { expected: usize, actual: usize },
    #[error("cannot replace {from} ({from_type}) with a value of type {to_type}")]
    ElementTypeMismatch {
        from: OutputRef,
        from_type: ElementType,
        to_type: ElementType,
    },
    #[error("output {output} cannot replace itself")]
    SelfReplacement { output: OutputRef },
    #[error("replacing {from} would make {consumer} depend on its own result")]
    CycleIntroduced { from: OutputRef, consumer: NodeId },
    #[error("graph contains a cycle through {node}")]
    Cyclic { node: NodeId },
    #[error("consumer bookkeeping of {output} is inconsistent")]
    ConsumerMismatch { output: OutputRef },
}

/// Failures that abort a transformation pipeline.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("pass `{pass}` broke a graph invariant{}: {source}", .root.map(|node| format!(" at {node}")).unwrap_or_default())]
    InvariantViolation {
        pass: String,
        root: Option<NodeId>,
        #[source]
        source: GraphError,
    },
    #[error("pass manager did not converge after {sweeps} sweeps (still changing: {})", .changed.join(", "))]
    NonConvergence { sweeps: usize, changed: Vec<String> },
    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl TransformError {
    pub(crate) fn invariant(pass: &str, root: Option<NodeId>, source: GraphError) -> Self {
        TransformError::InvariantViolation {
            pass: pass.to_string(),
            root,
            source,
        }
    }
}
