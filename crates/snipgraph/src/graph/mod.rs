//! Dataflow graph model: typed multi-output nodes in a generational arena.

mod arena;
mod builder;
pub mod fold;
mod infer;
mod node;
mod op;
mod text;
mod types;

pub use arena::Graph;
pub(crate) use arena::merge_rt_info;
pub use builder::GraphBuilder;
pub use fold::{try_fold, ConstantValue};
pub use infer::{Capability, CapabilityTable, InferFn};
pub(crate) use infer::broadcast_shapes;
pub use node::{InputRef, Node, NodeId, Output, OutputRef, RtInfo};
pub use op::{is_identity_perm, OpKind, Operation, TopKMode};
pub use types::{Dimension, ElementType, OutputSpec, PartialShape};
