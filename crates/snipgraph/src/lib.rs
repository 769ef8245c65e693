//! Rewrite engine for neural-network inference graphs.
//!
//! A [`Graph`] is an arena of typed, multi-output nodes. Patterns built with
//! [`pattern::PatternBuilder`] are matched top-down from a root node; rewrites are staged in a
//! [`rewrite::RewriteRegistry`] and committed atomically. The [`PassManager`] drives ordered
//! passes to a fixed point, the last of which, [`tokenizer::MhaTokenizer`], fuses attention
//! motifs into single `Subgraph` nodes.

pub mod error;
pub mod graph;
pub mod pass;
pub mod passes;
pub mod pattern;
pub mod rewrite;
pub mod tokenizer;

mod env;

pub use error::{GraphError, TransformError};
pub use graph::{
    ElementType, Graph, GraphBuilder, NodeId, OpKind, Operation, OutputRef, OutputSpec,
    PartialShape,
};
pub use pass::{default_pipeline, GraphPass, MatcherPass, PassManager, PassResult};
pub use pattern::{MatchResult, Pattern, PatternBuilder, PatternId};
