//! Staged rewrites.
//!
//! A callback builds new nodes in a [`RewriteRegistry`], schedules replacements of existing
//! outputs, and hands the registry to [`Graph::commit`](crate::graph::Graph::commit). The commit
//! validates liveness, element types and acyclicity before touching the graph, so a rejected
//! rewrite leaves no trace.

mod commit;
mod registry;

pub use commit::CommitStats;
pub use registry::{RewriteRegistry, StagedId, ValueRef};
