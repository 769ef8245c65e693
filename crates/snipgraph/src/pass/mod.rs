//! Pass infrastructure.
//!
//! - [`GraphPass`] is the single interface the [`PassManager`] drives.
//! - [`MatcherPass`] couples one [`Pattern`] with a rewrite callback; [`MatcherPassRunner`] turns
//!   it into a [`GraphPass`] that visits every candidate root once per run.

mod manager;

use tracing::debug;

use crate::error::{GraphError, TransformError};
use crate::graph::{Graph, NodeId, Operation, OutputRef, OutputSpec};
use crate::pattern::{MatchResult, Pattern, PatternId};
use crate::rewrite::{RewriteRegistry, StagedId, ValueRef};

pub use manager::{default_pipeline, PassManager, PassManagerConfig, RunStats};

/// Result returned by a [`GraphPass`] after it runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassResult {
    /// Whether the pass changed the graph.
    pub changed: bool,
    /// Number of successful pattern matches, whether or not a rewrite followed.
    pub matches: usize,
    /// Number of committed rewrites.
    pub rewrites_applied: usize,
    /// Nodes released as a consequence of the rewrites.
    pub released_nodes: usize,
}

impl PassResult {
    /// Merges two run results, accumulating statistics.
    pub fn merge(self, other: PassResult) -> PassResult {
        PassResult {
            changed: self.changed || other.changed,
            matches: self.matches + other.matches,
            rewrites_applied: self.rewrites_applied + other.rewrites_applied,
            released_nodes: self.released_nodes + other.released_nodes,
        }
    }
}

/// Canonical interface implemented by every transformation.
pub trait GraphPass: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, graph: &mut Graph) -> Result<PassResult, TransformError>;
}

/// State handed to a [`MatcherPass`] callback: a read-only graph, the match and a fresh registry.
pub struct RewriteContext<'a> {
    graph: &'a Graph,
    matched: &'a MatchResult,
    registry: RewriteRegistry,
}

impl<'a> RewriteContext<'a> {
    pub fn new(graph: &'a Graph, matched: &'a MatchResult) -> Self {
        Self {
            graph,
            matched,
            registry: RewriteRegistry::new(),
        }
    }

    pub fn graph(&self) -> &'a Graph {
        self.graph
    }

    pub fn matched(&self) -> &'a MatchResult {
        self.matched
    }

    pub fn registry(&mut self) -> &mut RewriteRegistry {
        &mut self.registry
    }

    /// Output bound to `placeholder`; `None` when an optional placeholder was skipped.
    pub fn output(&self, placeholder: PatternId) -> Option<OutputRef> {
        self.matched.get(placeholder)
    }

    pub fn node(&self, placeholder: PatternId) -> Option<NodeId> {
        self.matched.node(placeholder)
    }

    pub fn op(&self, placeholder: PatternId) -> Option<&'a Operation> {
        let graph = self.graph;
        graph.get(self.matched.node(placeholder)?).map(|node| node.op())
    }

    /// Spec of a graph or staged value.
    pub fn spec(&self, value: impl Into<ValueRef>) -> Option<&OutputSpec> {
        self.registry.spec(self.graph, value.into())
    }

    pub fn make(&mut self, op: Operation, inputs: &[ValueRef]) -> Result<StagedId, GraphError> {
        self.registry.make(self.graph, op, inputs)
    }

    pub fn make_value(&mut self, op: Operation, inputs: &[ValueRef]) -> Result<ValueRef, GraphError> {
        self.registry.make_value(self.graph, op, inputs)
    }

    pub fn replace(&mut self, from: OutputRef, to: impl Into<ValueRef>) {
        self.registry.replace(from, to);
    }

    pub fn into_registry(self) -> RewriteRegistry {
        self.registry
    }
}

/// One pattern plus one rewrite callback.
///
/// The callback returns `true` only when it scheduled at least one replacement; returning
/// `false` discards everything staged in the context.
pub trait MatcherPass: Send + Sync {
    fn name(&self) -> &'static str;
    fn pattern(&self) -> &Pattern;
    fn callback(&self, cx: &mut RewriteContext<'_>) -> bool;
}

/// Adapter running a [`MatcherPass`] as a [`GraphPass`].
pub struct MatcherPassRunner<P> {
    pass: P,
}

impl<P: MatcherPass> MatcherPassRunner<P> {
    pub fn new(pass: P) -> Self {
        Self { pass }
    }

    pub fn inner(&self) -> &P {
        &self.pass
    }
}

impl<P: MatcherPass> GraphPass for MatcherPassRunner<P> {
    fn name(&self) -> &'static str {
        self.pass.name()
    }

    fn run(&self, graph: &mut Graph) -> Result<PassResult, TransformError> {
        run_matcher_pass(&self.pass, graph)
    }
}

/// Visits a topological snapshot of the graph once, rewriting every root the pattern accepts.
///
/// Nodes released by an earlier rewrite in the same traversal are skipped. Matched nodes stay
/// pinned while the callback runs so a commit cannot recycle their slots under the matcher.
pub fn run_matcher_pass(
    pass: &dyn MatcherPass,
    graph: &mut Graph,
) -> Result<PassResult, TransformError> {
    let name = pass.name();
    let pattern = pass.pattern();
    let root_kinds = pattern.root_kinds();
    let order = graph
        .topological_order()
        .map_err(|err| TransformError::invariant(name, None, err))?;

    let mut result = PassResult::default();
    for root in order {
        let Some(kind) = graph.kind_of(root) else {
            continue;
        };
        if root_kinds
            .as_ref()
            .is_some_and(|kinds| !kinds.contains(&kind))
        {
            continue;
        }
        let Some(matched) = pattern.match_node(graph, root) else {
            continue;
        };
        result.matches += 1;

        let pinned = matched.matched_nodes();
        for node in &pinned {
            graph
                .pin(*node)
                .map_err(|err| TransformError::invariant(name, Some(root), err))?;
        }
        let registry = {
            let mut cx = RewriteContext::new(graph, &matched);
            let accepted = pass.callback(&mut cx);
            accepted.then(|| cx.into_registry())
        };
        let committed = match registry {
            Some(registry) if !registry.is_empty() => Some(graph.commit(registry)),
            _ => None,
        };
        let mut released = 0usize;
        let mut unpin_error = None;
        for node in &pinned {
            match graph.unpin(*node) {
                Ok(count) => released += count,
                Err(err) => {
                    unpin_error.get_or_insert(err);
                }
            }
        }

        match committed {
            Some(Ok(stats)) => {
                result.changed = true;
                result.rewrites_applied += 1;
                released += stats.released;
            }
            Some(Err(err)) => return Err(TransformError::invariant(name, Some(root), err)),
            None => {}
        }
        if let Some(err) = unpin_error {
            return Err(TransformError::invariant(name, Some(root), err));
        }
        result.released_nodes += released;
    }

    debug!(
        pass = name,
        matches = result.matches,
        rewrites = result.rewrites_applied,
        released = result.released_nodes,
        "matcher pass finished"
    );
    Ok(result)
}
