use tracing::{debug, info, trace, warn};

use crate::env;
use crate::error::TransformError;
use crate::graph::Graph;
use crate::passes::{
    ConstantFoldingPass, FullyConnectedBiasFusion, QuantizedFullyConnectedBiasFusion,
    ReshapeCanonicalizationPass, TransposeCanonicalizationPass, UniqueDecomposition,
};
use crate::tokenizer::MhaTokenizer;

use super::{GraphPass, MatcherPass, MatcherPassRunner, PassResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassManagerConfig {
    /// Upper bound on full sweeps before the run is reported as non-convergent.
    pub max_sweeps: usize,
    /// Log per-pass statistics at `info` after every changing pass.
    pub log_stats: bool,
    /// Dump the graph at `trace` after every changing pass.
    pub dump_graph: bool,
}

impl Default for PassManagerConfig {
    fn default() -> Self {
        Self {
            max_sweeps: env::max_sweeps(),
            log_stats: env::pass_stats_enabled(),
            dump_graph: env::dump_graph_enabled(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub sweeps: usize,
    /// Accumulated result per registered pass, in registration order.
    pub per_pass: Vec<(&'static str, PassResult)>,
    pub total: PassResult,
}

impl RunStats {
    pub fn pass(&self, name: &str) -> Option<&PassResult> {
        self.per_pass
            .iter()
            .find(|(pass, _)| *pass == name)
            .map(|(_, result)| result)
    }
}

/// Runs registered passes in order until a full sweep changes nothing.
pub struct PassManager {
    passes: Vec<Box<dyn GraphPass>>,
    config: PassManagerConfig,
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PassManager {
    pub fn new() -> Self {
        Self::with_config(PassManagerConfig::default())
    }

    pub fn with_config(config: PassManagerConfig) -> Self {
        Self {
            passes: Vec::new(),
            config,
        }
    }

    pub fn config(&self) -> &PassManagerConfig {
        &self.config
    }

    pub fn register<P>(&mut self, pass: P) -> &mut Self
    where
        P: GraphPass + 'static,
    {
        self.passes.push(Box::new(pass));
        self
    }

    pub fn register_matcher<P>(&mut self, pass: P) -> &mut Self
    where
        P: MatcherPass + 'static,
    {
        self.register(MatcherPassRunner::new(pass))
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn pass_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.passes.iter().map(|pass| pass.name())
    }

    /// Drives the registered passes to a fixed point.
    ///
    /// Mutations of one pass are visible to every later pass of the same sweep. The graph is
    /// validated after each pass that reports a change; a violation aborts the run.
    pub fn run(&self, graph: &mut Graph) -> Result<RunStats, TransformError> {
        let max_sweeps = self.config.max_sweeps.max(1);
        let mut stats = RunStats {
            sweeps: 0,
            per_pass: self
                .passes
                .iter()
                .map(|pass| (pass.name(), PassResult::default()))
                .collect(),
            total: PassResult::default(),
        };

        let mut still_changing = Vec::new();
        for sweep in 1..=max_sweeps {
            stats.sweeps = sweep;
            let mut changed = Vec::new();
            for (idx, pass) in self.passes.iter().enumerate() {
                let result = pass.run(graph)?;
                stats.per_pass[idx].1 = stats.per_pass[idx].1.merge(result);
                stats.total = stats.total.merge(result);
                if !result.changed {
                    continue;
                }
                graph
                    .validate()
                    .map_err(|err| TransformError::invariant(pass.name(), None, err))?;
                changed.push(pass.name().to_string());
                if self.config.log_stats {
                    info!(
                        pass = pass.name(),
                        sweep,
                        matches = result.matches,
                        rewrites = result.rewrites_applied,
                        released = result.released_nodes,
                        nodes = graph.len(),
                        "pass changed graph"
                    );
                }
                if self.config.dump_graph {
                    trace!(pass = pass.name(), sweep, "graph after pass:\n{graph}");
                }
            }
            if changed.is_empty() {
                debug!(sweeps = sweep, "pass manager converged");
                return Ok(stats);
            }
            still_changing = changed;
        }

        warn!(
            sweeps = max_sweeps,
            changed = ?still_changing,
            "pass manager did not converge"
        );
        Err(TransformError::NonConvergence {
            sweeps: max_sweeps,
            changed: still_changing,
        })
    }
}

/// Canonicalization, folding, fusion, decomposition and MHA tokenization, in that order.
pub fn default_pipeline() -> PassManager {
    let mut manager = PassManager::new();
    manager
        .register(TransposeCanonicalizationPass::default())
        .register(ReshapeCanonicalizationPass::default())
        .register_matcher(ConstantFoldingPass::new())
        .register_matcher(QuantizedFullyConnectedBiasFusion::new())
        .register_matcher(FullyConnectedBiasFusion::new())
        .register_matcher(UniqueDecomposition::new())
        .register(MhaTokenizer::default());
    manager
}
