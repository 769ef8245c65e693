//! Multi-head-attention tokenization.
//!
//! The pass runs in two phases. Discovery is read-only: every MatMul, visited in rank order, is
//! tried against the configured motif variants (first success wins), grown by its epilogue and
//! checked for convexity. Non-overlapping islands are then committed one by one, each against a
//! freshly computed [`Enumeration`], and replaced by a single `Subgraph` node.

mod enumerate;
mod fuse;
mod legality;
mod motif;
mod select;

use tracing::debug;

use crate::error::TransformError;
use crate::graph::{Graph, OpKind};
use crate::pass::{GraphPass, PassResult};

use legality::{is_convex, Island};
use motif::Motif;
use select::select_non_overlapping;

pub use enumerate::Enumeration;
pub use fuse::VARIANT_KEY;

/// Accepted shapes of the attention motif.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MhaVariant {
    /// Quantize/Dequantize around both matmuls.
    Quantized,
    /// First MatMul consumes an explicitly transposed K with `transpose_b` set.
    PreTransposed,
    Plain,
}

impl MhaVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            MhaVariant::Quantized => "quantized",
            MhaVariant::PreTransposed => "pre-transposed",
            MhaVariant::Plain => "plain",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TokenizerConfig {
    /// Variants tried per root, in order.
    pub variants: Vec<MhaVariant>,
    /// Upper bound on absorbed Transpose/Dequantize/Convert successors.
    pub max_epilogue: usize,
    /// Clone constant producers into the body instead of exposing them as inputs.
    pub inline_constants: bool,
    /// Export internal values with outside consumers as extra outputs (never for `Quantized`).
    pub allow_intermediate_outputs: bool,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            variants: vec![
                MhaVariant::Quantized,
                MhaVariant::PreTransposed,
                MhaVariant::Plain,
            ],
            max_epilogue: 4,
            inline_constants: true,
            allow_intermediate_outputs: true,
        }
    }
}

pub struct MhaTokenizer {
    config: TokenizerConfig,
    motifs: Vec<Motif>,
}

impl MhaTokenizer {
    const NAME: &'static str = "mha-tokenize";

    pub fn new(config: TokenizerConfig) -> Self {
        let motifs = config.variants.iter().copied().map(Motif::new).collect();
        Self { config, motifs }
    }

    pub fn config(&self) -> &TokenizerConfig {
        &self.config
    }

    /// Returns the legal islands plus the number of motif matches, legal or not.
    fn discover(&self, graph: &Graph, enumeration: &Enumeration) -> (Vec<Island>, usize) {
        let mut islands = Vec::new();
        let mut matches = 0usize;
        for &root in enumeration.order() {
            if graph.kind_of(root) != Some(OpKind::MatMul) {
                continue;
            }
            let Some((motif, matched)) = self
                .motifs
                .iter()
                .find_map(|motif| motif.match_root(graph, root).map(|matched| (motif, matched)))
            else {
                continue;
            };
            matches += 1;
            let Some(island) =
                Island::collect(graph, enumeration, &matched, motif.variant(), &self.config)
            else {
                continue;
            };
            let exports_ok = island
                .boundary(graph)
                .is_ok_and(|boundary| island.exports_allowed(&boundary, &self.config));
            if !exports_ok {
                debug!(%root, variant = motif.variant().as_str(), "skipping: private value escapes");
                continue;
            }
            if !is_convex(graph, enumeration, &island) {
                debug!(%root, variant = motif.variant().as_str(), "skipping: island not convex");
                continue;
            }
            islands.push(island);
        }
        (islands, matches)
    }
}

impl Default for MhaTokenizer {
    fn default() -> Self {
        Self::new(TokenizerConfig::default())
    }
}

impl GraphPass for MhaTokenizer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut Graph) -> Result<PassResult, TransformError> {
        let invariant = |root, err| TransformError::invariant(Self::NAME, root, err);
        let mut enumeration = Enumeration::compute(graph).map_err(|err| invariant(None, err))?;
        let (islands, matches) = self.discover(graph, &enumeration);
        let selection = select_non_overlapping(&islands, &enumeration);

        let mut result = PassResult {
            matches,
            ..PassResult::default()
        };
        for idx in selection.selected {
            let island = &islands[idx];
            if enumeration.is_stale(graph) {
                enumeration = Enumeration::compute(graph).map_err(|err| invariant(None, err))?;
            }
            if !island.is_live(graph) || !is_convex(graph, &enumeration, island) {
                debug!(root = %island.root, "island invalidated by an earlier fusion");
                continue;
            }
            let boundary = island
                .boundary(graph)
                .map_err(|err| invariant(Some(island.root), err))?;
            if !island.exports_allowed(&boundary, &self.config) {
                continue;
            }
            let (_, stats) = fuse::fuse(graph, island, &boundary)
                .map_err(|err| invariant(Some(island.root), err))?;
            result.changed = true;
            result.rewrites_applied += 1;
            result.released_nodes += stats.released;
        }

        debug!(
            matches,
            candidates = islands.len(),
            overlapping = selection.rejected_overlap,
            fused = result.rewrites_applied,
            "tokenizer finished"
        );
        Ok(result)
    }
}
