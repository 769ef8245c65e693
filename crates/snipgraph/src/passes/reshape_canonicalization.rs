use crate::error::{GraphError, TransformError};
use crate::graph::{Graph, OpKind, Operation};
use crate::pass::{run_matcher_pass, GraphPass, MatcherPass, PassResult, RewriteContext};
use crate::pattern::predicate::op_matches;
use crate::pattern::{Pattern, PatternId};

use super::accept;

/// Remove reshapes that do not change the logical shape.
pub struct EliminateIdentityReshape {
    pattern: Pattern,
    source: PatternId,
    reshape: PatternId,
}

impl EliminateIdentityReshape {
    pub fn new() -> Self {
        let mut p = Pattern::builder();
        let source = p.any_input();
        let reshape = p.wrap_type(&[OpKind::Reshape], &[source]);
        Self {
            pattern: p.finish(reshape),
            source,
            reshape,
        }
    }
}

impl Default for EliminateIdentityReshape {
    fn default() -> Self {
        Self::new()
    }
}

impl MatcherPass for EliminateIdentityReshape {
    fn name(&self) -> &'static str {
        "eliminate-identity-reshape"
    }

    fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    fn callback(&self, cx: &mut RewriteContext<'_>) -> bool {
        let (Some(source), Some(result)) = (cx.output(self.source), cx.output(self.reshape)) else {
            return false;
        };
        let graph = cx.graph();
        let (Some(input_spec), Some(result_spec)) =
            (graph.output_spec(source), graph.output_spec(result))
        else {
            return false;
        };
        if !input_spec.shape.is_static() || input_spec != result_spec {
            return false;
        }
        cx.replace(result, source);
        true
    }
}

/// Fold reshape chains into a single reshape from the original source to the final shape.
pub struct CollapseReshapeChain {
    pattern: Pattern,
    source: PatternId,
    outer: PatternId,
}

impl CollapseReshapeChain {
    pub fn new() -> Self {
        let mut p = Pattern::builder();
        let source = p.any_input();
        let inner = p.wrap_type(&[OpKind::Reshape], &[source]);
        // A zero copied from the inner shape cannot be re-targeted at the chain source.
        let outer = p.wrap_type_with(
            &[OpKind::Reshape],
            &[inner],
            op_matches("no_special_zero", |op| {
                matches!(
                    op,
                    Operation::Reshape { target, special_zero }
                        if !*special_zero || !target.contains(&0)
                )
            }),
        );
        Self {
            pattern: p.finish(outer),
            source,
            outer,
        }
    }

    fn try_rewrite(&self, cx: &mut RewriteContext<'_>) -> Result<bool, GraphError> {
        let (Some(source), Some(result)) = (cx.output(self.source), cx.output(self.outer)) else {
            return Ok(false);
        };
        let Some(Operation::Reshape { target, .. }) = cx.op(self.outer) else {
            return Ok(false);
        };
        let folded = cx.make(
            Operation::Reshape {
                target: target.clone(),
                special_zero: false,
            },
            &[source.into()],
        )?;
        let (Some(folded_spec), Some(result_spec)) = (cx.spec(folded.output(0)), cx.spec(result))
        else {
            return Ok(false);
        };
        // Only fold when the direct reshape infers the same output.
        if folded_spec != result_spec {
            return Ok(false);
        }
        if let Some(outer) = cx.node(self.outer) {
            cx.registry().copy_runtime_info_from(&[outer]);
        }
        cx.replace(result, folded.output(0));
        Ok(true)
    }
}

impl Default for CollapseReshapeChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MatcherPass for CollapseReshapeChain {
    fn name(&self) -> &'static str {
        "collapse-reshape-chain"
    }

    fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    fn callback(&self, cx: &mut RewriteContext<'_>) -> bool {
        accept(self.name(), self.try_rewrite(cx))
    }
}

/// Canonical reshape simplifications (identity removal, chain folding).
#[derive(Default)]
pub struct ReshapeCanonicalizationPass {
    identity: EliminateIdentityReshape,
    chain: CollapseReshapeChain,
}

impl ReshapeCanonicalizationPass {
    const NAME: &'static str = "reshape-canonicalize";
}

impl GraphPass for ReshapeCanonicalizationPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut Graph) -> Result<PassResult, TransformError> {
        let identity = run_matcher_pass(&self.identity, graph)?;
        let chain = run_matcher_pass(&self.chain, graph)?;
        Ok(identity.merge(chain))
    }
}
