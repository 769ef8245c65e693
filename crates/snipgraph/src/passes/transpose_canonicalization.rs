use crate::error::{GraphError, TransformError};
use crate::graph::{is_identity_perm, Graph, OpKind, Operation};
use crate::pass::{run_matcher_pass, GraphPass, MatcherPass, PassResult, RewriteContext};
use crate::pattern::predicate::op_matches;
use crate::pattern::{Pattern, PatternId};

use super::accept;

fn compose_perms(first: &[usize], second: &[usize]) -> Option<Vec<usize>> {
    if first.len() != second.len() {
        return None;
    }
    let mut result = Vec::with_capacity(first.len());
    for &axis in second {
        if axis >= first.len() {
            return None;
        }
        result.push(first[axis]);
    }
    Some(result)
}

fn perm_of(op: Option<&Operation>) -> Option<&[usize]> {
    match op? {
        Operation::Transpose { perm } => Some(perm),
        _ => None,
    }
}

/// Remove transposes that keep axes in place.
pub struct EliminateIdentityTranspose {
    pattern: Pattern,
    source: PatternId,
    transpose: PatternId,
}

impl EliminateIdentityTranspose {
    pub fn new() -> Self {
        let mut p = Pattern::builder();
        let source = p.any_input();
        let transpose = p.wrap_type_with(
            &[OpKind::Transpose],
            &[source],
            op_matches("identity_perm", |op| {
                matches!(op, Operation::Transpose { perm } if is_identity_perm(perm))
            }),
        );
        Self {
            pattern: p.finish(transpose),
            source,
            transpose,
        }
    }
}

impl Default for EliminateIdentityTranspose {
    fn default() -> Self {
        Self::new()
    }
}

impl MatcherPass for EliminateIdentityTranspose {
    fn name(&self) -> &'static str {
        "eliminate-identity-transpose"
    }

    fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    fn callback(&self, cx: &mut RewriteContext<'_>) -> bool {
        let (Some(source), Some(result)) = (cx.output(self.source), cx.output(self.transpose))
        else {
            return false;
        };
        cx.replace(result, source);
        true
    }
}

/// Fold transpose(transpose(x, p1), p2) -> transpose(x, p1∘p2).
pub struct CollapseTransposeChain {
    pattern: Pattern,
    source: PatternId,
    inner: PatternId,
    outer: PatternId,
}

impl CollapseTransposeChain {
    pub fn new() -> Self {
        let mut p = Pattern::builder();
        let source = p.any_input();
        let inner = p.wrap_type(&[OpKind::Transpose], &[source]);
        let outer = p.wrap_type(&[OpKind::Transpose], &[inner]);
        Self {
            pattern: p.finish(outer),
            source,
            inner,
            outer,
        }
    }

    fn try_rewrite(&self, cx: &mut RewriteContext<'_>) -> Result<bool, GraphError> {
        let (Some(source), Some(result)) = (cx.output(self.source), cx.output(self.outer)) else {
            return Ok(false);
        };
        let (Some(inner_perm), Some(outer_perm)) =
            (perm_of(cx.op(self.inner)), perm_of(cx.op(self.outer)))
        else {
            return Ok(false);
        };
        // Compose permutations: first inner, then outer.
        let Some(composed) = compose_perms(inner_perm, outer_perm) else {
            return Ok(false);
        };

        // If composition becomes identity, drop both transposes.
        if is_identity_perm(&composed) {
            cx.replace(result, source);
            return Ok(true);
        }

        let folded = cx.make(Operation::Transpose { perm: composed }, &[source.into()])?;
        let sources = [cx.node(self.inner), cx.node(self.outer)]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();
        cx.registry().copy_runtime_info_from(&sources);
        cx.replace(result, folded.output(0));
        Ok(true)
    }
}

impl Default for CollapseTransposeChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MatcherPass for CollapseTransposeChain {
    fn name(&self) -> &'static str {
        "collapse-transpose-chain"
    }

    fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    fn callback(&self, cx: &mut RewriteContext<'_>) -> bool {
        accept(self.name(), self.try_rewrite(cx))
    }
}

/// Canonical transpose simplifications (identity removal, chain folding).
#[derive(Default)]
pub struct TransposeCanonicalizationPass {
    identity: EliminateIdentityTranspose,
    chain: CollapseTransposeChain,
}

impl TransposeCanonicalizationPass {
    const NAME: &'static str = "transpose-canonicalize";
}

impl GraphPass for TransposeCanonicalizationPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut Graph) -> Result<PassResult, TransformError> {
        let identity = run_matcher_pass(&self.identity, graph)?;
        let chain = run_matcher_pass(&self.chain, graph)?;
        Ok(identity.merge(chain))
    }
}
