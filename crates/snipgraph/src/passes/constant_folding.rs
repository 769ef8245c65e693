use crate::error::GraphError;
use crate::graph::{try_fold, OpKind, Operation};
use crate::pass::{MatcherPass, RewriteContext};
use crate::pattern::{Pattern, PatternId, Predicate};

use super::accept;

const FOLDABLE: [OpKind; 8] = [
    OpKind::Add,
    OpKind::Subtract,
    OpKind::Multiply,
    OpKind::Reshape,
    OpKind::Transpose,
    OpKind::Squeeze,
    OpKind::Unsqueeze,
    OpKind::Convert,
];

/// Replaces a foldable node fed only by constants with the folded constant.
pub struct ConstantFoldingPass {
    pattern: Pattern,
    root: PatternId,
}

impl ConstantFoldingPass {
    pub fn new() -> Self {
        let mut p = Pattern::builder();
        let root = p.wrap_type_with(
            &FOLDABLE,
            &[],
            Predicate::new("constant_inputs", |graph, output| {
                graph.get(output.node).is_some_and(|node| {
                    node.inputs()
                        .iter()
                        .all(|input| graph.kind_of(input.node) == Some(OpKind::Constant))
                })
            }),
        );
        Self {
            pattern: p.finish(root),
            root,
        }
    }

    fn try_rewrite(&self, cx: &mut RewriteContext<'_>) -> Result<bool, GraphError> {
        let graph = cx.graph();
        let (Some(root), Some(node)) = (cx.node(self.root), cx.op(self.root)) else {
            return Ok(false);
        };
        let mut operands = Vec::new();
        for input in graph.node(root)?.inputs() {
            match graph.node(input.node)?.op().as_constant() {
                Some(value) => operands.push(value),
                None => return Ok(false),
            }
        }
        let Some(folded) = try_fold(node, &operands) else {
            return Ok(false);
        };
        let constant = cx.make(Operation::Constant(folded), &[])?;
        cx.registry().copy_runtime_info_from(&[root]);
        cx.replace(root.output(0), constant.output(0));
        Ok(true)
    }
}

impl Default for ConstantFoldingPass {
    fn default() -> Self {
        Self::new()
    }
}

impl MatcherPass for ConstantFoldingPass {
    fn name(&self) -> &'static str {
        "constant-folding"
    }

    fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    fn callback(&self, cx: &mut RewriteContext<'_>) -> bool {
        accept(self.name(), self.try_rewrite(cx))
    }
}
