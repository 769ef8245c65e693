//! Attention motifs, one pattern per variant, all rooted at the second MatMul.

use crate::graph::{Graph, NodeId, OpKind, Operation};
use crate::pattern::predicate::{has_static_rank, is_float, op_matches};
use crate::pattern::{MatchResult, Pattern, PatternBuilder, PatternId, Predicate};

use super::MhaVariant;

#[derive(Debug, Clone)]
pub(crate) struct Motif {
    variant: MhaVariant,
    pattern: Pattern,
}

impl Motif {
    pub(crate) fn new(variant: MhaVariant) -> Self {
        let pattern = match variant {
            MhaVariant::Quantized => quantized(),
            MhaVariant::PreTransposed => floating(true),
            MhaVariant::Plain => floating(false),
        };
        Self { variant, pattern }
    }

    pub(crate) fn variant(&self) -> MhaVariant {
        self.variant
    }

    pub(crate) fn match_root(&self, graph: &Graph, root: NodeId) -> Option<MatchResult> {
        self.pattern.match_node(graph, root)
    }
}

fn softmax_last_axis() -> Predicate {
    Predicate::new("softmax_last_axis", |graph, output| {
        let (Some(node), Some(spec)) = (graph.get(output.node), graph.output_spec(output)) else {
            return false;
        };
        let (Operation::Softmax { axis }, Some(rank)) = (node.op(), spec.shape.rank()) else {
            return false;
        };
        rank > 0 && spec.shape.normalize_axis(*axis) == Some(rank - 1)
    })
}

/// Longest run of chain ops accepted between the first MatMul and Softmax.
const PRE_SOFTMAX_STEPS: usize = 4;
/// Longest run of chain ops accepted between Softmax and the second MatMul.
const POST_SOFTMAX_STEPS: usize = 2;

const ELTWISE_KINDS: [OpKind; 3] = [OpKind::Add, OpKind::Subtract, OpKind::Multiply];

/// Up to `steps` elementwise, Select or Reshape ops stacked on `base`, in any order.
///
/// Every step either consumes one more op, with the chain on any data operand, or ends the run at
/// `base`. Operands off the chain bind as plain inputs.
fn chain(p: &mut PatternBuilder, base: PatternId, steps: usize) -> PatternId {
    let mut inner = base;
    for _ in 0..steps {
        let mut branches = Vec::with_capacity(6);
        let side = p.any_input();
        branches.push(p.wrap_type(&ELTWISE_KINDS, &[inner, side]));
        let side = p.any_input();
        branches.push(p.wrap_type(&ELTWISE_KINDS, &[side, inner]));
        let (condition, other) = (p.any_input(), p.any_input());
        branches.push(p.wrap_type(&[OpKind::Select], &[condition, inner, other]));
        let (condition, other) = (p.any_input(), p.any_input());
        branches.push(p.wrap_type(&[OpKind::Select], &[condition, other, inner]));
        branches.push(p.wrap_type(&[OpKind::Reshape], &[inner]));
        branches.push(base);
        inner = p.or(&branches);
    }
    inner
}

/// `chain -> Softmax(last axis) -> chain` over `scores`.
fn softmax_chain(p: &mut PatternBuilder, scores: PatternId) -> PatternId {
    let pre = chain(p, scores, PRE_SOFTMAX_STEPS);
    let softmax = p.wrap_type_with(&[OpKind::Softmax], &[pre], softmax_last_axis());
    chain(p, softmax, POST_SOFTMAX_STEPS)
}

fn optional_transpose(p: &mut PatternBuilder) -> PatternId {
    let source = p.any_input();
    p.optional(&[OpKind::Transpose], &[source])
}

fn floating(pre_transposed: bool) -> Pattern {
    let mut p = Pattern::builder();
    let q = optional_transpose(&mut p);
    let k_source = p.any_input();
    let k_transposed = if pre_transposed {
        p.wrap_type(&[OpKind::Transpose], &[k_source])
    } else {
        p.optional(&[OpKind::Transpose], &[k_source])
    };
    let k_scale = p.any_input();
    let k = p.optional(&[OpKind::Multiply], &[k_transposed, k_scale]);

    let mut guard = is_float().and(has_static_rank());
    if pre_transposed {
        guard = guard.and(op_matches("transpose_b", |op| {
            matches!(op, Operation::MatMul { transpose_b: true, .. })
        }));
    }
    let scores = p.wrap_type_with(&[OpKind::MatMul], &[q, k], guard);
    let probs = softmax_chain(&mut p, scores);
    let v = optional_transpose(&mut p);
    let context = p.wrap_type_with(
        &[OpKind::MatMul],
        &[probs, v],
        is_float().and(has_static_rank()),
    );
    p.finish(context)
}

/// `opt Transpose(Quantize(x))`.
fn quantized_operand(p: &mut PatternBuilder) -> PatternId {
    let source = p.any_input();
    let quantized = p.wrap_type(&[OpKind::Quantize], &[source]);
    p.optional(&[OpKind::Transpose], &[quantized])
}

fn quantized() -> Pattern {
    let mut p = Pattern::builder();
    let q = quantized_operand(&mut p);
    let k = quantized_operand(&mut p);
    let scores = p.wrap_type_with(&[OpKind::MatMul], &[q, k], has_static_rank());
    let dequantized = p.wrap_type(&[OpKind::Dequantize], &[scores]);
    let probs = softmax_chain(&mut p, dequantized);
    let requantized = p.wrap_type(&[OpKind::Quantize], &[probs]);
    let v = quantized_operand(&mut p);
    let context = p.wrap_type_with(&[OpKind::MatMul], &[requantized, v], has_static_rank());
    p.finish(context)
}
