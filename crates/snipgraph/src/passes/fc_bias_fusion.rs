//! Folds a constant bias addition into the preceding `FullyConnected`.
//!
//! Two shapes are recognised: `FC(x, W) + b` and the dequantized `FC(x, W) * s + b`. The
//! latter keeps the rescale after the fused node, yielding `FC(x, W, b) * s`.

use crate::error::GraphError;
use crate::graph::{try_fold, Dimension, Graph, NodeId, OpKind, Operation, OutputRef};
use crate::pass::{MatcherPass, RewriteContext};
use crate::pattern::predicate::{consumers_count, has_static_rank, has_static_shape};
use crate::pattern::{Pattern, PatternBuilder, PatternId};
use crate::rewrite::ValueRef;

use super::accept;

/// Placeholders shared by both fusion patterns.
struct FcOperands {
    input: PatternId,
    weights: PatternId,
    fc: PatternId,
}

fn fc_operands(p: &mut PatternBuilder) -> FcOperands {
    let input = p.any_input();
    let weights = p.any_input_with(has_static_shape());
    let fc = p.wrap_type_with(
        &[OpKind::FullyConnected],
        &[input, weights],
        consumers_count(1).and(has_static_rank()),
    );
    FcOperands { input, weights, fc }
}

/// Validates the bias against the FC output and returns it as a 1-D value.
///
/// The bias must be a constant whose trailing extent equals both the FC output's last static
/// extent and its own element count. With `per_channel`, at most one extent may exceed one.
fn stage_bias(
    cx: &mut RewriteContext<'_>,
    fc_output: OutputRef,
    bias: OutputRef,
    per_channel: bool,
) -> Result<Option<ValueRef>, GraphError> {
    let graph: &Graph = cx.graph();
    let Some(value) = graph.node(bias.node)?.op().as_constant() else {
        return Ok(None);
    };
    let Some(output_dims) = graph
        .output_spec(fc_output)
        .and_then(|spec| spec.shape.dims())
    else {
        return Ok(None);
    };
    let Some(Dimension::Static(channels)) = output_dims.last().copied() else {
        return Ok(None);
    };

    let bias_shape = value.shape();
    let bias_size = value.len();
    if per_channel {
        let wide_axes = bias_shape.iter().filter(|dim| **dim > 1).count();
        if bias_size != 1 && wide_axes != 1 {
            return Ok(None);
        }
    }
    match bias_shape.last() {
        Some(&last) if last == channels && last == bias_size => {}
        _ => return Ok(None),
    }

    if bias_shape.len() < 2 {
        return Ok(Some(bias.into()));
    }
    let flatten = Operation::Reshape {
        target: vec![-1],
        special_zero: true,
    };
    let flat = match try_fold(&flatten, &[value]) {
        Some(folded) => cx.make_value(Operation::Constant(folded), &[])?,
        None => cx.make_value(flatten, &[bias.into()])?,
    };
    Ok(Some(flat))
}

fn required(cx: &RewriteContext<'_>, placeholders: &[PatternId]) -> Option<Vec<OutputRef>> {
    placeholders.iter().map(|id| cx.output(*id)).collect()
}

fn node_name(graph: &Graph, id: NodeId) -> Result<String, GraphError> {
    Ok(graph.node(id)?.name().to_string())
}

/// `FC(x, W) + b` with a constant `b` → `FC(x, W, b)`.
pub struct FullyConnectedBiasFusion {
    pattern: Pattern,
    fc: FcOperands,
    bias: PatternId,
    add: PatternId,
}

impl FullyConnectedBiasFusion {
    pub fn new() -> Self {
        let mut p = Pattern::builder();
        let fc = fc_operands(&mut p);
        let bias = p.any_input_with(has_static_shape());
        let add = p.wrap_type(&[OpKind::Add], &[fc.fc, bias]);
        Self {
            pattern: p.finish(add),
            fc,
            bias,
            add,
        }
    }

    fn try_rewrite(&self, cx: &mut RewriteContext<'_>) -> Result<bool, GraphError> {
        let Some(values) = required(
            cx,
            &[self.fc.input, self.fc.weights, self.fc.fc, self.bias, self.add],
        ) else {
            return Ok(false);
        };
        let [input, weights, fc, bias, add] = values[..] else {
            return Ok(false);
        };
        let Some(final_bias) = stage_bias(cx, fc, bias, false)? else {
            return Ok(false);
        };

        let fused = cx.make(
            Operation::FullyConnected,
            &[input.into(), weights.into(), final_bias],
        )?;
        let name = node_name(cx.graph(), add.node)?;
        cx.registry().set_friendly_name(fused, name)?;
        cx.registry().copy_runtime_info_from(&[fc.node, add.node]);
        cx.replace(add, fused.output(0));
        Ok(true)
    }
}

impl Default for FullyConnectedBiasFusion {
    fn default() -> Self {
        Self::new()
    }
}

impl MatcherPass for FullyConnectedBiasFusion {
    fn name(&self) -> &'static str {
        "fc-bias-fusion"
    }

    fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    fn callback(&self, cx: &mut RewriteContext<'_>) -> bool {
        accept(self.name(), self.try_rewrite(cx))
    }
}

/// `FC(x, W) * s + b` with a per-channel or per-tensor constant `b` → `FC(x, W, b) * s`.
pub struct QuantizedFullyConnectedBiasFusion {
    pattern: Pattern,
    fc: FcOperands,
    scale: PatternId,
    mul: PatternId,
    bias: PatternId,
    add: PatternId,
}

impl QuantizedFullyConnectedBiasFusion {
    pub fn new() -> Self {
        let mut p = Pattern::builder();
        let fc = fc_operands(&mut p);
        let scale = p.any_input_with(has_static_shape());
        let mul = p.wrap_type(&[OpKind::Multiply], &[fc.fc, scale]);
        let bias = p.any_input_with(has_static_shape());
        let add = p.wrap_type(&[OpKind::Add], &[mul, bias]);
        Self {
            pattern: p.finish(add),
            fc,
            scale,
            mul,
            bias,
            add,
        }
    }

    fn try_rewrite(&self, cx: &mut RewriteContext<'_>) -> Result<bool, GraphError> {
        let Some(values) = required(
            cx,
            &[
                self.fc.input,
                self.fc.weights,
                self.fc.fc,
                self.scale,
                self.mul,
                self.bias,
                self.add,
            ],
        ) else {
            return Ok(false);
        };
        let [input, weights, fc, scale, mul, bias, add] = values[..] else {
            return Ok(false);
        };
        let Some(final_bias) = stage_bias(cx, fc, bias, true)? else {
            return Ok(false);
        };

        let fused = cx.make_value(
            Operation::FullyConnected,
            &[input.into(), weights.into(), final_bias],
        )?;
        let rescaled = cx.make(Operation::Multiply, &[fused, scale.into()])?;
        let name = node_name(cx.graph(), add.node)?;
        cx.registry().set_friendly_name(rescaled, name)?;
        cx.registry()
            .copy_runtime_info_from(&[fc.node, mul.node, add.node]);
        cx.replace(add, rescaled.output(0));
        Ok(true)
    }
}

impl Default for QuantizedFullyConnectedBiasFusion {
    fn default() -> Self {
        Self::new()
    }
}

impl MatcherPass for QuantizedFullyConnectedBiasFusion {
    fn name(&self) -> &'static str {
        "quantized-fc-bias-fusion"
    }

    fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    fn callback(&self, cx: &mut RewriteContext<'_>) -> bool {
        accept(self.name(), self.try_rewrite(cx))
    }
}
