//! Per-kind capability table: accepted input counts plus shape/type inference.
//!
//! The standard table covers every [`OpKind`]. Callers that need different rules build their own
//! table from [`CapabilityTable::standard`], override entries with [`CapabilityTable::register`]
//! and hand it to [`Graph::with_capabilities`](super::Graph::with_capabilities).

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, ensure, Context};
use once_cell::sync::Lazy;

use super::op::{OpKind, Operation};
use super::types::{normalize_axis, Dimension, ElementType, OutputSpec, PartialShape};

/// Shape/type inference rule: input specs in, one spec per output out.
pub type InferFn = fn(&Operation, &[OutputSpec]) -> anyhow::Result<Vec<OutputSpec>>;

#[derive(Debug, Clone, Copy)]
pub struct Capability {
    pub min_inputs: usize,
    /// `None` means unbounded.
    pub max_inputs: Option<usize>,
    pub infer: InferFn,
}

impl Capability {
    pub const fn new(min_inputs: usize, max_inputs: Option<usize>, infer: InferFn) -> Self {
        Self {
            min_inputs,
            max_inputs,
            infer,
        }
    }

    const fn exact(count: usize, infer: InferFn) -> Self {
        Self::new(count, Some(count), infer)
    }

    pub fn accepts_inputs(&self, count: usize) -> bool {
        count >= self.min_inputs && self.max_inputs.map_or(true, |max| count <= max)
    }

    pub(crate) fn arity_description(&self) -> String {
        match self.max_inputs {
            Some(max) if max == self.min_inputs => max.to_string(),
            Some(max) => format!("{}..={}", self.min_inputs, max),
            None => format!("at least {}", self.min_inputs),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CapabilityTable {
    entries: HashMap<OpKind, Capability>,
}

static STANDARD: Lazy<Arc<CapabilityTable>> = Lazy::new(|| Arc::new(build_standard()));

impl CapabilityTable {
    /// Shared handle to the built-in table.
    pub fn standard() -> Arc<CapabilityTable> {
        Arc::clone(&STANDARD)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Installs `capability` for `kind`, returning the entry it replaced.
    pub fn register(&mut self, kind: OpKind, capability: Capability) -> Option<Capability> {
        self.entries.insert(kind, capability)
    }

    pub fn get(&self, kind: OpKind) -> Option<&Capability> {
        self.entries.get(&kind)
    }
}

fn build_standard() -> CapabilityTable {
    let mut table = CapabilityTable::empty();
    for kind in OpKind::ALL {
        let capability = match kind {
            OpKind::Parameter => Capability::exact(0, infer_parameter),
            OpKind::Constant => Capability::exact(0, infer_constant),
            OpKind::Result => Capability::exact(1, infer_result),
            OpKind::Add | OpKind::Subtract | OpKind::Multiply => {
                Capability::exact(2, infer_arithmetic)
            }
            OpKind::Equal | OpKind::NotEqual => Capability::exact(2, infer_comparison),
            OpKind::MatMul => Capability::exact(2, infer_matmul),
            OpKind::FullyConnected => Capability::new(2, Some(3), infer_fully_connected),
            OpKind::Transpose => Capability::exact(1, infer_transpose),
            OpKind::Reshape => Capability::exact(1, infer_reshape),
            OpKind::Softmax => Capability::exact(1, infer_softmax),
            OpKind::Convert => Capability::exact(1, infer_convert),
            OpKind::Quantize => Capability::exact(1, infer_quantize),
            OpKind::Dequantize => Capability::exact(1, infer_dequantize),
            OpKind::Unique => Capability::exact(1, infer_unique),
            OpKind::ShapeOf => Capability::exact(1, infer_shape_of),
            OpKind::Squeeze => Capability::exact(1, infer_squeeze),
            OpKind::Unsqueeze => Capability::exact(1, infer_unsqueeze),
            OpKind::TopK => Capability::exact(2, infer_topk),
            OpKind::Concat => Capability::new(1, None, infer_concat),
            OpKind::Select => Capability::exact(3, infer_select),
            OpKind::Slice => Capability::exact(1, infer_slice),
            OpKind::NonZero => Capability::exact(1, infer_non_zero),
            OpKind::Gather => Capability::exact(2, infer_gather),
            OpKind::Range => Capability::exact(3, infer_range),
            OpKind::ReduceMin | OpKind::ReduceMax => Capability::exact(1, infer_reduce),
            OpKind::Subgraph => Capability::new(0, None, infer_subgraph),
        };
        table.register(kind, capability);
    }
    table
}

fn single(spec: OutputSpec) -> anyhow::Result<Vec<OutputSpec>> {
    Ok(vec![spec])
}

fn unexpected(op: &Operation) -> anyhow::Error {
    anyhow::anyhow!("rule does not apply to {}", op.kind())
}

fn ensure_index_type(element_type: ElementType) -> anyhow::Result<()> {
    ensure!(
        matches!(element_type, ElementType::I32 | ElementType::I64),
        "index type must be i32 or i64, got {element_type}"
    );
    Ok(())
}

/// Numpy-style broadcasting over partially known shapes.
pub(crate) fn broadcast_shapes(
    lhs: &PartialShape,
    rhs: &PartialShape,
) -> anyhow::Result<PartialShape> {
    let (Some(a), Some(b)) = (lhs.dims(), rhs.dims()) else {
        return Ok(PartialShape::dynamic_rank());
    };
    let rank = a.len().max(b.len());
    let pick = |dims: &[Dimension], idx: usize| {
        if idx + dims.len() >= rank {
            dims[idx + dims.len() - rank]
        } else {
            Dimension::Static(1)
        }
    };
    let mut out = Vec::with_capacity(rank);
    for idx in 0..rank {
        let dim = match (pick(a, idx), pick(b, idx)) {
            (Dimension::Static(x), Dimension::Static(y)) if x == y => Dimension::Static(x),
            (Dimension::Static(1), other) | (other, Dimension::Static(1)) => other,
            (Dimension::Static(x), Dimension::Static(y)) => {
                bail!("cannot broadcast {lhs} with {rhs}: extent {x} vs {y}")
            }
            (Dimension::Static(x), Dimension::Dynamic) | (Dimension::Dynamic, Dimension::Static(x)) => {
                Dimension::Static(x)
            }
            (Dimension::Dynamic, Dimension::Dynamic) => Dimension::Dynamic,
        };
        out.push(dim);
    }
    Ok(PartialShape::new(out))
}

fn infer_parameter(op: &Operation, _inputs: &[OutputSpec]) -> anyhow::Result<Vec<OutputSpec>> {
    let Operation::Parameter { spec } = op else {
        return Err(unexpected(op));
    };
    single(spec.clone())
}

fn infer_constant(op: &Operation, _inputs: &[OutputSpec]) -> anyhow::Result<Vec<OutputSpec>> {
    let Operation::Constant(value) = op else {
        return Err(unexpected(op));
    };
    single(OutputSpec::static_shape(value.element_type(), value.shape()))
}

fn infer_result(_op: &Operation, _inputs: &[OutputSpec]) -> anyhow::Result<Vec<OutputSpec>> {
    Ok(Vec::new())
}

fn infer_arithmetic(_op: &Operation, inputs: &[OutputSpec]) -> anyhow::Result<Vec<OutputSpec>> {
    let [lhs, rhs] = inputs else {
        bail!("expected two operands");
    };
    ensure!(
        lhs.element_type == rhs.element_type,
        "operand types differ: {} vs {}",
        lhs.element_type,
        rhs.element_type
    );
    let shape = broadcast_shapes(&lhs.shape, &rhs.shape)?;
    single(OutputSpec::new(lhs.element_type, shape))
}

fn infer_comparison(_op: &Operation, inputs: &[OutputSpec]) -> anyhow::Result<Vec<OutputSpec>> {
    let [lhs, rhs] = inputs else {
        bail!("expected two operands");
    };
    ensure!(
        lhs.element_type == rhs.element_type,
        "operand types differ: {} vs {}",
        lhs.element_type,
        rhs.element_type
    );
    let shape = broadcast_shapes(&lhs.shape, &rhs.shape)?;
    single(OutputSpec::new(ElementType::Boolean, shape))
}

/// Integer matrix products accumulate into i32; floating ones keep the operand type.
fn product_type(lhs: ElementType, rhs: ElementType) -> anyhow::Result<ElementType> {
    if lhs.is_integer() && rhs.is_integer() {
        return Ok(ElementType::I32);
    }
    ensure!(lhs == rhs, "operand types differ: {lhs} vs {rhs}");
    Ok(lhs)
}

fn infer_matmul(op: &Operation, inputs: &[OutputSpec]) -> anyhow::Result<Vec<OutputSpec>> {
    let Operation::MatMul {
        transpose_a,
        transpose_b,
    } = op
    else {
        return Err(unexpected(op));
    };
    let [lhs, rhs] = inputs else {
        bail!("expected two operands");
    };
    let element_type = product_type(lhs.element_type, rhs.element_type)?;
    let (Some(a), Some(b)) = (lhs.shape.dims(), rhs.shape.dims()) else {
        return single(OutputSpec::new(element_type, PartialShape::dynamic_rank()));
    };
    ensure!(
        a.len() >= 2 && b.len() >= 2,
        "matmul operands need rank >= 2, got {} and {}",
        lhs.shape,
        rhs.shape
    );
    let (ra, rb) = (a.len(), b.len());
    let (m, ka) = if *transpose_a {
        (a[ra - 1], a[ra - 2])
    } else {
        (a[ra - 2], a[ra - 1])
    };
    let (kb, n) = if *transpose_b {
        (b[rb - 1], b[rb - 2])
    } else {
        (b[rb - 2], b[rb - 1])
    };
    ensure!(
        ka.merge(kb).is_some(),
        "contraction extents differ: {ka} vs {kb}"
    );
    let batch = broadcast_shapes(
        &PartialShape::new(a[..ra - 2].to_vec()),
        &PartialShape::new(b[..rb - 2].to_vec()),
    )?;
    let mut dims = batch.into_dims().unwrap_or_default();
    dims.push(m);
    dims.push(n);
    single(OutputSpec::new(element_type, PartialShape::new(dims)))
}

fn infer_fully_connected(
    _op: &Operation,
    inputs: &[OutputSpec],
) -> anyhow::Result<Vec<OutputSpec>> {
    let (data, weights) = match inputs {
        [data, weights] | [data, weights, _] => (data, weights),
        _ => bail!("expected data, weights and an optional bias"),
    };
    let element_type = product_type(data.element_type, weights.element_type)?;
    let Some(w) = weights.shape.dims() else {
        bail!("weights need a static rank");
    };
    ensure!(w.len() == 2, "weights must be [N, K], got {}", weights.shape);
    if let Some(bias) = inputs.get(2) {
        if let (Some(count), Dimension::Static(n)) = (bias.shape.element_count(), w[0]) {
            ensure!(count == n, "bias holds {count} values, expected {n}");
        }
    }
    let Some(d) = data.shape.dims() else {
        return single(OutputSpec::new(element_type, PartialShape::dynamic_rank()));
    };
    ensure!(!d.is_empty(), "data must have rank >= 1");
    let k = d[d.len() - 1];
    ensure!(
        k.merge(w[1]).is_some(),
        "contraction extents differ: {k} vs {}",
        w[1]
    );
    let mut dims = d[..d.len() - 1].to_vec();
    dims.push(w[0]);
    single(OutputSpec::new(element_type, PartialShape::new(dims)))
}

fn infer_transpose(op: &Operation, inputs: &[OutputSpec]) -> anyhow::Result<Vec<OutputSpec>> {
    let Operation::Transpose { perm } = op else {
        return Err(unexpected(op));
    };
    let input = &inputs[0];
    let mut seen = vec![false; perm.len()];
    for &axis in perm {
        ensure!(
            axis < perm.len() && !std::mem::replace(&mut seen[axis], true),
            "{perm:?} is not a permutation"
        );
    }
    let Some(dims) = input.shape.dims() else {
        return single(OutputSpec::new(
            input.element_type,
            PartialShape::dynamic_of_rank(perm.len()),
        ));
    };
    ensure!(
        dims.len() == perm.len(),
        "permutation {perm:?} does not fit rank {}",
        dims.len()
    );
    let out = perm.iter().map(|&axis| dims[axis]).collect::<Vec<_>>();
    single(OutputSpec::new(input.element_type, PartialShape::new(out)))
}

fn infer_reshape(op: &Operation, inputs: &[OutputSpec]) -> anyhow::Result<Vec<OutputSpec>> {
    let Operation::Reshape {
        target,
        special_zero,
    } = op
    else {
        return Err(unexpected(op));
    };
    let input = &inputs[0];
    ensure!(
        target.iter().filter(|dim| **dim == -1).count() <= 1,
        "at most one -1 allowed in {target:?}"
    );
    ensure!(
        target.iter().all(|dim| *dim >= -1),
        "invalid reshape target {target:?}"
    );
    let mut dims = Vec::with_capacity(target.len());
    for (idx, &dim) in target.iter().enumerate() {
        let resolved = match dim {
            -1 => Dimension::Dynamic,
            0 if *special_zero => match input.shape.dims() {
                Some(src) => *src
                    .get(idx)
                    .with_context(|| format!("zero at {idx} has no source dimension"))?,
                None => Dimension::Dynamic,
            },
            dim => Dimension::Static(dim as usize),
        };
        dims.push(resolved);
    }
    let known = dims
        .iter()
        .enumerate()
        .filter(|(idx, _)| target[*idx] != -1)
        .map(|(_, dim)| dim.as_static())
        .collect::<Option<Vec<_>>>()
        .map(|dims| dims.iter().product::<usize>());
    if let (Some(total), Some(known)) = (input.shape.element_count(), known) {
        match target.iter().position(|dim| *dim == -1) {
            Some(idx) => {
                ensure!(
                    known != 0 && total % known == 0,
                    "cannot reshape {} into {target:?}",
                    input.shape
                );
                dims[idx] = Dimension::Static(total / known);
            }
            None => ensure!(
                known == total,
                "cannot reshape {} ({total} elements) into {target:?}",
                input.shape
            ),
        }
    }
    single(OutputSpec::new(input.element_type, PartialShape::new(dims)))
}

fn infer_softmax(op: &Operation, inputs: &[OutputSpec]) -> anyhow::Result<Vec<OutputSpec>> {
    let Operation::Softmax { axis } = op else {
        return Err(unexpected(op));
    };
    let input = &inputs[0];
    ensure!(
        input.element_type.is_float(),
        "softmax needs a floating input, got {}",
        input.element_type
    );
    if input.shape.has_static_rank() {
        input
            .shape
            .normalize_axis(*axis)
            .with_context(|| format!("axis {axis} out of range for {}", input.shape))?;
    }
    single(input.clone())
}

fn infer_convert(op: &Operation, inputs: &[OutputSpec]) -> anyhow::Result<Vec<OutputSpec>> {
    let Operation::Convert { to } = op else {
        return Err(unexpected(op));
    };
    single(OutputSpec::new(*to, inputs[0].shape.clone()))
}

fn infer_quantize(op: &Operation, inputs: &[OutputSpec]) -> anyhow::Result<Vec<OutputSpec>> {
    let Operation::Quantize { scale, output, .. } = op else {
        return Err(unexpected(op));
    };
    ensure!(
        inputs[0].element_type.is_float(),
        "quantize needs a floating input, got {}",
        inputs[0].element_type
    );
    ensure!(output.is_quantized(), "quantize output must be 8-bit, got {output}");
    ensure!(*scale > 0.0, "quantization scale must be positive");
    single(OutputSpec::new(*output, inputs[0].shape.clone()))
}

fn infer_dequantize(op: &Operation, inputs: &[OutputSpec]) -> anyhow::Result<Vec<OutputSpec>> {
    let Operation::Dequantize { scale, .. } = op else {
        return Err(unexpected(op));
    };
    ensure!(
        inputs[0].element_type.is_integer(),
        "dequantize needs an integer input, got {}",
        inputs[0].element_type
    );
    ensure!(*scale > 0.0, "quantization scale must be positive");
    single(OutputSpec::new(ElementType::F32, inputs[0].shape.clone()))
}

fn infer_unique(op: &Operation, inputs: &[OutputSpec]) -> anyhow::Result<Vec<OutputSpec>> {
    let Operation::Unique { index_type, axis } = op else {
        return Err(unexpected(op));
    };
    ensure_index_type(*index_type)?;
    let input = &inputs[0];
    let (values, reverse) = match axis {
        None => (
            PartialShape::dynamic_of_rank(1),
            match input.shape.element_count() {
                Some(count) => PartialShape::from_static(&[count]),
                None => PartialShape::dynamic_of_rank(1),
            },
        ),
        Some(axis) => match input.shape.dims() {
            Some(dims) => {
                let axis = normalize_axis(*axis, dims.len())
                    .with_context(|| format!("axis {axis} out of range for {}", input.shape))?;
                let mut values = dims.to_vec();
                values[axis] = Dimension::Dynamic;
                (PartialShape::new(values), PartialShape::new(vec![dims[axis]]))
            }
            None => (
                PartialShape::dynamic_rank(),
                PartialShape::dynamic_of_rank(1),
            ),
        },
    };
    let index = PartialShape::dynamic_of_rank(1);
    Ok(vec![
        OutputSpec::new(input.element_type, values),
        OutputSpec::new(*index_type, index.clone()),
        OutputSpec::new(*index_type, reverse),
        OutputSpec::new(*index_type, index),
    ])
}

fn infer_shape_of(op: &Operation, inputs: &[OutputSpec]) -> anyhow::Result<Vec<OutputSpec>> {
    let Operation::ShapeOf { output } = op else {
        return Err(unexpected(op));
    };
    ensure_index_type(*output)?;
    let shape = match inputs[0].shape.rank() {
        Some(rank) => PartialShape::from_static(&[rank]),
        None => PartialShape::dynamic_of_rank(1),
    };
    single(OutputSpec::new(*output, shape))
}

fn infer_squeeze(op: &Operation, inputs: &[OutputSpec]) -> anyhow::Result<Vec<OutputSpec>> {
    let Operation::Squeeze { axes } = op else {
        return Err(unexpected(op));
    };
    let input = &inputs[0];
    let Some(dims) = input.shape.dims() else {
        return single(OutputSpec::new(input.element_type, PartialShape::dynamic_rank()));
    };
    let mut drop = vec![false; dims.len()];
    if axes.is_empty() {
        if dims.iter().any(|dim| !dim.is_static()) {
            return single(OutputSpec::new(input.element_type, PartialShape::dynamic_rank()));
        }
        for (idx, dim) in dims.iter().enumerate() {
            drop[idx] = *dim == Dimension::Static(1);
        }
    } else {
        for axis in axes {
            let idx = normalize_axis(*axis, dims.len())
                .with_context(|| format!("axis {axis} out of range for {}", input.shape))?;
            ensure!(
                matches!(dims[idx], Dimension::Static(1) | Dimension::Dynamic),
                "cannot squeeze axis {axis} of {}",
                input.shape
            );
            drop[idx] = true;
        }
    }
    let out = dims
        .iter()
        .zip(drop)
        .filter_map(|(dim, dropped)| (!dropped).then_some(*dim))
        .collect::<Vec<_>>();
    single(OutputSpec::new(input.element_type, PartialShape::new(out)))
}

fn infer_unsqueeze(op: &Operation, inputs: &[OutputSpec]) -> anyhow::Result<Vec<OutputSpec>> {
    let Operation::Unsqueeze { axes } = op else {
        return Err(unexpected(op));
    };
    let input = &inputs[0];
    let Some(dims) = input.shape.dims() else {
        return single(OutputSpec::new(input.element_type, PartialShape::dynamic_rank()));
    };
    let out_rank = dims.len() + axes.len();
    let mut inserted = vec![false; out_rank];
    for axis in axes {
        let idx = normalize_axis(*axis, out_rank)
            .with_context(|| format!("axis {axis} out of range for rank {out_rank}"))?;
        ensure!(!inserted[idx], "axis {axis} repeated");
        inserted[idx] = true;
    }
    let mut source = dims.iter();
    let mut out = Vec::with_capacity(out_rank);
    for is_new in inserted {
        if is_new {
            out.push(Dimension::Static(1));
        } else {
            out.push(*source.next().context("unsqueeze ran out of source axes")?);
        }
    }
    single(OutputSpec::new(input.element_type, PartialShape::new(out)))
}

fn infer_topk(op: &Operation, inputs: &[OutputSpec]) -> anyhow::Result<Vec<OutputSpec>> {
    let Operation::TopK {
        axis, index_type, ..
    } = op
    else {
        return Err(unexpected(op));
    };
    ensure_index_type(*index_type)?;
    let [data, k] = inputs else {
        bail!("expected data and k");
    };
    ensure!(
        k.element_type.is_integer(),
        "k must be an integer, got {}",
        k.element_type
    );
    ensure!(
        matches!(k.shape.element_count(), Some(1) | None),
        "k must hold a single value, got {}",
        k.shape
    );
    let shape = match data.shape.dims() {
        Some(dims) => {
            let idx = normalize_axis(*axis, dims.len())
                .with_context(|| format!("axis {axis} out of range for {}", data.shape))?;
            let mut out = dims.to_vec();
            out[idx] = Dimension::Dynamic;
            PartialShape::new(out)
        }
        None => PartialShape::dynamic_rank(),
    };
    Ok(vec![
        OutputSpec::new(data.element_type, shape.clone()),
        OutputSpec::new(*index_type, shape),
    ])
}

fn infer_concat(op: &Operation, inputs: &[OutputSpec]) -> anyhow::Result<Vec<OutputSpec>> {
    let Operation::Concat { axis } = op else {
        return Err(unexpected(op));
    };
    let element_type = inputs[0].element_type;
    ensure!(
        inputs.iter().all(|input| input.element_type == element_type),
        "concat operands must share an element type"
    );
    let Some(rank) = inputs.iter().find_map(|input| input.shape.rank()) else {
        return single(OutputSpec::new(element_type, PartialShape::dynamic_rank()));
    };
    let idx =
        normalize_axis(*axis, rank).with_context(|| format!("axis {axis} out of range"))?;
    let mut out = vec![Dimension::Dynamic; rank];
    let mut concat_len = Some(0usize);
    for input in inputs {
        let Some(dims) = input.shape.dims() else {
            concat_len = None;
            continue;
        };
        ensure!(dims.len() == rank, "concat operands must share a rank");
        for (pos, dim) in dims.iter().enumerate() {
            if pos == idx {
                concat_len = concat_len.zip(dim.as_static()).map(|(acc, len)| acc + len);
            } else {
                out[pos] = out[pos]
                    .merge(*dim)
                    .with_context(|| format!("concat operands disagree on axis {pos}"))?;
            }
        }
    }
    out[idx] = concat_len.map_or(Dimension::Dynamic, Dimension::Static);
    single(OutputSpec::new(element_type, PartialShape::new(out)))
}

fn infer_select(_op: &Operation, inputs: &[OutputSpec]) -> anyhow::Result<Vec<OutputSpec>> {
    let [cond, then, otherwise] = inputs else {
        bail!("expected condition, then and else");
    };
    ensure!(
        cond.element_type == ElementType::Boolean,
        "condition must be boolean, got {}",
        cond.element_type
    );
    ensure!(
        then.element_type == otherwise.element_type,
        "branch types differ: {} vs {}",
        then.element_type,
        otherwise.element_type
    );
    let shape = broadcast_shapes(&broadcast_shapes(&cond.shape, &then.shape)?, &otherwise.shape)?;
    single(OutputSpec::new(then.element_type, shape))
}

/// Python-style slice length for a static extent.
fn slice_len(extent: usize, start: i64, stop: i64, step: i64) -> usize {
    let len = extent as i64;
    let clamp = |value: i64, lower: i64, upper: i64| {
        let value = if value < 0 { value + len } else { value };
        value.clamp(lower, upper)
    };
    if step > 0 {
        let start = clamp(start, 0, len);
        let stop = clamp(stop, 0, len);
        if stop > start {
            ((stop - start + step - 1) / step) as usize
        } else {
            0
        }
    } else {
        let start = clamp(start, -1, len - 1);
        let stop = clamp(stop, -1, len - 1);
        if start > stop {
            ((start - stop - step - 1) / -step) as usize
        } else {
            0
        }
    }
}

fn infer_slice(op: &Operation, inputs: &[OutputSpec]) -> anyhow::Result<Vec<OutputSpec>> {
    let Operation::Slice {
        start,
        stop,
        step,
        axis,
    } = op
    else {
        return Err(unexpected(op));
    };
    ensure!(*step != 0, "slice step must not be zero");
    let input = &inputs[0];
    let Some(dims) = input.shape.dims() else {
        return single(input.clone());
    };
    let idx = normalize_axis(*axis, dims.len())
        .with_context(|| format!("axis {axis} out of range for {}", input.shape))?;
    let mut out = dims.to_vec();
    out[idx] = match dims[idx] {
        Dimension::Static(extent) => Dimension::Static(slice_len(extent, *start, *stop, *step)),
        Dimension::Dynamic => Dimension::Dynamic,
    };
    single(OutputSpec::new(input.element_type, PartialShape::new(out)))
}

fn infer_non_zero(op: &Operation, inputs: &[OutputSpec]) -> anyhow::Result<Vec<OutputSpec>> {
    let Operation::NonZero { output } = op else {
        return Err(unexpected(op));
    };
    ensure_index_type(*output)?;
    let rank = inputs[0]
        .shape
        .rank()
        .map_or(Dimension::Dynamic, Dimension::Static);
    single(OutputSpec::new(
        *output,
        PartialShape::new(vec![rank, Dimension::Dynamic]),
    ))
}

fn infer_gather(op: &Operation, inputs: &[OutputSpec]) -> anyhow::Result<Vec<OutputSpec>> {
    let Operation::Gather { axis } = op else {
        return Err(unexpected(op));
    };
    let [data, indices] = inputs else {
        bail!("expected data and indices");
    };
    ensure!(
        indices.element_type.is_integer(),
        "indices must be integers, got {}",
        indices.element_type
    );
    let (Some(dims), Some(index_dims)) = (data.shape.dims(), indices.shape.dims()) else {
        return single(OutputSpec::new(data.element_type, PartialShape::dynamic_rank()));
    };
    let idx = normalize_axis(*axis, dims.len())
        .with_context(|| format!("axis {axis} out of range for {}", data.shape))?;
    let mut out = dims[..idx].to_vec();
    out.extend_from_slice(index_dims);
    out.extend_from_slice(&dims[idx + 1..]);
    single(OutputSpec::new(data.element_type, PartialShape::new(out)))
}

fn infer_range(op: &Operation, inputs: &[OutputSpec]) -> anyhow::Result<Vec<OutputSpec>> {
    let Operation::Range { output } = op else {
        return Err(unexpected(op));
    };
    for input in inputs {
        ensure!(
            matches!(input.shape.element_count(), Some(1) | None),
            "range bounds must be scalars, got {}",
            input.shape
        );
    }
    single(OutputSpec::new(*output, PartialShape::dynamic_of_rank(1)))
}

fn infer_reduce(op: &Operation, inputs: &[OutputSpec]) -> anyhow::Result<Vec<OutputSpec>> {
    let (Operation::ReduceMin { axes, keep_dims } | Operation::ReduceMax { axes, keep_dims }) = op
    else {
        return Err(unexpected(op));
    };
    let input = &inputs[0];
    let Some(dims) = input.shape.dims() else {
        return single(OutputSpec::new(input.element_type, PartialShape::dynamic_rank()));
    };
    let mut reduced = vec![false; dims.len()];
    for axis in axes {
        let idx = normalize_axis(*axis, dims.len())
            .with_context(|| format!("axis {axis} out of range for {}", input.shape))?;
        reduced[idx] = true;
    }
    let out = dims
        .iter()
        .zip(reduced)
        .filter_map(|(dim, is_reduced)| match (is_reduced, *keep_dims) {
            (false, _) => Some(*dim),
            (true, true) => Some(Dimension::Static(1)),
            (true, false) => None,
        })
        .collect::<Vec<_>>();
    single(OutputSpec::new(input.element_type, PartialShape::new(out)))
}

/// Re-derives the island's outputs by running the body's own inference on the external specs.
fn infer_subgraph(op: &Operation, inputs: &[OutputSpec]) -> anyhow::Result<Vec<OutputSpec>> {
    let Operation::Subgraph { body } = op else {
        return Err(unexpected(op));
    };
    let mut body = (**body).clone();
    body.bind_parameters(inputs)
        .context("subgraph inputs do not fit the body")?;
    body.revalidate().context("subgraph body failed inference")?;
    Ok(body.result_specs())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_spec(dims: &[usize]) -> OutputSpec {
        OutputSpec::static_shape(ElementType::F32, dims)
    }

    #[test]
    fn broadcast_merges_unit_and_dynamic_extents() {
        let lhs = PartialShape::new(vec![Dimension::Dynamic, Dimension::Static(1)]);
        let rhs = PartialShape::from_static(&[4]);
        let out = broadcast_shapes(&lhs, &rhs).unwrap();
        assert_eq!(out, PartialShape::new(vec![Dimension::Dynamic, Dimension::Static(4)]));
        assert!(broadcast_shapes(
            &PartialShape::from_static(&[3]),
            &PartialShape::from_static(&[4])
        )
        .is_err());
    }

    #[test]
    fn matmul_honours_transpose_flags() {
        let op = Operation::MatMul {
            transpose_a: false,
            transpose_b: true,
        };
        let out = infer_matmul(&op, &[f32_spec(&[1, 12, 128, 64]), f32_spec(&[1, 12, 128, 64])])
            .unwrap();
        assert_eq!(out[0], f32_spec(&[1, 12, 128, 128]));
    }

    #[test]
    fn integer_matmul_accumulates_in_i32() {
        let op = Operation::MatMul {
            transpose_a: false,
            transpose_b: false,
        };
        let lhs = OutputSpec::static_shape(ElementType::U8, &[2, 3]);
        let rhs = OutputSpec::static_shape(ElementType::I8, &[3, 4]);
        let out = infer_matmul(&op, &[lhs, rhs]).unwrap();
        assert_eq!(out[0], OutputSpec::static_shape(ElementType::I32, &[2, 4]));
    }

    #[test]
    fn reshape_resolves_wildcards() {
        let op = Operation::Reshape {
            target: vec![0, -1],
            special_zero: true,
        };
        let out = infer_reshape(&op, &[f32_spec(&[2, 3, 4])]).unwrap();
        assert_eq!(out[0], f32_spec(&[2, 12]));
    }

    #[test]
    fn slice_length_follows_python_semantics() {
        assert_eq!(slice_len(5, 1, -1, 1), 3);
        assert_eq!(slice_len(5, 0, 5, 2), 3);
        assert_eq!(slice_len(5, 4, -6, -1), 5);
        assert_eq!(slice_len(5, 3, 3, 1), 0);
    }

    #[test]
    fn unique_produces_four_outputs() {
        let op = Operation::Unique {
            index_type: ElementType::I64,
            axis: None,
        };
        let out = infer_unique(&op, &[f32_spec(&[2, 5])]).unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out[2], OutputSpec::static_shape(ElementType::I64, &[10]));
    }
}
