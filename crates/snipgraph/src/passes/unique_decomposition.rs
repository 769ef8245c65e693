//! Lowers `Unique` into sort, compare and gather primitives.
//!
//! Only the flattened form is handled: the unique values (output 0) come out in order of first
//! occurrence and the reverse indices (output 2) map every input element to its unique value.
//! Nodes whose first-index or count outputs (1 and 3) are consumed are left alone.

use crate::error::GraphError;
use crate::graph::{ConstantValue, ElementType, OpKind, Operation, TopKMode};
use crate::pass::{MatcherPass, RewriteContext};
use crate::pattern::{Pattern, PatternId};
use crate::rewrite::{StagedId, ValueRef};

use super::accept;

pub struct UniqueDecomposition {
    pattern: Pattern,
    unique: PatternId,
}

impl UniqueDecomposition {
    pub fn new() -> Self {
        let mut p = Pattern::builder();
        let unique = p.wrap_type(&[OpKind::Unique], &[]);
        Self {
            pattern: p.finish(unique),
            unique,
        }
    }

    fn try_rewrite(&self, cx: &mut RewriteContext<'_>) -> Result<bool, GraphError> {
        let graph = cx.graph();
        let (Some(root), Some(Operation::Unique { index_type, axis })) =
            (cx.node(self.unique), cx.op(self.unique))
        else {
            return Ok(false);
        };
        let index_type = *index_type;
        let node = graph.node(root)?;
        let Some(input) = node.input(0) else {
            return Ok(false);
        };
        let Some(input_spec) = graph.output_spec(input) else {
            return Ok(false);
        };
        if axis.is_some() && !matches!(input_spec.shape.rank(), Some(0 | 1)) {
            return Ok(false);
        }
        if input_spec.element_type == ElementType::Boolean {
            return Ok(false);
        }
        if !graph.consumers(root.output(1)).is_empty() || !graph.consumers(root.output(3)).is_empty()
        {
            return Ok(false);
        }
        let values_used = !graph.consumers(root.output(0)).is_empty();
        let reverse_used = !graph.consumers(root.output(2)).is_empty();
        if !values_used && !reverse_used {
            return Ok(false);
        }

        let name = node.name().to_string();
        let element_type = input_spec.element_type;
        let flat = cx.make(
            Operation::Reshape {
                target: vec![-1],
                special_zero: false,
            },
            &[input.into()],
        )?;

        let single_element = cx
            .spec(flat.output(0))
            .and_then(|spec| spec.shape.element_count())
            == Some(1);
        let (values, reverse) = if single_element {
            let zero = cx.make(
                Operation::Constant(ConstantValue::splat(index_type, vec![1], 0.0)),
                &[],
            )?;
            (flat, zero)
        } else {
            let mut lowering = Lowering {
                cx: &mut *cx,
                element_type,
                index_type,
            };
            lowering.emit(flat.output(0))?
        };

        cx.registry()
            .set_friendly_name(values, format!("{name}.0"))?;
        cx.registry()
            .set_friendly_name(reverse, format!("{name}.2"))?;
        cx.registry().copy_runtime_info_from(&[root]);
        if values_used {
            cx.replace(root.output(0), values.output(0));
        }
        if reverse_used {
            cx.replace(root.output(2), reverse.output(0));
        }
        Ok(true)
    }
}

/// Emits the primitive sequence for a flattened, multi-element input.
struct Lowering<'c, 'a> {
    cx: &'c mut RewriteContext<'a>,
    element_type: ElementType,
    index_type: ElementType,
}

impl Lowering<'_, '_> {
    fn op(&mut self, op: Operation, inputs: &[ValueRef]) -> Result<ValueRef, GraphError> {
        self.cx.make_value(op, inputs)
    }

    fn constant(&mut self, value: ConstantValue) -> Result<ValueRef, GraphError> {
        self.op(Operation::Constant(value), &[])
    }

    /// Element count of a rank-1 value as an i32 scalar.
    fn length(&mut self, value: ValueRef) -> Result<ValueRef, GraphError> {
        let shape = self.op(
            Operation::ShapeOf {
                output: ElementType::I32,
            },
            &[value],
        )?;
        self.op(Operation::Squeeze { axes: Vec::new() }, &[shape])
    }

    /// Ascending sort of a rank-1 value. Returns the sorted values.
    fn sort(&mut self, value: ValueRef, len: ValueRef) -> Result<StagedId, GraphError> {
        self.cx.make(
            Operation::TopK {
                axis: 0,
                mode: TopKMode::Min,
                index_type: ElementType::I32,
            },
            &[value, len],
        )
    }

    fn emit(&mut self, flat: ValueRef) -> Result<(StagedId, StagedId), GraphError> {
        let i32_one = self.constant(ConstantValue::splat(ElementType::I32, vec![1], 1.0))?;
        let i32_zero = self.constant(ConstantValue::splat(ElementType::I32, vec![1], 0.0))?;
        let scalar_one = self.constant(ConstantValue::scalar(ElementType::I32, 1.0))?;

        // Sorted values, then a mask keeping the first element of every run of equal values.
        let n = self.length(flat)?;
        let sorted = self.sort(flat, n)?.output(0);
        let pad = self.constant(ConstantValue::splat(self.element_type, vec![1], 0.0))?;
        let shifted_left = self.op(Operation::Concat { axis: 0 }, &[sorted, pad])?;
        let shifted_right = self.op(Operation::Concat { axis: 0 }, &[pad, sorted])?;
        let boundaries = self.op(Operation::NotEqual, &[shifted_left, shifted_right])?;
        let inner = self.op(
            Operation::Slice {
                start: 1,
                stop: -1,
                step: 1,
                axis: 0,
            },
            &[boundaries],
        )?;
        let first = self.constant(ConstantValue::splat(ElementType::Boolean, vec![1], 1.0))?;
        let keep = self.op(Operation::Concat { axis: 0 }, &[first, inner])?;
        let keep = self.op(Operation::Select, &[keep, i32_one, i32_zero])?;
        let positions = self.op(
            Operation::NonZero {
                output: ElementType::I64,
            },
            &[keep],
        )?;
        let positions = self.op(Operation::Squeeze { axes: vec![0] }, &[positions])?;
        let sorted_unique = self.op(Operation::Gather { axis: 0 }, &[sorted, positions])?;

        // First occurrence of every unique value: min over matching (position + 1).
        let row = self.op(Operation::Unsqueeze { axes: vec![0] }, &[flat])?;
        let column = self.op(Operation::Unsqueeze { axes: vec![1] }, &[sorted_unique])?;
        let matches = self.op(Operation::Equal, &[row, column])?;
        let n_plus_one = self.op(Operation::Add, &[n, scalar_one])?;
        let weights = self.op(Operation::Select, &[matches, scalar_one, n_plus_one])?;
        let steps = self.op(
            Operation::Range {
                output: ElementType::I32,
            },
            &[scalar_one, n_plus_one, scalar_one],
        )?;
        let steps = self.op(Operation::Unsqueeze { axes: vec![0] }, &[steps])?;
        let weighted = self.op(Operation::Multiply, &[weights, steps])?;
        let first_seen = self.op(
            Operation::ReduceMin {
                axes: vec![1],
                keep_dims: false,
            },
            &[weighted],
        )?;
        let first_seen = self.op(Operation::Subtract, &[first_seen, i32_one])?;

        // Unique values ordered by first occurrence.
        let m = self.length(first_seen)?;
        let ordered = self.sort(first_seen, m)?.output(0);
        let values = self.cx.make(Operation::Gather { axis: 0 }, &[flat, ordered])?;

        // Reverse indices: max over matching (unique position + 1).
        let index_one = self.constant(ConstantValue::splat(self.index_type, vec![1], 1.0))?;
        let index_zero = self.constant(ConstantValue::splat(self.index_type, vec![1], 0.0))?;
        let column = self.op(Operation::Unsqueeze { axes: vec![1] }, &[values.output(0)])?;
        let matches = self.op(Operation::Equal, &[column, row])?;
        let m_plus_one = self.op(Operation::Add, &[m, scalar_one])?;
        let hits = self.op(Operation::Select, &[matches, index_one, index_zero])?;
        let slots = self.op(
            Operation::Range {
                output: self.index_type,
            },
            &[scalar_one, m_plus_one, scalar_one],
        )?;
        let slots = self.op(Operation::Unsqueeze { axes: vec![1] }, &[slots])?;
        let weighted = self.op(Operation::Multiply, &[hits, slots])?;
        let slot = self.op(
            Operation::ReduceMax {
                axes: vec![0],
                keep_dims: false,
            },
            &[weighted],
        )?;
        let reverse = self.cx.make(Operation::Subtract, &[slot, index_one])?;
        Ok((values, reverse))
    }
}

impl Default for UniqueDecomposition {
    fn default() -> Self {
        Self::new()
    }
}

impl MatcherPass for UniqueDecomposition {
    fn name(&self) -> &'static str {
        "unique-decomposition"
    }

    fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    fn callback(&self, cx: &mut RewriteContext<'_>) -> bool {
        accept(self.name(), self.try_rewrite(cx))
    }
}
