use std::fmt;

use crate::error::GraphError;

use super::op::Operation;
use super::types::{normalize_axis, ElementType};

/// Dense constant payload. Values are stored as `f64` regardless of the element type.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantValue {
    element_type: ElementType,
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl ConstantValue {
    pub fn new(
        element_type: ElementType,
        shape: Vec<usize>,
        data: Vec<f64>,
    ) -> Result<Self, GraphError> {
        let expected = shape.iter().product::<usize>();
        if data.len() != expected {
            return Err(GraphError::ConstantPayload {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            element_type,
            shape,
            data: data.into_iter().map(|v| cast(v, element_type)).collect(),
        })
    }

    /// Fills `shape` with a single value.
    pub fn splat(element_type: ElementType, shape: Vec<usize>, value: f64) -> Self {
        let len = shape.iter().product::<usize>();
        Self {
            element_type,
            shape,
            data: vec![cast(value, element_type); len],
        }
    }

    pub fn scalar(element_type: ElementType, value: f64) -> Self {
        Self::splat(element_type, Vec::new(), value)
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the single value of a one-element payload.
    pub fn as_scalar(&self) -> Option<f64> {
        match self.data.as_slice() {
            [value] => Some(*value),
            _ => None,
        }
    }

    fn with_shape(&self, shape: Vec<usize>) -> Self {
        Self {
            element_type: self.element_type,
            shape,
            data: self.data.clone(),
        }
    }
}

impl fmt::Display for ConstantValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.element_type, self.shape)?;
        if self.data.len() <= 4 {
            write!(f, " {:?}", self.data)?;
        }
        Ok(())
    }
}

fn cast(value: f64, element_type: ElementType) -> f64 {
    match element_type {
        ElementType::Boolean => {
            if value != 0.0 {
                1.0
            } else {
                0.0
            }
        }
        ElementType::I8 => value.trunc().clamp(i8::MIN as f64, i8::MAX as f64),
        ElementType::U8 => value.trunc().clamp(0.0, u8::MAX as f64),
        ElementType::I32 => value.trunc().clamp(i32::MIN as f64, i32::MAX as f64),
        ElementType::I64 => value.trunc(),
        ElementType::F16 | ElementType::Bf16 | ElementType::F32 => value as f32 as f64,
        ElementType::F64 => value,
    }
}

/// Evaluates `op` over constant inputs. Returns `None` for unsupported kinds or payloads.
pub fn try_fold(op: &Operation, inputs: &[&ConstantValue]) -> Option<ConstantValue> {
    match (op, inputs) {
        (Operation::Add, [lhs, rhs]) => fold_binary(lhs, rhs, |a, b| a + b),
        (Operation::Subtract, [lhs, rhs]) => fold_binary(lhs, rhs, |a, b| a - b),
        (Operation::Multiply, [lhs, rhs]) => fold_binary(lhs, rhs, |a, b| a * b),
        (
            Operation::Reshape {
                target,
                special_zero,
            },
            [value],
        ) => {
            let shape = resolve_reshape(value.shape(), target, *special_zero)?;
            Some(value.with_shape(shape))
        }
        (Operation::Transpose { perm }, [value]) => fold_transpose(value, perm),
        (Operation::Squeeze { axes }, [value]) => {
            let rank = value.shape.len();
            let mut drop = vec![false; rank];
            if axes.is_empty() {
                for (idx, dim) in value.shape.iter().enumerate() {
                    drop[idx] = *dim == 1;
                }
            } else {
                for axis in axes {
                    let axis = normalize_axis(*axis, rank)?;
                    if value.shape[axis] != 1 {
                        return None;
                    }
                    drop[axis] = true;
                }
            }
            let shape = value
                .shape
                .iter()
                .zip(drop)
                .filter_map(|(dim, dropped)| (!dropped).then_some(*dim))
                .collect();
            Some(value.with_shape(shape))
        }
        (Operation::Unsqueeze { axes }, [value]) => {
            let out_rank = value.shape.len() + axes.len();
            let mut inserted = vec![false; out_rank];
            for axis in axes {
                let axis = normalize_axis(*axis, out_rank)?;
                if inserted[axis] {
                    return None;
                }
                inserted[axis] = true;
            }
            let mut source = value.shape.iter();
            let shape = inserted
                .into_iter()
                .map(|is_new| if is_new { Some(1) } else { source.next().copied() })
                .collect::<Option<Vec<_>>>()?;
            Some(value.with_shape(shape))
        }
        (Operation::Convert { to }, [value]) => Some(ConstantValue {
            element_type: *to,
            shape: value.shape.clone(),
            data: value.data.iter().map(|v| cast(*v, *to)).collect(),
        }),
        _ => None,
    }
}

/// Resolves a reshape target against a static input shape (`-1` inference, `0` copy).
pub(crate) fn resolve_reshape(
    input: &[usize],
    target: &[i64],
    special_zero: bool,
) -> Option<Vec<usize>> {
    let total = input.iter().product::<usize>();
    let mut inferred = None;
    let mut dims = Vec::with_capacity(target.len());
    for (idx, &dim) in target.iter().enumerate() {
        match dim {
            -1 => {
                if inferred.replace(idx).is_some() {
                    return None;
                }
                dims.push(1);
            }
            0 if special_zero => dims.push(*input.get(idx)?),
            dim if dim >= 0 => dims.push(dim as usize),
            _ => return None,
        }
    }
    let known = dims.iter().product::<usize>();
    if let Some(idx) = inferred {
        if known == 0 || total % known != 0 {
            return None;
        }
        dims[idx] = total / known;
    } else if known != total {
        return None;
    }
    Some(dims)
}

pub(crate) fn broadcast_static(lhs: &[usize], rhs: &[usize]) -> Option<Vec<usize>> {
    let rank = lhs.len().max(rhs.len());
    let mut out = vec![0; rank];
    for idx in 0..rank {
        let a = if idx + lhs.len() >= rank {
            lhs[idx + lhs.len() - rank]
        } else {
            1
        };
        let b = if idx + rhs.len() >= rank {
            rhs[idx + rhs.len() - rank]
        } else {
            1
        };
        out[idx] = match (a, b) {
            (a, b) if a == b => a,
            (1, b) => b,
            (a, 1) => a,
            _ => return None,
        };
    }
    Some(out)
}

fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for idx in (0..shape.len().saturating_sub(1)).rev() {
        strides[idx] = strides[idx + 1] * shape[idx + 1];
    }
    strides
}

/// Maps a flat index of the broadcast output back to a flat index of `shape`.
fn source_index(out_index: &[usize], shape: &[usize], shape_strides: &[usize]) -> usize {
    let offset = out_index.len() - shape.len();
    shape
        .iter()
        .enumerate()
        .map(|(axis, dim)| {
            let coord = if *dim == 1 { 0 } else { out_index[axis + offset] };
            coord * shape_strides[axis]
        })
        .sum()
}

fn unravel(mut flat: usize, shape: &[usize]) -> Vec<usize> {
    let mut coords = vec![0; shape.len()];
    for axis in (0..shape.len()).rev() {
        let dim = shape[axis].max(1);
        coords[axis] = flat % dim;
        flat /= dim;
    }
    coords
}

fn fold_binary(
    lhs: &ConstantValue,
    rhs: &ConstantValue,
    apply: impl Fn(f64, f64) -> f64,
) -> Option<ConstantValue> {
    if lhs.element_type != rhs.element_type {
        return None;
    }
    let shape = broadcast_static(&lhs.shape, &rhs.shape)?;
    let lhs_strides = strides(&lhs.shape);
    let rhs_strides = strides(&rhs.shape);
    let len = shape.iter().product::<usize>();
    let mut data = Vec::with_capacity(len);
    for flat in 0..len {
        let coords = unravel(flat, &shape);
        let a = lhs.data[source_index(&coords, &lhs.shape, &lhs_strides)];
        let b = rhs.data[source_index(&coords, &rhs.shape, &rhs_strides)];
        data.push(cast(apply(a, b), lhs.element_type));
    }
    Some(ConstantValue {
        element_type: lhs.element_type,
        shape,
        data,
    })
}

fn fold_transpose(value: &ConstantValue, perm: &[usize]) -> Option<ConstantValue> {
    let rank = value.shape.len();
    if perm.len() != rank {
        return None;
    }
    let mut seen = vec![false; rank];
    for &axis in perm {
        if axis >= rank || std::mem::replace(&mut seen[axis], true) {
            return None;
        }
    }
    let shape = perm.iter().map(|&axis| value.shape[axis]).collect::<Vec<_>>();
    let src_strides = strides(&value.shape);
    let mut data = Vec::with_capacity(value.data.len());
    for flat in 0..value.data.len() {
        let coords = unravel(flat, &shape);
        let src = coords
            .iter()
            .zip(perm)
            .map(|(coord, &axis)| coord * src_strides[axis])
            .sum::<usize>();
        data.push(value.data[src]);
    }
    Some(ConstantValue {
        element_type: value.element_type,
        shape,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_const(shape: Vec<usize>, data: Vec<f64>) -> ConstantValue {
        ConstantValue::new(ElementType::F32, shape, data).unwrap()
    }

    #[test]
    fn add_broadcasts_row_vector() {
        let lhs = f32_const(vec![2, 3], vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        let rhs = f32_const(vec![3], vec![10.0, 20.0, 30.0]);
        let out = try_fold(&Operation::Add, &[&lhs, &rhs]).unwrap();
        assert_eq!(out.shape(), &[2, 3]);
        assert_eq!(out.data(), &[10.0, 21.0, 32.0, 13.0, 24.0, 35.0]);
    }

    #[test]
    fn transpose_swaps_axes() {
        let value = f32_const(vec![2, 3], vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        let out = try_fold(&Operation::Transpose { perm: vec![1, 0] }, &[&value]).unwrap();
        assert_eq!(out.shape(), &[3, 2]);
        assert_eq!(out.data(), &[0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    }

    #[test]
    fn reshape_infers_minus_one() {
        assert_eq!(resolve_reshape(&[2, 3, 4], &[-1], false), Some(vec![24]));
        assert_eq!(resolve_reshape(&[2, 3, 4], &[0, -1], true), Some(vec![2, 12]));
        assert_eq!(resolve_reshape(&[2, 3, 4], &[5, -1], false), None);
    }

    #[test]
    fn convert_truncates_towards_zero() {
        let value = f32_const(vec![3], vec![1.7, -2.5, 300.0]);
        let out = try_fold(&Operation::Convert { to: ElementType::I8 }, &[&value]).unwrap();
        assert_eq!(out.element_type(), ElementType::I8);
        assert_eq!(out.data(), &[1.0, -2.0, 127.0]);
    }

    #[test]
    fn payload_length_must_match_shape() {
        let err = ConstantValue::new(ElementType::F32, vec![2, 2], vec![1.0]).unwrap_err();
        assert_eq!(
            err,
            GraphError::ConstantPayload {
                expected: 4,
                actual: 1
            }
        );
    }
}
