use std::fmt;

use super::fold::ConstantValue;
use super::types::{ElementType, OutputSpec};
use super::Graph;

/// Sort direction used by [`Operation::TopK`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopKMode {
    Max,
    Min,
}

/// Closed set of operations a node may carry, with their kind-specific parameters.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Graph input; the spec is fixed by the loader.
    Parameter { spec: OutputSpec },
    Constant(ConstantValue),
    /// Graph output sink. Consumes one value, produces nothing.
    Result,
    Add,
    Subtract,
    Multiply,
    Equal,
    NotEqual,
    MatMul {
        transpose_a: bool,
        transpose_b: bool,
    },
    /// `data x weights[N, K]ᵀ (+ bias[N])`.
    FullyConnected,
    Transpose {
        perm: Vec<usize>,
    },
    Reshape {
        target: Vec<i64>,
        special_zero: bool,
    },
    Softmax {
        axis: i64,
    },
    Convert {
        to: ElementType,
    },
    Quantize {
        scale: f64,
        zero_point: i64,
        output: ElementType,
    },
    Dequantize {
        scale: f64,
        zero_point: i64,
    },
    Unique {
        index_type: ElementType,
        axis: Option<i64>,
    },
    ShapeOf {
        output: ElementType,
    },
    Squeeze {
        axes: Vec<i64>,
    },
    Unsqueeze {
        axes: Vec<i64>,
    },
    TopK {
        axis: i64,
        mode: TopKMode,
        index_type: ElementType,
    },
    Concat {
        axis: i64,
    },
    Select,
    Slice {
        start: i64,
        stop: i64,
        step: i64,
        axis: i64,
    },
    NonZero {
        output: ElementType,
    },
    Gather {
        axis: i64,
    },
    Range {
        output: ElementType,
    },
    ReduceMin {
        axes: Vec<i64>,
        keep_dims: bool,
    },
    ReduceMax {
        axes: Vec<i64>,
        keep_dims: bool,
    },
    /// Fused island; the body is a self-contained graph with its own parameters and results.
    Subgraph { body: Box<Graph> },
}

/// Field-less tag of an [`Operation`], used as the capability-table key and by patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpKind {
    Parameter,
    Constant,
    Result,
    Add,
    Subtract,
    Multiply,
    Equal,
    NotEqual,
    MatMul,
    FullyConnected,
    Transpose,
    Reshape,
    Softmax,
    Convert,
    Quantize,
    Dequantize,
    Unique,
    ShapeOf,
    Squeeze,
    Unsqueeze,
    TopK,
    Concat,
    Select,
    Slice,
    NonZero,
    Gather,
    Range,
    ReduceMin,
    ReduceMax,
    Subgraph,
}

impl OpKind {
    pub const ALL: [OpKind; 30] = [
        OpKind::Parameter,
        OpKind::Constant,
        OpKind::Result,
        OpKind::Add,
        OpKind::Subtract,
        OpKind::Multiply,
        OpKind::Equal,
        OpKind::NotEqual,
        OpKind::MatMul,
        OpKind::FullyConnected,
        OpKind::Transpose,
        OpKind::Reshape,
        OpKind::Softmax,
        OpKind::Convert,
        OpKind::Quantize,
        OpKind::Dequantize,
        OpKind::Unique,
        OpKind::ShapeOf,
        OpKind::Squeeze,
        OpKind::Unsqueeze,
        OpKind::TopK,
        OpKind::Concat,
        OpKind::Select,
        OpKind::Slice,
        OpKind::NonZero,
        OpKind::Gather,
        OpKind::Range,
        OpKind::ReduceMin,
        OpKind::ReduceMax,
        OpKind::Subgraph,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OpKind::Parameter => "Parameter",
            OpKind::Constant => "Constant",
            OpKind::Result => "Result",
            OpKind::Add => "Add",
            OpKind::Subtract => "Subtract",
            OpKind::Multiply => "Multiply",
            OpKind::Equal => "Equal",
            OpKind::NotEqual => "NotEqual",
            OpKind::MatMul => "MatMul",
            OpKind::FullyConnected => "FullyConnected",
            OpKind::Transpose => "Transpose",
            OpKind::Reshape => "Reshape",
            OpKind::Softmax => "Softmax",
            OpKind::Convert => "Convert",
            OpKind::Quantize => "Quantize",
            OpKind::Dequantize => "Dequantize",
            OpKind::Unique => "Unique",
            OpKind::ShapeOf => "ShapeOf",
            OpKind::Squeeze => "Squeeze",
            OpKind::Unsqueeze => "Unsqueeze",
            OpKind::TopK => "TopK",
            OpKind::Concat => "Concat",
            OpKind::Select => "Select",
            OpKind::Slice => "Slice",
            OpKind::NonZero => "NonZero",
            OpKind::Gather => "Gather",
            OpKind::Range => "Range",
            OpKind::ReduceMin => "ReduceMin",
            OpKind::ReduceMax => "ReduceMax",
            OpKind::Subgraph => "Subgraph",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Operation {
    pub fn kind(&self) -> OpKind {
        match self {
            Operation::Parameter { .. } => OpKind::Parameter,
            Operation::Constant(_) => OpKind::Constant,
            Operation::Result => OpKind::Result,
            Operation::Add => OpKind::Add,
            Operation::Subtract => OpKind::Subtract,
            Operation::Multiply => OpKind::Multiply,
            Operation::Equal => OpKind::Equal,
            Operation::NotEqual => OpKind::NotEqual,
            Operation::MatMul { .. } => OpKind::MatMul,
            Operation::FullyConnected => OpKind::FullyConnected,
            Operation::Transpose { .. } => OpKind::Transpose,
            Operation::Reshape { .. } => OpKind::Reshape,
            Operation::Softmax { .. } => OpKind::Softmax,
            Operation::Convert { .. } => OpKind::Convert,
            Operation::Quantize { .. } => OpKind::Quantize,
            Operation::Dequantize { .. } => OpKind::Dequantize,
            Operation::Unique { .. } => OpKind::Unique,
            Operation::ShapeOf { .. } => OpKind::ShapeOf,
            Operation::Squeeze { .. } => OpKind::Squeeze,
            Operation::Unsqueeze { .. } => OpKind::Unsqueeze,
            Operation::TopK { .. } => OpKind::TopK,
            Operation::Concat { .. } => OpKind::Concat,
            Operation::Select => OpKind::Select,
            Operation::Slice { .. } => OpKind::Slice,
            Operation::NonZero { .. } => OpKind::NonZero,
            Operation::Gather { .. } => OpKind::Gather,
            Operation::Range { .. } => OpKind::Range,
            Operation::ReduceMin { .. } => OpKind::ReduceMin,
            Operation::ReduceMax { .. } => OpKind::ReduceMax,
            Operation::Subgraph { .. } => OpKind::Subgraph,
        }
    }

    pub fn as_constant(&self) -> Option<&ConstantValue> {
        match self {
            Operation::Constant(value) => Some(value),
            _ => None,
        }
    }

    pub fn subgraph_body(&self) -> Option<&Graph> {
        match self {
            Operation::Subgraph { body } => Some(body),
            _ => None,
        }
    }

    /// Writes the kind-specific parameters in `key=value` form; empty for parameterless kinds.
    pub(crate) fn fmt_params(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Parameter { spec } => write!(f, "[{spec}]"),
            Operation::Constant(value) => write!(f, "[{value}]"),
            Operation::MatMul {
                transpose_a,
                transpose_b,
            } => write!(f, "[transpose_a={transpose_a}, transpose_b={transpose_b}]"),
            Operation::Transpose { perm } => write!(f, "[perm={perm:?}]"),
            Operation::Reshape {
                target,
                special_zero,
            } => write!(f, "[target={target:?}, special_zero={special_zero}]"),
            Operation::Softmax { axis } | Operation::Concat { axis } | Operation::Gather { axis } => {
                write!(f, "[axis={axis}]")
            }
            Operation::Convert { to } => write!(f, "[to={to}]"),
            Operation::Quantize {
                scale,
                zero_point,
                output,
            } => write!(f, "[scale={scale}, zero_point={zero_point}, output={output}]"),
            Operation::Dequantize { scale, zero_point } => {
                write!(f, "[scale={scale}, zero_point={zero_point}]")
            }
            Operation::Unique { index_type, axis } => match axis {
                Some(axis) => write!(f, "[index_type={index_type}, axis={axis}]"),
                None => write!(f, "[index_type={index_type}]"),
            },
            Operation::ShapeOf { output }
            | Operation::NonZero { output }
            | Operation::Range { output } => write!(f, "[output={output}]"),
            Operation::Squeeze { axes } | Operation::Unsqueeze { axes } => {
                write!(f, "[axes={axes:?}]")
            }
            Operation::TopK {
                axis,
                mode,
                index_type,
            } => write!(f, "[axis={axis}, mode={mode:?}, index_type={index_type}]"),
            Operation::Slice {
                start,
                stop,
                step,
                axis,
            } => write!(f, "[start={start}, stop={stop}, step={step}, axis={axis}]"),
            Operation::ReduceMin { axes, keep_dims } | Operation::ReduceMax { axes, keep_dims } => {
                write!(f, "[axes={axes:?}, keep_dims={keep_dims}]")
            }
            Operation::Subgraph { body } => write!(f, "[nodes={}]", body.len()),
            Operation::Result
            | Operation::Add
            | Operation::Subtract
            | Operation::Multiply
            | Operation::Equal
            | Operation::NotEqual
            | Operation::FullyConnected
            | Operation::Select => Ok(()),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind().as_str())?;
        self.fmt_params(f)
    }
}

/// Returns `true` when `perm` keeps every axis in place.
pub fn is_identity_perm(perm: &[usize]) -> bool {
    perm.iter().copied().eq(0..perm.len())
}
