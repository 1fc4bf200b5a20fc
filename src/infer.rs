//! Traits for type inference and helpers shared by operators.

use std::error::Error;
use std::fmt;

use smallvec::SmallVec;

use crate::layout::{Layout, LayoutError};
use crate::struct_info::{DataType, StructInfo, TensorType};
use crate::sym_expr::SymExpr;

/// Reasons an operator invocation is rejected by type inference.
#[derive(Clone, Debug, PartialEq)]
pub enum TypeError {
    /// Too many or too few arguments were provided for this operator.
    IncorrectArgumentCount { expected: usize, actual: usize },

    /// An argument is not of the kind the operator requires.
    WrongArgumentKind {
        index: usize,
        expected: &'static str,
        actual: &'static str,
    },

    /// A layout attribute could not be parsed.
    InvalidLayout {
        attr: &'static str,
        layout: String,
        error: LayoutError,
    },

    /// An argument's rank differs from the rank of its layout.
    RankMismatch {
        arg: &'static str,
        layout: String,
        expected: usize,
        actual: usize,
    },

    /// A `strides`, `padding`, `dilation` or `pool_size` attribute has an
    /// unsupported number of elements.
    WrongArity { attr: &'static str, actual: usize },

    /// The input and weight channel counts are provably different.
    ChannelMismatch { data: SymExpr, weight: SymExpr },

    /// The input and weight element types differ and no output type was
    /// given.
    DtypeMismatch { data: DataType, weight: DataType },
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IncorrectArgumentCount { expected, actual } => {
                write!(f, "expected {} arguments but got {}", expected, actual)
            }
            Self::WrongArgumentKind {
                index,
                expected,
                actual,
            } => write!(
                f,
                "argument {} should be a {} but is a {}",
                index, expected, actual
            ),
            Self::InvalidLayout {
                attr,
                layout,
                error,
            } => write!(f, "invalid {} \"{}\": {}", attr, layout, error),
            Self::RankMismatch {
                arg,
                layout,
                expected,
                actual,
            } => write!(
                f,
                "{} has rank {} but layout \"{}\" has rank {}",
                arg, actual, layout, expected
            ),
            Self::WrongArity { attr, actual } => {
                write!(f, "{} has unsupported length {}", attr, actual)
            }
            Self::ChannelMismatch { data, weight } => write!(
                f,
                "input channels ({}) do not match weight input channels ({})",
                data, weight
            ),
            Self::DtypeMismatch { data, weight } => write!(
                f,
                "input type {} does not match weight type {}",
                data, weight
            ),
        }
    }
}

impl Error for TypeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidLayout { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Infer the structural type of an operator's output given the types of its
/// arguments.
///
/// Implementations must be pure: structurally equal arguments must produce
/// structurally equal results, so that results can be cached.
pub trait InferType {
    fn infer_type(&self, args: &[StructInfo]) -> Result<TensorType, TypeError>;
}

/// Check that `args` contains exactly `N` tensors and return them.
pub(crate) fn tensor_args<const N: usize>(
    args: &[StructInfo],
) -> Result<[&TensorType; N], TypeError> {
    let count_error = || TypeError::IncorrectArgumentCount {
        expected: N,
        actual: args.len(),
    };
    if args.len() != N {
        return Err(count_error());
    }

    let tensors: SmallVec<[&TensorType; N]> = args
        .iter()
        .enumerate()
        .map(|(index, arg)| {
            arg.as_tensor().ok_or(TypeError::WrongArgumentKind {
                index,
                expected: "Tensor",
                actual: arg.kind_name(),
            })
        })
        .collect::<Result<_, _>>()?;
    tensors.into_inner().map_err(|_| count_error())
}

/// Parse a layout attribute.
pub(crate) fn parse_layout(
    attr: &'static str,
    spec: &str,
    required: &[char],
) -> Result<Layout, TypeError> {
    Layout::parse(spec, required).map_err(|error| TypeError::InvalidLayout {
        attr,
        layout: spec.to_string(),
        error,
    })
}

/// Check that the rank of `ty`, if known, matches `layout`.
pub(crate) fn check_rank(
    arg: &'static str,
    ty: &TensorType,
    layout: &Layout,
) -> Result<(), TypeError> {
    match ty.ndim() {
        Some(ndim) if ndim != layout.rank() => Err(TypeError::RankMismatch {
            arg,
            layout: layout.to_string(),
            expected: layout.rank(),
            actual: ndim,
        }),
        _ => Ok(()),
    }
}

/// Expand a per-spatial-axis attribute to `[height, width]`.
///
/// A single value applies to both axes.
pub(crate) fn expand_pair(
    attr: &'static str,
    values: &[SymExpr],
) -> Result<[SymExpr; 2], TypeError> {
    match values {
        [x] => Ok([x.clone(), x.clone()]),
        [h, w] => Ok([h.clone(), w.clone()]),
        _ => Err(TypeError::WrongArity {
            attr,
            actual: values.len(),
        }),
    }
}

/// Expand a padding attribute to `[top, left, bottom, right]`.
///
/// A single value applies to all sides and a pair `[h, w]` applies `h` to the
/// top and bottom and `w` to the left and right.
pub(crate) fn expand_padding(values: &[SymExpr]) -> Result<[SymExpr; 4], TypeError> {
    match values {
        [x] => Ok([x.clone(), x.clone(), x.clone(), x.clone()]),
        [h, w] => Ok([h.clone(), w.clone(), h.clone(), w.clone()]),
        [top, left, bottom, right] => {
            Ok([top.clone(), left.clone(), bottom.clone(), right.clone()])
        }
        _ => Err(TypeError::WrongArity {
            attr: "padding",
            actual: values.len(),
        }),
    }
}

/// Choose the output element type of an operator with data and weight inputs.
///
/// An explicit `out_dtype` wins. Otherwise the input types must agree if both
/// are known, and the result is erased if either is erased.
pub(crate) fn output_dtype(
    out_dtype: Option<DataType>,
    data: Option<DataType>,
    weight: Option<DataType>,
) -> Result<Option<DataType>, TypeError> {
    if out_dtype.is_some() {
        return Ok(out_dtype);
    }
    match (data, weight) {
        (Some(data), Some(weight)) if data != weight => {
            Err(TypeError::DtypeMismatch { data, weight })
        }
        (Some(data), Some(_)) => Ok(Some(data)),
        _ => Ok(None),
    }
}
