//! Structural types of IR expressions.
//!
//! A [`StructInfo`] describes the static kind of an expression: a tensor with
//! a possibly-partial shape and element type, a shape value, a function or an
//! object about which nothing is known.

use std::error::Error;
use std::fmt;
use std::str::FromStr;

use crate::sym_expr::SymExpr;

/// Element type of a tensor.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    Float16,
    BFloat16,
    Float32,
    Float64,
}

impl DataType {
    /// Return the name of this type, eg. "float32".
    pub fn name(self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::UInt8 => "uint8",
            DataType::UInt16 => "uint16",
            DataType::UInt32 => "uint32",
            DataType::Float16 => "float16",
            DataType::BFloat16 => "bfloat16",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
        }
    }

    /// Return the size of elements of this type in bits.
    pub fn bits(self) -> u8 {
        match self {
            DataType::Bool | DataType::Int8 | DataType::UInt8 => 8,
            DataType::Int16 | DataType::UInt16 | DataType::Float16 | DataType::BFloat16 => 16,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 32,
            DataType::Int64 | DataType::Float64 => 64,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Error returned when parsing an unrecognized element type name.
#[derive(Clone, Debug, PartialEq)]
pub struct ParseDataTypeError(String);

impl fmt::Display for ParseDataTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown data type \"{}\"", self.0)
    }
}

impl Error for ParseDataTypeError {}

impl FromStr for DataType {
    type Err = ParseDataTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dtype = match s {
            "bool" => DataType::Bool,
            "int8" => DataType::Int8,
            "int16" => DataType::Int16,
            "int32" => DataType::Int32,
            "int64" => DataType::Int64,
            "uint8" => DataType::UInt8,
            "uint16" => DataType::UInt16,
            "uint32" => DataType::UInt32,
            "float16" => DataType::Float16,
            "bfloat16" => DataType::BFloat16,
            "float32" => DataType::Float32,
            "float64" => DataType::Float64,
            _ => return Err(ParseDataTypeError(s.to_string())),
        };
        Ok(dtype)
    }
}

/// Reference to a shape-valued variable.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ShapeVar {
    pub name: String,

    /// Rank of the shape, if known.
    pub ndim: Option<usize>,
}

impl ShapeVar {
    pub fn new(name: &str, ndim: Option<usize>) -> Self {
        ShapeVar {
            name: name.to_string(),
            ndim,
        }
    }
}

/// Shape of a tensor, where known.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum TensorShape {
    /// Sequence of axis extents.
    Dims(Vec<SymExpr>),
    /// The shape is the value of a shape variable.
    Var(ShapeVar),
}

/// Structural type of a tensor-valued expression.
///
/// The dtype, shape and rank can each be erased. When the shape is a sequence
/// of extents, the rank always equals the sequence length.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct TensorType {
    dtype: Option<DataType>,
    shape: Option<TensorShape>,
    ndim: Option<usize>,
}

impl TensorType {
    /// Create a tensor type with a sequence of axis extents.
    ///
    /// ```
    /// use structinfo::{DataType, TensorType, dims};
    ///
    /// let ty = TensorType::new(dims!("n", 3, 28, 28), DataType::Float32);
    /// assert_eq!(ty.ndim(), Some(4));
    /// assert_eq!(ty.to_string(), "Tensor((n, 3, 28, 28), \"float32\")");
    /// ```
    pub fn new(dims: Vec<SymExpr>, dtype: impl Into<Option<DataType>>) -> Self {
        TensorType {
            dtype: dtype.into(),
            ndim: Some(dims.len()),
            shape: Some(TensorShape::Dims(dims)),
        }
    }

    /// Create a tensor type with known extents.
    pub fn from_fixed_shape(shape: &[i64], dtype: impl Into<Option<DataType>>) -> Self {
        Self::new(shape.iter().copied().map(SymExpr::Value).collect(), dtype)
    }

    /// Create a tensor type whose shape is the value of a shape variable.
    pub fn from_shape_var(var: ShapeVar, dtype: impl Into<Option<DataType>>) -> Self {
        TensorType {
            dtype: dtype.into(),
            ndim: var.ndim,
            shape: Some(TensorShape::Var(var)),
        }
    }

    /// Create a tensor type with a known rank but no shape.
    pub fn with_ndim(ndim: usize, dtype: impl Into<Option<DataType>>) -> Self {
        TensorType {
            dtype: dtype.into(),
            shape: None,
            ndim: Some(ndim),
        }
    }

    /// Create a tensor type with an unknown rank.
    pub fn unknown_rank(dtype: impl Into<Option<DataType>>) -> Self {
        TensorType {
            dtype: dtype.into(),
            shape: None,
            ndim: None,
        }
    }

    /// Return the element type, or `None` if erased.
    pub fn dtype(&self) -> Option<DataType> {
        self.dtype
    }

    /// Return the rank, or `None` if erased.
    pub fn ndim(&self) -> Option<usize> {
        self.ndim
    }

    pub fn shape(&self) -> Option<&TensorShape> {
        self.shape.as_ref()
    }

    /// Return the axis extents, if the shape is a known sequence.
    pub fn dims(&self) -> Option<&[SymExpr]> {
        match &self.shape {
            Some(TensorShape::Dims(dims)) => Some(dims),
            _ => None,
        }
    }

    pub fn dtype_known(&self) -> bool {
        self.dtype.is_some()
    }

    /// Return true if the axis extents are known.
    ///
    /// Individual extents may still be symbolic or unknown.
    pub fn shape_known(&self) -> bool {
        self.dims().is_some()
    }

    pub fn rank_known(&self) -> bool {
        self.ndim.is_some()
    }

    /// Return a copy of this type with every extent in canonical form.
    pub fn canonical(&self) -> TensorType {
        let shape = match &self.shape {
            Some(TensorShape::Dims(dims)) => Some(TensorShape::Dims(
                dims.iter().map(SymExpr::simplify).collect(),
            )),
            other => other.clone(),
        };
        TensorType {
            dtype: self.dtype,
            shape,
            ndim: self.ndim,
        }
    }

    /// Return true if `self` and `other` are equal modulo rearrangement of
    /// symbolic extents.
    pub fn structural_eq(&self, other: &TensorType) -> bool {
        self.canonical() == other.canonical()
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor(")?;
        match (&self.shape, self.ndim) {
            (Some(TensorShape::Dims(dims)), _) => {
                write!(f, "(")?;
                for (i, dim) in dims.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", dim)?;
                }
                write!(f, ")")?;
            }
            (Some(TensorShape::Var(var)), _) => write!(f, "{}", var.name)?,
            (None, Some(ndim)) => write!(f, "ndim={}", ndim)?,
            (None, None) => write!(f, "ndim=?")?,
        }
        match self.dtype {
            Some(dtype) => write!(f, ", \"{}\")", dtype),
            None => write!(f, ", \"\")"),
        }
    }
}

/// Structural type of a shape-valued expression.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ShapeType {
    pub ndim: Option<usize>,
}

impl ShapeType {
    pub fn new(ndim: Option<usize>) -> Self {
        ShapeType { ndim }
    }
}

/// Structural type of a callable value.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct FuncType {
    /// Parameter types, or `None` if the signature is opaque.
    pub params: Option<Vec<StructInfo>>,
    pub ret: Box<StructInfo>,
}

/// Structural type of an expression.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum StructInfo {
    /// Value about which nothing is known.
    Object,
    Tensor(TensorType),
    Shape(ShapeType),
    Func(FuncType),
}

impl StructInfo {
    pub fn is_tensor(&self) -> bool {
        matches!(self, Self::Tensor(_))
    }

    pub fn is_shape(&self) -> bool {
        matches!(self, Self::Shape(_))
    }

    pub fn is_func(&self) -> bool {
        matches!(self, Self::Func(_))
    }

    pub fn as_tensor(&self) -> Option<&TensorType> {
        match self {
            Self::Tensor(ty) => Some(ty),
            _ => None,
        }
    }

    /// Return a short name for the kind of value, for use in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Object => "Object",
            Self::Tensor(_) => "Tensor",
            Self::Shape(_) => "Shape",
            Self::Func(_) => "Func",
        }
    }

    /// Return a copy with every symbolic extent in canonical form.
    ///
    /// Canonical types are used as memoization keys.
    pub fn canonical(&self) -> StructInfo {
        match self {
            Self::Object | Self::Shape(_) => self.clone(),
            Self::Tensor(ty) => Self::Tensor(ty.canonical()),
            Self::Func(func) => Self::Func(FuncType {
                params: func
                    .params
                    .as_ref()
                    .map(|params| params.iter().map(StructInfo::canonical).collect()),
                ret: Box::new(func.ret.canonical()),
            }),
        }
    }

    /// Return true if `self` and `other` are equal modulo rearrangement of
    /// symbolic extents.
    pub fn structural_eq(&self, other: &StructInfo) -> bool {
        self.canonical() == other.canonical()
    }
}

impl From<TensorType> for StructInfo {
    fn from(ty: TensorType) -> Self {
        Self::Tensor(ty)
    }
}

impl From<ShapeType> for StructInfo {
    fn from(ty: ShapeType) -> Self {
        Self::Shape(ty)
    }
}

impl From<FuncType> for StructInfo {
    fn from(ty: FuncType) -> Self {
        Self::Func(ty)
    }
}

impl fmt::Display for StructInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object => write!(f, "Object"),
            Self::Tensor(ty) => write!(f, "{}", ty),
            Self::Shape(ty) => match ty.ndim {
                Some(ndim) => write!(f, "Shape(ndim={})", ndim),
                None => write!(f, "Shape(ndim=?)"),
            },
            Self::Func(func) => {
                write!(f, "Func(")?;
                match &func.params {
                    Some(params) => {
                        write!(f, "[")?;
                        for (i, param) in params.iter().enumerate() {
                            if i > 0 {
                                write!(f, ", ")?;
                            }
                            write!(f, "{}", param)?;
                        }
                        write!(f, "]")?;
                    }
                    None => write!(f, "...")?,
                }
                write!(f, ", {})", func.ret)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use structinfo_testing::TestCases;

    use super::{
        DataType, FuncType, ShapeType, ShapeVar, StructInfo, TensorShape, TensorType,
    };
    use crate::SymExpr;

    #[test]
    fn test_parse_dtype() {
        #[derive(Debug)]
        struct Case {
            name: &'static str,
            expected: Option<DataType>,
            bits: u8,
        }

        let cases = [
            Case {
                name: "float32",
                expected: Some(DataType::Float32),
                bits: 32,
            },
            Case {
                name: "bfloat16",
                expected: Some(DataType::BFloat16),
                bits: 16,
            },
            Case {
                name: "int8",
                expected: Some(DataType::Int8),
                bits: 8,
            },
            Case {
                name: "f32",
                expected: None,
                bits: 0,
            },
            Case {
                name: "",
                expected: None,
                bits: 0,
            },
        ];

        cases.test_each(|case| {
            let parsed = case.name.parse::<DataType>().ok();
            assert_eq!(parsed, case.expected);
            if let Some(dtype) = parsed {
                assert_eq!(dtype.to_string(), case.name);
                assert_eq!(dtype.bits(), case.bits);
            }
        });
    }

    #[test]
    fn test_tensor_type_rank_matches_shape() {
        let ty = TensorType::new(dims!("n", 3, 28), DataType::Float32);
        assert_eq!(ty.ndim(), Some(3));
        assert!(ty.shape_known());
        assert!(ty.rank_known());
        assert!(ty.dtype_known());

        let ty = TensorType::from_shape_var(ShapeVar::new("s", Some(4)), None);
        assert_eq!(ty.ndim(), Some(4));
        assert!(!ty.shape_known());
        assert!(!ty.dtype_known());
        assert!(matches!(ty.shape(), Some(TensorShape::Var(_))));

        let ty = TensorType::with_ndim(4, DataType::Int8);
        assert_eq!(ty.ndim(), Some(4));
        assert_eq!(ty.dims(), None);

        let ty = TensorType::unknown_rank(None);
        assert!(!ty.rank_known());
    }

    #[test]
    fn test_kind_predicates() {
        let tensor = StructInfo::from(TensorType::unknown_rank(None));
        let shape = StructInfo::from(ShapeType::new(Some(4)));
        let func = StructInfo::from(FuncType {
            params: Some(Vec::new()),
            ret: Box::new(tensor.clone()),
        });

        assert!(tensor.is_tensor() && !tensor.is_shape() && !tensor.is_func());
        assert!(shape.is_shape() && !shape.is_tensor());
        assert!(func.is_func() && func.as_tensor().is_none());
        assert!(!StructInfo::Object.is_tensor());
        assert_eq!(func.kind_name(), "Func");
    }

    #[test]
    fn test_structural_eq() {
        let ih = SymExpr::from("ih");
        let lhs = TensorType::new(
            vec![ih.clone() + SymExpr::from(0), SymExpr::from(2) * ih.clone()],
            DataType::Float32,
        );
        let rhs = TensorType::new(vec![ih.clone(), ih.clone() + ih.clone()], DataType::Float32);
        assert_ne!(lhs, rhs);
        assert!(lhs.structural_eq(&rhs));

        let other_dtype = TensorType::new(vec![ih.clone(), ih.clone() * 2.into()], DataType::Int32);
        assert!(!lhs.structural_eq(&other_dtype));

        let func = |ret: TensorType| {
            StructInfo::from(FuncType {
                params: None,
                ret: Box::new(ret.into()),
            })
        };
        assert!(func(lhs).structural_eq(&func(rhs)));
    }

    #[test]
    fn test_display() {
        #[derive(Debug)]
        struct Case {
            info: StructInfo,
            expected: &'static str,
        }

        let cases = [
            Case {
                info: TensorType::from_fixed_shape(&[2, 4, 26, 26], DataType::Float32).into(),
                expected: "Tensor((2, 4, 26, 26), \"float32\")",
            },
            Case {
                info: TensorType::with_ndim(4, None).into(),
                expected: "Tensor(ndim=4, \"\")",
            },
            Case {
                info: TensorType::from_shape_var(ShapeVar::new("s", Some(4)), DataType::Int8)
                    .into(),
                expected: "Tensor(s, \"int8\")",
            },
            Case {
                info: ShapeType::new(None).into(),
                expected: "Shape(ndim=?)",
            },
            Case {
                info: FuncType {
                    params: Some(Vec::new()),
                    ret: Box::new(TensorType::unknown_rank(DataType::Float16).into()),
                }
                .into(),
                expected: "Func([], Tensor(ndim=?, \"float16\"))",
            },
        ];

        cases.test_each(|case| {
            assert_eq!(case.info.to_string(), case.expected);
        });
    }
}
