//! Structural type inference for tensor IR operators.
//!
//! Every expression in the IR has a _structural type_ ([`StructInfo`]) which
//! describes its kind and, for tensors, its rank, shape and element type.
//! Shapes may be partially known: each axis extent is a symbolic expression
//! ([`SymExpr`]) which can be a known integer, a named symbol, arithmetic on
//! these, or unknown.
//!
//! Operators ([`ops::Op`]) compute the type of their output from the types
//! of their arguments via the [`InferType`] trait, or reject invalid calls
//! with a [`TypeError`]. Layout-sensitive operators interpret the physical
//! order of tensor axes using a [`Layout`] such as `"NCHW"` or `"NCHW16c"`.
//!
//! # Building expressions
//!
//! Call nodes are created unfinished and then normalized by a
//! [`BlockBuilder`], which infers and attaches their types:
//!
//! ```
//! use structinfo::ops::Conv2d;
//! use structinfo::{BlockBuilder, BuilderOptions, DataType, Expr, TensorType, dims};
//!
//! let bb = BlockBuilder::with_options(BuilderOptions::default());
//! let x = Expr::var("x", TensorType::new(dims!("n", 3, 28, 28), DataType::Float32));
//! let w = Expr::var("w", TensorType::new(dims!(4, 3, 3, 3), DataType::Float32));
//! let conv = Expr::call(Conv2d::default(), vec![x, w]).unwrap();
//!
//! bb.normalize(&conv).unwrap();
//! let ty = conv.struct_info().unwrap();
//! assert_eq!(ty.to_string(), "Tensor((n, 4, 26, 26), \"float32\")");
//! ```
//!
//! The builder memoizes inference, so structurally equal calls are only
//! inferred once, including when expressions are normalized concurrently
//! with [`BlockBuilder::normalize_all`].
//!
//! # Environment variables
//!
//! - `STRUCTINFO_MEMOIZE` - Set to "0" or "false" to disable memoization in
//!   builders created with [`BlockBuilder::new`].
//! - `STRUCTINFO_DIAGNOSTICS` - Set to "warn" to print rejected calls, or
//!   "info" to also print every inferred type.

#[macro_use]
mod sym_expr;

pub mod builder;
mod diagnostics;
mod env;
mod infer;
mod layout;
pub mod ops;
mod struct_info;

pub use builder::{BlockBuilder, BuildError, BuilderOptions, Expr};
pub use diagnostics::{DiagnosticLevel, Diagnostics};
pub use infer::{InferType, TypeError};
pub use layout::{Layout, LayoutAxis, LayoutError};
pub use struct_info::{
    DataType, FuncType, ParseDataTypeError, ShapeType, ShapeVar, StructInfo, TensorShape,
    TensorType,
};
pub use sym_expr::{SymExpr, Symbol, div_floor};
