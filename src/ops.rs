//! Operators and their type inference rules.

use crate::infer::{InferType, TypeError};
use crate::struct_info::{StructInfo, TensorType};

mod conv_pool;

pub use conv_pool::{Conv2d, Pool2d};

/// Operator applied by a call node, together with its attributes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Conv2d(Conv2d),
    MaxPool2d(Pool2d),
    AvgPool2d(Pool2d),
}

impl Op {
    /// Return the name of the operator, eg. "nn.conv2d".
    pub fn name(&self) -> &'static str {
        match self {
            Op::Conv2d(_) => "nn.conv2d",
            Op::MaxPool2d(_) => "nn.max_pool2d",
            Op::AvgPool2d(_) => "nn.avg_pool2d",
        }
    }

    /// Return a copy of the operator with symbolic attributes in canonical
    /// form.
    ///
    /// Operators which differ only in the arrangement of symbolic attributes,
    /// eg. a padding of `p` vs `p + 0`, have equal canonical forms.
    pub fn canonical(&self) -> Op {
        match self {
            Op::Conv2d(op) => Op::Conv2d(op.canonical()),
            Op::MaxPool2d(op) => Op::MaxPool2d(op.canonical()),
            Op::AvgPool2d(op) => Op::AvgPool2d(op.canonical()),
        }
    }

    /// Check attributes which can be validated without knowing the types of
    /// the arguments.
    pub fn validate(&self) -> Result<(), TypeError> {
        match self {
            Op::Conv2d(op) => op.validate(),
            Op::MaxPool2d(op) | Op::AvgPool2d(op) => op.validate(),
        }
    }
}

impl InferType for Op {
    fn infer_type(&self, args: &[StructInfo]) -> Result<TensorType, TypeError> {
        match self {
            Op::Conv2d(op) => op.infer_type(args),
            Op::MaxPool2d(op) | Op::AvgPool2d(op) => op.infer_type(args),
        }
    }
}

impl From<Conv2d> for Op {
    fn from(op: Conv2d) -> Op {
        Op::Conv2d(op)
    }
}

#[cfg(test)]
mod tests {
    use super::{Conv2d, Op, Pool2d};
    use crate::infer::{InferType, TypeError};
    use crate::struct_info::{DataType, TensorType};
    use crate::sym_expr::SymExpr;

    #[test]
    fn test_dispatch() {
        let data = TensorType::from_fixed_shape(&[1, 8, 32, 32], DataType::Float32);
        let weight = TensorType::from_fixed_shape(&[16, 8, 3, 3], DataType::Float32);

        let conv = Op::from(Conv2d::default());
        assert_eq!(conv.name(), "nn.conv2d");
        let ty = conv
            .infer_type(&[data.clone().into(), weight.into()])
            .unwrap();
        assert_eq!(ty, TensorType::from_fixed_shape(&[1, 16, 30, 30], DataType::Float32));

        let pool = Pool2d {
            pool_size: dims!(2),
            strides: dims!(2),
            ..Default::default()
        };
        let max_pool = Op::MaxPool2d(pool.clone());
        let avg_pool = Op::AvgPool2d(pool);
        assert_eq!(max_pool.name(), "nn.max_pool2d");
        assert_eq!(avg_pool.name(), "nn.avg_pool2d");
        assert_ne!(max_pool, avg_pool);

        let expected = TensorType::from_fixed_shape(&[1, 8, 16, 16], DataType::Float32);
        for op in [max_pool, avg_pool] {
            assert_eq!(op.infer_type(&[data.clone().into()]).unwrap(), expected);
        }
    }

    #[test]
    fn test_validate() {
        let op = Op::AvgPool2d(Pool2d {
            strides: dims!(1, 1, 1),
            ..Default::default()
        });
        assert_eq!(
            op.validate(),
            Err(TypeError::WrongArity {
                attr: "strides",
                actual: 3
            })
        );
        assert!(Op::from(Conv2d::default()).validate().is_ok());
    }

    #[test]
    fn test_canonical_keeps_operator_kind() {
        let pool = Pool2d {
            strides: vec![SymExpr::from("s") * SymExpr::from(1)],
            ..Default::default()
        };
        let op = Op::AvgPool2d(pool);
        let canonical = op.canonical();
        assert_eq!(canonical.name(), "nn.avg_pool2d");
        assert_eq!(
            canonical,
            Op::AvgPool2d(Pool2d {
                strides: dims!("s"),
                ..Default::default()
            })
        );
        assert_eq!(canonical.canonical(), canonical);
    }
}
