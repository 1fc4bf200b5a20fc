//! Symbolic expressions representing axis extents.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;
use std::ops::{Add, Mul, Sub};
use std::sync::Arc;

/// A named symbolic extent, such as a batch size or image height.
///
/// Two symbols are equal if they have the same name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol {
    pub name: String,
}

/// Symbolic expression representing the extent of a tensor axis.
///
/// Expressions can be known integer values, named symbols, composite
/// expressions involving these, or `Unknown`.
///
/// Arithmetic via the `+`, `-` and `*` operators and [`floor_div`](Self::floor_div)
/// folds to a value when both operands are known integers and otherwise builds
/// a new expression node. No other rewriting happens on construction, so two
/// expressions built the same way from the same operands are equal under
/// `==`. Use [`structural_eq`](Self::structural_eq) to compare expressions
/// modulo algebraic rearrangement.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum SymExpr {
    /// Extent with a known integer value.
    Value(i64),
    /// Named symbolic extent.
    Var(Arc<Symbol>),
    /// Addition of two extents.
    Add(Arc<SymExpr>, Arc<SymExpr>),
    /// Subtraction of the second extent from the first.
    Sub(Arc<SymExpr>, Arc<SymExpr>),
    /// Multiplication of two extents.
    Mul(Arc<SymExpr>, Arc<SymExpr>),
    /// Flooring division of the first extent by the second.
    FloorDiv(Arc<SymExpr>, Arc<SymExpr>),
    /// Extent about which nothing is known.
    ///
    /// Any arithmetic involving an unknown extent produces an unknown extent.
    Unknown,
}

impl SymExpr {
    /// Create a named symbol.
    pub fn var(name: &str) -> Self {
        SymExpr::Var(
            Symbol {
                name: name.to_string(),
            }
            .into(),
        )
    }

    /// Return the value of this expression if it is a known integer.
    pub fn as_value(&self) -> Option<i64> {
        match self {
            Self::Value(x) => Some(*x),
            _ => None,
        }
    }

    /// Return true if this is the `Unknown` extent.
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    /// Return `floor(self / rhs)`.
    ///
    /// The result is only evaluated if both operands are known and the divisor
    /// is non-zero. Otherwise a `FloorDiv` node is returned.
    pub fn floor_div(&self, rhs: &SymExpr) -> SymExpr {
        binary_op(self.clone(), rhs.clone(), div_floor, SymExpr::FloorDiv)
    }

    /// Return the canonical form of this expression.
    ///
    /// The canonical form is a sum of products where like terms have been
    /// combined and constants folded. Flooring division by a constant `c`
    /// is reduced by moving multiples of `c` out of the dividend, so that
    /// `floordiv(2 * x + 5, 2)` becomes `x + 2`.
    ///
    /// Two expressions that are equal for all values of their symbols, using
    /// only the rewrites above, have identical canonical forms.
    pub fn simplify(&self) -> SymExpr {
        NormalForm::from_expr(self).to_expr()
    }

    /// Return true if `self` and `other` have the same canonical form.
    ///
    /// ```
    /// use structinfo::SymExpr;
    ///
    /// let ih = SymExpr::from("ih");
    /// let kh = SymExpr::from("kh");
    /// let one = SymExpr::from(1);
    /// let out = (ih.clone() + SymExpr::from(0) - (kh.clone() - one.clone()) - one.clone())
    ///     .floor_div(&one)
    ///     + one.clone();
    /// assert!(out.structural_eq(&(ih + one - kh)));
    /// ```
    pub fn structural_eq(&self, other: &SymExpr) -> bool {
        NormalForm::from_expr(self) == NormalForm::from_expr(other)
    }

    /// Return true if `self` and `other` are provably different.
    ///
    /// This is the case only when their difference reduces to a non-zero
    /// constant, eg. `3` vs `4` or `c` vs `c + 2`. Expressions involving
    /// unknown extents are never provably unequal.
    pub fn provably_unequal(&self, other: &SymExpr) -> bool {
        if self.is_unknown() || other.is_unknown() {
            return false;
        }
        let diff = NormalForm::from_expr(self).add(&NormalForm::from_expr(other).scale(-1));
        matches!(diff.as_constant(), Some(c) if c != 0)
    }

    /// Return true unless `self` and `other` are provably different.
    ///
    /// Comparisons that cannot be decided are treated as equal.
    pub fn may_equal(&self, other: &SymExpr) -> bool {
        !self.provably_unequal(other)
    }

    /// Return the precedence of the operator.
    ///
    /// This is used to add parentheses when formatting an expression tree.
    fn precedence(&self) -> u8 {
        match self {
            Self::Value(_) | Self::Var(_) | Self::FloorDiv(..) | Self::Unknown => 3,
            Self::Mul(..) => 2,
            Self::Add(..) | Self::Sub(..) => 1,
        }
    }

    fn fmt_with(&self, f: &mut fmt::Formatter<'_>, quote_names: bool) -> fmt::Result {
        let write_operand = |f: &mut fmt::Formatter<'_>, expr: &SymExpr, parens: bool| {
            if parens {
                write!(f, "(")?;
                expr.fmt_with(f, quote_names)?;
                write!(f, ")")
            } else {
                expr.fmt_with(f, quote_names)
            }
        };
        let write_binop = |f: &mut fmt::Formatter<'_>, op: &str, lhs: &SymExpr, rhs: &SymExpr| {
            let prec = self.precedence();
            write_operand(f, lhs, lhs.precedence() < prec)?;
            write!(f, " {op} ")?;
            // `a - (b - c)` and `a - (b + c)` need parens on the right.
            let rhs_parens = rhs.precedence() < prec
                || (rhs.precedence() == prec && matches!(self, Self::Sub(..)));
            write_operand(f, rhs, rhs_parens)
        };

        match self {
            Self::Value(val) => write!(f, "{}", val),
            Self::Var(sym) if quote_names => write!(f, "\"{}\"", sym.name),
            Self::Var(sym) => write!(f, "{}", sym.name),
            Self::Add(lhs, rhs) => write_binop(f, "+", lhs, rhs),
            Self::Sub(lhs, rhs) => write_binop(f, "-", lhs, rhs),
            Self::Mul(lhs, rhs) => write_binop(f, "*", lhs, rhs),
            Self::FloorDiv(lhs, rhs) => {
                write!(f, "floordiv(")?;
                lhs.fmt_with(f, quote_names)?;
                write!(f, ", ")?;
                rhs.fmt_with(f, quote_names)?;
                write!(f, ")")
            }
            Self::Unknown => write!(f, "?"),
        }
    }
}

/// Apply a binary operator, folding known values with `eval`.
///
/// `eval` returns `None` if the result cannot be computed (overflow, division
/// by zero), in which case a node is built instead.
fn binary_op(
    lhs: SymExpr,
    rhs: SymExpr,
    eval: impl Fn(i64, i64) -> Option<i64>,
    node: impl Fn(Arc<SymExpr>, Arc<SymExpr>) -> SymExpr,
) -> SymExpr {
    if lhs.is_unknown() || rhs.is_unknown() {
        return SymExpr::Unknown;
    }
    if let (Some(x), Some(y)) = (lhs.as_value(), rhs.as_value()) {
        if let Some(result) = eval(x, y) {
            return SymExpr::Value(result);
        }
    }
    node(lhs.into(), rhs.into())
}

/// Flooring division of integers, or `None` if the result is undefined or
/// overflows.
pub const fn div_floor(lhs: i64, rhs: i64) -> Option<i64> {
    if rhs == 0 || (lhs == i64::MIN && rhs == -1) {
        return None;
    }
    let d = lhs / rhs;
    let r = lhs % rhs;
    if r != 0 && ((r < 0) != (rhs < 0)) {
        Some(d - 1)
    } else {
        Some(d)
    }
}

impl Add<SymExpr> for SymExpr {
    type Output = SymExpr;

    fn add(self, rhs: SymExpr) -> Self {
        binary_op(self, rhs, i64::checked_add, SymExpr::Add)
    }
}

impl Sub<SymExpr> for SymExpr {
    type Output = SymExpr;

    fn sub(self, rhs: SymExpr) -> Self {
        binary_op(self, rhs, i64::checked_sub, SymExpr::Sub)
    }
}

impl Mul<SymExpr> for SymExpr {
    type Output = SymExpr;

    fn mul(self, rhs: SymExpr) -> Self {
        binary_op(self, rhs, i64::checked_mul, SymExpr::Mul)
    }
}

impl From<Symbol> for SymExpr {
    fn from(val: Symbol) -> Self {
        Self::Var(val.into())
    }
}

impl<'a> From<&'a str> for SymExpr {
    fn from(name: &'a str) -> Self {
        SymExpr::var(name)
    }
}

impl From<i32> for SymExpr {
    fn from(val: i32) -> Self {
        SymExpr::Value(val.into())
    }
}

impl From<i64> for SymExpr {
    fn from(val: i64) -> Self {
        SymExpr::Value(val)
    }
}

impl fmt::Debug for SymExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_with(f, true)
    }
}

impl fmt::Display for SymExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_with(f, false)
    }
}

/// Create a `Vec<SymExpr>` from a list of integers, symbol names or
/// expressions.
///
/// ```
/// use structinfo::{SymExpr, dims};
///
/// let shape = dims!("batch", 3, 224, 224);
/// assert_eq!(shape[0], SymExpr::var("batch"));
/// assert_eq!(shape[1], SymExpr::Value(3));
/// ```
#[macro_export]
macro_rules! dims {
    ($($x:expr),* $(,)?) => {
        vec![$($crate::SymExpr::from($x)),*]
    };
}

/// Product of atoms. The empty product is the constant term.
type Monomial = Vec<Atom>;

/// Irreducible factor of a monomial.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Atom {
    Var(Arc<Symbol>),
    FloorDiv(Box<NormalForm>, Box<NormalForm>),
    Unknown,
}

impl Atom {
    fn to_expr(&self) -> SymExpr {
        match self {
            Atom::Var(sym) => SymExpr::Var(sym.clone()),
            Atom::FloorDiv(lhs, rhs) => {
                SymExpr::FloorDiv(lhs.to_expr().into(), rhs.to_expr().into())
            }
            Atom::Unknown => SymExpr::Unknown,
        }
    }
}

/// Sum-of-products form of an expression.
///
/// Monomials have sorted atoms and terms with a zero coefficient are removed,
/// which makes the representation unique for the rewrites it supports.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct NormalForm {
    terms: BTreeMap<Monomial, i64>,
}

impl NormalForm {
    fn constant(value: i64) -> Self {
        let mut form = Self::default();
        form.add_term(Vec::new(), value);
        form
    }

    fn atom(atom: Atom) -> Self {
        let mut form = Self::default();
        form.add_term(vec![atom], 1);
        form
    }

    fn from_expr(expr: &SymExpr) -> Self {
        match expr {
            SymExpr::Value(x) => Self::constant(*x),
            SymExpr::Var(sym) => Self::atom(Atom::Var(sym.clone())),
            SymExpr::Add(lhs, rhs) => Self::from_expr(lhs).add(&Self::from_expr(rhs)),
            SymExpr::Sub(lhs, rhs) => Self::from_expr(lhs).add(&Self::from_expr(rhs).scale(-1)),
            SymExpr::Mul(lhs, rhs) => Self::from_expr(lhs).mul(&Self::from_expr(rhs)),
            SymExpr::FloorDiv(lhs, rhs) => Self::from_expr(lhs).floor_div(Self::from_expr(rhs)),
            SymExpr::Unknown => Self::atom(Atom::Unknown),
        }
    }

    fn as_constant(&self) -> Option<i64> {
        match self.terms.len() {
            0 => Some(0),
            1 => self.terms.get(&Vec::new()).copied(),
            _ => None,
        }
    }

    fn add_term(&mut self, monomial: Monomial, coeff: i64) {
        if coeff == 0 {
            return;
        }
        match self.terms.entry(monomial) {
            Entry::Vacant(entry) => {
                entry.insert(coeff);
            }
            Entry::Occupied(mut entry) => {
                let sum = entry.get().wrapping_add(coeff);
                if sum == 0 {
                    entry.remove();
                } else {
                    *entry.get_mut() = sum;
                }
            }
        }
    }

    fn add(mut self, other: &NormalForm) -> Self {
        for (monomial, coeff) in &other.terms {
            self.add_term(monomial.clone(), *coeff);
        }
        self
    }

    fn scale(mut self, factor: i64) -> Self {
        if factor == 0 {
            return Self::default();
        }
        for coeff in self.terms.values_mut() {
            *coeff = coeff.wrapping_mul(factor);
        }
        self
    }

    fn mul(&self, other: &NormalForm) -> Self {
        let mut product = Self::default();
        for (lhs, lhs_coeff) in &self.terms {
            for (rhs, rhs_coeff) in &other.terms {
                let mut monomial: Monomial = lhs.iter().chain(rhs).cloned().collect();
                monomial.sort();
                product.add_term(monomial, lhs_coeff.wrapping_mul(*rhs_coeff));
            }
        }
        product
    }

    fn floor_div(self, divisor: NormalForm) -> Self {
        let c = match divisor.as_constant() {
            Some(c) if c != 0 && c != i64::MIN => c,
            _ => return Self::atom(Atom::FloorDiv(self.into(), divisor.into())),
        };

        // Write each coefficient as `c * q + r` with `0 <= r < |c|`. The
        // `c * q` parts divide exactly and move out of the division.
        let mut quotient = Self::default();
        let mut remainder = Self::default();
        for (monomial, coeff) in self.terms {
            let r = coeff.rem_euclid(c);
            let q = coeff.wrapping_sub(r) / c;
            quotient.add_term(monomial.clone(), q);
            remainder.add_term(monomial, r);
        }

        match remainder.as_constant() {
            Some(r) => quotient.add(&Self::constant(div_floor(r, c).unwrap_or(0))),
            None => quotient.add(&Self::atom(Atom::FloorDiv(
                remainder.into(),
                Self::constant(c).into(),
            ))),
        }
    }

    fn to_expr(&self) -> SymExpr {
        let mut sum: Option<SymExpr> = None;

        for (monomial, &coeff) in self.terms.iter().filter(|(m, _)| !m.is_empty()) {
            let Some(product) = monomial
                .iter()
                .map(Atom::to_expr)
                .reduce(|prod, x| SymExpr::Mul(prod.into(), x.into()))
            else {
                continue;
            };
            let magnitude = coeff.wrapping_abs();
            let term = if magnitude == 1 {
                product
            } else {
                SymExpr::Mul(SymExpr::Value(magnitude).into(), product.into())
            };
            sum = Some(match sum {
                None if coeff < 0 => SymExpr::Mul(SymExpr::Value(-1).into(), term.into()),
                None => term,
                Some(sum) if coeff < 0 => SymExpr::Sub(sum.into(), term.into()),
                Some(sum) => SymExpr::Add(sum.into(), term.into()),
            });
        }

        let constant = self.terms.get(&Vec::new()).copied().unwrap_or(0);
        match sum {
            None => SymExpr::Value(constant),
            Some(sum) if constant == 0 => sum,
            Some(sum) if constant < 0 && constant != i64::MIN => {
                SymExpr::Sub(sum.into(), SymExpr::Value(-constant).into())
            }
            Some(sum) => SymExpr::Add(sum.into(), SymExpr::Value(constant).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use structinfo_testing::TestCases;

    use super::{SymExpr, div_floor};

    #[test]
    fn test_fold_known_values() {
        let expr = (SymExpr::from(28) + SymExpr::from(1) + SymExpr::from(1)
            - SymExpr::from(1) * (SymExpr::from(3) - SymExpr::from(1))
            - SymExpr::from(1))
        .floor_div(&SymExpr::from(1))
            + SymExpr::from(1);
        assert_eq!(expr, SymExpr::Value(28));
    }

    #[test]
    fn test_symbolic_ops_build_nodes() {
        let x = SymExpr::from("x");
        let zero = SymExpr::from(0);

        // No rewriting happens on construction, even for identities.
        let expr = x.clone() + zero.clone();
        assert_eq!(expr, SymExpr::Add(x.clone().into(), zero.into()));

        let expr = x.floor_div(&SymExpr::from(1));
        assert_eq!(
            expr,
            SymExpr::FloorDiv(SymExpr::from("x").into(), SymExpr::from(1).into())
        );
    }

    #[test]
    fn test_unknown_is_absorbing() {
        let x = SymExpr::from("x");
        assert_eq!(x.clone() + SymExpr::Unknown, SymExpr::Unknown);
        assert_eq!(SymExpr::Unknown * SymExpr::from(2), SymExpr::Unknown);
        assert_eq!(x.floor_div(&SymExpr::Unknown), SymExpr::Unknown);
    }

    #[test]
    fn test_div_floor() {
        #[derive(Debug)]
        struct Case {
            lhs: i64,
            rhs: i64,
            expected: Option<i64>,
        }

        let cases = [
            Case {
                lhs: 25,
                rhs: 2,
                expected: Some(12),
            },
            Case {
                lhs: -7,
                rhs: 2,
                expected: Some(-4),
            },
            Case {
                lhs: 7,
                rhs: -2,
                expected: Some(-4),
            },
            Case {
                lhs: -7,
                rhs: -2,
                expected: Some(3),
            },
            Case {
                lhs: 6,
                rhs: 3,
                expected: Some(2),
            },
            Case {
                lhs: 5,
                rhs: 0,
                expected: None,
            },
            Case {
                lhs: i64::MIN,
                rhs: -1,
                expected: None,
            },
        ];

        cases.test_each(|case| {
            assert_eq!(div_floor(case.lhs, case.rhs), case.expected);
        });
    }

    #[test]
    fn test_division_by_zero_is_not_folded() {
        let expr = SymExpr::from(5).floor_div(&SymExpr::from(0));
        assert_eq!(
            expr,
            SymExpr::FloorDiv(SymExpr::from(5).into(), SymExpr::from(0).into())
        );
    }

    #[test]
    fn test_simplify() {
        #[derive(Debug)]
        struct Case {
            expr: SymExpr,
            expected: &'static str,
        }

        let x = SymExpr::from("x");
        let y = SymExpr::from("y");
        let one = SymExpr::from(1);
        let two = SymExpr::from(2);

        let cases = [
            Case {
                expr: x.clone() + SymExpr::from(0),
                expected: "x",
            },
            Case {
                expr: x.clone() - x.clone(),
                expected: "0",
            },
            Case {
                expr: x.clone() + y.clone() - x.clone(),
                expected: "y",
            },
            Case {
                expr: SymExpr::from(3) + x.clone() + SymExpr::from(4),
                expected: "x + 7",
            },
            Case {
                expr: x.clone() * two.clone() + x.clone(),
                expected: "3 * x",
            },
            Case {
                expr: y.clone() - x.clone(),
                expected: "-1 * x + y",
            },
            Case {
                expr: (x.clone() + one.clone()) * (x.clone() - one.clone()),
                expected: "x * x - 1",
            },
            Case {
                expr: x.floor_div(&one),
                expected: "x",
            },
            Case {
                expr: (two.clone() * x.clone() + SymExpr::from(5)).floor_div(&two),
                expected: "x + 2",
            },
            Case {
                expr: (x.clone() + SymExpr::from(5)).floor_div(&two),
                expected: "floordiv(x + 1, 2) + 2",
            },
            Case {
                expr: x.floor_div(&y),
                expected: "floordiv(x, y)",
            },
        ];

        cases.test_each(|case| {
            assert_eq!(case.expr.simplify().to_string(), case.expected);
        });
    }

    #[test]
    fn test_structural_eq() {
        let ih = SymExpr::from("ih");
        let kh = SymExpr::from("kh");
        let zero = SymExpr::from(0);
        let one = SymExpr::from(1);

        // Window output size with unit stride and dilation, no padding.
        let out = (ih.clone() + zero.clone() + zero.clone()
            - one.clone() * (kh.clone() - one.clone())
            - one.clone())
        .floor_div(&one)
            + one.clone();

        assert!(out.structural_eq(&(ih.clone() + one.clone() - kh.clone())));
        assert!(!out.structural_eq(&(ih.clone() - kh.clone())));
        assert_ne!(out, ih.clone() + one.clone() - kh.clone());

        // Addition and multiplication are commutative.
        assert!((ih.clone() * kh.clone()).structural_eq(&(kh.clone() * ih.clone())));
        assert!((ih.clone() + kh.clone()).structural_eq(&(kh + ih)));
    }

    #[test]
    fn test_may_equal() {
        #[derive(Debug)]
        struct Case {
            lhs: SymExpr,
            rhs: SymExpr,
            may_equal: bool,
        }

        let c = SymExpr::from("c");
        let d = SymExpr::from("d");

        let cases = [
            Case {
                lhs: 3.into(),
                rhs: 3.into(),
                may_equal: true,
            },
            Case {
                lhs: 3.into(),
                rhs: 4.into(),
                may_equal: false,
            },
            Case {
                lhs: c.clone(),
                rhs: c.clone() + SymExpr::from(2),
                may_equal: false,
            },
            Case {
                lhs: c.clone() * SymExpr::from(16),
                rhs: SymExpr::from(16) * c.clone(),
                may_equal: true,
            },
            // Not provably different, so conservatively equal.
            Case {
                lhs: c.clone(),
                rhs: d.clone(),
                may_equal: true,
            },
            Case {
                lhs: c.clone(),
                rhs: 3.into(),
                may_equal: true,
            },
            Case {
                lhs: SymExpr::Unknown,
                rhs: 3.into(),
                may_equal: true,
            },
        ];

        cases.test_each(|case| {
            assert_eq!(case.lhs.may_equal(&case.rhs), case.may_equal);
            assert_eq!(case.rhs.provably_unequal(&case.lhs), !case.may_equal);
        });
    }

    #[test]
    fn test_display() {
        let a = SymExpr::from("a");
        let b = SymExpr::from("b");
        let c = SymExpr::from("c");

        let expr = (a.clone() + b.clone()) * SymExpr::from(3) - (b.clone() - c.clone());
        assert_eq!(expr.to_string(), "(a + b) * 3 - (b - c)");

        let expr = (a.clone() - b.clone()).floor_div(&c) + SymExpr::from(1);
        assert_eq!(expr.to_string(), "floordiv(a - b, c) + 1");

        assert_eq!(format!("{:?}", a + SymExpr::Unknown), "?");
        assert_eq!(format!("{:?}", b * c), "\"b\" * \"c\"");
    }

    #[test]
    fn test_dims_macro() {
        let shape = dims!("n", 3, SymExpr::from("h") + SymExpr::from(1));
        assert_eq!(shape.len(), 3);
        assert_eq!(shape[0], SymExpr::var("n"));
        assert_eq!(shape[1], SymExpr::Value(3));
        assert_eq!(shape[2].to_string(), "h + 1");
    }
}
