//! Physical axis orderings of tensors.

use std::error::Error;
use std::fmt;

use smallvec::SmallVec;

use crate::sym_expr::SymExpr;

/// Error returned when a layout string is invalid.
#[derive(Clone, Debug, PartialEq)]
pub enum LayoutError {
    /// The string contains a character which is not a letter or digit.
    InvalidChar { ch: char, pos: usize },

    /// A packed sub-axis has no factor, or a factor is not followed by an
    /// axis letter.
    MissingFactor { pos: usize },

    /// A packed sub-axis has a factor of zero.
    ZeroFactor { axis: char },

    /// The product of packing factors for an axis does not fit in a `u32`.
    FactorTooLarge { axis: char },

    /// A primary axis appears more than once.
    DuplicateAxis { axis: char },

    /// A packed sub-axis appears before, or without, its primary axis.
    UndefinedPackedAxis { axis: char },

    /// An axis required by the operator is not present.
    MissingAxis { axis: char },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidChar { ch, pos } => {
                write!(f, "invalid character '{}' at position {}", ch, pos)
            }
            Self::MissingFactor { pos } => {
                write!(f, "packed axis at position {} has no factor", pos)
            }
            Self::ZeroFactor { axis } => write!(f, "packed axis '{}' has factor 0", axis),
            Self::FactorTooLarge { axis } => {
                write!(f, "packing factor for axis '{}' is too large", axis)
            }
            Self::DuplicateAxis { axis } => write!(f, "axis '{}' appears more than once", axis),
            Self::UndefinedPackedAxis { axis } => write!(
                f,
                "packed axis '{}' appears before its primary axis '{}'",
                axis.to_ascii_lowercase(),
                axis
            ),
            Self::MissingAxis { axis } => write!(f, "required axis '{}' is missing", axis),
        }
    }
}

impl Error for LayoutError {}

/// Slot in a physical layout.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LayoutAxis {
    /// Outer part of a logical axis, or the whole axis if it is not packed.
    Primary(char),

    /// Inner part of logical axis `axis`, with a fixed extent of `factor`.
    ///
    /// `axis` is the uppercase name of the primary axis.
    Packed { factor: u32, axis: char },
}

/// Physical ordering of a tensor's axes, eg. "NCHW" or "NCHW16c".
///
/// Uppercase letters name primary axes. A decimal factor followed by a
/// lowercase letter names a packed sub-axis which splits the primary axis of
/// the same letter into an outer part, stored in the primary slot, and an
/// inner part of the given size. A logical axis may be split more than once,
/// in which case its packing factor is the product of the sub-axis factors.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Layout {
    axes: SmallVec<[LayoutAxis; 5]>,
}

impl Layout {
    /// Parse a layout string, checking that each axis in `required` is
    /// present as a primary axis.
    ///
    /// ```
    /// use structinfo::Layout;
    ///
    /// let layout = Layout::parse("NCHW16c", &['N', 'C', 'H', 'W']).unwrap();
    /// assert_eq!(layout.rank(), 5);
    /// assert_eq!(layout.packing_factor('C'), Some(16));
    /// ```
    pub fn parse(spec: &str, required: &[char]) -> Result<Layout, LayoutError> {
        let mut axes = SmallVec::<[LayoutAxis; 5]>::new();
        let mut factor: Option<u64> = None;
        let mut factor_start = 0;

        let has_primary = |axes: &[LayoutAxis], axis: char| {
            axes.iter().any(|a| *a == LayoutAxis::Primary(axis))
        };

        for (pos, ch) in spec.chars().enumerate() {
            match ch {
                'A'..='Z' => {
                    if factor.is_some() {
                        return Err(LayoutError::MissingFactor { pos: factor_start });
                    }
                    if has_primary(&axes, ch) {
                        return Err(LayoutError::DuplicateAxis { axis: ch });
                    }
                    axes.push(LayoutAxis::Primary(ch));
                }
                'a'..='z' => {
                    let axis = ch.to_ascii_uppercase();
                    let Some(factor) = factor.take() else {
                        return Err(LayoutError::MissingFactor { pos });
                    };
                    if factor == 0 {
                        return Err(LayoutError::ZeroFactor { axis });
                    }
                    let factor =
                        u32::try_from(factor).map_err(|_| LayoutError::FactorTooLarge { axis })?;
                    if !has_primary(&axes, axis) {
                        return Err(LayoutError::UndefinedPackedAxis { axis });
                    }
                    axes.push(LayoutAxis::Packed { factor, axis });
                }
                '0'..='9' => {
                    if factor.is_none() {
                        factor_start = pos;
                    }
                    let digit = u64::from(ch as u32 - '0' as u32);
                    factor = Some(factor.unwrap_or(0).saturating_mul(10).saturating_add(digit));
                }
                _ => return Err(LayoutError::InvalidChar { ch, pos }),
            }
        }

        if factor.is_some() {
            return Err(LayoutError::MissingFactor { pos: factor_start });
        }

        let layout = Layout { axes };
        for &axis in required {
            if layout.index_of(axis).is_none() {
                return Err(LayoutError::MissingAxis { axis });
            }
        }
        for axis in layout.primary_axes() {
            if layout.total_factor(axis).is_none() {
                return Err(LayoutError::FactorTooLarge { axis });
            }
        }

        Ok(layout)
    }

    /// Return the number of physical axes.
    pub fn rank(&self) -> usize {
        self.axes.len()
    }

    pub fn axes(&self) -> &[LayoutAxis] {
        &self.axes
    }

    /// Return the slot of primary axis `axis`.
    pub fn index_of(&self, axis: char) -> Option<usize> {
        self.axes
            .iter()
            .position(|a| *a == LayoutAxis::Primary(axis))
    }

    /// Return the product of the packing factors of `axis`, or `None` if the
    /// layout does not contain the axis.
    ///
    /// The factor is 1 if the axis is not packed.
    pub fn packing_factor(&self, axis: char) -> Option<u32> {
        self.index_of(axis)?;
        self.total_factor(axis)
    }

    /// Return the logical extent of `axis` given the physical shape `dims`.
    ///
    /// The extent is `Unknown` if the axis is absent or `dims` does not match
    /// the rank of the layout.
    pub fn logical_extent(&self, dims: &[SymExpr], axis: char) -> SymExpr {
        if dims.len() != self.rank() {
            return SymExpr::Unknown;
        }
        let (Some(index), Some(factor)) = (self.index_of(axis), self.packing_factor(axis)) else {
            return SymExpr::Unknown;
        };
        let outer = dims[index].clone();
        if factor == 1 {
            outer
        } else {
            outer * SymExpr::from(factor as i64)
        }
    }

    /// Compute a physical shape from the logical extent of each primary axis.
    ///
    /// This is the inverse of [`logical_extent`](Self::logical_extent). The
    /// slot of a packed primary axis receives the logical extent divided by
    /// the packing factor and each packed slot receives its factor.
    ///
    /// The division rounds down, so a logical extent which is not a multiple
    /// of the packing factor loses its remainder, eg. 4 channels in a
    /// `NCHW16c` layout give an outer extent of 0.
    pub fn compose(&self, logical: impl Fn(char) -> SymExpr) -> Vec<SymExpr> {
        self.axes
            .iter()
            .map(|slot| match *slot {
                LayoutAxis::Primary(axis) => {
                    let extent = logical(axis);
                    match self.total_factor(axis) {
                        Some(factor) if factor > 1 => {
                            extent.floor_div(&SymExpr::from(factor as i64))
                        }
                        _ => extent,
                    }
                }
                LayoutAxis::Packed { factor, .. } => SymExpr::from(factor as i64),
            })
            .collect()
    }

    fn primary_axes(&self) -> impl Iterator<Item = char> + '_ {
        self.axes.iter().filter_map(|slot| match slot {
            LayoutAxis::Primary(axis) => Some(*axis),
            LayoutAxis::Packed { .. } => None,
        })
    }

    /// Product of the packed factors of `axis`, or `None` on overflow.
    fn total_factor(&self, axis: char) -> Option<u32> {
        self.axes
            .iter()
            .filter_map(|slot| match *slot {
                LayoutAxis::Packed { factor, axis: a } if a == axis => Some(factor),
                _ => None,
            })
            .try_fold(1u32, |acc, factor| acc.checked_mul(factor))
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for slot in &self.axes {
            match slot {
                LayoutAxis::Primary(axis) => write!(f, "{}", axis)?,
                LayoutAxis::Packed { factor, axis } => {
                    write!(f, "{}{}", factor, axis.to_ascii_lowercase())?
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use structinfo_testing::TestCases;

    use super::{Layout, LayoutAxis, LayoutError};
    use crate::SymExpr;

    const NCHW: &[char] = &['N', 'C', 'H', 'W'];

    #[test]
    fn test_parse() {
        #[derive(Debug)]
        struct Case {
            spec: &'static str,
            expected: Result<usize, LayoutError>,
        }

        let cases = [
            Case {
                spec: "NCHW",
                expected: Ok(4),
            },
            Case {
                spec: "NHWC",
                expected: Ok(4),
            },
            Case {
                spec: "NCHW16c",
                expected: Ok(5),
            },
            // Letters outside the required set are allowed.
            Case {
                spec: "NCDHW",
                expected: Ok(5),
            },
            Case {
                spec: "NCHW4c4c",
                expected: Ok(6),
            },
            Case {
                spec: "NCHW*",
                expected: Err(LayoutError::InvalidChar { ch: '*', pos: 4 }),
            },
            Case {
                spec: "NCHWc",
                expected: Err(LayoutError::MissingFactor { pos: 4 }),
            },
            Case {
                spec: "NCHW16",
                expected: Err(LayoutError::MissingFactor { pos: 4 }),
            },
            Case {
                spec: "NC16HW",
                expected: Err(LayoutError::MissingFactor { pos: 2 }),
            },
            Case {
                spec: "NCHW0c",
                expected: Err(LayoutError::ZeroFactor { axis: 'C' }),
            },
            Case {
                spec: "NCHWC",
                expected: Err(LayoutError::DuplicateAxis { axis: 'C' }),
            },
            Case {
                spec: "N16cCHW",
                expected: Err(LayoutError::UndefinedPackedAxis { axis: 'C' }),
            },
            Case {
                spec: "NCH",
                expected: Err(LayoutError::MissingAxis { axis: 'W' }),
            },
            Case {
                spec: "",
                expected: Err(LayoutError::MissingAxis { axis: 'N' }),
            },
            Case {
                spec: "NCHW99999999999c",
                expected: Err(LayoutError::FactorTooLarge { axis: 'C' }),
            },
            Case {
                spec: "NCHW65536c65536c",
                expected: Err(LayoutError::FactorTooLarge { axis: 'C' }),
            },
        ];

        cases.test_each(|case| {
            let result = Layout::parse(case.spec, NCHW).map(|layout| layout.rank());
            assert_eq!(result, case.expected);
        });
    }

    #[test]
    fn test_display_round_trips() {
        for spec in ["NCHW", "OIHW16i", "NHWC16c", "NCHW4c2c"] {
            let layout = Layout::parse(spec, &[]).unwrap();
            assert_eq!(layout.to_string(), spec);
        }
    }

    #[test]
    fn test_axes() {
        let layout = Layout::parse("NCHW16c", NCHW).unwrap();
        assert_eq!(layout.index_of('W'), Some(3));
        assert_eq!(layout.index_of('c'), None);
        assert_eq!(
            layout.axes()[4],
            LayoutAxis::Packed {
                factor: 16,
                axis: 'C'
            }
        );
        assert_eq!(layout.packing_factor('C'), Some(16));
        assert_eq!(layout.packing_factor('H'), Some(1));
        assert_eq!(layout.packing_factor('D'), None);

        let layout = Layout::parse("NCHW4c2c", NCHW).unwrap();
        assert_eq!(layout.packing_factor('C'), Some(8));
    }

    #[test]
    fn test_logical_extent() {
        let layout = Layout::parse("NCHW16c", NCHW).unwrap();
        let dims = dims!(2, 4, 28, 28, 16);
        assert_eq!(layout.logical_extent(&dims, 'C'), SymExpr::from(64));
        assert_eq!(layout.logical_extent(&dims, 'H'), SymExpr::from(28));
        assert_eq!(layout.logical_extent(&dims, 'D'), SymExpr::Unknown);
        assert_eq!(layout.logical_extent(&dims[..4], 'C'), SymExpr::Unknown);

        // Unpacked symbolic extents are returned unchanged.
        let layout = Layout::parse("NHWC", NCHW).unwrap();
        let dims = dims!("n", "ih", "iw", "ic");
        assert_eq!(layout.logical_extent(&dims, 'C'), SymExpr::from("ic"));
    }

    #[test]
    fn test_compose() {
        let layout = Layout::parse("NHWC16c", NCHW).unwrap();
        let logical = |axis| match axis {
            'N' => SymExpr::from(2),
            'C' => SymExpr::from(48),
            'H' | 'W' => SymExpr::from(26),
            _ => SymExpr::Unknown,
        };
        assert_eq!(layout.compose(logical), dims!(2, 26, 26, 3, 16));

        let layout = Layout::parse("NCHW", NCHW).unwrap();
        let shape = layout.compose(|axis| SymExpr::var(&axis.to_string()));
        assert_eq!(shape, dims!("N", "C", "H", "W"));

        // Extents that are not a multiple of the packing factor round down.
        let layout = Layout::parse("NCHW16c", NCHW).unwrap();
        let shape = layout.compose(|axis| match axis {
            'C' => SymExpr::from(4),
            _ => SymExpr::from(2),
        });
        assert_eq!(shape, dims!(2, 0, 2, 2, 16));
    }
}
