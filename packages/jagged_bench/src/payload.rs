//! The jagged array that is transferred between ranks and the generator that builds it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result, TransferMetadata};

/// Determines the length of every row of a generated payload from the row index and a base size.
///
/// Strategies compared against each other must use the same shape, or the comparison is invalid.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum Shape {
    /// Row `i` holds `base + i⁴` values.
    Quartic,

    /// Row `i` holds `base + i³` values.
    Cubic,

    /// Every row holds `base` values.
    Uniform,

    /// Row `i` holds `base * (i + 1)²` values, so five rows have a 1:4:9:16:25 size ratio and
    /// `55 * base` values in total.
    #[default]
    SquareClasses,
}

impl Shape {
    /// Every shape, in declaration order.
    pub const ALL: [Self; 4] = [
        Self::Quartic,
        Self::Cubic,
        Self::Uniform,
        Self::SquareClasses,
    ];

    /// The name used in configuration files and on the command line.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Quartic => "quartic",
            Self::Cubic => "cubic",
            Self::Uniform => "uniform",
            Self::SquareClasses => "square-classes",
        }
    }

    /// Length of row `index` for `base_size`, or `None` if it does not fit into `usize`.
    #[must_use]
    pub fn inner_len(self, base_size: usize, index: usize) -> Option<usize> {
        match self {
            Self::Quartic => index.checked_pow(4)?.checked_add(base_size),
            Self::Cubic => index.checked_pow(3)?.checked_add(base_size),
            Self::Uniform => Some(base_size),
            Self::SquareClasses => index
                .checked_add(1)?
                .checked_pow(2)?
                .checked_mul(base_size),
        }
    }

    /// Lengths of all `outer_size` rows, or `None` if any of them does not fit into `usize`.
    #[must_use]
    pub fn inner_sizes(self, outer_size: usize, base_size: usize) -> Option<Vec<usize>> {
        (0..outer_size)
            .map(|index| self.inner_len(base_size, index))
            .collect()
    }

    /// Number of values in all `outer_size` rows, or `None` if it does not fit into `usize`.
    #[must_use]
    pub fn total_elements(self, outer_size: usize, base_size: usize) -> Option<usize> {
        (0..outer_size).try_fold(0_usize, |total, index| {
            total.checked_add(self.inner_len(base_size, index)?)
        })
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Shape {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|shape| shape.name() == s)
            .ok_or_else(|| Error::UnknownName {
                kind: "shape",
                name: s.to_string(),
                expected: itertools::join(Self::ALL.iter().map(|shape| shape.name()), ", "),
            })
    }
}

/// Determines the values stored in a generated payload.
///
/// Values never influence timing. Non-trivial fills exist so that transfers that put values at
/// the wrong position are detected by verification.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum Fill {
    /// Every value is zero.
    #[default]
    Zero,

    /// Every value is the given constant.
    Constant(i32),

    /// Every value is derived from its row and column, so no two nearby values are equal.
    Pattern,
}

// Largest prime below `i32::MAX`, keeps pattern values positive and in range.
const PATTERN_MODULUS: usize = 2_147_483_629;

impl Fill {
    /// The value stored at `column` of row `row`.
    #[must_use]
    pub fn value(self, row: usize, column: usize) -> i32 {
        match self {
            Self::Zero => 0,
            Self::Constant(value) => value,
            Self::Pattern => {
                let mixed = row.wrapping_mul(65_537).wrapping_add(column);

                #[expect(
                    clippy::arithmetic_side_effects,
                    reason = "modulus is a non-zero constant and the result is far below usize::MAX"
                )]
                let reduced = mixed % PATTERN_MODULUS + 1;

                i32::try_from(reduced).expect("reduced values are at most PATTERN_MODULUS")
            }
        }
    }
}

/// Where two jagged arrays first differ.
#[derive(Clone, Debug, Eq, PartialEq, derive_more::Display)]
#[non_exhaustive]
pub enum Mismatch {
    /// The arrays have a different number of rows.
    #[display("expected {expected} rows but found {actual}")]
    OuterSize {
        /// Number of rows in the expected array.
        expected: usize,

        /// Number of rows in the actual array.
        actual: usize,
    },

    /// A row has a different length.
    #[display("expected row {row} to hold {expected} values but found {actual}")]
    InnerSize {
        /// Index of the row.
        row: usize,

        /// Length of the row in the expected array.
        expected: usize,

        /// Length of the row in the actual array.
        actual: usize,
    },

    /// A value differs.
    #[display("expected value {expected} at row {row} column {column} but found {actual}")]
    Value {
        /// Index of the row.
        row: usize,

        /// Index of the value within the row.
        column: usize,

        /// The expected value.
        expected: i32,

        /// The actual value.
        actual: i32,
    },
}

/// An ordered sequence of integer rows, each of its own length.
///
/// This is the payload every transfer strategy moves from the source rank to the sinks. A sink
/// reconstructs the array in place, reusing row allocations from the previous iteration.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct JaggedArray {
    rows: Vec<Vec<i32>>,
}

impl JaggedArray {
    /// Builds an array of `outer_size` rows whose lengths follow `shape` for `base_size`, with
    /// values chosen by `fill`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SizeOverflow`] if the element count of the shape does not fit in memory.
    pub fn generate(shape: Shape, outer_size: usize, base_size: usize, fill: Fill) -> Result<Self> {
        let inner_sizes = shape
            .inner_sizes(outer_size, base_size)
            .filter(|_| total_bytes(shape, outer_size, base_size).is_some())
            .ok_or(Error::SizeOverflow {
                outer_size,
                base_size,
            })?;

        let rows = inner_sizes
            .into_iter()
            .enumerate()
            .map(|(row, len)| (0..len).map(|column| fill.value(row, column)).collect())
            .collect();

        Ok(Self { rows })
    }

    /// Wraps existing rows.
    #[must_use]
    pub fn from_rows(rows: Vec<Vec<i32>>) -> Self {
        Self { rows }
    }

    /// An array without rows, used as the placeholder a sink reconstructs into.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of rows.
    #[must_use]
    pub fn outer_size(&self) -> usize {
        self.rows.len()
    }

    /// Length of every row, in row order.
    #[must_use]
    pub fn inner_sizes(&self) -> Vec<usize> {
        self.rows.iter().map(Vec::len).collect()
    }

    /// The rows of the array.
    #[must_use]
    pub fn rows(&self) -> &[Vec<i32>] {
        &self.rows
    }

    /// Number of values in all rows.
    #[must_use]
    pub fn total_elements(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    /// The shape of the array as it is sent ahead of the values.
    #[must_use]
    pub fn metadata(&self) -> TransferMetadata {
        TransferMetadata::new(self.inner_sizes())
    }

    /// All values, rows concatenated in order.
    #[must_use]
    pub fn flatten(&self) -> Vec<i32> {
        self.rows.concat()
    }

    /// Where `actual` first differs from this array, or `None` if they are identical.
    #[must_use]
    pub fn first_mismatch(&self, actual: &Self) -> Option<Mismatch> {
        if self.outer_size() != actual.outer_size() {
            return Some(Mismatch::OuterSize {
                expected: self.outer_size(),
                actual: actual.outer_size(),
            });
        }

        for (row, (expected_row, actual_row)) in self.rows.iter().zip(&actual.rows).enumerate() {
            if expected_row.len() != actual_row.len() {
                return Some(Mismatch::InnerSize {
                    row,
                    expected: expected_row.len(),
                    actual: actual_row.len(),
                });
            }

            let differing = expected_row
                .iter()
                .zip(actual_row)
                .enumerate()
                .find(|(_, (expected, actual))| expected != actual);

            if let Some((column, (&expected, &actual))) = differing {
                return Some(Mismatch::Value {
                    row,
                    column,
                    expected,
                    actual,
                });
            }
        }

        None
    }

    /// Resizes the array to the shape described by `metadata`, keeping existing allocations.
    ///
    /// Values of retained positions are left as they are; new positions are zero.
    pub(crate) fn reshape(&mut self, metadata: &TransferMetadata) {
        self.rows.resize_with(metadata.outer_size(), Vec::new);

        for (row, &len) in self.rows.iter_mut().zip(metadata.inner_sizes()) {
            row.resize(len, 0);
        }
    }

    pub(crate) fn rows_mut(&mut self) -> &mut [Vec<i32>] {
        &mut self.rows
    }

    /// Overwrites the values of all rows, in order, from `flat`.
    ///
    /// `flat` must hold exactly [`total_elements()`][Self::total_elements] values.
    pub(crate) fn fill_from_flat(&mut self, flat: &[i32]) {
        let mut remaining = flat;

        for row in &mut self.rows {
            let (head, tail) = remaining.split_at(row.len());
            row.copy_from_slice(head);
            remaining = tail;
        }

        debug_assert!(remaining.is_empty(), "flat buffer longer than the array");
    }
}

/// Number of bytes of values in a payload of the given shape, or `None` on overflow.
pub(crate) fn total_bytes(shape: Shape, outer_size: usize, base_size: usize) -> Option<usize> {
    shape
        .total_elements(outer_size, base_size)?
        .checked_mul(size_of::<i32>())
}
