use crate::{Error, Result};

/// The shape of a jagged array: the number of rows and the length of every row.
///
/// Every strategy that moves raw values sends this ahead of the values, because a sink must
/// know how much storage to allocate before it can receive them.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TransferMetadata {
    inner_sizes: Vec<usize>,
}

impl TransferMetadata {
    /// Metadata of an array whose rows have the given lengths.
    #[must_use]
    pub fn new(inner_sizes: Vec<usize>) -> Self {
        Self { inner_sizes }
    }

    /// Decodes metadata as it travels on the wire: the row count and one length per row, all as
    /// message integers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMetadata`] if any value is negative or if the number of row
    /// lengths does not match the row count.
    pub fn from_wire(outer_size: i32, inner_sizes: &[i32]) -> Result<Self> {
        let outer_size = wire_len(outer_size, "row count")?;

        if outer_size != inner_sizes.len() {
            return Err(Error::InvalidMetadata {
                problem: format!(
                    "row count is {outer_size} but {} row lengths were received",
                    inner_sizes.len()
                ),
            });
        }

        let inner_sizes = inner_sizes
            .iter()
            .map(|&len| wire_len(len, "row length"))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { inner_sizes })
    }

    /// Encodes the metadata as message integers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMetadata`] if a value does not fit into a message integer.
    pub fn to_wire(&self) -> Result<WireMetadata> {
        let outer_size = to_wire_int(self.outer_size(), "row count")?;

        let inner_sizes = self
            .inner_sizes
            .iter()
            .map(|&len| to_wire_int(len, "row length"))
            .collect::<Result<Vec<_>>>()?;

        Ok(WireMetadata {
            outer_size: [outer_size],
            inner_sizes,
        })
    }

    /// Number of rows.
    #[must_use]
    pub fn outer_size(&self) -> usize {
        self.inner_sizes.len()
    }

    /// Length of every row, in row order.
    #[must_use]
    pub fn inner_sizes(&self) -> &[usize] {
        &self.inner_sizes
    }

    /// Number of values in all rows.
    #[must_use]
    pub fn total_elements(&self) -> usize {
        self.inner_sizes.iter().sum()
    }
}

/// Transfer metadata encoded as message integers, ready to be sent.
///
/// The row count is a one-element array so it can be sent and received like any other buffer.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WireMetadata {
    /// The row count.
    pub outer_size: [i32; 1],

    /// The length of every row.
    pub inner_sizes: Vec<i32>,
}

/// Converts a received message integer into a length.
pub(crate) fn wire_len(value: i32, what: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_negative| Error::InvalidMetadata {
        problem: format!("{what} {value} is negative"),
    })
}

fn to_wire_int(value: usize, what: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_too_large| Error::InvalidMetadata {
        problem: format!("{what} {value} does not fit into a message integer"),
    })
}
