use thiserror::Error;

use crate::{Rank, TAG_UB, Tag};

/// Errors that can occur when communicating between ranks.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A rank argument referred to a rank that does not exist in the world.
    #[error("rank {rank} does not exist in a world of {size} ranks")]
    InvalidRank {
        /// The rank that was requested.
        rank: Rank,

        /// The number of ranks in the world.
        size: usize,
    },

    /// A tag argument was outside the valid tag range.
    #[error("tag {tag} is outside the valid range 0..={TAG_UB}")]
    InvalidTag {
        /// The tag that was requested.
        tag: Tag,
    },

    /// A received message did not fit into the receive buffer.
    #[error(
        "message of {actual} elements does not fit into a receive buffer of {capacity} elements"
    )]
    Truncated {
        /// Number of elements the receive buffer can hold.
        capacity: usize,

        /// Number of elements carried by the message.
        actual: usize,
    },

    /// A received message carried a different number of elements than the receiver required.
    #[error("expected a message of {expected} elements but received {actual} elements")]
    CountMismatch {
        /// Number of elements the receiver required.
        expected: usize,

        /// Number of elements carried by the message.
        actual: usize,
    },

    /// A received message carried a different element type than the receiver asked for.
    #[error("expected a message of {expected} but received a message of {actual}")]
    TypeMismatch {
        /// Name of the element type the receiver asked for.
        expected: &'static str,

        /// Name of the element type carried by the message.
        actual: &'static str,
    },

    /// Packing or unpacking would run past the end of the byte buffer.
    #[error(
        "{needed} bytes at position {position} do not fit into a packing buffer of {capacity} bytes"
    )]
    PackOverflow {
        /// Position in the buffer where the operation started.
        position: usize,

        /// Number of bytes the operation needed.
        needed: usize,

        /// Total size of the buffer.
        capacity: usize,
    },

    /// A typed region described more elements than the buffer it was applied to holds.
    #[error("typed region of {extent} elements does not fit into a buffer of {len} elements")]
    RegionExtent {
        /// Number of elements described by the region type.
        extent: usize,

        /// Number of elements in the buffer.
        len: usize,
    },

    /// A one-sided read referred to memory outside the segment exposed by the target.
    #[error(
        "window access of {len} elements at displacement {displacement} exceeds the {segment_len} elements exposed by rank {target}"
    )]
    WindowRange {
        /// The rank whose segment was accessed.
        target: Rank,

        /// Element offset into the target segment.
        displacement: usize,

        /// Number of elements accessed.
        len: usize,

        /// Number of elements exposed by the target.
        segment_len: usize,
    },

    /// A number of elements was too large for the communication backend to address.
    #[error("{count} elements exceed what a single communication operation can address")]
    CountOverflow {
        /// The number of elements that was requested.
        count: usize,
    },

    /// An object could not be written to or read from a packed archive.
    #[error("archive serialization failed: {0}")]
    Serialization(#[from] bincode::Error),

    /// Another rank failed, so the world was aborted.
    #[error("the world was aborted because another rank failed")]
    Aborted,

    /// The MPI runtime could not be initialized, usually because it already was.
    #[cfg(feature = "mpi")]
    #[error("the MPI runtime could not be initialized")]
    MpiInitialization,

    /// A call into the MPI runtime reported a failure.
    #[cfg(feature = "mpi")]
    #[error("{operation} failed with MPI error code {code}")]
    MpiCall {
        /// Name of the MPI function that failed.
        operation: &'static str,

        /// The error code returned by the runtime.
        code: i32,
    },
}

/// A specialized `Result` type for communication operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;
