use std::path::PathBuf;

use rank_comm::Rank;
use thiserror::Error;

use crate::{Case, Strategy};

/// Errors that can occur when preparing or running a transfer benchmark.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A communication operation failed.
    #[error(transparent)]
    Comm(#[from] rank_comm::Error),

    /// Received transfer metadata cannot describe a jagged array.
    #[error("invalid transfer metadata: {problem}")]
    InvalidMetadata {
        /// A human-readable description of the problem.
        problem: String,
    },

    /// The element count of a payload shape does not fit into memory.
    #[error(
        "a payload of {outer_size} rows with base size {base_size} has more elements than fit in memory"
    )]
    SizeOverflow {
        /// Number of rows requested.
        outer_size: usize,

        /// Base size requested.
        base_size: usize,
    },

    /// A payload has more rows than the message tag space can address.
    #[error("a payload of {outer_size} rows exceeds the limit of {limit} rows")]
    TooManyRows {
        /// Number of rows requested.
        outer_size: usize,

        /// Largest supported number of rows.
        limit: usize,
    },

    /// A sink reconstructed a payload that differs from the one the source built.
    #[error("rank {rank} received a corrupted payload using {strategy} for {case}: {detail}")]
    PayloadMismatch {
        /// The sink that detected the mismatch.
        rank: Rank,

        /// The strategy that transferred the payload.
        strategy: Strategy,

        /// The benchmark case that was being transferred.
        case: Case,

        /// Where the payloads first differ.
        detail: String,
    },

    /// The benchmark configuration is not usable.
    #[error("invalid benchmark configuration: {problem}")]
    InvalidConfig {
        /// A human-readable description of the problem.
        problem: String,
    },

    /// The benchmark configuration file could not be read.
    #[error("failed to read configuration file {}", path.display())]
    ConfigRead {
        /// Path of the configuration file.
        path: PathBuf,

        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The benchmark configuration file is not valid TOML for a benchmark configuration.
    #[error("failed to parse benchmark configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// A strategy or shape name was not recognized.
    #[error("unknown {kind} '{name}', expected one of: {expected}")]
    UnknownName {
        /// What kind of name it was.
        kind: &'static str,

        /// The name that was given.
        name: String,

        /// The recognized names, comma-separated.
        expected: String,
    },
}

/// A specialized `Result` type for benchmark operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn comm_errors_convert() {
        let error: Error = rank_comm::Error::Aborted.into();

        assert!(matches!(error, Error::Comm(rank_comm::Error::Aborted)));
        assert_eq!(
            error.to_string(),
            rank_comm::Error::Aborted.to_string()
        );
    }

    #[test]
    fn payload_mismatch_names_rank_and_strategy() {
        let error = Error::PayloadMismatch {
            rank: 2,
            strategy: Strategy::Pack,
            case: Case::Flat { array_size: 10 },
            detail: "row 0 differs".to_string(),
        };

        let message = error.to_string();
        assert!(message.contains("rank 2"));
        assert!(message.contains("pack"));
        assert!(message.contains("row 0 differs"));
    }
}
