//! Interchangeable ways to move a [`JaggedArray`] from the source rank to every sink rank.
//!
//! Every strategy follows the same contract: after each iteration, every sink holds a
//! reconstruction of the source's array that is identical in shape and values. Rank
//! [`SOURCE_RANK`] is the source and every other rank is a sink, so a world of two ranks is the
//! degenerate case of the general fan-out.
//!
//! Strategies that send metadata with point-to-point messages use a fixed channel layout:
//! tag [`OUTER_SIZE_TAG`] carries the row count, tag [`INNER_SIZES_TAG`] the row lengths and
//! tag `2 + j` the values of row `j`. The highest tag is reserved for [`ACK_TAG`], which limits
//! payloads to [`MAX_OUTER_SIZE`] rows.

use std::fmt;
use std::str::FromStr;

use rank_comm::{Communicator, Rank, TAG_UB, Tag};
use serde::{Deserialize, Serialize};

use crate::metadata::wire_len;
use crate::{Error, JaggedArray, Result, TransferMetadata, WireMetadata};

mod broadcast;
mod datatype;
mod one_sided;
mod pack;
mod raw;
mod serialized;

/// The rank that builds the payload and sends it to all other ranks.
pub const SOURCE_RANK: Rank = 0;

/// Tag of the message carrying the row count.
pub const OUTER_SIZE_TAG: Tag = 0;

/// Tag of the message carrying the row lengths.
pub const INNER_SIZES_TAG: Tag = 1;

const FIRST_ROW_TAG: Tag = 2;

/// Tag of the acknowledgment every sink sends to the source after a timed block of iterations.
pub const ACK_TAG: Tag = TAG_UB;

/// The largest number of rows a payload can have, limited by the tags available for rows.
pub const MAX_OUTER_SIZE: usize = 32_765;

/// A mechanism for transferring a jagged array from the source rank to every sink rank.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum Strategy {
    /// Immediate point-to-point sends of the metadata and of every row, fanned out to every sink.
    Raw,

    /// A blocking broadcast of the metadata followed by one immediate broadcast per row.
    Broadcast,

    /// The metadata and all rows packed into one byte buffer, which is broadcast after its length.
    Pack,

    /// Point-to-point metadata followed by one send per row, described by a contiguous derived
    /// type that is created, committed and freed for every row.
    Datatype,

    /// Point-to-point metadata, after which sinks read all values from a window exposed by the
    /// source inside a collective access epoch.
    OneSided,

    /// The whole array serialized into an archive for every sink.
    Serialized,

    /// The whole array serialized into an archive once per iteration, after which the bytes are
    /// sent to every sink.
    SerializedPrepacked,
}

impl Strategy {
    /// Every strategy, in the order they are benchmarked by default.
    pub const ALL: [Self; 7] = [
        Self::Raw,
        Self::Broadcast,
        Self::Pack,
        Self::Datatype,
        Self::OneSided,
        Self::Serialized,
        Self::SerializedPrepacked,
    ];

    /// The name used in configuration files, on the command line and in reports.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Broadcast => "broadcast",
            Self::Pack => "pack",
            Self::Datatype => "datatype",
            Self::OneSided => "one-sided",
            Self::Serialized => "serialized",
            Self::SerializedPrepacked => "serialized-prepacked",
        }
    }

    /// Performs the unmeasured setup of the strategy on one rank.
    ///
    /// Every rank of the world must call this at the same point, since some strategies set up
    /// collective resources here. The source passes the payload it transfers, sinks pass
    /// [`Role::Sink`].
    ///
    /// # Errors
    ///
    /// Returns an error if the payload has more than [`MAX_OUTER_SIZE`] rows, if its metadata
    /// does not fit into message integers or if collective setup fails.
    pub fn prepare<'a, C: Communicator>(
        self,
        comm: &'a C,
        role: Role,
    ) -> Result<Box<dyn Transfer + 'a>> {
        if let Role::Source(payload) = &role {
            check_outer_size(payload.outer_size())?;
        }

        tracing::trace!(strategy = %self, rank = comm.rank(), "preparing transfer");

        Ok(match (self, role) {
            (Self::Raw, Role::Source(payload)) => Box::new(raw::RawSource::new(comm, payload)?),
            (Self::Raw, Role::Sink) => Box::new(raw::RawSink::new(comm)),
            (Self::Broadcast, Role::Source(payload)) => {
                Box::new(broadcast::BroadcastSource::new(comm, payload)?)
            }
            (Self::Broadcast, Role::Sink) => Box::new(broadcast::BroadcastSink::new(comm)),
            (Self::Pack, Role::Source(payload)) => Box::new(pack::PackSource::new(comm, payload)?),
            (Self::Pack, Role::Sink) => Box::new(pack::PackSink::new(comm)),
            (Self::Datatype, Role::Source(payload)) => {
                Box::new(datatype::DatatypeSource::new(comm, payload)?)
            }
            (Self::Datatype, Role::Sink) => Box::new(datatype::DatatypeSink::new(comm)),
            (Self::OneSided, Role::Source(payload)) => {
                Box::new(one_sided::OneSidedSource::new(comm, &payload)?)
            }
            (Self::OneSided, Role::Sink) => Box::new(one_sided::OneSidedSink::new(comm)?),
            (Self::Serialized, Role::Source(payload)) => {
                Box::new(serialized::SerializedSource::new(comm, payload, false))
            }
            (Self::SerializedPrepacked, Role::Source(payload)) => {
                Box::new(serialized::SerializedSource::new(comm, payload, true))
            }
            (Self::Serialized | Self::SerializedPrepacked, Role::Sink) => {
                Box::new(serialized::SerializedSink::new(comm))
            }
        })
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.name() == s)
            .ok_or_else(|| Error::UnknownName {
                kind: "strategy",
                name: s.to_string(),
                expected: itertools::join(Self::ALL.iter().map(|strategy| strategy.name()), ", "),
            })
    }
}

/// The part a rank plays in a transfer.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Role {
    /// The rank sends this payload to every other rank.
    Source(JaggedArray),

    /// The rank reconstructs the payload sent by the source.
    Sink,
}

impl Role {
    /// The role of `rank`, building the payload only if the rank is the source.
    ///
    /// # Errors
    ///
    /// Returns any error returned by `build_payload`.
    pub fn for_rank(
        rank: Rank,
        build_payload: impl FnOnce() -> Result<JaggedArray>,
    ) -> Result<Self> {
        if rank == SOURCE_RANK {
            Ok(Self::Source(build_payload()?))
        } else {
            Ok(Self::Sink)
        }
    }
}

/// One rank's side of a prepared transfer.
pub trait Transfer {
    /// Transfers the payload `iterations` times. This is the measured work.
    ///
    /// Every operation started by an iteration is complete before the next iteration starts.
    ///
    /// # Errors
    ///
    /// Returns an error if communication fails or if received metadata is invalid.
    fn execute(&mut self, iterations: u64) -> Result<()>;

    /// The array reconstructed by the last iteration, or `None` on the source.
    fn received(&self) -> Option<&JaggedArray>;
}

/// Tag of the message that carries the values of row `row`.
pub(crate) fn row_tag(row: usize) -> Result<Tag> {
    Tag::try_from(row)
        .ok()
        .and_then(|row| row.checked_add(FIRST_ROW_TAG))
        .filter(|&tag| tag < ACK_TAG)
        .ok_or(Error::TooManyRows {
            outer_size: row.saturating_add(1),
            limit: MAX_OUTER_SIZE,
        })
}

pub(crate) fn check_outer_size(outer_size: usize) -> Result<()> {
    if outer_size <= MAX_OUTER_SIZE {
        Ok(())
    } else {
        Err(Error::TooManyRows {
            outer_size,
            limit: MAX_OUTER_SIZE,
        })
    }
}

/// Sends the metadata to `dest` with blocking point-to-point messages.
pub(crate) fn send_metadata<C: Communicator>(
    comm: &C,
    wire: &WireMetadata,
    dest: Rank,
) -> Result<()> {
    comm.send(&wire.outer_size, dest, OUTER_SIZE_TAG)?;
    comm.send(&wire.inner_sizes, dest, INNER_SIZES_TAG)?;
    Ok(())
}

/// Receives metadata sent by [`send_metadata()`], using `wire_sizes` as the receive buffer.
pub(crate) fn receive_metadata<C: Communicator>(
    comm: &C,
    wire_sizes: &mut Vec<i32>,
) -> Result<TransferMetadata> {
    let mut outer_size = [0_i32];
    comm.receive_into(&mut outer_size, SOURCE_RANK, OUTER_SIZE_TAG)?;

    let [outer_size] = outer_size;
    wire_sizes.resize(wire_len(outer_size, "row count")?, 0);

    let received = comm.receive_into(wire_sizes, SOURCE_RANK, INNER_SIZES_TAG)?;

    TransferMetadata::from_wire(outer_size, wire_sizes.get(..received).unwrap_or_default())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn row_tags_stay_below_ack_tag() {
        assert_eq!(row_tag(0).unwrap(), 2);
        assert_eq!(row_tag(MAX_OUTER_SIZE - 1).unwrap(), ACK_TAG - 1);
        assert!(matches!(
            row_tag(MAX_OUTER_SIZE),
            Err(Error::TooManyRows { .. })
        ));
    }

    #[test]
    fn outer_size_limit_matches_row_tags() {
        check_outer_size(MAX_OUTER_SIZE).unwrap();
        assert!(check_outer_size(MAX_OUTER_SIZE + 1).is_err());
    }

    #[test]
    fn names_parse_back() {
        for strategy in Strategy::ALL {
            assert_eq!(strategy.name().parse::<Strategy>().unwrap(), strategy);
        }

        let error = "carrier-pigeon".parse::<Strategy>().unwrap_err();
        assert!(error.to_string().contains("one-sided"));
    }

    #[test]
    fn role_builds_payload_only_on_source() {
        let source = Role::for_rank(SOURCE_RANK, || Ok(JaggedArray::empty())).unwrap();
        assert_eq!(source, Role::Source(JaggedArray::empty()));

        let sink = Role::for_rank(3, || panic!("sinks do not build payloads")).unwrap();
        assert_eq!(sink, Role::Sink);
    }
}
