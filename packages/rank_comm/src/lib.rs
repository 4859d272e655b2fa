#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Message-passing runtime with MPI-style semantics.
//!
//! The [`Communicator`] trait is one rank's handle to a group of communicating ranks. It offers
//! the operations that message-passing benchmarks are built from:
//!
//! - Point-to-point messaging with tags: [`Communicator::send()`] and
//!   [`Communicator::receive_into()`].
//! - Immediate operations that are posted together and completed together in a
//!   [`RequestBatch`], including broadcasts and sends and receives of typed regions.
//! - Collectives: [`Communicator::barrier()`], [`Communicator::broadcast_into()`] and
//!   [`Communicator::all_reduce_max()`].
//! - Explicit packing of typed values into byte buffers: [`Communicator::pack_size()`],
//!   [`Communicator::pack_into()`] and [`Communicator::unpack_from()`].
//! - Derived contiguous region types with an explicit create, commit and free lifecycle:
//!   [`Communicator::contiguous_type()`].
//! - One-sided windows read in collective access epochs: [`Communicator::create_window()`].
//! - Serialization of whole objects into packed archives: [`PackedOutputArchive`],
//!   [`Communicator::send_object()`] and [`Communicator::receive_object()`].
//!
//! # Backends
//!
//! A [`World`] runs one closure per rank, each on its own thread, and hands every rank a
//! [`Comm`]. This backend needs no external runtime and is what tests and in-process
//! measurements use.
//!
//! With the `mpi` feature, `MpiWorld` initializes the MPI runtime of the current process and
//! hands out an `MpiComm` that talks to the other processes of the MPI job.
//!
//! # Operating principles
//!
//! A send to another rank completes once the receiver has taken the message, so no rank can
//! queue up unbounded traffic for a peer that is not receiving. Matching is by source rank and
//! tag, in order of arrival.
//!
//! Collectives never interfere with point-to-point traffic. Like in MPI, every rank must call
//! the same collectives in the same order.
//!
//! If any rank of a [`World`] panics or returns an error from [`World::try_run()`], the world
//! is aborted: every rank blocked in a communication call wakes up with [`Error::Aborted`].
//!
//! # Example
//!
//! ```
//! use std::num::NonZero;
//!
//! use rank_comm::{Communicator, World};
//!
//! let world = World::new(NonZero::new(2).unwrap());
//!
//! let received = world.run(|comm| {
//!     if comm.rank() == 0 {
//!         comm.send(&[1, 2, 3], 1, 0).unwrap();
//!         Vec::new()
//!     } else {
//!         comm.receive_vec::<i32>(0, 0).unwrap()
//!     }
//! });
//!
//! assert_eq!(received[1], vec![1, 2, 3]);
//! ```

mod archive;
mod batch;
mod collective;
mod comm;
mod communicator;
mod datatype;
mod element;
mod error;
mod fabric;
mod mailbox;
#[cfg(feature = "mpi")]
mod mpi_backend;
mod pack;
mod window;
mod world;

pub use archive::*;
pub use batch::*;
pub use comm::*;
pub use communicator::*;
pub use datatype::*;
pub use element::*;
pub use error::*;
#[cfg(feature = "mpi")]
pub use mpi_backend::*;
pub use window::*;
pub use world::*;

/// Index of a rank within a world, in `0..world.size()`.
pub type Rank = usize;

/// Message tag used to match point-to-point sends with receives.
///
/// Valid tags are in `0..=TAG_UB`.
pub type Tag = i32;

/// The largest valid message tag.
///
/// This is the smallest upper bound an MPI implementation is allowed to advertise, which keeps
/// tag layouts written against this crate portable to real MPI deployments.
pub const TAG_UB: Tag = 32_767;
