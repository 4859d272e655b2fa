#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Measures how fast different message-passing strategies move a jagged integer array from one
//! rank to all others.
//!
//! A jagged array is an ordered sequence of integer rows of varying length. Because receivers
//! cannot know the shape in advance, every strategy has to deliver the shape as well as the
//! values, and the strategies differ in how they do it:
//!
//! | Strategy | Mechanism |
//! |---|---|
//! | [`Strategy::Raw`] | Immediate point-to-point sends of the metadata and of every row |
//! | [`Strategy::Broadcast`] | Broadcast of the metadata, then one immediate broadcast per row |
//! | [`Strategy::Pack`] | Everything packed into one byte buffer that is broadcast |
//! | [`Strategy::Datatype`] | One contiguous derived type per row, freed after use |
//! | [`Strategy::OneSided`] | Sinks read from a window exposed by the source in an access epoch |
//! | [`Strategy::Serialized`] | The whole array serialized into an archive per sink |
//! | [`Strategy::SerializedPrepacked`] | Serialized once, the bytes sent to every sink |
//!
//! Rank 0 is always the source and every other rank is a sink.
//!
//! # Measurement
//!
//! A trial synchronizes all ranks at a barrier, times a block of transfer iterations followed by
//! an acknowledgment from every sink and reduces the per-operation time across ranks by taking
//! the maximum. The number of iterations per trial is chosen by an [`IterationBudget`] so that
//! small payloads get many iterations and large payloads few.
//!
//! # Example
//!
//! ```
//! use std::num::NonZero;
//!
//! use jagged_bench::{BenchConfig, Case, IterationBudget, Strategy, render_table, run_plan};
//!
//! let mut config = BenchConfig::default();
//! config.strategies = vec![Strategy::Raw, Strategy::Pack];
//! config.cases = vec![Case::Jagged {
//!     outer_size: 5,
//!     base_size: 50,
//! }];
//! config.trials = 2;
//! config.budget = IterationBudget::fixed(NonZero::new(100).unwrap());
//! config.verify = true;
//!
//! let records = run_plan(&config.into_plan()?)?;
//! assert_eq!(records.len(), 2);
//!
//! println!("{}", render_table(&records));
//! # Ok::<(), jagged_bench::Error>(())
//! ```
//!
//! # Criterion integration
//!
//! With the `criterion` feature enabled, [`BenchmarkPlan::execute_criterion()`] registers every
//! strategy and case of a plan as a benchmark in a Criterion benchmark group.

mod config;
mod driver;
mod error;
mod harness;
mod metadata;
mod payload;
mod report;
mod run_criterion;
mod strategy;

pub use config::*;
pub use driver::*;
pub use error::*;
pub use harness::*;
pub use metadata::*;
pub use payload::*;
pub use report::*;
pub use strategy::*;
