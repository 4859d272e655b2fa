//! Enumerates strategies and payload cases and runs every combination under the timing harness.

use std::fmt;
use std::num::NonZero;
use std::time::Duration;

use rank_comm::{Communicator, World};
use serde::{Deserialize, Serialize};

use crate::payload::total_bytes;
use crate::{
    Error, Fill, IterationBudget, JaggedArray, Measurement, Result, Role, SOURCE_RANK, Shape,
    Strategy, Transfer, TrialSeries, measure_trial, run_trials,
};

/// The payload parameters of one benchmark case.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(untagged, deny_unknown_fields)]
#[non_exhaustive]
pub enum Case {
    /// A jagged array of `outer_size` rows whose lengths follow the plan's shape.
    Jagged {
        /// Number of rows.
        outer_size: usize,

        /// Base size passed to the shape function.
        base_size: usize,
    },

    /// A single row of `array_size` values.
    Flat {
        /// Number of values in the row.
        array_size: usize,
    },
}

impl Case {
    /// Builds the payload of this case.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SizeOverflow`] if the payload does not fit in memory.
    pub fn build(self, shape: Shape, fill: Fill) -> Result<JaggedArray> {
        match self {
            Self::Jagged {
                outer_size,
                base_size,
            } => JaggedArray::generate(shape, outer_size, base_size, fill),
            Self::Flat { array_size } => JaggedArray::generate(Shape::Uniform, 1, array_size, fill),
        }
    }

    /// Number of bytes of values in the payload of this case, or `None` on overflow.
    #[must_use]
    pub fn payload_bytes(self, shape: Shape) -> Option<usize> {
        match self {
            Self::Jagged {
                outer_size,
                base_size,
            } => total_bytes(shape, outer_size, base_size),
            Self::Flat { array_size } => total_bytes(Shape::Uniform, 1, array_size),
        }
    }

    /// Number of bytes in the packed buffer of this case, which carries the row count, the row
    /// lengths and the values as 4-byte integers. `None` on overflow.
    #[must_use]
    pub fn packed_bytes(self, shape: Shape) -> Option<usize> {
        let metadata_bytes = self
            .outer_size()
            .checked_add(1)?
            .checked_mul(size_of::<i32>())?;

        self.payload_bytes(shape)?.checked_add(metadata_bytes)
    }

    /// Number of rows in the payload of this case.
    #[must_use]
    pub fn outer_size(self) -> usize {
        match self {
            Self::Jagged { outer_size, .. } => outer_size,
            Self::Flat { .. } => 1,
        }
    }
}

impl fmt::Display for Case {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jagged {
                outer_size,
                base_size,
            } => write!(f, "outer={outer_size} base={base_size}"),
            Self::Flat { array_size } => write!(f, "flat={array_size}"),
        }
    }
}

/// Everything needed to run a benchmark, already validated.
///
/// Obtained from [`BenchConfig::into_plan()`][crate::BenchConfig::into_plan].
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct BenchmarkPlan {
    /// Number of ranks in the world. Rank 0 is the source, all others are sinks.
    pub ranks: NonZero<usize>,

    /// Strategies to benchmark, in order.
    pub strategies: Vec<Strategy>,

    /// Payload cases to benchmark every strategy with, in order.
    pub cases: Vec<Case>,

    /// Row length function shared by every strategy, so their results are comparable.
    pub shape: Shape,

    /// Values stored in generated payloads.
    pub fill: Fill,

    /// Number of timed trials per strategy and case.
    pub trials: NonZero<u32>,

    /// Chooses the number of transfer iterations per trial.
    pub budget: IterationBudget,

    /// Whether every sink checks its reconstruction after the trials of each case.
    pub verify: bool,
}

/// The result of benchmarking one strategy with one case.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct BenchmarkRecord {
    /// The strategy that was benchmarked.
    pub strategy: Strategy,

    /// The payload case that was transferred.
    pub case: Case,

    /// Number of ranks in the world.
    pub ranks: usize,

    /// The trials that were measured.
    pub series: TrialSeries,
}

impl BenchmarkRecord {
    /// The per-operation time of the fastest trial.
    #[must_use]
    pub fn best(&self) -> Duration {
        self.series.best().per_operation()
    }

    /// Throughput of the fastest trial, or `None` if it took no measurable time.
    #[must_use]
    pub fn best_bytes_per_second(&self) -> Option<f64> {
        self.series.best().bytes_per_second()
    }
}

/// Runs `plan` in a new world and returns the records emitted by the source rank, one per
/// strategy and case, in plan order.
///
/// # Errors
///
/// Returns the error of the first rank that failed. Any failure is fatal to the whole run.
pub fn run_plan(plan: &BenchmarkPlan) -> Result<Vec<BenchmarkRecord>> {
    tracing::debug!(
        ranks = plan.ranks.get(),
        strategies = plan.strategies.len(),
        cases = plan.cases.len(),
        "running benchmark plan"
    );

    let mut per_rank = World::new(plan.ranks)
        .try_run(|comm| run_on_rank(comm, plan))?
        .into_vec();

    Ok(per_rank.swap_remove(SOURCE_RANK))
}

/// One rank's part of [`run_plan()`]. Returns the records on the source rank and nothing on
/// any other rank.
///
/// Every rank walks strategies and cases in the same order, so collective calls line up. This
/// works over any backend, so an MPI process calls it directly with its communicator.
///
/// # Errors
///
/// Returns an error if any transfer, trial or verification on this rank fails.
pub fn run_on_rank<C: Communicator>(comm: &C, plan: &BenchmarkPlan) -> Result<Vec<BenchmarkRecord>> {
    let mut records = Vec::new();

    for &strategy in &plan.strategies {
        for &case in &plan.cases {
            let series = run_case(comm, plan, strategy, case)?;

            if comm.rank() == SOURCE_RANK {
                let record = BenchmarkRecord {
                    strategy,
                    case,
                    ranks: comm.size(),
                    series,
                };

                tracing::info!(
                    %strategy,
                    %case,
                    ranks = record.ranks,
                    best_ns = record.best().as_nanos(),
                    "benchmark case finished"
                );

                records.push(record);
            }
        }
    }

    Ok(records)
}

/// Times one trial of `iterations` transfers of `case` with `strategy` in a new world of
/// `plan.ranks` ranks, ignoring the plan's strategies, cases, trial count and budget.
///
/// # Errors
///
/// Returns the error of the first rank that failed.
pub fn measure_case(
    plan: &BenchmarkPlan,
    strategy: Strategy,
    case: Case,
    iterations: NonZero<u64>,
) -> Result<Measurement> {
    let per_rank = World::new(plan.ranks).try_run(|comm| {
        let bytes_per_operation = bytes_per_operation(comm, plan, case)?;

        let role = Role::for_rank(comm.rank(), || case.build(plan.shape, plan.fill))?;
        let mut transfer = strategy.prepare(comm, role)?;

        measure_trial(comm, transfer.as_mut(), iterations, bytes_per_operation)
    })?;

    Ok(*per_rank
        .get(SOURCE_RANK)
        .expect("a world always has a source rank"))
}

/// Payload bytes of `case` counted once per sink, since every sink receives its own copy.
fn bytes_per_operation<C: Communicator>(comm: &C, plan: &BenchmarkPlan, case: Case) -> Result<u64> {
    let payload_bytes = payload_bytes(plan, case)?;

    let sinks = u64::try_from(comm.size().saturating_sub(1))
        .expect("rank counts always fit into u64");

    Ok(payload_bytes.saturating_mul(sinks))
}

fn payload_bytes(plan: &BenchmarkPlan, case: Case) -> Result<u64> {
    case.payload_bytes(plan.shape)
        .and_then(|bytes| u64::try_from(bytes).ok())
        .ok_or_else(|| match case {
            Case::Jagged {
                outer_size,
                base_size,
            } => Error::SizeOverflow {
                outer_size,
                base_size,
            },
            Case::Flat { array_size } => Error::SizeOverflow {
                outer_size: 1,
                base_size: array_size,
            },
        })
}

fn run_case<C: Communicator>(
    comm: &C,
    plan: &BenchmarkPlan,
    strategy: Strategy,
    case: Case,
) -> Result<TrialSeries> {
    let role = Role::for_rank(comm.rank(), || case.build(plan.shape, plan.fill))?;
    let mut transfer = strategy.prepare(comm, role)?;

    run_prepared(comm, plan, strategy, case, transfer.as_mut())
}

/// Runs the trials of a prepared transfer, then verifies the reconstruction on sinks if the
/// plan asks for it.
fn run_prepared<C: Communicator>(
    comm: &C,
    plan: &BenchmarkPlan,
    strategy: Strategy,
    case: Case,
    transfer: &mut dyn Transfer,
) -> Result<TrialSeries> {
    // Every rank derives the sizes from the plan, so no rank needs to be told them.
    let iterations = plan.budget.iterations_for(payload_bytes(plan, case)?);
    let bytes_per_operation = bytes_per_operation(comm, plan, case)?;

    tracing::debug!(
        rank = comm.rank(),
        %strategy,
        %case,
        iterations = iterations.get(),
        bytes_per_operation,
        "starting trials"
    );

    let series = run_trials(
        comm,
        transfer,
        plan.trials,
        iterations,
        bytes_per_operation,
    )?;

    if plan.verify {
        if let Some(received) = transfer.received() {
            let expected = case.build(plan.shape, plan.fill)?;

            if let Some(mismatch) = expected.first_mismatch(received) {
                return Err(Error::PayloadMismatch {
                    rank: comm.rank(),
                    strategy,
                    case,
                    detail: mismatch.to_string(),
                });
            }
        }
    }

    Ok(series)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;
    use testing::with_watchdog;

    use super::*;

    // Every rank reads the same plan from its own thread.
    assert_impl_all!(BenchmarkPlan: Send, Sync);
    assert_impl_all!(BenchmarkRecord: Send);

    fn plan(ranks: usize, strategies: Vec<Strategy>, cases: Vec<Case>) -> BenchmarkPlan {
        BenchmarkPlan {
            ranks: NonZero::new(ranks).unwrap(),
            strategies,
            cases,
            shape: Shape::SquareClasses,
            fill: Fill::Pattern,
            trials: NonZero::new(2).unwrap(),
            budget: IterationBudget::fixed(NonZero::new(3).unwrap()),
            verify: true,
        }
    }

    #[test]
    fn flat_case_is_single_row() {
        let case = Case::Flat { array_size: 12 };
        let payload = case.build(Shape::Quartic, Fill::Constant(1)).unwrap();

        assert_eq!(payload.inner_sizes(), vec![12]);
        assert_eq!(case.payload_bytes(Shape::Quartic), Some(48));
        // Row count, one row length and 12 values.
        assert_eq!(case.packed_bytes(Shape::Quartic), Some(56));
        assert_eq!(case.outer_size(), 1);
    }

    #[test]
    fn case_display_names_parameters() {
        let jagged = Case::Jagged {
            outer_size: 5,
            base_size: 50,
        };

        assert_eq!(jagged.to_string(), "outer=5 base=50");
        assert_eq!(Case::Flat { array_size: 7 }.to_string(), "flat=7");
    }

    #[test]
    fn source_rank_returns_one_record_per_combination() {
        with_watchdog(|| {
            let cases = vec![
                Case::Jagged {
                    outer_size: 3,
                    base_size: 4,
                },
                Case::Flat { array_size: 9 },
            ];

            let records = run_plan(&plan(3, vec![Strategy::Raw, Strategy::Pack], cases)).unwrap();

            let combinations = records
                .iter()
                .map(|record| (record.strategy, record.case.outer_size()))
                .collect::<Vec<_>>();

            assert_eq!(
                combinations,
                vec![
                    (Strategy::Raw, 3),
                    (Strategy::Raw, 1),
                    (Strategy::Pack, 3),
                    (Strategy::Pack, 1),
                ]
            );

            for record in &records {
                assert_eq!(record.ranks, 3);
                assert_eq!(record.series.samples().len(), 2);
                assert_eq!(record.series.best().iterations().get(), 3);
            }
        });
    }

    #[test]
    fn bytes_count_every_sink() {
        with_watchdog(|| {
            let records = run_plan(&plan(
                4,
                vec![Strategy::Broadcast],
                vec![Case::Flat { array_size: 10 }],
            ))
            .unwrap();

            assert_eq!(records[0].series.best().bytes_per_operation(), 120);
        });
    }

    #[test]
    fn measure_case_times_requested_iterations() {
        with_watchdog(|| {
            let plan = plan(3, Vec::new(), Vec::new());

            let measurement = measure_case(
                &plan,
                Strategy::OneSided,
                Case::Jagged {
                    outer_size: 2,
                    base_size: 5,
                },
                NonZero::new(4).unwrap(),
            )
            .unwrap();

            assert_eq!(measurement.iterations().get(), 4);
            // (5 + 20) values of 4 bytes, to each of 2 sinks.
            assert_eq!(measurement.bytes_per_operation(), 200);
        });
    }

    /// Hands out a copy of the reconstruction with its first value changed.
    struct CorruptFirstValue<'a> {
        inner: Box<dyn Transfer + 'a>,
        corrupted: Option<JaggedArray>,
    }

    impl Transfer for CorruptFirstValue<'_> {
        fn execute(&mut self, iterations: u64) -> Result<()> {
            self.inner.execute(iterations)?;

            self.corrupted = self.inner.received().cloned().map(|mut array| {
                if let Some(value) = array.rows_mut().iter_mut().flatten().next() {
                    *value = value.wrapping_add(1);
                }

                array
            });

            Ok(())
        }

        fn received(&self) -> Option<&JaggedArray> {
            self.corrupted.as_ref()
        }
    }

    #[test]
    fn corrupted_reconstruction_is_reported_by_its_sink() {
        with_watchdog(|| {
            let plan = plan(3, Vec::new(), Vec::new());
            let strategy = Strategy::Raw;
            let case = Case::Jagged {
                outer_size: 3,
                base_size: 4,
            };

            let result = World::new(plan.ranks).try_run(|comm| {
                let role = Role::for_rank(comm.rank(), || case.build(plan.shape, plan.fill))?;
                let mut transfer = strategy.prepare(comm, role)?;

                if comm.rank() == 2 {
                    transfer = Box::new(CorruptFirstValue {
                        inner: transfer,
                        corrupted: None,
                    });
                }

                run_prepared(comm, &plan, strategy, case, transfer.as_mut())
            });

            match result {
                Err(Error::PayloadMismatch {
                    rank,
                    strategy: reported,
                    ..
                }) => {
                    assert_eq!(rank, 2);
                    assert_eq!(reported, Strategy::Raw);
                }
                other => panic!("expected a payload mismatch on rank 2, got {other:?}"),
            }
        });
    }

    #[test]
    fn sink_ranks_return_no_records() {
        with_watchdog(|| {
            let plan = plan(2, vec![Strategy::Raw], vec![Case::Flat { array_size: 1 }]);

            let per_rank = World::new(plan.ranks)
                .try_run(|comm| run_on_rank(comm, &plan))
                .unwrap();

            assert_eq!(per_rank[0].len(), 1);
            assert!(per_rank[1].is_empty());
        });
    }
}
