//! Timed execution of prepared transfers.
//!
//! A trial synchronizes all ranks at a barrier, times a block of transfer iterations followed by
//! an acknowledgment from every sink, and reduces the per-operation time across ranks by taking
//! the maximum, since the slowest rank defines the latency of a distributed operation.

use std::hint::black_box;
use std::num::NonZero;
use std::time::{Duration, Instant};

use rank_comm::Communicator;
use serde::{Deserialize, Serialize};

use crate::{ACK_TAG, Result, SOURCE_RANK, Transfer};

/// Chooses how many transfer iterations one trial times, inversely proportional to payload size.
///
/// Small payloads get many iterations to amortize timer resolution and synchronization, large
/// payloads get few to bound the duration of a trial.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
#[non_exhaustive]
pub struct IterationBudget {
    /// Number of payload bytes one trial aims to transfer.
    pub target_bytes: u64,

    /// Fewest iterations per trial.
    pub min: u64,

    /// Most iterations per trial.
    pub max: u64,
}

impl IterationBudget {
    /// Creates a budget that aims for `target_bytes` per trial, clamped to `min..=max` iterations.
    #[must_use]
    pub fn new(target_bytes: u64, min: u64, max: u64) -> Self {
        Self {
            target_bytes,
            min,
            max,
        }
    }

    /// Creates a budget that always times exactly `iterations` iterations.
    #[must_use]
    pub fn fixed(iterations: NonZero<u64>) -> Self {
        Self::new(0, iterations.get(), iterations.get())
    }

    /// Iterations per trial for a payload of `payload_bytes` bytes.
    ///
    /// The result is always at least one, even for a misconfigured budget.
    #[must_use]
    pub fn iterations_for(&self, payload_bytes: u64) -> NonZero<u64> {
        let by_budget = self
            .target_bytes
            .checked_div(payload_bytes)
            .unwrap_or(self.max);

        let iterations = by_budget.min(self.max).max(self.min);

        NonZero::new(iterations).unwrap_or(NonZero::<u64>::MIN)
    }
}

impl Default for IterationBudget {
    fn default() -> Self {
        Self {
            target_bytes: 256 * 1024 * 1024,
            min: 10,
            max: 10_000,
        }
    }
}

/// The outcome of one trial: the per-operation time of the slowest rank.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Measurement {
    per_operation: Duration,
    bytes_per_operation: u64,
    iterations: NonZero<u64>,
}

impl Measurement {
    /// Creates a measurement from an already reduced per-operation time.
    #[must_use]
    pub fn new(
        per_operation: Duration,
        bytes_per_operation: u64,
        iterations: NonZero<u64>,
    ) -> Self {
        Self {
            per_operation,
            bytes_per_operation,
            iterations,
        }
    }

    /// Time one transfer took on the slowest rank.
    #[must_use]
    pub fn per_operation(&self) -> Duration {
        self.per_operation
    }

    /// Number of payload bytes moved by one transfer, counted once per sink.
    #[must_use]
    pub fn bytes_per_operation(&self) -> u64 {
        self.bytes_per_operation
    }

    /// Number of transfer iterations the trial timed.
    #[must_use]
    pub fn iterations(&self) -> NonZero<u64> {
        self.iterations
    }

    /// Throughput of the trial, or `None` if the measured time is zero.
    #[must_use]
    pub fn bytes_per_second(&self) -> Option<f64> {
        let seconds = self.per_operation.as_secs_f64();

        #[expect(
            clippy::cast_precision_loss,
            reason = "throughput is an estimate, precision beyond 2^52 bytes is irrelevant"
        )]
        let bytes = self.bytes_per_operation as f64;

        (seconds > 0.0).then(|| bytes / seconds)
    }
}

/// The measurements of a series of trials of the same transfer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TrialSeries {
    samples: Vec<Measurement>,
}

impl TrialSeries {
    /// Wraps the measurements of a non-empty series of trials.
    ///
    /// # Panics
    ///
    /// Panics if `samples` is empty.
    #[must_use]
    pub fn new(samples: Vec<Measurement>) -> Self {
        assert!(!samples.is_empty(), "a trial series needs at least one trial");
        Self { samples }
    }

    /// The fastest trial, which is the best estimate of the time one iteration takes.
    #[must_use]
    pub fn best(&self) -> Measurement {
        self.samples
            .iter()
            .copied()
            .min_by_key(Measurement::per_operation)
            .expect("guarded by the non-empty check in the constructor")
    }

    /// The mean per-operation time across all trials.
    #[must_use]
    pub fn mean(&self) -> Duration {
        let total_nanos: u128 = self
            .samples
            .iter()
            .map(|sample| sample.per_operation.as_nanos())
            .sum();

        let mean_nanos = total_nanos
            .checked_div(self.samples.len() as u128)
            .expect("guarded by the non-empty check in the constructor");

        Duration::from_nanos(
            mean_nanos
                .try_into()
                .expect("overflowing u64 is unrealistic when using a real clock"),
        )
    }

    /// Every measurement, in trial order.
    #[must_use]
    pub fn samples(&self) -> &[Measurement] {
        &self.samples
    }
}

/// Times `iterations` iterations of `transfer` as one trial.
///
/// Every rank of the world must call this at the same point with the same arguments. The returned
/// per-operation time is the maximum across all ranks and therefore identical on every rank.
///
/// # Errors
///
/// Returns an error if the transfer or the synchronization around it fails.
#[cfg_attr(test, mutants::skip)] // Timing mutations only show up as noise.
pub fn measure_trial<C: Communicator>(
    comm: &C,
    transfer: &mut dyn Transfer,
    iterations: NonZero<u64>,
    bytes_per_operation: u64,
) -> Result<Measurement> {
    comm.barrier()?;

    let start_time = Instant::now();

    transfer.execute(iterations.get())?;
    acknowledge(comm)?;

    let elapsed = black_box(start_time.elapsed());

    let per_operation_nanos = elapsed
        .as_nanos()
        .checked_div(u128::from(iterations.get()))
        .expect("iterations is NonZero, so division by zero is impossible");

    let local = Duration::from_nanos(
        per_operation_nanos
            .try_into()
            .expect("overflowing u64 is unrealistic when using a real clock"),
    );

    let slowest = comm.all_reduce_max(local.as_secs_f64())?;

    tracing::trace!(
        rank = comm.rank(),
        local_ns = local.as_nanos(),
        slowest_ns = Duration::from_secs_f64(slowest).as_nanos(),
        "trial measured"
    );

    Ok(Measurement::new(
        Duration::from_secs_f64(slowest),
        bytes_per_operation,
        iterations,
    ))
}

/// Runs `trials` trials of `transfer`, each timing `iterations` iterations.
///
/// # Errors
///
/// Returns the first error of any trial. A failed trial is fatal, it is not retried.
pub fn run_trials<C: Communicator>(
    comm: &C,
    transfer: &mut dyn Transfer,
    trials: NonZero<u32>,
    iterations: NonZero<u64>,
    bytes_per_operation: u64,
) -> Result<TrialSeries> {
    let samples = (0..trials.get())
        .map(|_| measure_trial(comm, transfer, iterations, bytes_per_operation))
        .collect::<Result<Vec<_>>>()?;

    Ok(TrialSeries::new(samples))
}

/// Every sink tells the source it has finished, so the source does not stop its clock before
/// the slowest sink is done.
fn acknowledge<C: Communicator>(comm: &C) -> Result<()> {
    if comm.rank() == SOURCE_RANK {
        let mut ack = [0_i32];

        for source in comm.peers() {
            comm.receive_into(&mut ack, source, ACK_TAG)?;
        }
    } else {
        comm.send(&[1_i32], SOURCE_RANK, ACK_TAG)?;
    }

    Ok(())
}
