#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]

//! Binary entry point for the jagged array transfer benchmark.
//!
//! This module is excluded from mutation testing because testing process entry/exit behavior
//! is impractical - it requires spawning subprocesses and checking exit codes.

use std::io::{self, Write as _};
use std::path::PathBuf;
use std::process::ExitCode;

use argh::FromArgs;
#[cfg(not(feature = "mpi"))]
use jagged_bench::run_plan;
use jagged_bench::{
    BenchConfig, BenchmarkPlan, BenchmarkRecord, Error, Shape, Strategy, render_csv,
    render_table,
};
#[cfg(feature = "mpi")]
use jagged_bench::{SOURCE_RANK, run_on_rank};
#[cfg(feature = "mpi")]
use rank_comm::{Communicator, MpiWorld};
use tracing_subscriber::EnvFilter;

/// Benchmarks strategies for transferring a jagged integer array from rank 0 to all other ranks.
///
/// Progress is logged to stderr, filtered by RUST_LOG (default: info). Results are printed to
/// stdout. Built with the `mpi` feature, the binary is started once per rank by the MPI launcher
/// and only rank 0 prints results.
#[derive(FromArgs)]
struct Args {
    /// path to a TOML configuration file; built-in defaults are used without one
    #[argh(option)]
    config: Option<PathBuf>,

    /// number of ranks, overriding the configuration; MPI jobs always use their own size
    #[argh(option)]
    ranks: Option<usize>,

    /// strategy to benchmark, may be repeated; overrides the configured strategies
    #[argh(option)]
    strategy: Vec<Strategy>,

    /// row length function of jagged cases, overriding the configuration
    #[argh(option)]
    shape: Option<Shape>,

    /// number of timed trials per strategy and case, overriding the configuration
    #[argh(option)]
    trials: Option<u32>,

    /// check every reconstructed payload against the one the source built
    #[argh(switch)]
    verify: bool,

    /// print results as CSV instead of a table
    #[argh(switch)]
    csv: bool,
}

// Binary entry point - mutations would require subprocess testing which is impractical.
#[cfg_attr(test, mutants::skip)]
fn main() -> ExitCode {
    let args: Args = argh::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    match run(args) {
        Ok(None) => ExitCode::SUCCESS,
        Ok(Some(output)) => {
            let mut stdout = io::stdout().lock();

            if let Err(e) = stdout.write_all(output.as_bytes()) {
                eprintln!("Error: {e}");
                return ExitCode::FAILURE;
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg_attr(test, mutants::skip)] // Only reachable through the binary.
fn run(args: Args) -> Result<Option<String>, Error> {
    let mut config = match &args.config {
        Some(path) => BenchConfig::load(path)?,
        None => BenchConfig::default(),
    };

    if let Some(ranks) = args.ranks {
        config.ranks = ranks;
    }

    if !args.strategy.is_empty() {
        config.strategies = args.strategy;
    }

    if let Some(shape) = args.shape {
        config.shape = shape;
    }

    if let Some(trials) = args.trials {
        config.trials = trials;
    }

    config.verify |= args.verify;

    let records = execute(config)?;

    Ok(records.map(|records| {
        if args.csv {
            render_csv(&records)
        } else {
            render_table(&records)
        }
    }))
}

fn log_start(plan: &BenchmarkPlan) {
    tracing::info!(
        ranks = plan.ranks.get(),
        strategies = plan.strategies.len(),
        cases = plan.cases.len(),
        shape = %plan.shape,
        "starting benchmark"
    );
}

/// Runs the plan in this process, one thread per rank.
#[cfg(not(feature = "mpi"))]
#[cfg_attr(test, mutants::skip)] // Only reachable through the binary.
fn execute(config: BenchConfig) -> Result<Option<Vec<BenchmarkRecord>>, Error> {
    let plan = config.into_plan()?;
    log_start(&plan);

    run_plan(&plan).map(Some)
}

/// Runs the plan as this process's rank of an MPI job. Only the source returns records.
///
/// A rank that fails aborts the whole job, since its peers would otherwise wait for it forever.
#[cfg(feature = "mpi")]
#[cfg_attr(test, mutants::skip)] // Only reachable through the binary.
fn execute(mut config: BenchConfig) -> Result<Option<Vec<BenchmarkRecord>>, Error> {
    let world = MpiWorld::initialize()?;
    let comm = world.comm();

    if config.ranks != comm.size() {
        tracing::warn!(
            configured = config.ranks,
            job = comm.size(),
            "using the size of the MPI job as the number of ranks"
        );
        config.ranks = comm.size();
    }

    let plan = config.into_plan()?;

    if comm.rank() == SOURCE_RANK {
        log_start(&plan);
    }

    match run_on_rank(&comm, &plan) {
        Ok(records) => Ok((comm.rank() == SOURCE_RANK).then_some(records)),
        Err(e) => {
            eprintln!("Error on rank {}: {e}", comm.rank());
            comm.abort_world()
        }
    }
}
