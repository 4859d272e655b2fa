#![cfg(any(test, feature = "criterion"))]

use std::num::NonZero;
use std::time::Duration;

use criterion::BenchmarkGroup;
use criterion::measurement::WallTime;

use crate::{BenchmarkPlan, measure_case};

impl BenchmarkPlan {
    /// Benchmarks every strategy with every case of the plan as part of a Criterion benchmark
    /// group, one benchmark per combination named `<strategy>/<case>`.
    ///
    /// The number of iterations is determined by Criterion. Each sample runs in a new world and
    /// reports the time of the slowest rank, like [`crate::run_plan()`] does.
    ///
    /// # Panics
    ///
    /// Panics if a transfer fails, since Criterion offers no way to report the error.
    pub fn execute_criterion(&self, group: &mut BenchmarkGroup<'_, WallTime>) {
        for &strategy in &self.strategies {
            for &case in &self.cases {
                group.bench_function(format!("{strategy}/{case}"), |b| {
                    b.iter_custom(|iters| {
                        let iterations = NonZero::new(iters).unwrap_or(NonZero::<u64>::MIN);

                        let measurement = measure_case(self, strategy, case, iterations)
                            .unwrap_or_else(|e| panic!("{strategy} failed for {case}: {e}"));

                        total_duration(measurement.per_operation(), iterations)
                    });
                });
            }
        }
    }
}

fn total_duration(per_operation: Duration, iterations: NonZero<u64>) -> Duration {
    let nanos = per_operation
        .as_nanos()
        .saturating_mul(u128::from(iterations.get()));

    Duration::from_nanos(
        nanos
            .try_into()
            .expect("overflowing u64 is unrealistic when using a real clock"),
    )
}
