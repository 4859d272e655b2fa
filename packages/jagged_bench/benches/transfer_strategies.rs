//! Compares every transfer strategy on small and large jagged payloads with two and four ranks.

#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use criterion::{Criterion, criterion_group, criterion_main};
use jagged_bench::{BenchConfig, Case, Fill};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

fn entrypoint(c: &mut Criterion) {
    for ranks in [2, 4] {
        let mut group = c.benchmark_group(format!("jagged_transfer_{ranks}_ranks"));

        let mut config = BenchConfig::default();
        config.ranks = ranks;
        config.fill = Fill::Constant(42);
        config.cases = vec![
            Case::Jagged {
                outer_size: 5,
                base_size: 50,
            },
            Case::Jagged {
                outer_size: 5,
                base_size: 50_000,
            },
        ];

        let plan = config
            .into_plan()
            .expect("benchmark configuration is hardcoded and valid");

        plan.execute_criterion(&mut group);
        group.finish();
    }

    let mut group = c.benchmark_group("flat_transfer");

    let mut config = BenchConfig::default();
    config.cases = vec![Case::Flat {
        array_size: 100_000,
    }];

    let plan = config
        .into_plan()
        .expect("benchmark configuration is hardcoded and valid");

    plan.execute_criterion(&mut group);
    group.finish();
}
