//! End-to-end benchmark runs driven by configuration, as the command-line tool performs them.

use std::num::NonZero;
use std::path::Path;

use jagged_bench::{
    BenchConfig, Case, Error, Fill, IterationBudget, Shape, Strategy, render_csv, run_plan,
};
use testing::with_watchdog;

fn quick_config(strategies: Vec<Strategy>, cases: Vec<Case>) -> BenchConfig {
    let mut config = BenchConfig::default();
    config.ranks = 3;
    config.strategies = strategies;
    config.cases = cases;
    config.fill = Fill::Pattern;
    config.trials = 2;
    config.budget = IterationBudget::fixed(NonZero::new(5).unwrap());
    config.verify = true;
    config
}

#[test]
fn verified_run_covers_every_strategy() {
    with_watchdog(|| {
        let config = quick_config(
            Strategy::ALL.to_vec(),
            vec![
                Case::Jagged {
                    outer_size: 5,
                    base_size: 50,
                },
                Case::Flat { array_size: 300 },
            ],
        );

        let records = run_plan(&config.into_plan().unwrap()).unwrap();

        assert_eq!(records.len(), Strategy::ALL.len() * 2);

        for record in &records {
            assert_eq!(record.ranks, 3);
            assert_eq!(record.series.samples().len(), 2);
            assert!(record.best() <= record.series.mean());
        }

        // Header plus one line per record.
        assert_eq!(render_csv(&records).lines().count(), records.len() + 1);
    });
}

#[test]
fn larger_payloads_take_longer() {
    with_watchdog(|| {
        let mut config = quick_config(
            vec![Strategy::Raw],
            vec![
                Case::Jagged {
                    outer_size: 5,
                    base_size: 50,
                },
                Case::Jagged {
                    outer_size: 5,
                    base_size: 50_000,
                },
            ],
        );
        config.ranks = 2;
        config.trials = 3;
        config.verify = false;
        config.shape = Shape::SquareClasses;

        let records = run_plan(&config.into_plan().unwrap()).unwrap();

        let [small, large] = records.as_slice() else {
            panic!("one record per case expected, got {records:?}");
        };

        // A thousand times more data cannot move in less time.
        assert!(
            small.best() < large.best(),
            "small payload took {:?}, large payload took {:?}",
            small.best(),
            large.best()
        );
    });
}

#[test]
fn single_rank_world_has_nobody_to_send_to() {
    with_watchdog(|| {
        let mut config = quick_config(
            vec![Strategy::Broadcast, Strategy::OneSided],
            vec![Case::Flat { array_size: 10 }],
        );
        config.ranks = 1;

        let records = run_plan(&config.into_plan().unwrap()).unwrap();

        for record in records {
            assert_eq!(record.series.best().bytes_per_operation(), 0);
        }
    });
}

#[test]
fn oversized_case_is_rejected_before_running() {
    let config = quick_config(
        vec![Strategy::Raw],
        vec![Case::Jagged {
            outer_size: 40_000,
            base_size: 1,
        }],
    );

    assert!(matches!(
        config.into_plan(),
        Err(Error::InvalidConfig { .. })
    ));
}

#[test]
fn demo_configuration_is_valid() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/jagged_bench.toml");

    let config = BenchConfig::load(&path).unwrap();

    assert_eq!(config.ranks, 4);
    assert_eq!(config.strategies, Strategy::ALL.to_vec());
    assert_eq!(config.fill, Fill::Constant(42));
    assert_eq!(config.cases.len(), 5);

    let plan = config.into_plan().unwrap();
    assert!(plan.verify);
}
