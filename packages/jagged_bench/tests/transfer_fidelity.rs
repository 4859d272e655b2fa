//! Every strategy must deliver to every sink an array identical in shape and values to the one
//! the source built, for any combination of row counts, row lengths and rank counts.

use std::num::NonZero;

use jagged_bench::{Fill, JaggedArray, Role, Shape, Strategy};
use rank_comm::{Communicator, World};
use testing::with_watchdog;

/// Transfers `payload` from rank 0 to every other rank of a world of `ranks` ranks with
/// `strategy`, repeating the transfer `iterations` times, and returns what every sink received.
fn transfer(
    strategy: Strategy,
    ranks: usize,
    payload: &JaggedArray,
    iterations: u64,
) -> Vec<JaggedArray> {
    let world = World::new(NonZero::new(ranks).unwrap());

    let per_rank = world.run(|comm| {
        let role = Role::for_rank(comm.rank(), || Ok(payload.clone())).unwrap();
        let mut transfer = strategy.prepare(comm, role).unwrap();

        transfer.execute(iterations).unwrap();

        transfer.received().cloned()
    });

    let mut per_rank = per_rank.into_vec();
    assert!(per_rank.remove(0).is_none(), "the source receives nothing");

    per_rank
        .into_iter()
        .map(|received| received.expect("every sink reconstructs the payload"))
        .collect()
}

fn assert_delivered(strategy: Strategy, ranks: usize, expected: &JaggedArray, iterations: u64) {
    let received = transfer(strategy, ranks, expected, iterations);

    assert_eq!(received.len(), ranks - 1);

    for (sink, actual) in received.iter().enumerate() {
        if let Some(mismatch) = expected.first_mismatch(actual) {
            panic!(
                "{strategy} with {ranks} ranks delivered a corrupted payload to rank {}: {mismatch}",
                sink + 1
            );
        }
    }
}

#[test]
fn every_strategy_delivers_every_shape_to_every_sink() {
    with_watchdog(|| {
        for strategy in Strategy::ALL {
            for ranks in [2, 3, 4] {
                for shape in Shape::ALL {
                    let payload = JaggedArray::generate(shape, 5, 7, Fill::Pattern).unwrap();

                    assert_delivered(strategy, ranks, &payload, 3);
                }
            }
        }
    });
}

#[test]
fn flat_payload_is_delivered() {
    with_watchdog(|| {
        let payload = JaggedArray::generate(Shape::Uniform, 1, 10_000, Fill::Pattern).unwrap();

        for strategy in Strategy::ALL {
            assert_delivered(strategy, 3, &payload, 2);
        }
    });
}

#[test]
fn zero_rows_are_delivered_as_zero_rows() {
    with_watchdog(|| {
        let payload = JaggedArray::generate(Shape::SquareClasses, 0, 50, Fill::Pattern).unwrap();
        assert_eq!(payload.outer_size(), 0);

        for strategy in Strategy::ALL {
            for received in transfer(strategy, 3, &payload, 2) {
                assert_eq!(received.outer_size(), 0, "{strategy}");
            }
        }
    });
}

#[test]
fn empty_rows_are_delivered_as_empty_rows() {
    with_watchdog(|| {
        let payload = JaggedArray::from_rows(vec![
            vec![],
            vec![1, 2, 3],
            vec![],
            vec![],
            vec![4],
            vec![],
        ]);

        for strategy in Strategy::ALL {
            for received in transfer(strategy, 3, &payload, 2) {
                assert_eq!(received.inner_sizes(), vec![0, 3, 0, 0, 1, 0], "{strategy}");
                assert_eq!(received, payload, "{strategy}");
            }
        }
    });
}

#[test]
fn all_rows_empty() {
    with_watchdog(|| {
        let payload = JaggedArray::generate(Shape::Uniform, 4, 0, Fill::Zero).unwrap();

        for strategy in Strategy::ALL {
            assert_delivered(strategy, 2, &payload, 2);
        }
    });
}

#[test]
fn raw_delivers_constant_square_classes() {
    with_watchdog(|| {
        let payload =
            JaggedArray::generate(Shape::SquareClasses, 5, 50, Fill::Constant(42)).unwrap();

        let received = transfer(Strategy::Raw, 2, &payload, 10);

        let [received] = received.as_slice() else {
            panic!("two ranks have exactly one sink");
        };

        assert_eq!(received.inner_sizes(), vec![50, 200, 450, 800, 1250]);
        assert_eq!(received.total_elements(), 2750);
        assert!(received.rows().iter().flatten().all(|&value| value == 42));
    });
}
