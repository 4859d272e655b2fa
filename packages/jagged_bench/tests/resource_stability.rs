//! Repeating a transfer many times must not accumulate runtime resources, neither derived types
//! nor undelivered messages, and a source must not run ahead of a sink that is not receiving.

use std::num::NonZero;
use std::thread;
use std::time::Duration;

use jagged_bench::{Fill, JaggedArray, Role, SOURCE_RANK, Shape, Strategy};
use rank_comm::{Communicator, World};
use testing::with_watchdog_timeout;

const ITERATIONS: u64 = 10_000;

#[derive(Debug, PartialEq)]
struct Leftovers {
    live_datatypes: usize,
    pending_messages: usize,
}

fn leftovers_after_repeated_transfer(strategy: Strategy, ranks: usize) -> Vec<Leftovers> {
    let payload = JaggedArray::generate(Shape::SquareClasses, 5, 2, Fill::Pattern).unwrap();

    let per_rank = World::new(NonZero::new(ranks).unwrap()).run(|comm| {
        let role = Role::for_rank(comm.rank(), || Ok(payload.clone())).unwrap();
        let mut transfer = strategy.prepare(comm, role).unwrap();

        transfer.execute(ITERATIONS).unwrap();

        if let Some(received) = transfer.received() {
            assert_eq!(received, &payload, "{strategy} on rank {}", comm.rank());
        }

        drop(transfer);

        // Every rank has finished its share of the transfers before anyone looks at the world.
        comm.barrier().unwrap();

        let leftovers = Leftovers {
            live_datatypes: comm.live_datatypes(),
            pending_messages: comm.pending_messages(),
        };

        // Nobody may leave, and thereby drop resources, before everyone has looked.
        comm.barrier().unwrap();

        leftovers
    });

    per_rank.into_vec()
}

#[test]
fn repeated_transfers_release_everything() {
    with_watchdog_timeout(Duration::from_secs(300), || {
        for strategy in Strategy::ALL {
            let leftovers = leftovers_after_repeated_transfer(strategy, 3);

            for (rank, leftover) in leftovers.iter().enumerate() {
                assert_eq!(
                    leftover,
                    &Leftovers {
                        live_datatypes: 0,
                        pending_messages: 0,
                    },
                    "{strategy} left resources behind on rank {rank}"
                );
            }
        }
    });
}

#[test]
fn source_cannot_run_ahead_of_idle_sink() {
    const OUTER_SIZE: usize = 5;
    const ITERATIONS: u64 = 200;

    with_watchdog_timeout(Duration::from_secs(60), || {
        let payload =
            JaggedArray::generate(Shape::SquareClasses, OUTER_SIZE, 100, Fill::Pattern).unwrap();

        for strategy in Strategy::ALL {
            let queued = World::new(NonZero::new(2).unwrap()).run(|comm| {
                let role = Role::for_rank(comm.rank(), || Ok(payload.clone())).unwrap();
                let mut transfer = strategy.prepare(comm, role).unwrap();

                if comm.rank() == SOURCE_RANK {
                    transfer.execute(ITERATIONS).unwrap();
                    return 0;
                }

                // Gives the source time to queue up as much as it is able to.
                thread::sleep(Duration::from_millis(100));
                let queued = comm.pending_messages();

                transfer.execute(ITERATIONS).unwrap();
                assert_eq!(transfer.received(), Some(&payload), "{strategy}");

                queued
            });

            // At most the metadata and every row of a single iteration.
            assert!(
                queued[1] <= OUTER_SIZE + 2,
                "{strategy} queued {} messages for an idle sink",
                queued[1]
            );
        }
    });
}
