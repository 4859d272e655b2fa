use crate::communicator::validate_rank;
use crate::element::sealed::Sealed;
use crate::mailbox::Payload;
use crate::{Comm, Communicator, Element, Error, Rank, Result};

/// Rank that combines the contributions of a reduction.
const REDUCTION_ROOT: Rank = 0;

/// Broadcasts `buf` from `root`, returning on the root once every peer has taken the data.
pub(crate) fn broadcast_into<T: Element>(comm: &Comm, buf: &mut [T], root: Rank) -> Result<()> {
    validate_rank(root, comm.size())?;

    // The sequence number is consumed on every rank, root or not, to keep ranks aligned.
    let channel = comm.next_collective();

    if comm.rank() != root {
        comm.receive_on(buf, root, channel)?;
        return Ok(());
    }

    let receipts = comm
        .peers()
        .filter_map(|dest| comm.post(dest, channel, T::into_payload(buf.to_vec())))
        .collect::<Vec<_>>();

    let mut first_error = None;

    for receipt in receipts {
        if let Err(error) = comm.redeem(receipt) {
            first_error.get_or_insert(error);
        }
    }

    first_error.map_or(Ok(()), Err)
}

/// Gathers every contribution on [`REDUCTION_ROOT`], which sends the maximum back.
///
/// Every rank waits for the reply of the root, so no rank can start the next reduction before
/// the previous one has been consumed everywhere.
pub(crate) fn all_reduce_max(comm: &Comm, value: f64) -> Result<f64> {
    let channel = comm.next_collective();

    if comm.rank() == REDUCTION_ROOT {
        let mut max = value;

        for source in comm.peers() {
            let contribution = single_float(comm.take(source, channel)?)?;
            max = max.max(contribution);
        }

        for dest in comm.peers() {
            comm.deliver(dest, channel, Payload::Floats(vec![max]));
        }

        Ok(max)
    } else {
        comm.deliver(REDUCTION_ROOT, channel, Payload::Floats(vec![value]));
        single_float(comm.take(REDUCTION_ROOT, channel)?)
    }
}

fn single_float(payload: Payload) -> Result<f64> {
    match <f64 as Sealed>::from_payload(payload) {
        Ok(values) => match values.as_slice() {
            [value] => Ok(*value),
            other => Err(Error::CountMismatch {
                expected: 1,
                actual: other.len(),
            }),
        },
        Err(payload) => Err(Error::TypeMismatch {
            expected: <f64 as Sealed>::NAME,
            actual: payload.kind(),
        }),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::num::NonZero;
    use std::thread;
    use std::time::{Duration, Instant};

    use testing::with_watchdog;

    use crate::{Communicator, Error, World};

    fn world(size: usize) -> World {
        World::new(NonZero::new(size).unwrap())
    }

    #[test]
    fn broadcast_reaches_every_rank() {
        with_watchdog(|| {
            let received = world(4).run(|comm| {
                let mut buf = if comm.rank() == 2 {
                    vec![7, 8, 9]
                } else {
                    vec![0; 3]
                };

                comm.broadcast_into(&mut buf, 2).unwrap();
                buf
            });

            for buf in &received {
                assert_eq!(buf, &vec![7, 8, 9]);
            }
        });
    }

    #[test]
    fn broadcast_root_waits_for_every_peer() {
        with_watchdog(|| {
            let delay = Duration::from_millis(50);

            let elapsed = world(3).run(|comm| {
                let mut buf = if comm.rank() == 0 { [9] } else { [0] };

                if comm.rank() == 2 {
                    thread::sleep(delay);
                }

                let started = Instant::now();
                comm.broadcast_into(&mut buf, 0).unwrap();
                assert_eq!(buf, [9]);

                started.elapsed()
            });

            // Rank threads start at slightly different times.
            assert!(elapsed[0] >= delay / 2);
        });
    }

    #[test]
    fn batched_broadcasts_match_in_call_order() {
        with_watchdog(|| {
            let received = world(3).run(|comm| {
                let (mut first, mut second) = if comm.rank() == 0 {
                    (vec![1_i32], vec![2_i32, 3])
                } else {
                    (vec![0], vec![0, 0])
                };

                let mut batch = comm.batch();
                batch.broadcast_into(&mut first, 0).unwrap();
                batch.broadcast_into(&mut second, 0).unwrap();
                batch.wait_all().unwrap();

                (first, second)
            });

            for (first, second) in &received {
                assert_eq!(first, &vec![1]);
                assert_eq!(second, &vec![2, 3]);
            }
        });
    }

    #[test]
    fn collectives_do_not_match_point_to_point_traffic() {
        with_watchdog(|| {
            world(2).run(|comm| {
                let mut value = [0];
                let mut broadcast = if comm.rank() == 0 { [5] } else { [0] };

                let mut batch = comm.batch();

                if comm.rank() == 0 {
                    batch.send(&[100], 1, 0).unwrap();
                } else {
                    batch.receive_into(&mut value, 0, 0).unwrap();
                }

                batch.broadcast_into(&mut broadcast, 0).unwrap();
                batch.wait_all().unwrap();

                assert_eq!(broadcast, [5]);

                if comm.rank() == 1 {
                    assert_eq!(value, [100]);
                }
            });
        });
    }

    #[test]
    fn broadcast_from_missing_root_is_rejected() {
        with_watchdog(|| {
            world(2).run(|comm| {
                assert!(matches!(
                    comm.broadcast_into(&mut [0_u8], 2),
                    Err(Error::InvalidRank { rank: 2, size: 2 })
                ));
            });
        });
    }

    #[test]
    fn all_reduce_max_agrees_on_every_rank() {
        with_watchdog(|| {
            let results = world(5).run(|comm| {
                #[expect(clippy::cast_precision_loss, reason = "tiny test values")]
                let value = (comm.rank() as f64 - 2.0).abs();
                comm.all_reduce_max(value).unwrap()
            });

            assert!(results.iter().all(|&max| (max - 2.0).abs() < f64::EPSILON));
        });
    }

    #[test]
    fn barrier_completes_on_all_ranks() {
        with_watchdog(|| {
            let results = world(3).run(|comm| {
                for _ in 0..50 {
                    comm.barrier().unwrap();
                }
                true
            });

            assert!(results.iter().all(|&done| done));
        });
    }
}
