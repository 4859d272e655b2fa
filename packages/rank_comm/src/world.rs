use std::num::NonZero;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crate::Comm;
use crate::fabric::Fabric;

/// A fixed-size group of ranks that execute the same closure concurrently.
///
/// Every call to [`run()`][Self::run] or [`try_run()`][Self::try_run] starts a fresh execution
/// with empty mailboxes, so nothing leaks from one run into the next.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct World {
    size: NonZero<usize>,
}

impl World {
    /// Creates a world of `size` ranks.
    #[must_use]
    pub fn new(size: NonZero<usize>) -> Self {
        Self { size }
    }

    /// Number of ranks in the world.
    #[must_use]
    pub fn size(&self) -> NonZero<usize> {
        self.size
    }

    /// Runs `f` once on every rank and returns the per-rank results, indexed by rank.
    ///
    /// # Panics
    ///
    /// If any rank panics, the world is aborted so that blocked peers wake up, and the panic
    /// of the first failing rank is resumed on the calling thread once all ranks have finished.
    pub fn run<F, R>(&self, f: F) -> Box<[R]>
    where
        F: Fn(&Comm) -> R + Sync,
        R: Send,
    {
        let (results, _) = self.launch(f);
        results.into_boxed_slice()
    }

    /// Runs the fallible `f` once on every rank and returns the per-rank results, indexed by rank.
    ///
    /// A rank returning an error aborts the world like a panic does, so that peers blocked on
    /// the failed rank observe [`Error::Aborted`][crate::Error::Aborted] instead of hanging.
    ///
    /// # Errors
    ///
    /// Returns the error of the first rank that failed.
    ///
    /// # Panics
    ///
    /// Resumes the panic of a failing rank, as [`run()`][Self::run] does.
    pub fn try_run<F, R, E>(&self, f: F) -> Result<Box<[R]>, E>
    where
        F: Fn(&Comm) -> Result<R, E> + Sync,
        R: Send,
        E: Send,
    {
        let (outcomes, first_failure) = self.launch(|comm| {
            let outcome = f(comm);

            if outcome.is_err() {
                comm.abort_world();
            }

            outcome
        });

        let mut first_error = None;
        let mut any_error = None;
        let mut results = Vec::with_capacity(outcomes.len());

        for (rank, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(value) => results.push(value),
                Err(error) if first_failure == Some(rank) => first_error = Some(error),
                Err(error) => {
                    any_error.get_or_insert(error);
                }
            }
        }

        match first_error.or(any_error) {
            Some(error) => Err(error),
            None => Ok(results.into_boxed_slice()),
        }
    }

    fn launch<F, T>(&self, f: F) -> (Vec<T>, Option<usize>)
    where
        F: Fn(&Comm) -> T + Sync,
        T: Send,
    {
        let fabric = Arc::new(Fabric::new(self.size));
        let f = &f;

        tracing::debug!(size = self.size.get(), "starting world");

        let outcomes = thread::scope(|scope| {
            let handles = (0..self.size.get())
                .map(|rank| {
                    let fabric = Arc::clone(&fabric);

                    thread::Builder::new()
                        .name(format!("rank-{rank}"))
                        .spawn_scoped(scope, move || {
                            let comm = Comm::new(rank, fabric);

                            let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(&comm)));

                            if outcome.is_err() {
                                comm.abort_world();
                            }

                            outcome
                        })
                        .expect("spawning rank threads must succeed for the world to exist")
                })
                .collect::<Vec<_>>();

            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .expect("rank threads catch their own panics and never fail to join")
                })
                .collect::<Vec<_>>()
        });

        let first_failure = fabric.first_failure();

        let mut results = Vec::with_capacity(outcomes.len());
        let mut resumed_panic = None;

        for (rank, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(value) => results.push(value),
                Err(payload) => {
                    if resumed_panic.is_none() || first_failure == Some(rank) {
                        resumed_panic = Some(payload);
                    }
                }
            }
        }

        if let Some(payload) = resumed_panic {
            panic::resume_unwind(payload);
        }

        tracing::debug!(size = self.size.get(), "world finished");

        (results, first_failure)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;
    use testing::with_watchdog;

    use super::*;
    use crate::{Communicator, Error};

    assert_impl_all!(World: Send, Sync, Debug, Copy);

    #[test]
    fn run_returns_results_indexed_by_rank() {
        with_watchdog(|| {
            let world = World::new(NonZero::new(4).unwrap());

            let ranks = world.run(|comm| (comm.rank(), comm.size()));

            assert_eq!(&*ranks, &[(0, 4), (1, 4), (2, 4), (3, 4)]);
        });
    }

    #[test]
    fn single_rank_world_runs() {
        with_watchdog(|| {
            let world = World::new(NonZero::new(1).unwrap());

            let results = world.run(|comm| comm.barrier().is_ok());

            assert_eq!(&*results, &[true]);
        });
    }

    #[test]
    fn failing_rank_aborts_blocked_peers() {
        with_watchdog(|| {
            let world = World::new(NonZero::new(3).unwrap());

            let result = world.try_run(|comm| {
                if comm.rank() == 2 {
                    return Err("rank 2 gave up");
                }

                // Waits for a message that never comes.
                comm.receive_vec::<i32>(2, 0).map_err(|_aborted| "aborted")
            });

            assert_eq!(result.unwrap_err(), "rank 2 gave up");
        });
    }

    #[test]
    fn aborted_peers_observe_abort_error() {
        with_watchdog(|| {
            let world = World::new(NonZero::new(2).unwrap());

            let result = world.try_run(|comm| {
                if comm.rank() == 0 {
                    return Err(Error::InvalidTag { tag: -5 });
                }

                comm.barrier()
            });

            assert!(matches!(result, Err(Error::InvalidTag { tag: -5 })));
        });
    }

    #[test]
    #[should_panic]
    fn panicking_rank_panics_caller() {
        with_watchdog(|| {
            let world = World::new(NonZero::new(2).unwrap());

            world.run(|comm| {
                assert!(comm.rank() != 1, "rank 1 panics");

                // Would hang forever without the abort.
                _ = comm.barrier();
            });
        });
    }
}
