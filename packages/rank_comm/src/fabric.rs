use std::num::NonZero;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

use crate::mailbox::{Channel, Mailbox, Payload, Ticket};
use crate::{Error, Rank, Result};

const NO_FAILURE: usize = usize::MAX;

/// State shared by all ranks of one world execution.
#[derive(Debug)]
pub(crate) struct Fabric {
    mailboxes: Box<[Mailbox]>,
    barrier: RankBarrier,

    aborted: AtomicBool,
    first_failure: AtomicUsize,

    live_datatypes: AtomicUsize,
}

impl Fabric {
    pub(crate) fn new(size: NonZero<usize>) -> Self {
        Self {
            mailboxes: (0..size.get()).map(|_| Mailbox::default()).collect(),
            barrier: RankBarrier::new(size),
            aborted: AtomicBool::new(false),
            first_failure: AtomicUsize::new(NO_FAILURE),
            live_datatypes: AtomicUsize::new(0),
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.mailboxes.len()
    }

    pub(crate) fn deliver(
        &self,
        source: Rank,
        dest: Rank,
        channel: Channel,
        payload: Payload,
    ) -> Ticket {
        self.mailbox(dest).deliver(source, channel, payload)
    }

    pub(crate) fn await_taken(&self, dest: Rank, ticket: Ticket) -> Result<()> {
        self.mailbox(dest).await_taken(ticket, &self.aborted)
    }

    pub(crate) fn take(&self, dest: Rank, source: Rank, channel: Channel) -> Result<Payload> {
        self.mailbox(dest).take(source, channel, &self.aborted)
    }

    pub(crate) fn pending(&self, rank: Rank) -> usize {
        self.mailbox(rank).pending()
    }

    pub(crate) fn barrier(&self) -> Result<()> {
        self.barrier.wait(&self.aborted)
    }

    /// Marks the world as failed by `rank` and wakes up every blocked rank.
    pub(crate) fn abort(&self, rank: Rank) {
        // Only the first failure is remembered, later ones are usually consequences of it.
        _ = self.first_failure.compare_exchange(
            NO_FAILURE,
            rank,
            Ordering::AcqRel,
            Ordering::Acquire,
        );

        if self.aborted.swap(true, Ordering::AcqRel) {
            return;
        }

        tracing::warn!(rank, "rank failed, aborting world");

        for mailbox in &self.mailboxes {
            mailbox.wake_all();
        }

        self.barrier.wake_all();
    }

    pub(crate) fn first_failure(&self) -> Option<Rank> {
        let rank = self.first_failure.load(Ordering::Acquire);
        (rank != NO_FAILURE).then_some(rank)
    }

    pub(crate) fn datatype_created(&self) {
        self.live_datatypes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn datatype_freed(&self) {
        self.live_datatypes.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn live_datatypes(&self) -> usize {
        self.live_datatypes.load(Ordering::Relaxed)
    }

    fn mailbox(&self, rank: Rank) -> &Mailbox {
        self.mailboxes
            .get(rank)
            .expect("ranks are validated by the communicator before reaching the fabric")
    }
}

/// A reusable barrier that releases waiters with an error if the world is aborted.
#[derive(Debug)]
struct RankBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    released: Condvar,
}

#[derive(Debug, Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
}

impl RankBarrier {
    fn new(parties: NonZero<usize>) -> Self {
        Self {
            parties: parties.get(),
            state: Mutex::new(BarrierState::default()),
            released: Condvar::new(),
        }
    }

    fn wait(&self, aborted: &AtomicBool) -> Result<()> {
        let mut state = self.state.lock().unwrap();

        let generation = state.generation;
        state.arrived = state.arrived.wrapping_add(1);

        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.released.notify_all();
            return Ok(());
        }

        while state.generation == generation {
            if aborted.load(Ordering::Acquire) {
                return Err(Error::Aborted);
            }

            state = self.released.wait(state).unwrap();
        }

        Ok(())
    }

    #[cfg_attr(test, mutants::skip)] // Only observable as a hang.
    fn wake_all(&self) {
        let _state = self.state.lock().unwrap();
        self.released.notify_all();
    }
}
