use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::{Error, Rank, Result, Tag};

/// Separates point-to-point traffic from collective traffic so the two never match each other.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Channel {
    User(Tag),
    Collective(u64),
}

/// The data carried by one message.
#[derive(Debug)]
pub enum Payload {
    Ints(Vec<i32>),
    Bytes(Vec<u8>),
    Floats(Vec<f64>),

    /// A shared memory segment exposed through a one-sided window.
    Segment(Arc<dyn Any + Send + Sync>),
}

impl Payload {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Ints(_) => "i32",
            Self::Bytes(_) => "u8",
            Self::Floats(_) => "f64",
            Self::Segment(_) => "window segment",
        }
    }
}

/// Identifies one delivered message so its sender can wait until it has been received.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Ticket(u64);

#[derive(Debug)]
struct Envelope {
    ticket: Ticket,
    source: Rank,
    channel: Channel,
    payload: Payload,
}

#[derive(Debug, Default)]
struct Queue {
    envelopes: VecDeque<Envelope>,
    next_ticket: u64,
}

/// Incoming messages of one rank, in order of arrival.
///
/// One condition variable serves both directions: receivers wait for arrivals and senders wait
/// for their messages to be taken.
#[derive(Debug, Default)]
pub(crate) struct Mailbox {
    queue: Mutex<Queue>,
    changed: Condvar,
}

impl Mailbox {
    pub(crate) fn deliver(&self, source: Rank, channel: Channel, payload: Payload) -> Ticket {
        let mut queue = self.queue.lock().unwrap();

        let ticket = Ticket(queue.next_ticket);
        queue.next_ticket = queue.next_ticket.wrapping_add(1);

        queue.envelopes.push_back(Envelope {
            ticket,
            source,
            channel,
            payload,
        });

        self.changed.notify_all();
        ticket
    }

    /// Removes the oldest message from `source` on `channel`, blocking until one arrives.
    ///
    /// Returns [`Error::Aborted`] once `aborted` is raised and no matching message is queued.
    pub(crate) fn take(
        &self,
        source: Rank,
        channel: Channel,
        aborted: &AtomicBool,
    ) -> Result<Payload> {
        let mut queue = self.queue.lock().unwrap();

        loop {
            let matching = queue
                .envelopes
                .iter()
                .position(|envelope| envelope.source == source && envelope.channel == channel);

            if let Some(envelope) = matching.and_then(|index| queue.envelopes.remove(index)) {
                // The sender may be waiting for exactly this message to leave the queue.
                self.changed.notify_all();
                return Ok(envelope.payload);
            }

            if aborted.load(Ordering::Acquire) {
                return Err(Error::Aborted);
            }

            queue = self.changed.wait(queue).unwrap();
        }
    }

    /// Blocks until the message identified by `ticket` has been taken by the receiver.
    ///
    /// Returns [`Error::Aborted`] if `aborted` is raised while the message is still queued.
    pub(crate) fn await_taken(&self, ticket: Ticket, aborted: &AtomicBool) -> Result<()> {
        let mut queue = self.queue.lock().unwrap();

        while queue
            .envelopes
            .iter()
            .any(|envelope| envelope.ticket == ticket)
        {
            if aborted.load(Ordering::Acquire) {
                return Err(Error::Aborted);
            }

            queue = self.changed.wait(queue).unwrap();
        }

        Ok(())
    }

    /// Wakes up every waiter so it can observe an abort.
    #[cfg_attr(test, mutants::skip)] // Mutations only show up as hangs.
    pub(crate) fn wake_all(&self) {
        // Taking the lock orders this wakeup after any waiter that already checked the abort flag.
        let _queue = self.queue.lock().unwrap();
        self.changed.notify_all();
    }

    pub(crate) fn pending(&self) -> usize {
        self.queue.lock().unwrap().envelopes.len()
    }
}
