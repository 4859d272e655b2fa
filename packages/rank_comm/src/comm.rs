use std::cell::Cell;
use std::sync::Arc;

use crate::batch::Operation;
use crate::communicator::{sealed, validate_rank, validate_tag};
use crate::fabric::Fabric;
use crate::mailbox::{Channel, Payload, Ticket};
use crate::{
    CommittedRegion, CommittedType, Communicator, ContiguousType, Element, Error, Immediate, Rank,
    Result, Tag, Window, collective, datatype, pack, window,
};

/// One rank's view of a running [`World`][crate::World].
///
/// A communicator is only usable from the thread of the rank it belongs to.
///
/// Sends to other ranks complete once the receiver has taken the message. A message a rank
/// sends to itself is buffered, so it can be received later by the same thread.
#[derive(derive_more::Debug)]
pub struct Comm {
    rank: Rank,

    #[debug(ignore)]
    fabric: Arc<Fabric>,

    // Collectives are matched across ranks by the order in which they are called.
    collective_sequence: Cell<u64>,
}

/// Proof that a message was handed to another rank, redeemed once it has been received.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Receipt {
    dest: Rank,
    ticket: Ticket,
}

/// A receive that was posted as part of a batch.
struct Incoming<'b, T> {
    buf: &'b mut [T],
    source: Rank,
    channel: Channel,

    // Typed regions must be filled completely.
    expected: Option<usize>,
}

impl Comm {
    pub(crate) fn new(rank: Rank, fabric: Arc<Fabric>) -> Self {
        Self {
            rank,
            fabric,
            collective_sequence: Cell::new(0),
        }
    }

    /// Number of messages delivered to this rank that have not been received yet.
    #[must_use]
    pub fn pending_messages(&self) -> usize {
        self.fabric.pending(self.rank)
    }

    /// Number of derived types in the world that have been created but not yet freed.
    #[must_use]
    pub fn live_datatypes(&self) -> usize {
        self.fabric.live_datatypes()
    }

    /// Aborts the world, waking up every rank blocked in a communication call.
    pub fn abort_world(&self) {
        self.fabric.abort(self.rank);
    }

    pub(crate) fn fabric(&self) -> &Arc<Fabric> {
        &self.fabric
    }

    pub(crate) fn next_collective(&self) -> Channel {
        let sequence = self.collective_sequence.get();
        self.collective_sequence.set(sequence.wrapping_add(1));
        Channel::Collective(sequence)
    }

    /// Delivers `payload` to `dest` and returns a receipt to wait on, unless `dest` is this
    /// rank, in which case the message is only buffered.
    pub(crate) fn post(&self, dest: Rank, channel: Channel, payload: Payload) -> Option<Receipt> {
        let ticket = self.fabric.deliver(self.rank, dest, channel, payload);
        (dest != self.rank).then_some(Receipt { dest, ticket })
    }

    /// Blocks until the message behind `receipt` has been received.
    pub(crate) fn redeem(&self, receipt: Receipt) -> Result<()> {
        self.fabric.await_taken(receipt.dest, receipt.ticket)
    }

    /// Delivers `payload` to `dest` without waiting for it to be received.
    ///
    /// Only for exchanges in which the sender itself waits for a reply from every receiver.
    pub(crate) fn deliver(&self, dest: Rank, channel: Channel, payload: Payload) {
        _ = self.fabric.deliver(self.rank, dest, channel, payload);
    }

    pub(crate) fn take(&self, source: Rank, channel: Channel) -> Result<Payload> {
        self.fabric.take(self.rank, source, channel)
    }

    pub(crate) fn receive_on<T: Element>(
        &self,
        buf: &mut [T],
        source: Rank,
        channel: Channel,
    ) -> Result<usize> {
        let payload = self.take(source, channel)?;
        copy_payload(&payload, buf)
    }

    fn receive_incoming<T: Element>(&self, incoming: Incoming<'_, T>) -> Result<()> {
        let received = self.receive_on(incoming.buf, incoming.source, incoming.channel)?;

        match incoming.expected {
            Some(expected) if expected != received => Err(Error::CountMismatch {
                expected,
                actual: received,
            }),
            _ => Ok(()),
        }
    }
}

impl sealed::Backend for Comm {}

impl Communicator for Comm {
    type Region<T: Element> = ContiguousType<T>;
    type CommittedRegion<T: Element> = CommittedType<T>;
    type Window<'w, T: Element>
        = Window<'w, T>
    where
        Self: 'w;

    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.fabric.size()
    }

    fn send<T: Element>(&self, buf: &[T], dest: Rank, tag: Tag) -> Result<()> {
        validate_rank(dest, self.size())?;
        validate_tag(tag)?;

        match self.post(dest, Channel::User(tag), T::into_payload(buf.to_vec())) {
            Some(receipt) => self.redeem(receipt),
            None => Ok(()),
        }
    }

    fn receive_into<T: Element>(&self, buf: &mut [T], source: Rank, tag: Tag) -> Result<usize> {
        validate_rank(source, self.size())?;
        validate_tag(tag)?;

        self.receive_on(buf, source, Channel::User(tag))
    }

    fn receive_vec<T: Element>(&self, source: Rank, tag: Tag) -> Result<Vec<T>> {
        validate_rank(source, self.size())?;
        validate_tag(tag)?;

        let payload = self.take(source, Channel::User(tag))?;

        T::from_payload(payload).map_err(|payload| Error::TypeMismatch {
            expected: T::NAME,
            actual: payload.kind(),
        })
    }

    fn complete_all<T: Element>(
        &self,
        operations: Vec<Immediate<'_, T, CommittedType<T>>>,
    ) -> Result<()> {
        let mut receipts = Vec::new();
        let mut incoming = Vec::new();

        // Everything outgoing is posted before anything is received, so two ranks that send
        // to each other in one batch cannot wait on each other.
        for Immediate { operation } in operations {
            match operation {
                Operation::Send { buf, dest, tag }
                | Operation::SendTyped { buf, dest, tag, .. } => {
                    receipts.extend(self.post(
                        dest,
                        Channel::User(tag),
                        T::into_payload(buf.to_vec()),
                    ));
                }
                Operation::Receive { buf, source, tag } => incoming.push(Incoming {
                    buf,
                    source,
                    channel: Channel::User(tag),
                    expected: None,
                }),
                Operation::ReceiveTyped {
                    buf,
                    datatype,
                    source,
                    tag,
                } => incoming.push(Incoming {
                    buf,
                    source,
                    channel: Channel::User(tag),
                    expected: Some(datatype.count()),
                }),
                Operation::Broadcast { buf, root } => {
                    // The sequence number is consumed on every rank, root or not.
                    let channel = self.next_collective();

                    if root == self.rank {
                        for dest in self.peers() {
                            receipts.extend(self.post(
                                dest,
                                channel,
                                T::into_payload(buf.to_vec()),
                            ));
                        }
                    } else {
                        incoming.push(Incoming {
                            buf,
                            source: root,
                            channel,
                            expected: None,
                        });
                    }
                }
            }
        }

        let mut first_error = None;

        for receive in incoming {
            if let Err(error) = self.receive_incoming(receive) {
                first_error.get_or_insert(error);
            }
        }

        for receipt in receipts {
            if let Err(error) = self.redeem(receipt) {
                first_error.get_or_insert(error);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    fn barrier(&self) -> Result<()> {
        self.fabric.barrier()
    }

    fn broadcast_into<T: Element>(&self, buf: &mut [T], root: Rank) -> Result<()> {
        collective::broadcast_into(self, buf, root)
    }

    fn all_reduce_max(&self, value: f64) -> Result<f64> {
        collective::all_reduce_max(self, value)
    }

    fn pack_size<T: Element>(&self, count: usize) -> Result<usize> {
        pack::packed_size::<T>(count)
    }

    fn pack_into<T: Element>(
        &self,
        input: &[T],
        buffer: &mut [u8],
        position: &mut usize,
    ) -> Result<()> {
        pack::pack_into(input, buffer, position)
    }

    fn unpack_from<T: Element>(
        &self,
        buffer: &[u8],
        position: &mut usize,
        output: &mut [T],
    ) -> Result<()> {
        pack::unpack_from(buffer, position, output)
    }

    fn contiguous_type<T: Element>(&self, count: usize) -> Result<ContiguousType<T>> {
        Ok(datatype::contiguous_type(self, count))
    }

    fn create_window<T: Element>(&self, local: Vec<T>) -> Result<Window<'_, T>> {
        window::create_window(self, local)
    }
}

/// Copies a received payload into the front of `buf`, returning the number of elements copied.
pub(crate) fn copy_payload<T: Element>(payload: &Payload, buf: &mut [T]) -> Result<usize> {
    let values = T::payload_slice(payload).ok_or(Error::TypeMismatch {
        expected: T::NAME,
        actual: payload.kind(),
    })?;

    let capacity = buf.len();

    let target = buf.get_mut(..values.len()).ok_or(Error::Truncated {
        capacity,
        actual: values.len(),
    })?;

    target.copy_from_slice(values);
    Ok(values.len())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::num::NonZero;
    use std::thread;
    use std::time::{Duration, Instant};

    use static_assertions::{assert_impl_all, assert_not_impl_any};
    use testing::with_watchdog;

    use super::*;
    use crate::{TAG_UB, World};

    // Calls are funneled through the thread that owns the rank.
    assert_impl_all!(Comm: Send);
    assert_not_impl_any!(Comm: Sync);

    fn world(size: usize) -> World {
        World::new(NonZero::new(size).unwrap())
    }

    #[test]
    fn send_then_receive_into_larger_buffer() {
        with_watchdog(|| {
            let received = world(2).run(|comm| {
                let mut buf = [0_i32; 8];

                if comm.rank() == 0 {
                    comm.send(&[4, 5, 6], 1, 7).unwrap();
                    0
                } else {
                    let count = comm.receive_into(&mut buf, 0, 7).unwrap();
                    assert_eq!(&buf[..count], &[4, 5, 6]);
                    count
                }
            });

            assert_eq!(received[1], 3);
        });
    }

    #[test]
    fn receive_into_smaller_buffer_is_truncation() {
        with_watchdog(|| {
            world(2).run(|comm| {
                if comm.rank() == 0 {
                    comm.send(&[1_u8, 2, 3], 1, 0).unwrap();
                } else {
                    let mut buf = [0_u8; 2];
                    let result = comm.receive_into(&mut buf, 0, 0);

                    assert!(matches!(
                        result,
                        Err(Error::Truncated {
                            capacity: 2,
                            actual: 3
                        })
                    ));
                }
            });
        });
    }

    #[test]
    fn receive_of_wrong_element_type_is_mismatch() {
        with_watchdog(|| {
            world(2).run(|comm| {
                if comm.rank() == 0 {
                    comm.send(&[1.5_f64], 1, 0).unwrap();
                } else {
                    let result = comm.receive_vec::<i32>(0, 0);

                    assert!(matches!(
                        result,
                        Err(Error::TypeMismatch {
                            expected: "i32",
                            actual: "f64"
                        })
                    ));
                }
            });
        });
    }

    #[test]
    fn tags_separate_messages_from_same_source() {
        with_watchdog(|| {
            world(2).run(|comm| {
                if comm.rank() == 0 {
                    let mut batch = comm.batch();
                    batch.send(&[1], 1, 1).unwrap();
                    batch.send(&[2], 1, 2).unwrap();
                    batch.wait_all().unwrap();
                } else {
                    // Receive in the opposite order of sending.
                    assert_eq!(comm.receive_vec::<i32>(0, 2).unwrap(), vec![2]);
                    assert_eq!(comm.receive_vec::<i32>(0, 1).unwrap(), vec![1]);
                }
            });
        });
    }

    #[test]
    fn blocking_send_returns_once_received() {
        with_watchdog(|| {
            let delay = Duration::from_millis(100);

            let elapsed = world(2).run(|comm| {
                if comm.rank() == 0 {
                    let started = Instant::now();
                    comm.send(&[1], 1, 0).unwrap();
                    started.elapsed()
                } else {
                    thread::sleep(delay);
                    assert_eq!(comm.pending_messages(), 1);

                    comm.receive_vec::<i32>(0, 0).unwrap();
                    Duration::ZERO
                }
            });

            // Rank threads start at slightly different times.
            assert!(elapsed[0] >= delay / 2);
        });
    }

    #[test]
    fn batch_completes_sends_and_receives() {
        with_watchdog(|| {
            world(2).run(|comm| {
                let mut first = [0; 2];
                let mut second = [0; 1];

                // Both ranks send to each other in one batch.
                let peer = 1 - comm.rank();
                let outgoing = [10, 11];

                let mut batch = comm.batch();
                batch.send(&outgoing, peer, 0).unwrap();
                batch.send(&outgoing[..1], peer, 1).unwrap();
                batch.receive_into(&mut first, peer, 0).unwrap();
                batch.receive_into(&mut second, peer, 1).unwrap();
                batch.wait_all().unwrap();

                assert_eq!(first, [10, 11]);
                assert_eq!(second, [10]);
                assert_eq!(comm.pending_messages(), 0);
            });
        });
    }

    #[test]
    fn batch_reports_first_error_and_completes_the_rest() {
        with_watchdog(|| {
            world(2).run(|comm| {
                if comm.rank() == 0 {
                    let mut batch = comm.batch();
                    batch.send(&[1, 2, 3], 1, 0).unwrap();
                    batch.send(&[4], 1, 1).unwrap();
                    batch.wait_all().unwrap();
                } else {
                    let mut too_small = [0; 1];
                    let mut fits = [0; 1];

                    let mut batch = comm.batch();
                    batch.receive_into(&mut too_small, 0, 0).unwrap();
                    batch.receive_into(&mut fits, 0, 1).unwrap();

                    assert!(matches!(batch.wait_all(), Err(Error::Truncated { .. })));
                    assert_eq!(fits, [4]);
                }
            });
        });
    }

    #[test]
    fn invalid_arguments_are_rejected() {
        with_watchdog(|| {
            world(2).run(|comm| {
                assert!(matches!(
                    comm.send(&[1], 2, 0),
                    Err(Error::InvalidRank { rank: 2, size: 2 })
                ));
                assert!(matches!(
                    comm.send(&[1], 0, TAG_UB + 1),
                    Err(Error::InvalidTag { .. })
                ));
                assert!(matches!(
                    comm.receive_vec::<i32>(0, -1),
                    Err(Error::InvalidTag { tag: -1 })
                ));
            });
        });
    }

    #[test]
    fn send_to_self_is_buffered() {
        with_watchdog(|| {
            world(1).run(|comm| {
                comm.send(&[3, 2, 1], 0, TAG_UB).unwrap();
                assert_eq!(comm.pending_messages(), 1);

                assert_eq!(comm.receive_vec::<i32>(0, TAG_UB).unwrap(), vec![3, 2, 1]);
            });
        });
    }

    #[test]
    fn peers_exclude_own_rank() {
        with_watchdog(|| {
            let peers = world(3).run(|comm| comm.peers().collect::<Vec<_>>());

            assert_eq!(peers[0], vec![1, 2]);
            assert_eq!(peers[1], vec![0, 2]);
            assert_eq!(peers[2], vec![0, 1]);
        });
    }
}
