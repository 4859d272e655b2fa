use std::any::Any;
use std::sync::Arc;

use crate::communicator::sealed;
use crate::mailbox::Payload;
use crate::{Comm, Communicator, Element, Error, OneSidedWindow, RemoteRead, Result};

/// A group of memory segments, one per rank, that every rank can read from in collective
/// access epochs.
///
/// Segments are immutable once exposed, so reads inside an epoch always observe the values
/// every rank passed to [`Communicator::create_window()`].
#[derive(derive_more::Debug)]
pub struct Window<'c, T: Element> {
    #[debug(ignore)]
    comm: &'c Comm,

    #[debug(ignore)]
    segments: Box<[Arc<Vec<T>>]>,
}

impl<T: Element> sealed::Backend for Window<'_, T> {}

impl<T: Element> OneSidedWindow<T> for Window<'_, T> {
    fn epoch(&self, mut reads: Vec<RemoteRead<'_, T>>) -> Result<()> {
        let segment_lens = self
            .segments
            .iter()
            .map(|segment| segment.len())
            .collect::<Vec<_>>();

        for read in &reads {
            read.validate(&segment_lens)?;
        }

        // Opening fence.
        self.comm.barrier()?;

        for read in &mut reads {
            let source = self
                .segments
                .get(read.target)
                .and_then(|segment| {
                    let end = read.displacement.checked_add(read.buf.len())?;
                    segment.get(read.displacement..end)
                })
                .expect("reads are validated against every segment before the epoch opens");

            read.buf.copy_from_slice(source);
        }

        // Closing fence.
        self.comm.barrier()
    }
}

pub(crate) fn create_window<T: Element>(comm: &Comm, local: Vec<T>) -> Result<Window<'_, T>> {
    let channel = comm.next_collective();
    let own = Arc::new(local);

    for dest in comm.peers() {
        let shared: Arc<dyn Any + Send + Sync> = Arc::<Vec<T>>::clone(&own);
        comm.deliver(dest, channel, Payload::Segment(shared));
    }

    let mut segments = Vec::with_capacity(comm.size());

    for rank in 0..comm.size() {
        if rank == comm.rank() {
            segments.push(Arc::clone(&own));
            continue;
        }

        let segment = match comm.take(rank, channel)? {
            Payload::Segment(shared) => {
                shared
                    .downcast::<Vec<T>>()
                    .map_err(|_other_type| Error::TypeMismatch {
                        expected: T::NAME,
                        actual: "window segment of another element type",
                    })?
            }
            other => {
                return Err(Error::TypeMismatch {
                    expected: "window segment",
                    actual: other.kind(),
                });
            }
        };

        segments.push(segment);
    }

    tracing::trace!(rank = comm.rank(), "window created");

    Ok(Window {
        comm,
        segments: segments.into_boxed_slice(),
    })
}
