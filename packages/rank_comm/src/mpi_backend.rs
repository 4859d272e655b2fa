use std::ffi::c_int;
use std::marker::PhantomData;
use std::mem::MaybeUninit;

use mpi::collective::{CommunicatorCollectives as _, Root as _, SystemOperation};
use mpi::datatype::{MutView, UncommittedUserDatatype, UserDatatype, View};
use mpi::environment::Universe;
use mpi::point_to_point::{Destination as _, Source as _, Status};
use mpi::raw::AsRaw as _;
use mpi::topology::{Communicator as _, SimpleCommunicator};
use mpi::{Count, ffi, request};

use crate::batch::Operation;
use crate::communicator::{sealed, validate_rank, validate_tag};
use crate::{
    CommittedRegion, Communicator, ContiguousRegion, Element, Error, Immediate, OneSidedWindow,
    Rank, RemoteRead, Result, Tag,
};

/// The MPI standard fixes the success code at zero.
const MPI_SUCCESS: c_int = 0;

/// The MPI runtime of the current process.
///
/// MPI can only be initialized once per process, so create this once, near the start of
/// `main()`. The runtime is finalized when this is dropped.
#[derive(derive_more::Debug)]
pub struct MpiWorld {
    #[debug(ignore)]
    universe: Universe,
}

impl MpiWorld {
    /// Initializes the MPI runtime of the current process.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MpiInitialization`] if the runtime cannot be initialized, including when
    /// it already was.
    pub fn initialize() -> Result<Self> {
        let universe = mpi::initialize().ok_or(Error::MpiInitialization)?;

        tracing::debug!(size = universe.world().size(), "MPI runtime initialized");

        Ok(Self { universe })
    }

    /// The communicator that spans every process of the MPI job.
    #[must_use]
    pub fn comm(&self) -> MpiComm<'_> {
        MpiComm::new(self.universe.world())
    }
}

/// One process's handle to the ranks of an MPI job.
#[derive(derive_more::Debug)]
pub struct MpiComm<'u> {
    #[debug(ignore)]
    world: SimpleCommunicator,

    rank: Rank,
    size: usize,

    _universe: PhantomData<&'u Universe>,
}

impl MpiComm<'_> {
    fn new(world: SimpleCommunicator) -> Self {
        let rank = usize::try_from(world.rank()).expect("MPI ranks are never negative");
        let size = usize::try_from(world.size()).expect("MPI worlds have at least one rank");

        Self {
            world,
            rank,
            size,
            _universe: PhantomData,
        }
    }

    /// Terminates every process of the MPI job.
    pub fn abort_world(&self) -> ! {
        tracing::warn!(rank = self.rank, "rank failed, aborting MPI job");
        self.world.abort(1)
    }

    fn process_rank(&self, rank: Rank) -> Result<mpi::Rank> {
        validate_rank(rank, self.size)?;

        mpi::Rank::try_from(rank).map_err(|_too_large| Error::InvalidRank {
            rank,
            size: self.size,
        })
    }
}

fn count_of(len: usize) -> Result<Count> {
    Count::try_from(len).map_err(|_too_large| Error::CountOverflow { count: len })
}

/// Number of values of `T` a completed receive carried, if it carried whole values.
fn received_count<T: Element>(status: &Status) -> Option<usize> {
    usize::try_from(status.count(T::equivalent_datatype())).ok()
}

fn check(code: c_int, operation: &'static str) -> Result<()> {
    if code == MPI_SUCCESS {
        Ok(())
    } else {
        Err(Error::MpiCall { operation, code })
    }
}

impl sealed::Backend for MpiComm<'_> {}

impl Communicator for MpiComm<'_> {
    type Region<T: Element> = MpiContiguousType<T>;
    type CommittedRegion<T: Element> = MpiCommittedType<T>;
    type Window<'w, T: Element>
        = MpiWindow<'w, T>
    where
        Self: 'w;

    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send<T: Element>(&self, buf: &[T], dest: Rank, tag: Tag) -> Result<()> {
        let dest = self.process_rank(dest)?;
        validate_tag(tag)?;
        count_of(buf.len())?;

        self.world
            .process_at_rank(dest)
            .synchronous_send_with_tag(buf, tag);
        Ok(())
    }

    fn receive_into<T: Element>(&self, buf: &mut [T], source: Rank, tag: Tag) -> Result<usize> {
        let source = self.process_rank(source)?;
        validate_tag(tag)?;

        let (message, status) = self
            .world
            .process_at_rank(source)
            .matched_probe_with_tag(tag);

        let Some(actual) = received_count::<T>(&status) else {
            drop(message.matched_receive_vec::<u8>());

            return Err(Error::TypeMismatch {
                expected: T::NAME,
                actual: "a message that is not a whole number of values",
            });
        };

        let capacity = buf.len();

        match buf.get_mut(..actual) {
            Some(target) => {
                message.matched_receive_into(target);
                Ok(actual)
            }
            None => {
                // The matched message must be consumed even though it is discarded.
                drop(message.matched_receive_vec::<T>());
                Err(Error::Truncated { capacity, actual })
            }
        }
    }

    fn receive_vec<T: Element>(&self, source: Rank, tag: Tag) -> Result<Vec<T>> {
        let source = self.process_rank(source)?;
        validate_tag(tag)?;

        let (values, _status) = self
            .world
            .process_at_rank(source)
            .receive_vec_with_tag::<T>(tag);

        Ok(values)
    }

    fn complete_all<T: Element>(
        &self,
        operations: Vec<Immediate<'_, T, MpiCommittedType<T>>>,
    ) -> Result<()> {
        let mut sends = Vec::new();
        let mut typed_sends = Vec::new();
        let mut receives = Vec::new();
        let mut typed_receives = Vec::new();
        let mut expected_counts = Vec::new();
        let mut broadcasts = Vec::new();

        for Immediate { operation } in operations {
            match operation {
                Operation::Send { buf, dest, tag } => {
                    sends.push((buf, self.process_rank(dest)?, tag));
                }
                Operation::Receive { buf, source, tag } => {
                    receives.push((buf, self.process_rank(source)?, tag));
                }
                Operation::Broadcast { buf, root } => {
                    broadcasts.push((buf, self.process_rank(root)?));
                }
                Operation::SendTyped {
                    buf,
                    datatype,
                    dest,
                    tag,
                } => {
                    // SAFETY: The batch cut `buf` to exactly the values one instance of the
                    // committed contiguous type describes.
                    let view = unsafe { View::with_count_and_datatype(buf, 1, &datatype.datatype) };
                    typed_sends.push((view, self.process_rank(dest)?, tag));
                }
                Operation::ReceiveTyped {
                    buf,
                    datatype,
                    source,
                    tag,
                } => {
                    expected_counts.push(datatype.count);

                    // SAFETY: The batch cut `buf` to exactly the values one instance of the
                    // committed contiguous type describes.
                    let view =
                        unsafe { MutView::with_count_and_datatype(buf, 1, &datatype.datatype) };
                    typed_receives.push((view, self.process_rank(source)?, tag));
                }
            }
        }

        let first_error = request::scope(|scope| {
            let send_requests = sends
                .iter()
                .map(|&(buf, dest, tag)| {
                    self.world
                        .process_at_rank(dest)
                        .immediate_synchronous_send_with_tag(scope, buf, tag)
                })
                .collect::<Vec<_>>();

            let typed_send_requests = typed_sends
                .iter()
                .map(|(view, dest, tag)| {
                    self.world
                        .process_at_rank(*dest)
                        .immediate_synchronous_send_with_tag(scope, view, *tag)
                })
                .collect::<Vec<_>>();

            let receive_requests = receives
                .iter_mut()
                .map(|(buf, source, tag)| {
                    self.world
                        .process_at_rank(*source)
                        .immediate_receive_into_with_tag(scope, &mut **buf, *tag)
                })
                .collect::<Vec<_>>();

            let typed_receive_requests = typed_receives
                .iter_mut()
                .map(|(view, source, tag)| {
                    self.world
                        .process_at_rank(*source)
                        .immediate_receive_into_with_tag(scope, view, *tag)
                })
                .collect::<Vec<_>>();

            // Nonblocking collectives are matched in the order they are started.
            let broadcast_requests = broadcasts
                .iter_mut()
                .map(|(buf, root)| {
                    self.world
                        .process_at_rank(*root)
                        .immediate_broadcast_into(scope, &mut **buf)
                })
                .collect::<Vec<_>>();

            let mut first_error = None;

            for request in send_requests {
                request.wait();
            }

            for request in typed_send_requests {
                request.wait();
            }

            for request in receive_requests {
                request.wait();
            }

            for (request, &expected) in typed_receive_requests.into_iter().zip(&expected_counts) {
                let status = request.wait();
                let actual = received_count::<T>(&status).unwrap_or_default();

                if actual != expected {
                    first_error.get_or_insert(Error::CountMismatch { expected, actual });
                }
            }

            for request in broadcast_requests {
                request.wait();
            }

            first_error
        });

        first_error.map_or(Ok(()), Err)
    }

    fn barrier(&self) -> Result<()> {
        self.world.barrier();
        Ok(())
    }

    fn broadcast_into<T: Element>(&self, buf: &mut [T], root: Rank) -> Result<()> {
        let root = self.process_rank(root)?;
        count_of(buf.len())?;

        self.world.process_at_rank(root).broadcast_into(buf);
        Ok(())
    }

    fn all_reduce_max(&self, value: f64) -> Result<f64> {
        let mut max = value;
        self.world
            .all_reduce_into(&value, &mut max, SystemOperation::max());
        Ok(max)
    }

    fn pack_size<T: Element>(&self, count: usize) -> Result<usize> {
        let size = self
            .world
            .pack_size(count_of(count)?, &T::equivalent_datatype());

        usize::try_from(size).map_err(|_negative| Error::CountOverflow { count })
    }

    fn pack_into<T: Element>(
        &self,
        input: &[T],
        buffer: &mut [u8],
        position: &mut usize,
    ) -> Result<()> {
        let needed = self.pack_size::<T>(input.len())?;
        check_pack_bounds(*position, needed, buffer.len())?;

        let end = self.world.pack_into(input, buffer, count_of(*position)?);

        *position = usize::try_from(end).map_err(|_negative| Error::CountOverflow { count: 0 })?;
        Ok(())
    }

    fn unpack_from<T: Element>(
        &self,
        buffer: &[u8],
        position: &mut usize,
        output: &mut [T],
    ) -> Result<()> {
        let needed = self.pack_size::<T>(output.len())?;
        check_pack_bounds(*position, needed, buffer.len())?;

        // SAFETY: Every bit pattern is a valid value of the element types, and the bounds of
        // both buffers were checked above.
        let end = unsafe {
            self.world
                .unpack_into(buffer, output, count_of(*position)?)
        };

        *position = usize::try_from(end).map_err(|_negative| Error::CountOverflow { count: 0 })?;
        Ok(())
    }

    fn contiguous_type<T: Element>(&self, count: usize) -> Result<MpiContiguousType<T>> {
        let datatype =
            UncommittedUserDatatype::contiguous(count_of(count)?, &T::equivalent_datatype());

        Ok(MpiContiguousType {
            datatype,
            count,
            _element: PhantomData,
        })
    }

    fn create_window<T: Element>(&self, mut local: Vec<T>) -> Result<MpiWindow<'_, T>> {
        let own_len = u64::try_from(local.len()).map_err(|_too_large| Error::CountOverflow {
            count: local.len(),
        })?;

        let mut gathered = vec![0_u64; self.size];
        self.world.all_gather_into(&own_len, &mut gathered[..]);

        let segment_lens = gathered
            .into_iter()
            .map(|len| usize::try_from(len).map_err(|_too_large| Error::CountOverflow { count: 0 }))
            .collect::<Result<Box<[usize]>>>()?;

        let bytes = local
            .len()
            .checked_mul(size_of::<T>())
            .and_then(|bytes| ffi::MPI_Aint::try_from(bytes).ok())
            .ok_or(Error::CountOverflow { count: local.len() })?;

        let displacement_unit =
            c_int::try_from(size_of::<T>()).expect("element types are a few bytes wide");

        // SAFETY: Reading a handle constant exported by the MPI bindings.
        let info = unsafe { ffi::RSMPI_INFO_NULL };

        let mut raw = MaybeUninit::<ffi::MPI_Win>::uninit();

        // SAFETY: The base pointer and size describe exactly the allocation of `local`, which
        // the window keeps alive and never touches until the MPI window has been freed.
        let code = unsafe {
            ffi::MPI_Win_create(
                local.as_mut_ptr().cast(),
                bytes,
                displacement_unit,
                info,
                self.world.as_raw(),
                raw.as_mut_ptr(),
            )
        };
        check(code, "MPI_Win_create")?;

        // SAFETY: MPI_Win_create succeeded, so it has written the window handle.
        let raw = unsafe { raw.assume_init() };

        tracing::trace!(rank = self.rank, "window created");

        Ok(MpiWindow {
            raw,
            segment_lens,
            _exposed: local,
            _comm: PhantomData,
        })
    }
}

fn check_pack_bounds(position: usize, needed: usize, capacity: usize) -> Result<()> {
    if position.checked_add(needed).is_some_and(|end| end <= capacity) {
        Ok(())
    } else {
        Err(Error::PackOverflow {
            position,
            needed,
            capacity,
        })
    }
}

/// A contiguous MPI derived type that is not yet committed.
#[derive(derive_more::Debug)]
#[must_use]
pub struct MpiContiguousType<T: Element> {
    #[debug(ignore)]
    datatype: UncommittedUserDatatype,

    count: usize,
    _element: PhantomData<T>,
}

impl<T: Element> sealed::Backend for MpiContiguousType<T> {}

impl<T: Element> ContiguousRegion for MpiContiguousType<T> {
    type Committed = MpiCommittedType<T>;

    fn commit(self) -> Result<MpiCommittedType<T>> {
        Ok(MpiCommittedType {
            datatype: self.datatype.commit(),
            count: self.count,
            _element: PhantomData,
        })
    }
}

/// A committed contiguous MPI derived type. The type is freed when dropped.
#[derive(derive_more::Debug)]
#[must_use]
pub struct MpiCommittedType<T: Element> {
    #[debug(ignore)]
    datatype: UserDatatype,

    count: usize,
    _element: PhantomData<T>,
}

impl<T: Element> sealed::Backend for MpiCommittedType<T> {}

impl<T: Element> CommittedRegion for MpiCommittedType<T> {
    fn count(&self) -> usize {
        self.count
    }
}

/// An MPI window over segments of `T`, synchronized with fences.
///
/// Freeing the window is collective, so every rank must drop its window at the same point of
/// the collective order.
#[derive(derive_more::Debug)]
pub struct MpiWindow<'c, T: Element> {
    #[debug(ignore)]
    raw: ffi::MPI_Win,

    segment_lens: Box<[usize]>,

    // Exposed to the other ranks through `raw`.
    #[debug(ignore)]
    _exposed: Vec<T>,

    _comm: PhantomData<&'c ()>,
}

/// One validated read of an access epoch, in MPI units.
struct RemoteGet {
    target: c_int,
    displacement: ffi::MPI_Aint,
    count: Count,
}

impl<T: Element> MpiWindow<'_, T> {
    fn fence(&self) -> Result<()> {
        // SAFETY: `raw` is a live window created by MPI_Win_create.
        let code = unsafe { ffi::MPI_Win_fence(0, self.raw) };
        check(code, "MPI_Win_fence")
    }
}

impl<T: Element> sealed::Backend for MpiWindow<'_, T> {}

impl<T: Element> OneSidedWindow<T> for MpiWindow<'_, T> {
    fn epoch(&self, mut reads: Vec<RemoteRead<'_, T>>) -> Result<()> {
        let gets = reads
            .iter()
            .map(|read| {
                read.validate(&self.segment_lens)?;

                Ok(RemoteGet {
                    target: c_int::try_from(read.target).map_err(|_too_large| {
                        Error::InvalidRank {
                            rank: read.target,
                            size: self.segment_lens.len(),
                        }
                    })?,
                    displacement: ffi::MPI_Aint::try_from(read.displacement).map_err(
                        |_too_large| Error::CountOverflow {
                            count: read.displacement,
                        },
                    )?,
                    count: count_of(read.buf.len())?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.fence()?;

        let datatype = T::equivalent_datatype().as_raw();
        let mut first_error = None;

        for (read, get) in reads.iter_mut().zip(&gets) {
            // SAFETY: The read was validated against the target segment, and `read.buf` holds
            // `get.count` values of `T` and stays borrowed until the closing fence below has
            // completed the transfer.
            let code = unsafe {
                ffi::MPI_Get(
                    read.buf.as_mut_ptr().cast(),
                    get.count,
                    datatype,
                    get.target,
                    get.displacement,
                    get.count,
                    datatype,
                    self.raw,
                )
            };

            if let Err(error) = check(code, "MPI_Get") {
                first_error.get_or_insert(error);
            }
        }

        let closed = self.fence();
        first_error.map_or(closed, Err)
    }
}

impl<T: Element> Drop for MpiWindow<'_, T> {
    fn drop(&mut self) {
        // SAFETY: `raw` was created by MPI_Win_create and is freed exactly once, here.
        let code = unsafe { ffi::MPI_Win_free(&raw mut self.raw) };

        if code != MPI_SUCCESS {
            tracing::warn!(code, "freeing an MPI window failed");
        }
    }
}
