use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{
    Element, Error, Immediate, PackedInputArchive, PackedOutputArchive, Rank, RequestBatch,
    Result, TAG_UB, Tag,
};

/// One rank's handle to a group of communicating ranks.
///
/// This is the set of message-passing services that transfer strategies are built from. Two
/// backends implement it: [`Comm`][crate::Comm], which runs every rank as a thread of the
/// current process, and `MpiComm` (behind the `mpi` feature), which talks to the other
/// processes of an MPI job.
///
/// Blocking sends complete once the receiver has taken the message, so a rank can never run
/// ahead of its peers by more than the operations it has posted. Every rank must call the
/// collective operations in the same order.
///
/// This trait is sealed.
pub trait Communicator: sealed::Backend {
    /// A derived type describing consecutive values of `T` that is not yet committed.
    type Region<T: Element>: ContiguousRegion<Committed = Self::CommittedRegion<T>>;

    /// A committed derived type describing consecutive values of `T`.
    type CommittedRegion<T: Element>: CommittedRegion;

    /// A one-sided window through which every rank exposes a segment of `T`.
    type Window<'w, T: Element>: OneSidedWindow<T>
    where
        Self: 'w;

    /// The rank this communicator belongs to.
    fn rank(&self) -> Rank;

    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// Every rank of the group except this one, in ascending order.
    fn peers(&self) -> impl Iterator<Item = Rank> {
        let rank = self.rank();
        (0..self.size()).filter(move |&peer| peer != rank)
    }

    /// Sends the contents of `buf` to `dest` with `tag`, blocking until the receiver has
    /// taken the message.
    ///
    /// # Errors
    ///
    /// Returns an error if `dest` or `tag` is out of range or if the world is aborted.
    fn send<T: Element>(&self, buf: &[T], dest: Rank, tag: Tag) -> Result<()>;

    /// Receives a message from `source` with `tag` into the front of `buf`, blocking until it
    /// arrives, and returns the number of elements received.
    ///
    /// # Errors
    ///
    /// Returns an error if `source` or `tag` is out of range, if the message does not fit into
    /// `buf`, if it carries a different element type or if the world is aborted.
    fn receive_into<T: Element>(&self, buf: &mut [T], source: Rank, tag: Tag) -> Result<usize>;

    /// Receives a message from `source` with `tag` of whatever length it has.
    ///
    /// # Errors
    ///
    /// Returns an error if `source` or `tag` is out of range, if the message carries a different
    /// element type or if the world is aborted.
    fn receive_vec<T: Element>(&self, source: Rank, tag: Tag) -> Result<Vec<T>>;

    /// Starts a batch of immediate operations on buffers of `T`.
    ///
    /// The operations are posted together and completed together by
    /// [`RequestBatch::wait_all()`]. The buffers stay borrowed until then.
    fn batch<'b, T: Element>(&self) -> RequestBatch<'_, 'b, Self, T>
    where
        Self: Sized,
    {
        RequestBatch::new(self)
    }

    /// Posts every operation and blocks until all of them have completed.
    ///
    /// Use [`batch()`][Self::batch], which validates the operations, instead of calling this.
    #[doc(hidden)]
    fn complete_all<T: Element>(
        &self,
        operations: Vec<Immediate<'_, T, Self::CommittedRegion<T>>>,
    ) -> Result<()>;

    /// Blocks until every rank has entered the barrier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Aborted`] if the world is aborted while waiting.
    fn barrier(&self) -> Result<()>;

    /// Broadcasts `buf` from `root` to every other rank, blocking until the local part of the
    /// broadcast is complete.
    ///
    /// On `root`, `buf` is the data to send and the call returns once every peer has taken it.
    /// On every other rank, the received data is written into the front of `buf`.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` is out of range, if the received data does not fit into `buf`
    /// or if the world is aborted.
    fn broadcast_into<T: Element>(&self, buf: &mut [T], root: Rank) -> Result<()>;

    /// Combines `value` from every rank with the maximum function and returns the result on
    /// every rank.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Aborted`] if the world is aborted while waiting for other ranks.
    fn all_reduce_max(&self, value: f64) -> Result<f64>;

    /// Upper bound on the number of bytes that packing `count` values of `T` occupies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CountOverflow`] if `count` values cannot be packed in one buffer.
    fn pack_size<T: Element>(&self, count: usize) -> Result<usize>;

    /// Appends the values of `input` to `buffer` at `position` and advances `position` past
    /// the written bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PackOverflow`] if the values do not fit between `position` and the end
    /// of `buffer`. Nothing is written in that case.
    fn pack_into<T: Element>(&self, input: &[T], buffer: &mut [u8], position: &mut usize)
    -> Result<()>;

    /// Reads `output.len()` values from `buffer` at `position` and advances `position` past
    /// the consumed bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PackOverflow`] if `buffer` ends before all values are read.
    fn unpack_from<T: Element>(
        &self,
        buffer: &[u8],
        position: &mut usize,
        output: &mut [T],
    ) -> Result<()>;

    /// Creates a derived type that describes `count` consecutive values of `T`.
    ///
    /// The type has to be committed before it can be used. Dropping it frees it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CountOverflow`] if the backend cannot describe `count` values.
    fn contiguous_type<T: Element>(&self, count: usize) -> Result<Self::Region<T>>;

    /// Collectively creates a window in which this rank exposes `local`.
    ///
    /// Every rank must call this in the same collective order.
    ///
    /// # Errors
    ///
    /// Returns an error if the world is aborted or if ranks disagree on the element type.
    fn create_window<T: Element>(&self, local: Vec<T>) -> Result<Self::Window<'_, T>>;

    /// Sends an already serialized buffer to `dest` with `tag`. The receiver can read it with
    /// [`receive_object()`][Self::receive_object].
    ///
    /// # Errors
    ///
    /// Returns an error if `dest` or `tag` is out of range or if the world is aborted.
    fn send_bytes(&self, bytes: &[u8], dest: Rank, tag: Tag) -> Result<()> {
        self.send(bytes, dest, tag)
    }

    /// Serializes `value` and sends it to `dest` with `tag`.
    ///
    /// The serialization happens inside this call. Use [`send_bytes()`][Self::send_bytes] with
    /// a [`PackedOutputArchive`] to serialize ahead of time.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be serialized, if `dest` or `tag` is out of range or
    /// if the world is aborted.
    fn send_object<S: Serialize + ?Sized>(&self, value: &S, dest: Rank, tag: Tag) -> Result<()> {
        let mut archive = PackedOutputArchive::new();
        archive.write(value)?;
        self.send_bytes(archive.as_bytes(), dest, tag)
    }

    /// Receives a serialized object from `source` with `tag`, blocking until it arrives.
    ///
    /// # Errors
    ///
    /// Returns an error if the message is not a valid encoding of `D`, if `source` or `tag` is
    /// out of range or if the world is aborted.
    fn receive_object<D: DeserializeOwned>(&self, source: Rank, tag: Tag) -> Result<D> {
        let bytes = self.receive_vec::<u8>(source, tag)?;
        PackedInputArchive::new(&bytes).read()
    }
}

/// A derived type that is not yet usable for communication.
///
/// This trait is sealed.
pub trait ContiguousRegion: sealed::Backend {
    /// The committed form of the type.
    type Committed: CommittedRegion;

    /// Commits the type so it can be used with typed sends and receives.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the type.
    fn commit(self) -> Result<Self::Committed>;
}

/// A committed derived type that describes a fixed number of consecutive values.
///
/// This trait is sealed.
pub trait CommittedRegion: sealed::Backend {
    /// Number of values the type describes.
    fn count(&self) -> usize;
}

/// A group of memory segments, one per rank, that every rank can read with one-sided
/// operations.
///
/// This trait is sealed.
pub trait OneSidedWindow<T: Element>: sealed::Backend {
    /// Collectively runs one access epoch in which this rank performs `reads`.
    ///
    /// The epoch is opened and closed with a fence on every rank, so every read observes the
    /// segments as they were exposed and every buffer is filled when this returns. Ranks that
    /// only expose data pass no reads.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRank`] or [`Error::WindowRange`] before the epoch is opened if a
    /// read does not fit into its target segment, and [`Error::Aborted`] if the world is aborted
    /// while waiting for other ranks.
    fn epoch(&self, reads: Vec<RemoteRead<'_, T>>) -> Result<()>;
}

/// A one-sided read of `buf.len()` values starting at `displacement` in the segment exposed by
/// `target`.
#[derive(Debug)]
pub struct RemoteRead<'r, T> {
    pub(crate) target: Rank,
    pub(crate) displacement: usize,
    pub(crate) buf: &'r mut [T],
}

impl<'r, T: Element> RemoteRead<'r, T> {
    /// Describes a read from the segment of `target` into `buf`.
    pub fn new(target: Rank, displacement: usize, buf: &'r mut [T]) -> Self {
        Self {
            target,
            displacement,
            buf,
        }
    }

    /// Checks the read against the segment lengths exposed by every rank, indexed by rank.
    pub(crate) fn validate(&self, segment_lens: &[usize]) -> Result<()> {
        let segment_len = *segment_lens.get(self.target).ok_or(Error::InvalidRank {
            rank: self.target,
            size: segment_lens.len(),
        })?;

        let fits = self
            .displacement
            .checked_add(self.buf.len())
            .is_some_and(|end| end <= segment_len);

        if fits {
            Ok(())
        } else {
            Err(Error::WindowRange {
                target: self.target,
                displacement: self.displacement,
                len: self.buf.len(),
                segment_len,
            })
        }
    }
}

pub(crate) fn validate_rank(rank: Rank, size: usize) -> Result<()> {
    if rank < size {
        Ok(())
    } else {
        Err(Error::InvalidRank { rank, size })
    }
}

pub(crate) fn validate_tag(tag: Tag) -> Result<()> {
    if (0..=TAG_UB).contains(&tag) {
        Ok(())
    } else {
        Err(Error::InvalidTag { tag })
    }
}

pub(crate) mod sealed {
    pub trait Backend {}
}
