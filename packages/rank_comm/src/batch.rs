use crate::communicator::{validate_rank, validate_tag};
use crate::{CommittedRegion, Communicator, Element, Error, Rank, Result, Tag};

/// A group of immediate operations that are posted together and completed together.
///
/// Every buffer handed to the batch stays borrowed until [`wait_all()`][Self::wait_all]
/// returns. Arguments are validated when an operation is added, so a batch that reaches
/// `wait_all()` only fails because of what the peers send or because the world is aborted.
///
/// Broadcasts in a batch take part in the collective order of the communicator in the order
/// they were added.
#[derive(derive_more::Debug)]
#[must_use = "the operations of a batch only happen once it is waited on"]
pub struct RequestBatch<'c, 'b, C: Communicator, T: Element> {
    #[debug(ignore)]
    comm: &'c C,

    #[debug(ignore)]
    operations: Vec<Immediate<'b, T, C::CommittedRegion<T>>>,
}

impl<'c, 'b, C: Communicator, T: Element> RequestBatch<'c, 'b, C, T> {
    pub(crate) fn new(comm: &'c C) -> Self {
        Self {
            comm,
            operations: Vec::new(),
        }
    }

    /// Adds a send of `buf` to `dest` with `tag`.
    ///
    /// # Errors
    ///
    /// Returns an error if `dest` or `tag` is out of range.
    pub fn send(&mut self, buf: &'b [T], dest: Rank, tag: Tag) -> Result<()> {
        validate_rank(dest, self.comm.size())?;
        validate_tag(tag)?;

        self.push(Operation::Send { buf, dest, tag });
        Ok(())
    }

    /// Adds a receive of a message from `source` with `tag` into the front of `buf`.
    ///
    /// # Errors
    ///
    /// Returns an error if `source` or `tag` is out of range.
    pub fn receive_into(&mut self, buf: &'b mut [T], source: Rank, tag: Tag) -> Result<()> {
        validate_rank(source, self.comm.size())?;
        validate_tag(tag)?;

        self.push(Operation::Receive { buf, source, tag });
        Ok(())
    }

    /// Adds a broadcast of `buf` from `root`, like
    /// [`Communicator::broadcast_into()`] but completed with the rest of the batch.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` is out of range.
    pub fn broadcast_into(&mut self, buf: &'b mut [T], root: Rank) -> Result<()> {
        validate_rank(root, self.comm.size())?;

        self.push(Operation::Broadcast { buf, root });
        Ok(())
    }

    /// Adds a send of the region of `buf` described by `datatype` to `dest` with `tag`.
    ///
    /// # Errors
    ///
    /// Returns an error if the region does not fit into `buf` or if `dest` or `tag` is
    /// out of range.
    pub fn send_typed(
        &mut self,
        buf: &'b [T],
        datatype: &'b C::CommittedRegion<T>,
        dest: Rank,
        tag: Tag,
    ) -> Result<()> {
        validate_rank(dest, self.comm.size())?;
        validate_tag(tag)?;

        let region = buf.get(..datatype.count()).ok_or(Error::RegionExtent {
            extent: datatype.count(),
            len: buf.len(),
        })?;

        self.push(Operation::SendTyped {
            buf: region,
            datatype,
            dest,
            tag,
        });
        Ok(())
    }

    /// Adds a receive of a message from `source` with `tag` into the region of `buf` described
    /// by `datatype`.
    ///
    /// The message must carry exactly the number of values the region describes, otherwise
    /// [`wait_all()`][Self::wait_all] reports [`Error::CountMismatch`].
    ///
    /// # Errors
    ///
    /// Returns an error if the region does not fit into `buf` or if `source` or `tag` is
    /// out of range.
    pub fn receive_typed_into(
        &mut self,
        buf: &'b mut [T],
        datatype: &'b C::CommittedRegion<T>,
        source: Rank,
        tag: Tag,
    ) -> Result<()> {
        validate_rank(source, self.comm.size())?;
        validate_tag(tag)?;

        let len = buf.len();

        let region = buf.get_mut(..datatype.count()).ok_or(Error::RegionExtent {
            extent: datatype.count(),
            len,
        })?;

        self.push(Operation::ReceiveTyped {
            buf: region,
            datatype,
            source,
            tag,
        });
        Ok(())
    }

    /// Posts every operation of the batch and blocks until all of them have completed.
    ///
    /// # Errors
    ///
    /// Returns the first error reported by any of the operations, after every operation has
    /// been completed or the world has been aborted.
    pub fn wait_all(self) -> Result<()> {
        if self.operations.is_empty() {
            return Ok(());
        }

        self.comm.complete_all(self.operations)
    }

    fn push(&mut self, operation: Operation<'b, T, C::CommittedRegion<T>>) {
        self.operations.push(Immediate { operation });
    }
}

/// One validated operation of a [`RequestBatch`].
#[derive(Debug)]
pub struct Immediate<'b, T, R> {
    pub(crate) operation: Operation<'b, T, R>,
}

#[derive(Debug)]
pub(crate) enum Operation<'b, T, R> {
    Send {
        buf: &'b [T],
        dest: Rank,
        tag: Tag,
    },
    Receive {
        buf: &'b mut [T],
        source: Rank,
        tag: Tag,
    },
    Broadcast {
        buf: &'b mut [T],
        root: Rank,
    },
    SendTyped {
        buf: &'b [T],
        datatype: &'b R,
        dest: Rank,
        tag: Tag,
    },
    ReceiveTyped {
        buf: &'b mut [T],
        datatype: &'b R,
        source: Rank,
        tag: Tag,
    },
}
