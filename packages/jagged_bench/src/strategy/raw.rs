use rank_comm::Communicator;

use super::{INNER_SIZES_TAG, OUTER_SIZE_TAG, SOURCE_RANK, Transfer, receive_metadata, row_tag};
use crate::{JaggedArray, Result, WireMetadata};

#[derive(derive_more::Debug)]
pub(crate) struct RawSource<'a, C: Communicator> {
    #[debug(ignore)]
    comm: &'a C,

    payload: JaggedArray,
    wire: WireMetadata,
}

impl<'a, C: Communicator> RawSource<'a, C> {
    pub(crate) fn new(comm: &'a C, payload: JaggedArray) -> Result<Self> {
        let wire = payload.metadata().to_wire()?;

        Ok(Self {
            comm,
            payload,
            wire,
        })
    }
}

impl<C: Communicator> Transfer for RawSource<'_, C> {
    fn execute(&mut self, iterations: u64) -> Result<()> {
        for _ in 0..iterations {
            let mut batch = self.comm.batch();

            for dest in self.comm.peers() {
                batch.send(&self.wire.outer_size, dest, OUTER_SIZE_TAG)?;
                batch.send(&self.wire.inner_sizes, dest, INNER_SIZES_TAG)?;

                for (index, row) in self.payload.rows().iter().enumerate() {
                    batch.send(row, dest, row_tag(index)?)?;
                }
            }

            batch.wait_all()?;
        }

        Ok(())
    }

    fn received(&self) -> Option<&JaggedArray> {
        None
    }
}

#[derive(derive_more::Debug)]
pub(crate) struct RawSink<'a, C: Communicator> {
    #[debug(ignore)]
    comm: &'a C,

    wire_sizes: Vec<i32>,
    received: JaggedArray,
}

impl<'a, C: Communicator> RawSink<'a, C> {
    pub(crate) fn new(comm: &'a C) -> Self {
        Self {
            comm,
            wire_sizes: Vec::new(),
            received: JaggedArray::empty(),
        }
    }
}

impl<C: Communicator> Transfer for RawSink<'_, C> {
    fn execute(&mut self, iterations: u64) -> Result<()> {
        let comm = self.comm;

        for _ in 0..iterations {
            let metadata = receive_metadata(comm, &mut self.wire_sizes)?;
            self.received.reshape(&metadata);

            let mut batch = comm.batch();

            for (index, row) in self.received.rows_mut().iter_mut().enumerate() {
                batch.receive_into(row, SOURCE_RANK, row_tag(index)?)?;
            }

            batch.wait_all()?;
        }

        Ok(())
    }

    fn received(&self) -> Option<&JaggedArray> {
        Some(&self.received)
    }
}
