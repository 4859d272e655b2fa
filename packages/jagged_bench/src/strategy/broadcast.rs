use rank_comm::Communicator;

use super::{SOURCE_RANK, Transfer};
use crate::metadata::wire_len;
use crate::{JaggedArray, Result, TransferMetadata, WireMetadata};

#[derive(derive_more::Debug)]
pub(crate) struct BroadcastSource<'a, C: Communicator> {
    #[debug(ignore)]
    comm: &'a C,

    payload: JaggedArray,
    wire: WireMetadata,
}

impl<'a, C: Communicator> BroadcastSource<'a, C> {
    pub(crate) fn new(comm: &'a C, payload: JaggedArray) -> Result<Self> {
        let wire = payload.metadata().to_wire()?;

        Ok(Self {
            comm,
            payload,
            wire,
        })
    }
}

impl<C: Communicator> Transfer for BroadcastSource<'_, C> {
    fn execute(&mut self, iterations: u64) -> Result<()> {
        let comm = self.comm;

        for _ in 0..iterations {
            comm.broadcast_into(&mut self.wire.outer_size, SOURCE_RANK)?;
            comm.broadcast_into(&mut self.wire.inner_sizes, SOURCE_RANK)?;

            // All row broadcasts of this iteration complete before the next iteration posts more.
            let mut batch = comm.batch();

            for row in self.payload.rows_mut() {
                batch.broadcast_into(row, SOURCE_RANK)?;
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
pub(crate) struct BroadcastSink<'a, C: Communicator> {
    #[debug(ignore)]
    comm: &'a C,

    wire_sizes: Vec<i32>,
    received: JaggedArray,
}

impl<'a, C: Communicator> BroadcastSink<'a, C> {
    pub(crate) fn new(comm: &'a C) -> Self {
        Self {
            comm,
            wire_sizes: Vec::new(),
            received: JaggedArray::empty(),
        }
    }
}

impl<C: Communicator> Transfer for BroadcastSink<'_, C> {
    fn execute(&mut self, iterations: u64) -> Result<()> {
        let comm = self.comm;

        for _ in 0..iterations {
            let mut outer_size = [0_i32];
            comm.broadcast_into(&mut outer_size, SOURCE_RANK)?;

            let [outer_size] = outer_size;
            self.wire_sizes
                .resize(wire_len(outer_size, "row count")?, 0);
            comm.broadcast_into(&mut self.wire_sizes, SOURCE_RANK)?;

            let metadata = TransferMetadata::from_wire(outer_size, &self.wire_sizes)?;
            self.received.reshape(&metadata);

            let mut batch = comm.batch();

            for row in self.received.rows_mut() {
                batch.broadcast_into(row, SOURCE_RANK)?;
            }

            batch.wait_all()?;
        }

        Ok(())
    }

    fn received(&self) -> Option<&JaggedArray> {
        Some(&self.received)
    }
}
