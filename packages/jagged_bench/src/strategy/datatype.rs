use rank_comm::{Communicator, ContiguousRegion};

use super::{INNER_SIZES_TAG, OUTER_SIZE_TAG, SOURCE_RANK, Transfer, receive_metadata, row_tag};
use crate::{JaggedArray, Result, WireMetadata};

/// Creates and commits one contiguous type per row. The types are freed when the returned
/// vector is dropped.
fn row_types<C: Communicator>(
    comm: &C,
    rows: &[Vec<i32>],
) -> Result<Vec<C::CommittedRegion<i32>>> {
    rows.iter()
        .map(|row| Ok(comm.contiguous_type::<i32>(row.len())?.commit()?))
        .collect()
}

#[derive(derive_more::Debug)]
pub(crate) struct DatatypeSource<'a, C: Communicator> {
    #[debug(ignore)]
    comm: &'a C,

    payload: JaggedArray,
    wire: WireMetadata,
}

impl<'a, C: Communicator> DatatypeSource<'a, C> {
    pub(crate) fn new(comm: &'a C, payload: JaggedArray) -> Result<Self> {
        let wire = payload.metadata().to_wire()?;

        Ok(Self {
            comm,
            payload,
            wire,
        })
    }
}

impl<C: Communicator> Transfer for DatatypeSource<'_, C> {
    fn execute(&mut self, iterations: u64) -> Result<()> {
        let comm = self.comm;

        for _ in 0..iterations {
            // Outlive the batch, then are freed before the next iteration creates new ones.
            let row_types = row_types(comm, self.payload.rows())?;

            let mut batch = comm.batch();

            for dest in comm.peers() {
                batch.send(&self.wire.outer_size, dest, OUTER_SIZE_TAG)?;
                batch.send(&self.wire.inner_sizes, dest, INNER_SIZES_TAG)?;
            }

            for (index, (row, row_type)) in self.payload.rows().iter().zip(&row_types).enumerate()
            {
                let tag = row_tag(index)?;

                for dest in comm.peers() {
                    batch.send_typed(row, row_type, dest, tag)?;
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
pub(crate) struct DatatypeSink<'a, C: Communicator> {
    #[debug(ignore)]
    comm: &'a C,

    wire_sizes: Vec<i32>,
    received: JaggedArray,
}

impl<'a, C: Communicator> DatatypeSink<'a, C> {
    pub(crate) fn new(comm: &'a C) -> Self {
        Self {
            comm,
            wire_sizes: Vec::new(),
            received: JaggedArray::empty(),
        }
    }
}

impl<C: Communicator> Transfer for DatatypeSink<'_, C> {
    fn execute(&mut self, iterations: u64) -> Result<()> {
        let comm = self.comm;

        for _ in 0..iterations {
            let metadata = receive_metadata(comm, &mut self.wire_sizes)?;
            self.received.reshape(&metadata);

            let row_types = row_types(comm, self.received.rows())?;

            let mut batch = comm.batch();

            for (index, (row, row_type)) in
                self.received.rows_mut().iter_mut().zip(&row_types).enumerate()
            {
                batch.receive_typed_into(row, row_type, SOURCE_RANK, row_tag(index)?)?;
            }

            batch.wait_all()?;
        }

        Ok(())
    }

    fn received(&self) -> Option<&JaggedArray> {
        Some(&self.received)
    }
}
