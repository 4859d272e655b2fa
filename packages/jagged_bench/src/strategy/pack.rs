use rank_comm::Communicator;

use super::{SOURCE_RANK, Transfer};
use crate::metadata::wire_len;
use crate::{Error, JaggedArray, Result, TransferMetadata, WireMetadata};

/// Sends the packed buffer of metadata and rows, which the sinks unpack in the same field order.
#[derive(derive_more::Debug)]
pub(crate) struct PackSource<'a, C: Communicator> {
    #[debug(ignore)]
    comm: &'a C,

    payload: JaggedArray,
    wire: WireMetadata,

    // Sized once from the per-field pack sizes, then reused with the position reset to zero.
    #[debug(ignore)]
    buffer: Vec<u8>,
}

impl<'a, C: Communicator> PackSource<'a, C> {
    pub(crate) fn new(comm: &'a C, payload: JaggedArray) -> Result<Self> {
        let wire = payload.metadata().to_wire()?;

        let outer_size = comm.pack_size::<i32>(wire.outer_size.len())?;
        let inner_sizes = comm.pack_size::<i32>(wire.inner_sizes.len())?;
        let values = comm.pack_size::<i32>(payload.total_elements())?;

        let packed_size = outer_size
            .checked_add(inner_sizes)
            .and_then(|size| size.checked_add(values))
            .ok_or_else(|| Error::InvalidMetadata {
                problem: "packed payload size overflows usize".to_string(),
            })?;

        Ok(Self {
            comm,
            payload,
            wire,
            buffer: vec![0; packed_size],
        })
    }
}

impl<C: Communicator> Transfer for PackSource<'_, C> {
    fn execute(&mut self, iterations: u64) -> Result<()> {
        let comm = self.comm;

        for _ in 0..iterations {
            let mut position = 0;

            comm.pack_into(&self.wire.outer_size, &mut self.buffer, &mut position)?;
            comm.pack_into(&self.wire.inner_sizes, &mut self.buffer, &mut position)?;

            for row in self.payload.rows() {
                comm.pack_into(row, &mut self.buffer, &mut position)?;
            }

            let mut packed_len = [i32::try_from(position).map_err(|_too_large| {
                Error::InvalidMetadata {
                    problem: format!("packed length {position} does not fit into a message integer"),
                }
            })?];

            comm.broadcast_into(&mut packed_len, SOURCE_RANK)?;

            let packed = self
                .buffer
                .get_mut(..position)
                .expect("position never exceeds the buffer it was advanced over");
            comm.broadcast_into(packed, SOURCE_RANK)?;
        }

        Ok(())
    }

    fn received(&self) -> Option<&JaggedArray> {
        None
    }
}

#[derive(derive_more::Debug)]
pub(crate) struct PackSink<'a, C: Communicator> {
    #[debug(ignore)]
    comm: &'a C,

    #[debug(ignore)]
    buffer: Vec<u8>,

    wire_sizes: Vec<i32>,
    received: JaggedArray,
}

impl<'a, C: Communicator> PackSink<'a, C> {
    pub(crate) fn new(comm: &'a C) -> Self {
        Self {
            comm,
            buffer: Vec::new(),
            wire_sizes: Vec::new(),
            received: JaggedArray::empty(),
        }
    }
}

impl<C: Communicator> Transfer for PackSink<'_, C> {
    fn execute(&mut self, iterations: u64) -> Result<()> {
        let comm = self.comm;

        for _ in 0..iterations {
            let mut packed_len = [0_i32];
            comm.broadcast_into(&mut packed_len, SOURCE_RANK)?;

            let [packed_len] = packed_len;
            self.buffer
                .resize(wire_len(packed_len, "packed length")?, 0);
            comm.broadcast_into(&mut self.buffer, SOURCE_RANK)?;

            let mut position = 0;

            let mut outer_size = [0_i32];
            comm.unpack_from(&self.buffer, &mut position, &mut outer_size)?;

            let [outer_size] = outer_size;
            self.wire_sizes
                .resize(wire_len(outer_size, "row count")?, 0);
            comm.unpack_from(&self.buffer, &mut position, &mut self.wire_sizes)?;

            let metadata = TransferMetadata::from_wire(outer_size, &self.wire_sizes)?;
            self.received.reshape(&metadata);

            for row in self.received.rows_mut() {
                comm.unpack_from(&self.buffer, &mut position, row)?;
            }
        }

        Ok(())
    }

    fn received(&self) -> Option<&JaggedArray> {
        Some(&self.received)
    }
}
