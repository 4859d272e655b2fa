use rank_comm::{Communicator, OneSidedWindow, RemoteRead};

use super::{SOURCE_RANK, Transfer, receive_metadata, send_metadata};
use crate::{JaggedArray, Result, WireMetadata};

/// Exposes the flattened payload through a window created once, outside the measured work.
#[derive(derive_more::Debug)]
pub(crate) struct OneSidedSource<'a, C: Communicator + 'a> {
    #[debug(ignore)]
    comm: &'a C,

    wire: WireMetadata,

    #[debug(ignore)]
    window: C::Window<'a, i32>,
}

impl<'a, C: Communicator> OneSidedSource<'a, C> {
    pub(crate) fn new(comm: &'a C, payload: &JaggedArray) -> Result<Self> {
        let wire = payload.metadata().to_wire()?;
        let window = comm.create_window(payload.flatten())?;

        Ok(Self { comm, wire, window })
    }
}

impl<C: Communicator> Transfer for OneSidedSource<'_, C> {
    fn execute(&mut self, iterations: u64) -> Result<()> {
        for _ in 0..iterations {
            for dest in self.comm.peers() {
                send_metadata(self.comm, &self.wire, dest)?;
            }

            // The source reads nothing but takes part in every epoch its sinks read in.
            self.window.epoch(Vec::new())?;
        }

        Ok(())
    }

    fn received(&self) -> Option<&JaggedArray> {
        None
    }
}

#[derive(derive_more::Debug)]
pub(crate) struct OneSidedSink<'a, C: Communicator + 'a> {
    #[debug(ignore)]
    comm: &'a C,

    #[debug(ignore)]
    window: C::Window<'a, i32>,

    wire_sizes: Vec<i32>,
    flat: Vec<i32>,
    received: JaggedArray,
}

impl<'a, C: Communicator> OneSidedSink<'a, C> {
    pub(crate) fn new(comm: &'a C) -> Result<Self> {
        // Sinks expose nothing, they only read from the source.
        let window = comm.create_window(Vec::new())?;

        Ok(Self {
            comm,
            window,
            wire_sizes: Vec::new(),
            flat: Vec::new(),
            received: JaggedArray::empty(),
        })
    }
}

impl<C: Communicator> Transfer for OneSidedSink<'_, C> {
    fn execute(&mut self, iterations: u64) -> Result<()> {
        for _ in 0..iterations {
            let metadata = receive_metadata(self.comm, &mut self.wire_sizes)?;
            self.received.reshape(&metadata);
            self.flat.resize(metadata.total_elements(), 0);

            self.window
                .epoch(vec![RemoteRead::new(SOURCE_RANK, 0, &mut self.flat)])?;

            self.received.fill_from_flat(&self.flat);
        }

        Ok(())
    }

    fn received(&self) -> Option<&JaggedArray> {
        Some(&self.received)
    }
}
