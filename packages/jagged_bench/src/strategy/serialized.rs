use std::mem;

use rank_comm::{Communicator, PackedOutputArchive, Tag};

use super::{SOURCE_RANK, Transfer};
use crate::{JaggedArray, Result};

// The archive carries the shape itself, so one channel is enough.
const OBJECT_TAG: Tag = 0;

#[derive(derive_more::Debug)]
pub(crate) struct SerializedSource<'a, C: Communicator> {
    #[debug(ignore)]
    comm: &'a C,

    payload: JaggedArray,

    /// Serialize once per iteration and send the same bytes to every sink, separating the cost
    /// of serialization from the cost of transmission.
    prepacked: bool,

    #[debug(ignore)]
    buffer: Vec<u8>,
}

impl<'a, C: Communicator> SerializedSource<'a, C> {
    pub(crate) fn new(comm: &'a C, payload: JaggedArray, prepacked: bool) -> Self {
        Self {
            comm,
            payload,
            prepacked,
            buffer: Vec::new(),
        }
    }

    fn send_prepacked(&mut self) -> Result<()> {
        let mut archive = PackedOutputArchive::with_buffer(mem::take(&mut self.buffer));
        archive.write(&self.payload)?;

        for dest in self.comm.peers() {
            self.comm.send_bytes(archive.as_bytes(), dest, OBJECT_TAG)?;
        }

        self.buffer = archive.into_buffer();
        Ok(())
    }
}

impl<C: Communicator> Transfer for SerializedSource<'_, C> {
    fn execute(&mut self, iterations: u64) -> Result<()> {
        for _ in 0..iterations {
            if self.prepacked {
                self.send_prepacked()?;
            } else {
                for dest in self.comm.peers() {
                    self.comm.send_object(&self.payload, dest, OBJECT_TAG)?;
                }
            }
        }

        Ok(())
    }

    fn received(&self) -> Option<&JaggedArray> {
        None
    }
}

#[derive(derive_more::Debug)]
pub(crate) struct SerializedSink<'a, C: Communicator> {
    #[debug(ignore)]
    comm: &'a C,

    received: JaggedArray,
}

impl<'a, C: Communicator> SerializedSink<'a, C> {
    pub(crate) fn new(comm: &'a C) -> Self {
        Self {
            comm,
            received: JaggedArray::empty(),
        }
    }
}

impl<C: Communicator> Transfer for SerializedSink<'_, C> {
    fn execute(&mut self, iterations: u64) -> Result<()> {
        for _ in 0..iterations {
            self.received = self.comm.receive_object(SOURCE_RANK, OBJECT_TAG)?;
        }

        Ok(())
    }

    fn received(&self) -> Option<&JaggedArray> {
        Some(&self.received)
    }
}
