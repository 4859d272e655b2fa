use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::Result;

/// Serializes objects into a compact binary buffer.
///
/// The buffer can be reused across archives with [`with_buffer()`][Self::with_buffer] to avoid
/// reallocating it for every object.
#[derive(Clone, Debug, Default)]
pub struct PackedOutputArchive {
    buffer: Vec<u8>,
}

impl PackedOutputArchive {
    /// Creates an empty archive.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty archive that writes into the existing allocation of `buffer`.
    #[must_use]
    pub fn with_buffer(mut buffer: Vec<u8>) -> Self {
        buffer.clear();
        Self { buffer }
    }

    /// Appends `value` to the archive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`][crate::Error::Serialization] if `value` cannot be
    /// serialized.
    pub fn write<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        bincode::serialize_into(&mut self.buffer, value)?;
        Ok(())
    }

    /// The serialized bytes written so far.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Consumes the archive, returning the serialized bytes.
    #[must_use]
    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }
}

/// Deserializes objects from a buffer written by a [`PackedOutputArchive`], in the order they
/// were written.
#[derive(Clone, Debug)]
pub struct PackedInputArchive<'b> {
    remaining: &'b [u8],
}

impl<'b> PackedInputArchive<'b> {
    /// Creates an archive that reads from `bytes`.
    #[must_use]
    pub fn new(bytes: &'b [u8]) -> Self {
        Self { remaining: bytes }
    }

    /// Reads the next object from the archive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`][crate::Error::Serialization] if the remaining bytes do
    /// not start with a valid encoding of `T`.
    pub fn read<T: DeserializeOwned>(&mut self) -> Result<T> {
        Ok(bincode::deserialize_from(&mut self.remaining)?)
    }
}
