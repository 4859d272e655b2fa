use crate::{Element, Error, Result};

/// Number of bytes that packing `count` values of `T` occupies.
pub(crate) fn packed_size<T: Element>(count: usize) -> Result<usize> {
    count
        .checked_mul(T::PACKED_SIZE)
        .ok_or(Error::CountOverflow { count })
}

/// Writes `input` little-endian at `position`, leaving `buffer` and `position` untouched if it
/// does not fit.
pub(crate) fn pack_into<T: Element>(
    input: &[T],
    buffer: &mut [u8],
    position: &mut usize,
) -> Result<()> {
    let needed = packed_size::<T>(input.len())?;
    let capacity = buffer.len();

    let target = position
        .checked_add(needed)
        .and_then(|end| buffer.get_mut(*position..end))
        .ok_or(Error::PackOverflow {
            position: *position,
            needed,
            capacity,
        })?;

    for (value, chunk) in input.iter().zip(target.chunks_exact_mut(T::PACKED_SIZE)) {
        value.write_packed(chunk);
    }

    *position = position.wrapping_add(needed);
    Ok(())
}

pub(crate) fn unpack_from<T: Element>(
    buffer: &[u8],
    position: &mut usize,
    output: &mut [T],
) -> Result<()> {
    let needed = packed_size::<T>(output.len())?;

    let source = position
        .checked_add(needed)
        .and_then(|end| buffer.get(*position..end))
        .ok_or(Error::PackOverflow {
            position: *position,
            needed,
            capacity: buffer.len(),
        })?;

    for (value, chunk) in output.iter_mut().zip(source.chunks_exact(T::PACKED_SIZE)) {
        *value = T::read_packed(chunk);
    }

    *position = position.wrapping_add(needed);
    Ok(())
}
