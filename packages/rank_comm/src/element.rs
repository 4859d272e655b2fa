use crate::mailbox::Payload;

/// A primitive value type that can be carried in messages, packed into byte buffers and
/// exposed through one-sided windows.
///
/// This trait is sealed. It is implemented for `i32`, `u8` and `f64`.
pub trait Element: Copy + Default + PartialEq + Send + Sync + 'static + sealed::Sealed {}

impl Element for i32 {}
impl Element for u8 {}
impl Element for f64 {}

pub(crate) mod sealed {
    #[cfg(feature = "mpi")]
    use mpi::traits::Equivalence;

    use crate::mailbox::Payload;

    /// Element types that every enabled backend can put on the wire.
    #[cfg(feature = "mpi")]
    pub trait Native: Equivalence {}

    #[cfg(feature = "mpi")]
    impl<T: Equivalence> Native for T {}

    /// Element types that every enabled backend can put on the wire.
    #[cfg(not(feature = "mpi"))]
    pub trait Native {}

    #[cfg(not(feature = "mpi"))]
    impl<T> Native for T {}

    pub trait Sealed: Sized + Native {
        /// Human-readable name used in type mismatch errors.
        const NAME: &'static str;

        /// Number of bytes one value occupies in a packed buffer.
        const PACKED_SIZE: usize;

        fn into_payload(values: Vec<Self>) -> Payload;

        /// Hands the payload back if it carries a different element type.
        fn from_payload(payload: Payload) -> Result<Vec<Self>, Payload>;

        fn payload_slice(payload: &Payload) -> Option<&[Self]>;

        /// `out` is exactly `PACKED_SIZE` bytes long.
        fn write_packed(self, out: &mut [u8]);

        /// `bytes` is exactly `PACKED_SIZE` bytes long.
        fn read_packed(bytes: &[u8]) -> Self;
    }
}

macro_rules! impl_sealed_element {
    ($type:ty, $variant:ident, $name:literal) => {
        impl sealed::Sealed for $type {
            const NAME: &'static str = $name;
            const PACKED_SIZE: usize = size_of::<$type>();

            fn into_payload(values: Vec<Self>) -> Payload {
                Payload::$variant(values)
            }

            fn from_payload(payload: Payload) -> Result<Vec<Self>, Payload> {
                match payload {
                    Payload::$variant(values) => Ok(values),
                    other => Err(other),
                }
            }

            fn payload_slice(payload: &Payload) -> Option<&[Self]> {
                match payload {
                    Payload::$variant(values) => Some(values.as_slice()),
                    _ => None,
                }
            }

            fn write_packed(self, out: &mut [u8]) {
                out.copy_from_slice(&self.to_le_bytes());
            }

            fn read_packed(bytes: &[u8]) -> Self {
                let mut raw = [0_u8; size_of::<$type>()];
                raw.copy_from_slice(bytes);
                <$type>::from_le_bytes(raw)
            }
        }
    };
}

impl_sealed_element!(i32, Ints, "i32");
impl_sealed_element!(u8, Bytes, "u8");
impl_sealed_element!(f64, Floats, "f64");

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::sealed::Sealed;
    use super::*;

    #[test]
    fn packed_sizes_match_native_sizes() {
        assert_eq!(<i32 as Sealed>::PACKED_SIZE, 4);
        assert_eq!(<u8 as Sealed>::PACKED_SIZE, 1);
        assert_eq!(<f64 as Sealed>::PACKED_SIZE, 8);
    }

    #[test]
    fn packed_encoding_is_little_endian() {
        let mut out = [0_u8; 4];
        0x0102_0304_i32.write_packed(&mut out);

        assert_eq!(out, [0x04, 0x03, 0x02, 0x01]);
        assert_eq!(i32::read_packed(&out), 0x0102_0304);
    }

    #[test]
    fn payload_of_other_type_is_handed_back() {
        let payload = <i32 as Sealed>::into_payload(vec![1, 2]);

        assert!(<f64 as Sealed>::payload_slice(&payload).is_none());

        let payload = <u8 as Sealed>::from_payload(payload).unwrap_err();
        assert_eq!(<i32 as Sealed>::from_payload(payload).unwrap(), vec![1, 2]);
    }
}
