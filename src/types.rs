//! Element types shared by the item store, header codec and UV engine.
//!
//! All on-disk numeric encodings are big-endian. Every typed codepath in the
//! crate is generic over the fixed set of element types below, so there is a
//! single byte-level implementation per operation, parameterized by element
//! width rather than dispatched on a runtime tag.

use crate::error::{MiriadError, Result};
use num_complex::Complex32;

/// On-disk type tags. The numeric codes are the legacy item-header codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum TypeTag {
    Byte = 1,
    Int32 = 2,
    Int16 = 3,
    Real32 = 4,
    Real64 = 5,
    Text = 6,
    Complex64 = 7,
    Int64 = 8,
}

impl TypeTag {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Result<Self> {
        Ok(match code {
            1 => TypeTag::Byte,
            2 => TypeTag::Int32,
            3 => TypeTag::Int16,
            4 => TypeTag::Real32,
            5 => TypeTag::Real64,
            6 => TypeTag::Text,
            7 => TypeTag::Complex64,
            8 => TypeTag::Int64,
            other => {
                return Err(MiriadError::fault(format!(
                    "unrecognized item type code {other}"
                )))
            }
        })
    }

    /// Width of one element in bytes. Text is byte-granular.
    pub fn width(self) -> usize {
        match self {
            TypeTag::Byte | TypeTag::Text => 1,
            TypeTag::Int16 => 2,
            TypeTag::Int32 | TypeTag::Real32 => 4,
            TypeTag::Real64 | TypeTag::Int64 => 8,
            TypeTag::Complex64 => 8,
        }
    }

    /// Natural alignment of the first data byte after the 4-byte item tag.
    /// Complex values align to their component width, not their full width.
    pub fn alignment(self) -> usize {
        match self {
            TypeTag::Byte | TypeTag::Text => 1,
            TypeTag::Int16 => 2,
            TypeTag::Int32 | TypeTag::Real32 | TypeTag::Complex64 => 4,
            TypeTag::Real64 | TypeTag::Int64 => 8,
        }
    }

    /// Human-readable type name, as reported by header probing.
    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Byte => "byte",
            TypeTag::Int32 => "integer",
            TypeTag::Int16 => "integer*2",
            TypeTag::Real32 => "real",
            TypeTag::Real64 => "double",
            TypeTag::Text => "text",
            TypeTag::Complex64 => "complex",
            TypeTag::Int64 => "integer*8",
        }
    }

    /// Single-character code used by the UV variable table.
    pub fn var_char(self) -> char {
        match self {
            TypeTag::Byte => 'b',
            TypeTag::Int32 => 'i',
            TypeTag::Int16 => 'j',
            TypeTag::Real32 => 'r',
            TypeTag::Real64 => 'd',
            TypeTag::Text => 'a',
            TypeTag::Complex64 => 'c',
            TypeTag::Int64 => 'l',
        }
    }

    pub fn from_var_char(ch: char) -> Result<Self> {
        Ok(match ch {
            'b' => TypeTag::Byte,
            'i' => TypeTag::Int32,
            'j' => TypeTag::Int16,
            'r' => TypeTag::Real32,
            'd' => TypeTag::Real64,
            'a' => TypeTag::Text,
            'c' => TypeTag::Complex64,
            'l' => TypeTag::Int64,
            other => {
                return Err(MiriadError::fault(format!(
                    "unrecognized variable type character {other:?}"
                )))
            }
        })
    }
}

mod private {
    pub trait Sealed {}
    impl Sealed for u8 {}
    impl Sealed for i16 {}
    impl Sealed for i32 {}
    impl Sealed for i64 {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
    impl Sealed for num_complex::Complex32 {}
}

/// One element of the fixed type set, with its big-endian wire form.
pub trait Element: private::Sealed + Copy + Default {
    const TAG: TypeTag;
    const WIDTH: usize;

    fn put(self, buf: &mut [u8]);
    fn get(buf: &[u8]) -> Self;
}

impl Element for u8 {
    const TAG: TypeTag = TypeTag::Byte;
    const WIDTH: usize = 1;

    fn put(self, buf: &mut [u8]) {
        buf[0] = self;
    }

    fn get(buf: &[u8]) -> Self {
        buf[0]
    }
}

impl Element for i16 {
    const TAG: TypeTag = TypeTag::Int16;
    const WIDTH: usize = 2;

    fn put(self, buf: &mut [u8]) {
        buf[..2].copy_from_slice(&self.to_be_bytes());
    }

    fn get(buf: &[u8]) -> Self {
        i16::from_be_bytes([buf[0], buf[1]])
    }
}

impl Element for i32 {
    const TAG: TypeTag = TypeTag::Int32;
    const WIDTH: usize = 4;

    fn put(self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.to_be_bytes());
    }

    fn get(buf: &[u8]) -> Self {
        i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
    }
}

impl Element for i64 {
    const TAG: TypeTag = TypeTag::Int64;
    const WIDTH: usize = 8;

    fn put(self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.to_be_bytes());
    }

    fn get(buf: &[u8]) -> Self {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&buf[..8]);
        i64::from_be_bytes(raw)
    }
}

impl Element for f32 {
    const TAG: TypeTag = TypeTag::Real32;
    const WIDTH: usize = 4;

    fn put(self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.to_be_bytes());
    }

    fn get(buf: &[u8]) -> Self {
        f32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
    }
}

impl Element for f64 {
    const TAG: TypeTag = TypeTag::Real64;
    const WIDTH: usize = 8;

    fn put(self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.to_be_bytes());
    }

    fn get(buf: &[u8]) -> Self {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&buf[..8]);
        f64::from_be_bytes(raw)
    }
}

impl Element for Complex32 {
    const TAG: TypeTag = TypeTag::Complex64;
    const WIDTH: usize = 8;

    fn put(self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.re.to_be_bytes());
        buf[4..8].copy_from_slice(&self.im.to_be_bytes());
    }

    fn get(buf: &[u8]) -> Self {
        Complex32::new(
            f32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            f32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        )
    }
}

/// Encode a slice of elements into freshly allocated big-endian bytes.
pub fn encode_slice<T: Element>(values: &[T]) -> Vec<u8> {
    let mut out = vec![0u8; values.len() * T::WIDTH];
    for (value, chunk) in values.iter().zip(out.chunks_exact_mut(T::WIDTH)) {
        value.put(chunk);
    }
    out
}

/// Decode big-endian bytes into elements. The byte length must be an exact
/// multiple of the element width.
pub fn decode_slice<T: Element>(bytes: &[u8]) -> Result<Vec<T>> {
    if bytes.len() % T::WIDTH != 0 {
        return Err(MiriadError::fault(format!(
            "{} byte run is not a whole number of {} elements",
            bytes.len(),
            T::TAG.name()
        )));
    }
    Ok(bytes.chunks_exact(T::WIDTH).map(T::get).collect())
}

/// Round `offset` up to the next multiple of `align`.
pub(crate) fn round_up(offset: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (offset + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_codes_round_trip() {
        for tag in [
            TypeTag::Byte,
            TypeTag::Int32,
            TypeTag::Int16,
            TypeTag::Real32,
            TypeTag::Real64,
            TypeTag::Text,
            TypeTag::Complex64,
            TypeTag::Int64,
        ] {
            assert_eq!(TypeTag::from_code(tag.code()).unwrap(), tag);
            assert_eq!(TypeTag::from_var_char(tag.var_char()).unwrap(), tag);
        }
        assert!(TypeTag::from_code(99).is_err());
    }

    #[test]
    fn test_big_endian_layout() {
        let mut buf = [0u8; 4];
        0x01020304i32.put(&mut buf);
        assert_eq!(buf, [1, 2, 3, 4]);

        let mut buf = [0u8; 8];
        1.0f64.put(&mut buf);
        assert_eq!(buf, [0x3f, 0xf0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_slice_codecs() {
        let values = [Complex32::new(1.0, -1.0), Complex32::new(0.5, 2.0)];
        let bytes = encode_slice(&values);
        assert_eq!(bytes.len(), 16);
        let back: Vec<Complex32> = decode_slice(&bytes).unwrap();
        assert_eq!(back, values);

        // Ragged byte runs are storage faults, not panics.
        assert!(decode_slice::<f64>(&bytes[..12]).is_err());
    }

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(4, 8), 8);
        assert_eq!(round_up(8, 8), 8);
        assert_eq!(round_up(5, 1), 5);
        assert_eq!(round_up(0, 4), 0);
    }
}
