use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, SunnyFitError};

/// Byte order of a multi-byte integer on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Least significant byte first
    Little,
    /// Most significant byte first
    Big,
}

/// Fixed-width integer that can be packed into and unpacked from a byte buffer
pub trait FixedWidth: Sized + Copy {
    /// Encoded width in bytes
    const WIDTH: usize;

    /// Read one value, advancing the buffer by [`Self::WIDTH`] bytes.
    ///
    /// The caller guarantees `buf.remaining() >= Self::WIDTH`.
    fn get<B: Buf>(buf: &mut B, order: ByteOrder) -> Self;

    /// Append one value to the buffer
    fn put<B: BufMut>(self, buf: &mut B, order: ByteOrder);
}

macro_rules! fixed_width {
    ($ty:ty, $get_be:ident, $get_le:ident, $put_be:ident, $put_le:ident) => {
        impl FixedWidth for $ty {
            const WIDTH: usize = std::mem::size_of::<$ty>();

            fn get<B: Buf>(buf: &mut B, order: ByteOrder) -> Self {
                match order {
                    ByteOrder::Little => buf.$get_le(),
                    ByteOrder::Big => buf.$get_be(),
                }
            }

            fn put<B: BufMut>(self, buf: &mut B, order: ByteOrder) {
                match order {
                    ByteOrder::Little => buf.$put_le(self),
                    ByteOrder::Big => buf.$put_be(self),
                }
            }
        }
    };
}

fixed_width!(u8, get_u8, get_u8, put_u8, put_u8);
fixed_width!(i8, get_i8, get_i8, put_i8, put_i8);
fixed_width!(u16, get_u16, get_u16_le, put_u16, put_u16_le);
fixed_width!(i16, get_i16, get_i16_le, put_i16, put_i16_le);
fixed_width!(u32, get_u32, get_u32_le, put_u32, put_u32_le);
fixed_width!(i32, get_i32, get_i32_le, put_i32, put_i32_le);
fixed_width!(u64, get_u64, get_u64_le, put_u64, put_u64_le);
fixed_width!(i64, get_i64, get_i64_le, put_i64, put_i64_le);

fn check_len(data: &[u8], expected: usize) -> Result<()> {
    if data.len() < expected {
        return Err(SunnyFitError::InvalidLength {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

/// Decode the leading bytes of `data` as `T`
///
/// # Errors
///
/// Returns [`SunnyFitError::InvalidLength`] if `data` is shorter than `T::WIDTH`.
pub fn decode<T: FixedWidth>(data: &[u8], order: ByteOrder) -> Result<T> {
    check_len(data, T::WIDTH)?;
    let mut buf = &data[..T::WIDTH];
    Ok(T::get(&mut buf, order))
}

/// Decode a `T` located `offset` bytes into `data`
///
/// # Errors
///
/// Returns [`SunnyFitError::InvalidLength`] if the value would run past the end of `data`.
pub fn decode_at<T: FixedWidth>(data: &[u8], offset: usize, order: ByteOrder) -> Result<T> {
    check_len(data, offset + T::WIDTH)?;
    decode(&data[offset..], order)
}

/// Encode a value into a freshly allocated buffer of exactly `T::WIDTH` bytes
#[must_use]
pub fn encode<T: FixedWidth>(value: T, order: ByteOrder) -> Bytes {
    let mut buf = BytesMut::with_capacity(T::WIDTH);
    value.put(&mut buf, order);
    buf.freeze()
}

/// Decode an unsigned integer of arbitrary width (1 to 8 bytes), e.g. a 48-bit address
///
/// # Errors
///
/// Returns [`SunnyFitError::InvalidLength`] if `data` is shorter than `width`, or
/// [`SunnyFitError::ParseError`] if `width` is zero or wider than 8 bytes.
pub fn decode_uint(data: &[u8], width: usize, order: ByteOrder) -> Result<u64> {
    if width == 0 || width > 8 {
        return Err(SunnyFitError::ParseError(format!(
            "Unsupported integer width: {width}"
        )));
    }
    check_len(data, width)?;
    let mut buf = &data[..width];
    Ok(match order {
        ByteOrder::Little => buf.get_uint_le(width),
        ByteOrder::Big => buf.get_uint(width),
    })
}

/// Encode the low `width` bytes of `value`
///
/// # Errors
///
/// Returns [`SunnyFitError::ParseError`] if `width` is zero or wider than 8 bytes.
pub fn encode_uint(value: u64, width: usize, order: ByteOrder) -> Result<Bytes> {
    if width == 0 || width > 8 {
        return Err(SunnyFitError::ParseError(format!(
            "Unsupported integer width: {width}"
        )));
    }
    let mut buf = BytesMut::with_capacity(width);
    match order {
        ByteOrder::Little => buf.put_uint_le(value, width),
        ByteOrder::Big => buf.put_uint(value, width),
    }
    Ok(buf.freeze())
}
