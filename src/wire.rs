//! Field encodings for message bodies.
//!
//! Bodies are a plain concatenation of fields:
//!
//! - fixed-width integers are little-endian;
//! - `bool` is one byte, `0` or `1`;
//! - byte strings, strings and lists carry a little-endian `u32` length (or
//!   element count) followed by their contents;
//! - fixed-size byte arrays are written raw.
//!
//! A field that should not travel on the wire is simply left out of
//! [`crate::Serializer::encode`] and rebuilt from `Default` on decode.

use bincode::{Decode, Encode, config};
use bytes::{BufMut, Bytes, BytesMut};

use crate::message::{DecodeError, EncodeError};

/// Size of the length prefix carried by variable-length fields.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Most bytes a [`Bincoded`] decode may claim for nested collections.
///
/// Bincode reserves a collection's declared length up front, so the limit
/// keeps a hostile length from requesting an allocation the process cannot
/// survive.
pub const MAX_BINCODED_LEN: usize = 32 * 1024 * 1024;

/// Cursor over an encoded body.
#[derive(Debug)]
pub struct WireReader<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Start reading at the beginning of `src`.
    #[must_use]
    pub fn new(src: &'a [u8]) -> Self { Self { src, pos: 0 } }

    /// Bytes consumed so far.
    #[must_use]
    pub fn consumed(&self) -> usize { self.pos }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize { self.src.len() - self.pos }

    /// Decode the next field.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the field is truncated or invalid.
    pub fn read<T: WireField>(&mut self) -> Result<T, DecodeError> { T::read_wire(self) }

    /// Take the next `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnexpectedEnd`] when fewer than `len` bytes remain.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let available = self.remaining();
        if len > available {
            return Err(DecodeError::UnexpectedEnd {
                needed: len,
                available,
            });
        }
        let slice = &self.src[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn take_len(&mut self) -> Result<usize, DecodeError> {
        let len = u32::from_le_bytes(self.take_array()?);
        usize::try_from(len).map_err(|_| DecodeError::Custom(format!("length {len} exceeds usize")))
    }
}

/// A value with a fixed wire encoding.
pub trait WireField: Sized {
    /// Encoded size in bytes.
    fn wire_size(&self) -> usize;

    /// Append the encoded value to `dst`.
    ///
    /// # Errors
    ///
    /// Returns an [`EncodeError`] if the value cannot be represented.
    fn write_wire(&self, dst: &mut BytesMut) -> Result<(), EncodeError>;

    /// Decode a value from `src`.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the encoded value is truncated or invalid.
    fn read_wire(src: &mut WireReader<'_>) -> Result<Self, DecodeError>;
}

fn put_len(len: usize, dst: &mut BytesMut) -> Result<(), EncodeError> {
    let len = u32::try_from(len).map_err(|_| EncodeError::LengthOverflow(len))?;
    dst.put_u32_le(len);
    Ok(())
}

macro_rules! int_field {
    ($($ty:ty => $put:ident),* $(,)?) => {
        $(
            impl WireField for $ty {
                fn wire_size(&self) -> usize { size_of::<$ty>() }

                fn write_wire(&self, dst: &mut BytesMut) -> Result<(), EncodeError> {
                    dst.$put(*self);
                    Ok(())
                }

                fn read_wire(src: &mut WireReader<'_>) -> Result<Self, DecodeError> {
                    Ok(<$ty>::from_le_bytes(src.take_array()?))
                }
            }
        )*
    };
}

int_field! {
    u8 => put_u8,
    i8 => put_i8,
    u16 => put_u16_le,
    i16 => put_i16_le,
    u32 => put_u32_le,
    i32 => put_i32_le,
    u64 => put_u64_le,
    i64 => put_i64_le,
}

impl WireField for bool {
    fn wire_size(&self) -> usize { 1 }

    fn write_wire(&self, dst: &mut BytesMut) -> Result<(), EncodeError> {
        dst.put_u8(u8::from(*self));
        Ok(())
    }

    fn read_wire(src: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        match u8::read_wire(src)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DecodeError::InvalidBool(other)),
        }
    }
}

impl<const N: usize> WireField for [u8; N] {
    fn wire_size(&self) -> usize { N }

    fn write_wire(&self, dst: &mut BytesMut) -> Result<(), EncodeError> {
        dst.put_slice(self);
        Ok(())
    }

    fn read_wire(src: &mut WireReader<'_>) -> Result<Self, DecodeError> { src.take_array() }
}

impl WireField for Bytes {
    fn wire_size(&self) -> usize { LENGTH_PREFIX_SIZE + self.len() }

    fn write_wire(&self, dst: &mut BytesMut) -> Result<(), EncodeError> {
        put_len(self.len(), dst)?;
        dst.put_slice(self);
        Ok(())
    }

    fn read_wire(src: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        let len = src.take_len()?;
        Ok(Bytes::copy_from_slice(src.take(len)?))
    }
}

impl WireField for String {
    fn wire_size(&self) -> usize { LENGTH_PREFIX_SIZE + self.len() }

    fn write_wire(&self, dst: &mut BytesMut) -> Result<(), EncodeError> {
        put_len(self.len(), dst)?;
        dst.put_slice(self.as_bytes());
        Ok(())
    }

    fn read_wire(src: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        let len = src.take_len()?;
        let raw = src.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }
}

impl<T: WireField> WireField for Vec<T> {
    fn wire_size(&self) -> usize {
        LENGTH_PREFIX_SIZE + self.iter().map(WireField::wire_size).sum::<usize>()
    }

    fn write_wire(&self, dst: &mut BytesMut) -> Result<(), EncodeError> {
        put_len(self.len(), dst)?;
        self.iter().try_for_each(|item| item.write_wire(dst))
    }

    fn read_wire(src: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        let count = src.take_len()?;
        // The count is untrusted: never reserve more slots than there are
        // bytes left in the body.
        let mut items = Vec::with_capacity(count.min(src.remaining()));
        for _ in 0..count {
            items.push(T::read_wire(src)?);
        }
        Ok(items)
    }
}

/// A nested value carried as a variable-length field using bincode.
///
/// The value is encoded with bincode's standard configuration and written
/// behind the usual `u32` length prefix, so structured payloads such as
/// blocks or transactions can ride inside a message without a hand-written
/// field layout.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Bincoded<T>(pub T);

impl<T> Bincoded<T> {
    /// Unwrap the carried value.
    pub fn into_inner(self) -> T { self.0 }
}

impl<T> WireField for Bincoded<T>
where
    T: Encode + Decode<()>,
{
    fn wire_size(&self) -> usize {
        LENGTH_PREFIX_SIZE + bincode::encode_to_vec(&self.0, config::standard()).map_or(0, |v| v.len())
    }

    fn write_wire(&self, dst: &mut BytesMut) -> Result<(), EncodeError> {
        let body = bincode::encode_to_vec(&self.0, config::standard())?;
        put_len(body.len(), dst)?;
        dst.put_slice(&body);
        Ok(())
    }

    fn read_wire(src: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        let len = src.take_len()?;
        let raw = src.take(len)?;
        let limited = config::standard().with_limit::<MAX_BINCODED_LEN>();
        let (value, used) = bincode::decode_from_slice(raw, limited)?;
        if used != len {
            return Err(DecodeError::Custom(format!(
                "bincode field used {used} of {len} bytes"
            )));
        }
        Ok(Self(value))
    }
}
