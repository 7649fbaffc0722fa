use std::fmt;

use crate::{InvalidFieldErr, NotEnoughBytesErr, OtherErr, WriteBuf, WriteCursor};

/// A result type for encoding operations, which can either succeed with a value of type `T`
/// or fail with an [`EncodeError`].
pub type EncodeResult<T> = Result<T, EncodeError>;

/// An error type specifically for encoding operations, wrapping an [`EncodeErrorKind`].
pub type EncodeError = gapitrace_error::Error<EncodeErrorKind>;

/// Kinds of failure that can occur while encoding a fixed-layout record into a buffer.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub enum EncodeErrorKind {
    /// Not enough room left in the destination buffer.
    NotEnoughBytes { received: usize, expected: usize },
    /// A field holds a value that cannot be represented on the wire.
    InvalidField { field: &'static str, reason: &'static str },
    /// Any other encode-time failure.
    Other { description: &'static str },
}

impl std::error::Error for EncodeErrorKind {}

impl fmt::Display for EncodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotEnoughBytes { received, expected } => write!(
                f,
                "not enough bytes provided to encode: received {received} bytes, expected {expected} bytes"
            ),
            Self::InvalidField { field, reason } => write!(f, "invalid `{field}`: {reason}"),
            Self::Other { description } => write!(f, "other ({description})"),
        }
    }
}

impl NotEnoughBytesErr for EncodeError {
    fn not_enough_bytes(context: &'static str, received: usize, expected: usize) -> Self {
        Self::new(context, EncodeErrorKind::NotEnoughBytes { received, expected })
    }
}

impl InvalidFieldErr for EncodeError {
    fn invalid_field(context: &'static str, field: &'static str, reason: &'static str) -> Self {
        Self::new(context, EncodeErrorKind::InvalidField { field, reason })
    }
}

impl OtherErr for EncodeError {
    fn other(context: &'static str, description: &'static str) -> Self {
        Self::new(context, EncodeErrorKind::Other { description })
    }
}

/// A fixed-layout record that can be encoded into its on-disk binary form.
///
/// This trait is object-safe and may be used in a dynamic context.
pub trait Encode {
    /// Encodes this record in-place using the provided `WriteCursor`.
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()>;

    /// Name used in error contexts and logs.
    fn name(&self) -> &'static str;

    /// Size in bytes of the encoded form.
    fn size(&self) -> usize;
}

crate::assert_obj_safe!(Encode);

/// Encodes the given record in-place into the provided buffer and returns the number of bytes written.
pub fn encode<T>(value: &T, dst: &mut [u8]) -> EncodeResult<usize>
where
    T: Encode + ?Sized,
{
    let mut cursor = WriteCursor::new(dst);
    encode_cursor(value, &mut cursor)?;
    Ok(cursor.pos())
}

/// Encodes the given record in-place using the provided `WriteCursor`.
pub fn encode_cursor<T>(value: &T, dst: &mut WriteCursor<'_>) -> EncodeResult<()>
where
    T: Encode + ?Sized,
{
    value.encode(dst)
}

/// Same as `encode` but grows the buffer when it is too small to fit the record.
pub fn encode_buf<T>(value: &T, buf: &mut WriteBuf) -> EncodeResult<usize>
where
    T: Encode + ?Sized,
{
    let size = value.size();
    let dst = buf.unfilled_to(size);
    let written = encode(value, dst)?;
    debug_assert_eq!(written, size);
    buf.advance(written);
    Ok(written)
}

/// Same as `encode` but allocates and returns a new buffer each time.
pub fn encode_vec<T>(value: &T) -> EncodeResult<Vec<u8>>
where
    T: Encode + ?Sized,
{
    let size = value.size();
    let mut buf = vec![0u8; size];
    let written = encode(value, buf.as_mut_slice())?;
    debug_assert_eq!(written, size);
    Ok(buf)
}

/// Name of this record, for error contexts and logs.
pub fn name<T: Encode>(value: &T) -> &'static str {
    value.name()
}

/// Size in bytes of the encoded form.
pub fn size<T: Encode>(value: &T) -> usize {
    value.size()
}
