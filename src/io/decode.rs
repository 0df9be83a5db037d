use bytes::Bytes;

use crate::error::Error;

/// A type that can be decoded from a message body.
///
/// The buffer contains exactly the message contents: the tag byte and the
/// length prefix have already been consumed by the framing layer.
pub trait Decode: Sized {
    fn decode(buf: Bytes) -> Result<Self, Error>;
}
