use std::ops::Deref;

use bytes::{Buf, BufMut, Bytes};

use crate::error::Error;
use crate::io::{BufMutExt, Decode, Encode};

/// A chunk of COPY data. Sent by either side; the payload is an arbitrary
/// slice of the overall data stream, with no row or message alignment.
#[derive(Debug, PartialEq)]
pub struct CopyData<B>(pub B);

impl<B: Deref<Target = [u8]>> Encode for CopyData<B> {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.reserve(5 + self.0.len());
        buf.push(b'd');
        buf.put_i32(self.0.len() as i32 + 4);
        buf.extend_from_slice(&self.0);
    }
}

impl Decode for CopyData<Bytes> {
    fn decode(buf: Bytes) -> Result<Self, Error> {
        Ok(CopyData(buf))
    }
}

/// The sender reports that the COPY data stream is complete.
#[derive(Debug, PartialEq)]
pub struct CopyDone;

impl Encode for CopyDone {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(b'c');
        buf.put_i32(4);
    }
}

impl Decode for CopyDone {
    fn decode(_: Bytes) -> Result<Self, Error> {
        Ok(CopyDone)
    }
}

/// The frontend aborts an in-progress COPY, with a human-readable reason.
#[derive(Debug, PartialEq)]
pub struct CopyFail {
    pub message: String,
}

impl CopyFail {
    pub fn new(message: impl Into<String>) -> Self {
        CopyFail {
            message: message.into(),
        }
    }
}

impl Encode for CopyFail {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(b'f');
        buf.put_length_prefixed(|buf| {
            buf.put_str_nul(&self.message);
        });
    }
}

impl Decode for CopyFail {
    fn decode(mut buf: Bytes) -> Result<Self, Error> {
        use crate::io::BufExt;

        Ok(CopyFail {
            message: buf.get_str_nul()?,
        })
    }
}

/// The server acknowledges a `COPY` command and describes the transfer:
/// sent as `CopyInResponse`, `CopyOutResponse`, or `CopyBothResponse`
/// depending on the direction.
#[derive(Debug, PartialEq)]
pub struct CopyResponse {
    /// Overall format: 0 for textual, 1 for binary.
    pub format: i8,

    /// Per-column format codes. In textual mode all are zero; in binary
    /// mode all are one.
    pub column_formats: Vec<i16>,
}

impl CopyResponse {
    pub fn num_columns(&self) -> usize {
        self.column_formats.len()
    }

    // serialize under the given direction tag ('G', 'H', or 'W')
    pub fn encode_tagged(&self, tag: u8, buf: &mut Vec<u8>) {
        buf.push(tag);
        buf.put_length_prefixed(|buf| {
            buf.put_i8(self.format);
            buf.put_i16(self.column_formats.len() as i16);
            for &format in &self.column_formats {
                buf.put_i16(format);
            }
        });
    }
}

impl Decode for CopyResponse {
    fn decode(mut buf: Bytes) -> Result<Self, Error> {
        if buf.remaining() < 3 {
            return Err(err_protocol!("copy response too short"));
        }

        let format = buf.get_i8();
        let columns = buf.get_i16();

        if buf.remaining() < (columns as usize) * 2 {
            return Err(err_protocol!("copy response truncated"));
        }

        let column_formats = (0..columns).map(|_| buf.get_i16()).collect();

        Ok(CopyResponse {
            format,
            column_formats,
        })
    }
}
