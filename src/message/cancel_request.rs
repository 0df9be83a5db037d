use bytes::{Buf, BufMut, Bytes};

use crate::error::Error;
use crate::io::{Decode, Encode};

/// The cancel request code: `1234 5678` in the most- and least-significant
/// 16 bits. Chosen to not collide with any protocol version number.
pub const CANCEL_REQUEST_CODE: i32 = (1234 << 16) | 5678;

/// Sent over a *new* connection to ask the server to abandon the currently
/// running command of the identified backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CancelRequest {
    /// The process ID of the target backend.
    pub process_id: u32,

    /// The secret key for the target backend.
    pub secret_key: u32,
}

impl Encode for CancelRequest {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_i32(16);
        buf.put_i32(CANCEL_REQUEST_CODE);
        buf.put_u32(self.process_id);
        buf.put_u32(self.secret_key);
    }
}

impl Decode for CancelRequest {
    fn decode(mut buf: Bytes) -> Result<Self, Error> {
        if buf.remaining() < 12 {
            return Err(err_protocol!("cancel request too short"));
        }

        let code = buf.get_i32();
        if code != CANCEL_REQUEST_CODE {
            return Err(err_protocol!("invalid cancel request code: {}", code));
        }

        Ok(Self {
            process_id: buf.get_u32(),
            secret_key: buf.get_u32(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let m = CancelRequest {
            process_id: 10182,
            secret_key: 2304285997,
        };

        let mut buf = Vec::new();
        m.encode(&mut buf);

        assert_eq!(buf.len(), 16);
        assert_eq!(&buf[..8], b"\0\0\0\x10\x04\xd2\x16\x2e");

        // the length prefix is consumed by framing before decode
        assert_eq!(CancelRequest::decode(Bytes::copy_from_slice(&buf[4..])).unwrap(), m);
    }
}
