use bytes::{Buf, BufMut, Bytes};

use crate::error::Error;
use crate::io::{Decode, Encode};

/// Cancellation key data. The frontend must save these values if it wishes
/// to be able to issue `CancelRequest` messages later.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackendKeyData {
    /// The process ID of this backend.
    pub process_id: u32,

    /// The secret key of this backend.
    pub secret_key: u32,
}

impl Decode for BackendKeyData {
    fn decode(mut buf: Bytes) -> Result<Self, Error> {
        if buf.remaining() < 8 {
            return Err(err_protocol!("BackendKeyData message too short"));
        }

        let process_id = buf.get_u32();
        let secret_key = buf.get_u32();

        Ok(Self {
            process_id,
            secret_key,
        })
    }
}

impl Encode for BackendKeyData {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(b'K');
        buf.put_i32(12);
        buf.put_u32(self.process_id);
        buf.put_u32(self.secret_key);
    }
}
