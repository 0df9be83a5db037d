use bytes::{Buf, BufMut, Bytes};
use smallvec::SmallVec;

use crate::error::Error;
use crate::io::{BufMutExt, Decode, Encode};
use crate::types::Oid;

/// Describes the parameters needed by a prepared statement.
#[derive(Debug, PartialEq)]
pub struct ParameterDescription {
    pub types: SmallVec<[Oid; 6]>,
}

impl ParameterDescription {
    pub fn new(types: Vec<Oid>) -> Self {
        Self {
            types: types.into(),
        }
    }
}

impl Decode for ParameterDescription {
    fn decode(mut buf: Bytes) -> Result<Self, Error> {
        if buf.remaining() < 2 {
            return Err(err_protocol!("ParameterDescription too short"));
        }

        let cnt = buf.get_u16();

        if buf.remaining() < (cnt as usize) * 4 {
            return Err(err_protocol!("ParameterDescription truncated"));
        }

        let mut types = SmallVec::with_capacity(cnt as usize);

        for _ in 0..cnt {
            types.push(Oid(buf.get_u32()));
        }

        Ok(Self { types })
    }
}

impl Encode for ParameterDescription {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(b't');
        buf.put_length_prefixed(|buf| {
            buf.put_u16(self.types.len() as u16);
            for oid in &self.types {
                buf.put_u32(oid.0);
            }
        });
    }
}
