use bytes::BufMut;

use crate::io::Encode;

#[derive(Debug)]
pub struct Terminate;

impl Encode for Terminate {
    #[inline]
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(b'X');
        buf.put_i32(4);
    }
}
