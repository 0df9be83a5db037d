use bytes::BufMut;

use crate::io::Encode;

// Closes the current implicit transaction (if any) and instructs the server
// to emit a ReadyForQuery once every preceding extended-query command has
// been processed.

#[derive(Debug)]
pub struct Sync;

impl Encode for Sync {
    #[inline]
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(b'S');
        buf.put_i32(4);
    }
}
