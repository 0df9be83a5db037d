use bytes::BufMut;

use crate::io::{BufMutExt, Encode};
use crate::types::Oid;

#[derive(Debug)]
pub struct Parse<'a> {
    /// The name of the destination prepared statement (empty selects the
    /// unnamed statement, which is overwritten by the next `Parse`).
    pub statement: &'a str,

    /// The query string to be parsed.
    pub query: &'a str,

    /// The parameter data types specified (may be empty). This is not an
    /// indication of the number of parameters in the query string, only the
    /// number the frontend wants to pre-specify types for.
    pub param_types: &'a [Oid],
}

impl Encode for Parse<'_> {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(b'P');

        buf.put_length_prefixed(|buf| {
            buf.put_str_nul(self.statement);
            buf.put_str_nul(self.query);

            buf.put_i16(self.param_types.len() as i16);

            for ty in self.param_types {
                buf.put_u32(ty.0);
            }
        });
    }
}
