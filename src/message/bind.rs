use bytes::BufMut;

use crate::io::{BufMutExt, Encode};
use crate::types::PgFormat;

#[derive(Debug)]
pub struct Bind<'a> {
    /// The name of the destination portal (empty selects the unnamed portal).
    pub portal: &'a str,

    /// The name of the source prepared statement.
    pub statement: &'a str,

    /// The parameter format codes. May be empty to indicate that there are
    /// no parameters or that all parameters use the text format; may have
    /// one entry applying to all parameters; otherwise one per parameter.
    pub formats: &'a [PgFormat],

    /// The number of parameter values that follow.
    pub num_params: i16,

    /// The parameter values, pre-encoded as an `i32` length (`-1` for NULL)
    /// followed by that many bytes, repeated `num_params` times.
    pub params: &'a [u8],

    /// The result-column format codes, with the same shorthand conventions
    /// as `formats`.
    pub result_formats: &'a [PgFormat],
}

impl Encode for Bind<'_> {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(b'B');

        buf.put_length_prefixed(|buf| {
            buf.put_str_nul(self.portal);
            buf.put_str_nul(self.statement);

            buf.put_i16(self.formats.len() as i16);
            for &format in self.formats {
                buf.put_i16(format as i16);
            }

            buf.put_i16(self.num_params);
            buf.extend_from_slice(self.params);

            buf.put_i16(self.result_formats.len() as i16);
            for &format in self.result_formats {
                buf.put_i16(format as i16);
            }
        });
    }
}
