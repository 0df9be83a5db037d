use bytes::BufMut;

use crate::io::{BufMutExt, Encode};

#[derive(Debug)]
pub struct Execute<'a> {
    /// The name of the portal to execute (empty selects the unnamed portal).
    pub portal: &'a str,

    /// Maximum number of rows to return before suspending the portal.
    /// Zero denotes "no limit".
    pub limit: u32,
}

impl Encode for Execute<'_> {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(b'E');

        buf.put_length_prefixed(|buf| {
            buf.put_str_nul(self.portal);
            buf.put_u32(self.limit);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_execute() {
        const EXPECTED: &[u8] = b"E\0\0\0\x09\0\0\0\0\0";

        let mut buf = Vec::new();
        Execute {
            portal: "",
            limit: 0,
        }
        .encode(&mut buf);

        assert_eq!(buf, EXPECTED);
    }
}
